use pretty_assertions::assert_eq;
use std::fs;
use tempfile::TempDir;

use tree_sync::content::load_collection;
use tree_sync_core::node::{LocalNode, NodeKind};

fn names(node: &LocalNode) -> Vec<(String, NodeKind)> {
    match node {
        LocalNode::Folder(folder) => folder
            .children
            .iter()
            .map(|c| (c.name().to_string(), c.kind()))
            .collect(),
        _ => Vec::new(),
    }
}

#[test]
fn directory_layout_maps_onto_node_kinds() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("Chapter 2")).unwrap();
    fs::create_dir_all(root.join("Chapter 1")).unwrap();
    fs::write(root.join("Chapter 1/opening.md"), "**Vajra:** Hello.\n").unwrap();
    fs::write(
        root.join("cast.md"),
        "| Name | Portrait |\n|---|---|\n| Vajra | ![v](https://img.example/v.png) |\n",
    )
    .unwrap();
    fs::write(
        root.join("voice-lines.md"),
        "| Label | Japanese |\n|---|---|\n| Hi | やあ |\n",
    )
    .unwrap();
    fs::write(root.join("notes.txt"), "ignored").unwrap();
    fs::write(root.join(".draft.md"), "hidden").unwrap();

    let tree = load_collection("Story", root).unwrap();

    assert_eq!(tree.name(), "Story");
    assert_eq!(
        names(&tree),
        vec![
            ("Chapter 1".to_string(), NodeKind::Folder),
            ("Chapter 2".to_string(), NodeKind::Folder),
            ("cast".to_string(), NodeKind::Dataset),
            ("voice-lines".to_string(), NodeKind::Dataset),
        ]
    );

    let LocalNode::Folder(story) = &tree else {
        panic!("collection root must be a folder");
    };
    let LocalNode::Dataset(cast) = &story.children[2] else {
        panic!("cast.md must load as a dataset");
    };
    assert_eq!(cast.rows.len(), 1);
    assert_eq!(cast.rows[0].value("Name"), "Vajra");
    assert_eq!(names(&story.children[0]), vec![("opening".to_string(), NodeKind::Document)]);
}

#[test]
fn missing_source_dir_is_an_error() {
    let dir = TempDir::new().unwrap();
    let err = load_collection("Story", &dir.path().join("absent")).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to load collection 'Story'"));
}
