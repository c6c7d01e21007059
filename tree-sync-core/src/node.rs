//! Local content tree.
//!
//! A [`LocalNode`] is one of three closed kinds. Folders only hold children,
//! documents hold a block body and datasets hold a schema plus rows. The tree
//! is produced by a content loader and is treated as final by the engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A node of the local content tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LocalNode {
    Folder(FolderNode),
    Document(DocumentNode),
    Dataset(DatasetNode),
}

impl LocalNode {
    pub fn folder(name: impl Into<String>, children: Vec<LocalNode>) -> Self {
        LocalNode::Folder(FolderNode {
            name: name.into(),
            children,
        })
    }

    pub fn document(name: impl Into<String>, body: Vec<Block>) -> Self {
        LocalNode::Document(DocumentNode {
            name: name.into(),
            body,
        })
    }

    pub fn dataset(name: impl Into<String>, schema: Schema, rows: Vec<Row>) -> Self {
        LocalNode::Dataset(DatasetNode {
            name: name.into(),
            schema,
            rows,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            LocalNode::Folder(f) => &f.name,
            LocalNode::Document(d) => &d.name,
            LocalNode::Dataset(d) => &d.name,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            LocalNode::Folder(_) => NodeKind::Folder,
            LocalNode::Document(_) => NodeKind::Document,
            LocalNode::Dataset(_) => NodeKind::Dataset,
        }
    }

    /// Prunes the tree to the branches whose path contains `filter`
    /// (case-insensitive). A matching node keeps its whole subtree and the
    /// ancestors of a match are kept so their identities can be resolved.
    /// Returns `None` when nothing matches.
    pub fn filtered(&self, filter: &str) -> Option<LocalNode> {
        let needle = filter.to_lowercase();
        self.filter_at(&NodePath::root(self.name()), &needle)
    }

    fn filter_at(&self, path: &NodePath, needle: &str) -> Option<LocalNode> {
        if path.as_str().to_lowercase().contains(needle) {
            return Some(self.clone());
        }
        match self {
            LocalNode::Folder(folder) => {
                let children: Vec<LocalNode> = folder
                    .children
                    .iter()
                    .filter_map(|c| c.filter_at(&path.child(c.name()), needle))
                    .collect();
                if children.is_empty() {
                    None
                } else {
                    Some(LocalNode::folder(folder.name.clone(), children))
                }
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    Document,
    Dataset,
    Row,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderNode {
    pub name: String,
    pub children: Vec<LocalNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentNode {
    pub name: String,
    pub body: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetNode {
    pub name: String,
    pub schema: Schema,
    pub rows: Vec<Row>,
}

/// Block-level body element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Block {
    Heading { level: u8, text: String },
    Paragraph { spans: Vec<Span> },
    Media { kind: MediaKind, url: String },
    Divider,
}

impl Block {
    /// A paragraph made of a single plain run.
    pub fn text(text: impl Into<String>) -> Self {
        Block::Paragraph {
            spans: vec![Span::plain(text)],
        }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Block::Media {
            kind: MediaKind::Image,
            url: url.into(),
        }
    }

    pub fn audio(url: impl Into<String>) -> Self {
        Block::Media {
            kind: MediaKind::Audio,
            url: url.into(),
        }
    }
}

/// An emphasis run inside a paragraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub text: String,
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
}

impl Span {
    pub fn plain(text: impl Into<String>) -> Self {
        Span {
            text: text.into(),
            bold: false,
            italic: false,
        }
    }

    pub fn bold(text: impl Into<String>) -> Self {
        Span {
            bold: true,
            ..Span::plain(text)
        }
    }

    pub fn italic(text: impl Into<String>) -> Self {
        Span {
            italic: true,
            ..Span::plain(text)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    File,
}

/// Column types a dataset can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Title,
    RichText,
    Url,
    Files,
    Number,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Column {
            name: name.into(),
            kind,
        }
    }
}

/// Ordered column declaration. The title column comes first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Schema { columns }
    }

    pub fn title_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.kind == ColumnKind::Title)
    }

    /// Columns in fingerprint order: title first, then declaration order.
    pub fn ordered(&self) -> impl Iterator<Item = &Column> {
        self.title_column().into_iter().chain(
            self.columns
                .iter()
                .filter(|c| c.kind != ColumnKind::Title),
        )
    }

    /// Exactly one title column and no repeated names.
    pub fn validate(&self) -> Result<(), String> {
        let titles = self
            .columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Title)
            .count();
        if titles != 1 {
            return Err(format!("expected exactly one title column, found {titles}"));
        }
        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(format!("column '{}' declared twice", column.name));
            }
        }
        Ok(())
    }
}

/// One dataset record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Row {
    pub values: BTreeMap<String, String>,
    /// Rich content attached to the row's own page.
    #[serde(default)]
    pub body: Vec<Block>,
    #[serde(default)]
    pub icon: Option<String>,
}

impl Row {
    pub fn new<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Row {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            body: Vec::new(),
            icon: None,
        }
    }

    pub fn with_body(mut self, body: Vec<Block>) -> Self {
        self.body = body;
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn value(&self, column: &str) -> &str {
        self.values.get(column).map(String::as_str).unwrap_or("")
    }

    /// Value of the schema's title column.
    pub fn title<'a>(&'a self, schema: &Schema) -> &'a str {
        schema
            .title_column()
            .map(|c| self.value(&c.name))
            .unwrap_or("")
    }
}

/// Logical address of a node, used as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(String);

impl NodePath {
    pub fn root(name: &str) -> Self {
        NodePath(name.to_string())
    }

    pub fn child(&self, name: &str) -> Self {
        NodePath(format!("{}/{}", self.0, name))
    }

    /// Address of a dataset row, keyed by its title.
    pub fn row(&self, title: &str) -> Self {
        NodePath(format!("{}#{}", self.0, title))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if `other` is this path or lies underneath it.
    pub fn contains(&self, other: &str) -> bool {
        other == self.0
            || other
                .strip_prefix(self.0.as_str())
                .is_some_and(|rest| rest.starts_with('/') || rest.starts_with('#'))
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodePath {
    fn from(s: &str) -> Self {
        NodePath(s.to_string())
    }
}
