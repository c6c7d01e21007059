//! # content: build a [`LocalNode`] tree from a collection directory
//!
//! The loader is the producer side of a sync: it turns files on disk into the
//! engine's node model and has no knowledge of the remote.
//!
//! ## Layout rules
//! - Directories become folders; hidden entries are ignored.
//! - `cast.md` becomes a dataset of characters (`Name`, `Portrait`,
//!   `WikiUrl`). Each portrait is also attached to its row as an image.
//! - Markdown files whose name contains `voice` or `quote` become datasets of
//!   voice lines (`Label`, `Japanese`, `Chinese`, `English`, `Audio`), with
//!   the audio attached to the row.
//! - Every other `*.md` file becomes a document named after its file stem.
//!
//! Wiki thumbnail URLs in cast and voice tables are rewritten to their stable
//! file URL before they reach a row. Story markdown also understands
//! `**Key**: Value` profile lines.
//!
//! Entries are sorted by file name so the same directory always yields the
//! same tree.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info};
use tree_sync_core::node::{Block, Column, ColumnKind, LocalNode, Row, Schema, Span};

static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").unwrap());
static SPEAKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*\*(.+?)[：:]\*\*\s*(.*)$").unwrap());
static PROFILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*\*(.+?)\*\*[：:]\s*(.*)$").unwrap());
static MEDIA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^!\[[^\]]*\]\(([^)\s]+)\)$").unwrap());
static IMAGE_CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\(([^)]+)\)").unwrap());
static LINKED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\|\s*\[([^\]]+)\]\((https?://[^\s)]+)\)").unwrap());
static PLAIN_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\|\s*([^|\[]+?)\s*\|").unwrap());
static AUDIO_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[.*?\]\((https?://[^\s)]+)\)").unwrap());

static WIKI_FILE: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"/images/(?:thumb/)?[0-9a-f]/[0-9a-f]{2}/([^/]+)$").unwrap(),
        Regex::new(r"/images/thumb/[0-9a-f]/[0-9a-f]{2}/([^/]+)/").unwrap(),
    ]
});

const WIKI_HOST: &str = "https://gbf.wiki/";
const SOURCE_PREFIX: &str = "数据源：";
const AUDIO_EXTENSIONS: [&str; 4] = [".mp3", ".ogg", ".wav", ".m4a"];

pub fn cast_schema() -> Schema {
    Schema::new(vec![
        Column::new("Name", ColumnKind::Title),
        Column::new("Portrait", ColumnKind::Files),
        Column::new("WikiUrl", ColumnKind::Url),
    ])
}

pub fn voice_schema() -> Schema {
    Schema::new(vec![
        Column::new("Label", ColumnKind::Title),
        Column::new("Japanese", ColumnKind::RichText),
        Column::new("Chinese", ColumnKind::RichText),
        Column::new("English", ColumnKind::RichText),
        Column::new("Audio", ColumnKind::Files),
    ])
}

/// Load `source_dir` as a folder named `name`.
pub fn load_collection(name: &str, source_dir: &Path) -> Result<LocalNode> {
    let children = load_dir(source_dir)
        .with_context(|| format!("Failed to load collection '{name}' from {}", source_dir.display()))?;
    info!(collection = name, children = children.len(), "Loaded collection");
    Ok(LocalNode::folder(name, children))
}

fn load_dir(dir: &Path) -> Result<Vec<LocalNode>> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Failed to list directory {}", dir.display()))?;
    entries.sort_by_key(|e| e.file_name());

    let mut nodes = Vec::new();
    for entry in entries {
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            nodes.push(LocalNode::folder(file_name, load_dir(&path)?));
        } else if let Some(node) = load_file(&path)? {
            nodes.push(node);
        }
    }
    Ok(nodes)
}

fn load_file(path: &Path) -> Result<Option<LocalNode>> {
    if path.extension().and_then(|e| e.to_str()) != Some("md") {
        debug!(path = %path.display(), "Skipping non-markdown file");
        return Ok(None);
    }
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return Ok(None);
    };
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let lowered = stem.to_lowercase();
    let node = if lowered == "cast" {
        LocalNode::dataset(stem, cast_schema(), parse_cast_table(&content))
    } else if lowered.contains("voice") || lowered.contains("quote") {
        LocalNode::dataset(stem, voice_schema(), parse_voice_table(&content))
    } else {
        LocalNode::document(stem, parse_markdown(&content))
    };
    Ok(Some(node))
}

/// Rewrite a wiki image or thumbnail URL to the stable `Special:FilePath`
/// form, so thumbnail size changes do not look like content changes.
/// Other URLs are returned unchanged.
pub fn stable_media_url(url: &str) -> String {
    if !url.starts_with(WIKI_HOST) {
        return url.to_string();
    }
    WIKI_FILE
        .iter()
        .find_map(|pattern| pattern.captures(url))
        .map(|caps| format!("{WIKI_HOST}Special:FilePath/{}", &caps[1]))
        .unwrap_or_else(|| url.to_string())
}

fn media_block(url: &str) -> Block {
    let lowered = url.to_lowercase();
    if AUDIO_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext)) {
        Block::audio(url)
    } else {
        Block::image(url)
    }
}

/// Parse story markdown into blocks.
pub fn parse_markdown(content: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if line.len() >= 3 && line.chars().all(|c| c == '-') {
            blocks.push(Block::Divider);
        } else if let Some(caps) = HEADING.captures(line) {
            blocks.push(Block::Heading {
                level: caps[1].len().min(3) as u8,
                text: caps[2].trim().to_string(),
            });
        } else if let Some(caps) = MEDIA.captures(line) {
            blocks.push(media_block(&caps[1]));
        } else if let Some(caps) = SPEAKER.captures(line) {
            let mut spans = vec![Span::bold(format!("{}: ", caps[1].trim()))];
            let said = caps[2].trim();
            if !said.is_empty() {
                spans.push(Span::plain(said));
            }
            blocks.push(Block::Paragraph { spans });
        } else if let Some(caps) = PROFILE.captures(line) {
            blocks.push(Block::Paragraph {
                spans: vec![
                    Span::bold(caps[1].trim()),
                    Span::plain(format!(": {}", caps[2].trim())),
                ],
            });
        } else if line.starts_with(SOURCE_PREFIX) {
            blocks.push(Block::Paragraph {
                spans: vec![Span::italic(line)],
            });
        } else if line.starts_with('*') && !line.starts_with("**") {
            let narration = line.trim_matches('*').trim();
            if !narration.is_empty() {
                blocks.push(Block::Paragraph {
                    spans: vec![Span::italic(narration)],
                });
            }
        } else {
            blocks.push(Block::text(line));
        }
    }
    blocks
}

/// Parse a cast table. Rows look like `| [Name](wiki) | ![alt](img) |` or
/// `| Name | ![alt](img) |`; rows without an image are skipped.
pub fn parse_cast_table(content: &str) -> Vec<Row> {
    let mut rows = Vec::new();
    for raw in content.lines() {
        let line = raw.trim();
        if !line.starts_with('|') || line.contains("---") {
            continue;
        }
        let Some(image) = IMAGE_CELL.captures(line).map(|c| stable_media_url(c[1].trim())) else {
            continue;
        };

        let (name, wiki) = if let Some(caps) = LINKED_NAME.captures(line) {
            (caps[1].trim().to_string(), Some(caps[2].trim().to_string()))
        } else if let Some(caps) = PLAIN_NAME.captures(line) {
            (caps[1].trim().to_string(), None)
        } else {
            continue;
        };
        if name.is_empty() {
            continue;
        }

        let mut values = vec![("Name", name), ("Portrait", image.clone())];
        if let Some(wiki) = wiki {
            values.push(("WikiUrl", wiki));
        }
        rows.push(
            Row::new(values)
                .with_body(vec![Block::image(image.clone())])
                .with_icon(image),
        );
    }
    rows
}

fn cells(line: &str) -> Vec<String> {
    let inner = line.trim().trim_start_matches('|').trim_end_matches('|');
    inner.split('|').map(|c| c.trim().to_string()).collect()
}

fn header_columns(cells: &[String]) -> BTreeMap<&'static str, usize> {
    let mut columns = BTreeMap::new();
    for (i, cell) in cells.iter().enumerate() {
        let cell = cell.to_lowercase();
        let column = if cell.contains("label") && cell.len() < 15 {
            "Label"
        } else if cell.contains("japanese") || cell == "jp" {
            "Japanese"
        } else if cell.contains("chinese") || cell == "cn" {
            "Chinese"
        } else if cell.contains("english") || cell == "en" {
            "English"
        } else if cell.contains("audio") {
            "Audio"
        } else {
            continue;
        };
        columns.insert(column, i);
    }
    columns
}

/// Parse voice-line tables. A file may hold several tables, each with its own
/// header. Rows without a label inherit the previous one as `Label #n`.
pub fn parse_voice_table(content: &str) -> Vec<Row> {
    let mut rows = Vec::new();
    let mut columns: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut in_body = false;
    let mut last_label = String::new();
    let mut repeats = 0;

    for raw in content.lines() {
        let line = raw.trim();
        if !line.starts_with('|') {
            if !line.is_empty() && !line.starts_with('#') {
                in_body = false;
            }
            continue;
        }
        if line.contains("---") {
            in_body = true;
            continue;
        }

        let cells = cells(line);
        let header = header_columns(&cells);
        if header.len() >= 2 {
            columns = header;
            in_body = false;
            continue;
        }
        if !in_body {
            continue;
        }

        let mut values: BTreeMap<&str, String> = BTreeMap::new();
        for (&column, &index) in &columns {
            let Some(cell) = cells.get(index) else {
                continue;
            };
            let value = if column == "Audio" {
                match AUDIO_LINK.captures(cell) {
                    Some(caps) => stable_media_url(&caps[1]),
                    None if cell.starts_with("http") => stable_media_url(cell),
                    None => String::new(),
                }
            } else {
                cell.clone()
            };
            if !value.is_empty() {
                values.insert(column, value);
            }
        }

        let has_content = ["Japanese", "Chinese", "Audio"]
            .iter()
            .any(|c| values.contains_key(c));
        if !has_content {
            continue;
        }

        match values.get("Label").cloned() {
            Some(label) => {
                last_label = label;
                repeats = 1;
            }
            None if !last_label.is_empty() => {
                repeats += 1;
                values.insert("Label", format!("{last_label} #{repeats}"));
            }
            None => {
                let source = values
                    .get("Japanese")
                    .or_else(|| values.get("Chinese"))
                    .map(|s| s.chars().take(30).collect::<String>())
                    .unwrap_or_default();
                let label = if source.is_empty() { "Voice".to_string() } else { source };
                values.insert("Label", label);
            }
        }

        let audio = values.get("Audio").cloned();
        let mut row = Row::new(values);
        if let Some(audio) = audio {
            row = row.with_body(vec![Block::audio(audio)]);
        }
        rows.push(row);
    }
    rows
}
