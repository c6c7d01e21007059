//! # render: local blocks and rows to remote JSON payloads
//!
//! Stateless transform from the engine's [`Block`], [`Schema`] and [`Row`]
//! types into the block and property objects the document API accepts, plus
//! the reverse mapping for schemas and row titles read back from it.
//!
//! ## Limits
//! - A single text object holds at most [`TEXT_CHUNK`] characters; longer
//!   text is split on a word boundary where one is close enough.
//! - Appends carry at most [`APPEND_BATCH`] blocks per request.

use serde_json::{json, Map, Value};
use tracing::debug;
use tree_sync_core::node::{Block, Column, ColumnKind, MediaKind, Row, Schema, Span};

/// Maximum characters per text object.
pub const TEXT_CHUNK: usize = 1800;

/// Maximum blocks per append request.
pub const APPEND_BATCH: usize = 80;

/// Split `text` into chunks of at most `max` characters, preferring to cut
/// at a space. Whitespace-only input yields nothing.
pub fn split_text(text: &str, max: usize) -> Vec<String> {
    let mut rest = text.trim();
    let mut out = Vec::new();
    while rest.chars().count() > max {
        // byte offset of the first char past the limit
        let limit = rest
            .char_indices()
            .nth(max)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let cut = match rest[..limit].rfind(' ') {
            Some(space) if rest[..space].chars().count() >= 200 => space,
            _ => limit,
        };
        out.push(rest[..cut].trim().to_string());
        rest = rest[cut..].trim();
    }
    if !rest.is_empty() {
        out.push(rest.to_string());
    }
    out
}

fn text_object(content: &str, bold: bool, italic: bool) -> Value {
    let color = if italic { "gray" } else { "default" };
    json!({
        "type": "text",
        "text": { "content": content },
        "annotations": {
            "bold": bold,
            "italic": italic,
            "strikethrough": false,
            "underline": false,
            "code": false,
            "color": color,
        }
    })
}

/// Plain rich text array for a property or title.
pub fn rich_text(text: &str) -> Value {
    Value::Array(
        split_text(text, TEXT_CHUNK)
            .iter()
            .map(|chunk| text_object(chunk, false, false))
            .collect(),
    )
}

fn block(kind: &str, body: Value) -> Value {
    let mut object = Map::new();
    object.insert("object".into(), json!("block"));
    object.insert("type".into(), json!(kind));
    object.insert(kind.to_string(), body);
    Value::Object(object)
}

/// Paragraph blocks for a run of spans. A paragraph never carries more than
/// [`TEXT_CHUNK`] characters in total.
fn paragraphs(spans: &[Span]) -> Vec<Value> {
    let mut out = Vec::new();
    let mut current: Vec<Value> = Vec::new();
    let mut used = 0;
    for span in spans {
        for piece in split_text(&span.text, TEXT_CHUNK) {
            let len = piece.chars().count();
            if used + len > TEXT_CHUNK && !current.is_empty() {
                out.push(block("paragraph", json!({ "rich_text": current })));
                current = Vec::new();
                used = 0;
            }
            current.push(text_object(&piece, span.bold, span.italic));
            used += len;
        }
    }
    if !current.is_empty() {
        out.push(block("paragraph", json!({ "rich_text": current })));
    }
    out
}

fn media(kind: MediaKind, url: &str) -> Value {
    let kind = match kind {
        MediaKind::Image => "image",
        MediaKind::Audio => "audio",
        MediaKind::File => "file",
    };
    block(
        kind,
        json!({ "type": "external", "external": { "url": url } }),
    )
}

/// Render a body into API block objects.
pub fn render_blocks(blocks: &[Block]) -> Vec<Value> {
    let mut out = Vec::with_capacity(blocks.len());
    for b in blocks {
        match b {
            Block::Heading { level, text } => {
                let kind = format!("heading_{}", (*level).clamp(1, 3));
                for chunk in split_text(text, TEXT_CHUNK) {
                    out.push(block(
                        &kind,
                        json!({ "rich_text": [text_object(&chunk, true, false)] }),
                    ));
                }
            }
            Block::Paragraph { spans } => out.extend(paragraphs(spans)),
            Block::Media { kind, url } => out.push(media(*kind, url)),
            Block::Divider => out.push(block("divider", json!({}))),
        }
    }
    out
}

fn property_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Title => "title",
        ColumnKind::RichText => "rich_text",
        ColumnKind::Url => "url",
        ColumnKind::Files => "files",
        ColumnKind::Number => "number",
    }
}

/// Property declarations for creating a dataset.
pub fn schema_properties(schema: &Schema) -> Value {
    let mut properties = Map::new();
    for column in &schema.columns {
        let mut declaration = Map::new();
        declaration.insert(property_type(column.kind).to_string(), json!({}));
        properties.insert(column.name.clone(), Value::Object(declaration));
    }
    Value::Object(properties)
}

/// Schema read back from a data source's `properties` object. Property types
/// the engine cannot write are skipped.
pub fn parse_schema(properties: &Value) -> Schema {
    let mut columns = Vec::new();
    if let Some(map) = properties.as_object() {
        for (name, property) in map {
            let kind = match property.get("type").and_then(Value::as_str) {
                Some("title") => ColumnKind::Title,
                Some("rich_text") => ColumnKind::RichText,
                Some("url") => ColumnKind::Url,
                Some("files") => ColumnKind::Files,
                Some("number") => ColumnKind::Number,
                other => {
                    debug!(property = %name, kind = ?other, "[REMOTE] Ignoring unsupported property type");
                    continue;
                }
            };
            columns.push(Column::new(name.clone(), kind));
        }
    }
    Schema::new(columns)
}

/// Property values for creating or overwriting a row.
pub fn row_properties(schema: &Schema, row: &Row) -> Value {
    let title = row.title(schema);
    let mut properties = Map::new();
    for column in &schema.columns {
        let value = row.value(&column.name);
        let property = match column.kind {
            ColumnKind::Title => json!({ "title": rich_text(value) }),
            ColumnKind::RichText => json!({ "rich_text": rich_text(value) }),
            ColumnKind::Url if value.is_empty() => json!({ "url": null }),
            ColumnKind::Url => json!({ "url": value }),
            ColumnKind::Files if value.is_empty() => json!({ "files": [] }),
            ColumnKind::Files => json!({
                "files": [{
                    "type": "external",
                    "name": title,
                    "external": { "url": value }
                }]
            }),
            ColumnKind::Number => json!({ "number": value.trim().parse::<f64>().ok() }),
        };
        properties.insert(column.name.clone(), property);
    }
    Value::Object(properties)
}

/// External icon object, if the row has one.
pub fn icon(row: &Row) -> Option<Value> {
    row.icon
        .as_ref()
        .map(|url| json!({ "type": "external", "external": { "url": url } }))
}

/// Concatenated plain text of a rich text array.
pub fn plain_text(rich_text: &Value) -> String {
    rich_text
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| {
                    p.get("plain_text")
                        .or_else(|| p.get("text").and_then(|t| t.get("content")))
                        .and_then(Value::as_str)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Title of a page from its `properties`, whichever property is the title.
pub fn page_title(properties: &Value) -> String {
    properties
        .as_object()
        .and_then(|map| {
            map.values()
                .find(|p| p.get("type").and_then(Value::as_str) == Some("title"))
        })
        .and_then(|p| p.get("title"))
        .map(plain_text)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn split_prefers_word_boundaries() {
        let text = format!("{} {}", "a".repeat(1500), "b".repeat(600));
        let chunks = split_text(&text, TEXT_CHUNK);
        assert_eq!(chunks, vec!["a".repeat(1500), "b".repeat(600)]);
    }

    #[test]
    fn split_hard_cuts_without_spaces() {
        let chunks = split_text(&"x".repeat(4000), TEXT_CHUNK);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= TEXT_CHUNK));
    }

    #[test]
    fn split_counts_characters_not_bytes() {
        let chunks = split_text(&"空".repeat(1801), TEXT_CHUNK);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], "空");
    }

    #[test]
    fn long_paragraph_becomes_several_blocks() {
        let blocks = render_blocks(&[Block::text("word ".repeat(1000))]);
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b["type"] == "paragraph"));
    }

    #[test]
    fn headings_are_clamped_and_bold() {
        let blocks = render_blocks(&[Block::Heading {
            level: 5,
            text: "Finale".into(),
        }]);
        assert_eq!(blocks[0]["type"], "heading_3");
        assert_eq!(
            blocks[0]["heading_3"]["rich_text"][0]["annotations"]["bold"],
            true
        );
    }

    #[test]
    fn media_is_external() {
        let blocks = render_blocks(&[Block::audio("https://cdn.example/a.mp3")]);
        assert_eq!(blocks[0]["audio"]["external"]["url"], "https://cdn.example/a.mp3");
    }

    #[test]
    fn row_properties_follow_column_kinds() {
        let schema = Schema::new(vec![
            Column::new("Name", ColumnKind::Title),
            Column::new("Portrait", ColumnKind::Files),
            Column::new("WikiUrl", ColumnKind::Url),
        ]);
        let row = Row::new([("Name", "Vajra"), ("Portrait", "https://img.example/v.png")]);
        let props = row_properties(&schema, &row);
        assert_eq!(props["Name"]["title"][0]["text"]["content"], "Vajra");
        assert_eq!(props["Portrait"]["files"][0]["name"], "Vajra");
        assert_eq!(props["WikiUrl"]["url"], Value::Null);
    }

    #[test]
    fn schema_round_trips_through_properties() {
        let schema = Schema::new(vec![
            Column::new("Label", ColumnKind::Title),
            Column::new("English", ColumnKind::RichText),
            Column::new("Audio", ColumnKind::Files),
        ]);
        let declared = schema_properties(&schema);
        // the API echoes each declaration with its type
        let echoed: Map<String, Value> = declared
            .as_object()
            .unwrap()
            .iter()
            .map(|(name, decl)| {
                let kind = decl.as_object().unwrap().keys().next().unwrap().clone();
                (name.clone(), json!({ "type": kind }))
            })
            .collect();
        let parsed = parse_schema(&Value::Object(echoed));
        assert_eq!(parsed.columns.len(), 3);
        assert!(parsed.title_column().is_some_and(|c| c.name == "Label"));
    }

    #[test]
    fn page_title_reads_plain_text() {
        let props = json!({
            "Name": { "type": "title", "title": [{ "plain_text": "Lyria" }] },
            "Role": { "type": "rich_text", "rich_text": [] }
        });
        assert_eq!(page_title(&props), "Lyria");
    }
}
