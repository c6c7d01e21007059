//! Content fingerprints.
//!
//! Pure functions; no I/O. Fingerprints are hex SHA-256 digests of a
//! normalized text rendering, so formatting artifacts the remote renderer
//! reintroduces (CRLF, trailing spaces, padding blank lines) never register
//! as a change.

use sha2::{Digest, Sha256};

use crate::node::{Block, DatasetNode, Row, Schema};

/// Separator between serialized row fields.
const FIELD_SEPARATOR: char = '\u{1f}';

/// Normalize text for equality checks: LF line endings, no trailing
/// whitespace, at most two consecutive blank lines, no trailing blank lines.
pub fn normalize_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out: Vec<&str> = Vec::new();
    let mut blank_run = 0;
    for line in text.split('\n').map(str::trim_end) {
        if line.is_empty() {
            blank_run += 1;
            if blank_run <= 2 {
                out.push("");
            }
            continue;
        }
        blank_run = 0;
        out.push(line);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

/// Flatten blocks to plain text, one block per line.
pub fn blocks_plain_text(blocks: &[Block]) -> String {
    let mut out = String::new();
    for block in blocks {
        match block {
            Block::Heading { text, .. } => out.push_str(text),
            Block::Paragraph { spans } => {
                for span in spans {
                    out.push_str(&span.text);
                }
            }
            Block::Media { url, .. } => out.push_str(url),
            Block::Divider => {}
        }
        out.push('\n');
    }
    out
}

pub fn digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of raw text.
pub fn text_fingerprint(text: &str) -> String {
    digest(&normalize_text(text))
}

/// Fingerprint of a document body.
pub fn document_fingerprint(blocks: &[Block]) -> String {
    text_fingerprint(&blocks_plain_text(blocks))
}

/// Fingerprint of one row: title, then the remaining columns in schema
/// order, then body media URLs and the icon.
pub fn row_fingerprint(schema: &Schema, row: &Row) -> String {
    let mut fields: Vec<String> = schema
        .ordered()
        .map(|c| normalize_text(row.value(&c.name)))
        .collect();
    fields.extend(row.body.iter().filter_map(|b| match b {
        Block::Media { url, .. } => Some(url.clone()),
        _ => None,
    }));
    let body_text = normalize_text(&blocks_plain_text(&row.body));
    if !body_text.is_empty() {
        fields.push(body_text);
    }
    if let Some(icon) = &row.icon {
        fields.push(icon.clone());
    }
    digest(&fields.join(&FIELD_SEPARATOR.to_string()))
}

/// Fingerprint of a whole dataset. Row order does not matter.
pub fn dataset_fingerprint(dataset: &DatasetNode) -> String {
    let mut rows: Vec<String> = dataset
        .rows
        .iter()
        .map(|r| row_fingerprint(&dataset.schema, r))
        .collect();
    rows.sort();
    let columns: Vec<String> = dataset
        .schema
        .columns
        .iter()
        .map(|c| format!("{}:{:?}", c.name, c.kind))
        .collect();
    digest(&format!("{}\n{}", columns.join(","), rows.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Column, ColumnKind, Span};
    use pretty_assertions::assert_eq;

    #[test]
    fn remote_formatting_artifacts_do_not_change_fingerprint() {
        assert_eq!(
            text_fingerprint("Hello\nWorld"),
            text_fingerprint("Hello\r\nWorld  \n\n\n\n")
        );
    }

    #[test]
    fn blank_runs_collapse_to_two() {
        assert_eq!(normalize_text("a\n\n\n\n\nb"), "a\n\n\nb");
        assert_eq!(normalize_text("a\r\rb"), "a\n\nb");
    }

    #[test]
    fn content_change_changes_fingerprint() {
        assert_ne!(text_fingerprint("Hello"), text_fingerprint("Hello!"));
        assert_ne!(text_fingerprint("A\nB"), text_fingerprint("B\nA"));
    }

    #[test]
    fn document_fingerprint_flattens_spans() {
        let spans = vec![Block::Paragraph {
            spans: vec![Span::bold("A:"), Span::plain(" Hi")],
        }];
        assert_eq!(
            document_fingerprint(&spans),
            document_fingerprint(&[Block::text("A: Hi")])
        );
    }

    #[test]
    fn row_fingerprint_follows_schema_order_and_media() {
        let schema = Schema::new(vec![
            Column::new("Image", ColumnKind::Files),
            Column::new("Name", ColumnKind::Title),
        ]);
        let row = Row::new([("Name", "A"), ("Image", "url1")]);
        let same = Row::new([("Image", "url1"), ("Name", "A")]);
        assert_eq!(row_fingerprint(&schema, &row), row_fingerprint(&schema, &same));

        let with_media = row.clone().with_body(vec![Block::image("url1")]);
        assert_ne!(
            row_fingerprint(&schema, &row),
            row_fingerprint(&schema, &with_media)
        );
    }

    #[test]
    fn dataset_fingerprint_ignores_row_order() {
        let schema = Schema::new(vec![Column::new("Name", ColumnKind::Title)]);
        let a = Row::new([("Name", "A")]);
        let b = Row::new([("Name", "B")]);
        let first = DatasetNode {
            name: "Cast".into(),
            schema: schema.clone(),
            rows: vec![a.clone(), b.clone()],
        };
        let second = DatasetNode {
            name: "Cast".into(),
            schema,
            rows: vec![b, a],
        };
        assert_eq!(dataset_fingerprint(&first), dataset_fingerprint(&second));
    }
}
