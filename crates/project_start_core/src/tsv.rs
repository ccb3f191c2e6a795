use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub const DELIMITER: char = '\t';

/// One data row keyed by header text, in header order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, header: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == header)
            .map(|(_, value)| value.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }
}

pub fn read_rows(path: &Path) -> Result<Vec<Vec<String>>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(parse_rows(&content))
}

pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(parse_records(&content))
}

/// First row is the header. Rows with only blank cells are dropped.
pub fn parse_records(content: &str) -> Vec<Record> {
    let rows = parse_rows(content);
    if rows.is_empty() {
        return Vec::new();
    }

    let headers = rows[0]
        .iter()
        .map(|value| value.trim().to_string())
        .collect::<Vec<_>>();

    let mut output = Vec::new();
    for row in rows.iter().skip(1) {
        if row.iter().all(|value| value.trim().is_empty()) {
            continue;
        }
        let mut mapped = Vec::new();
        for (index, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            mapped.push((header.clone(), row.get(index).cloned().unwrap_or_default()));
        }
        output.push(Record::new(mapped));
    }
    output
}

pub fn parse_rows(content: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut chars = strip_bom(content).chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            // Quotes only open a quoted field at its start; spreadsheet exports
            // leave stray quotes inside free text unescaped.
            '"' if field.is_empty() => {
                while let Some(quoted) = chars.next() {
                    if quoted != '"' {
                        field.push(quoted);
                    } else if chars.next_if_eq(&'"').is_some() {
                        field.push('"');
                    } else {
                        break;
                    }
                }
            }
            DELIMITER => row.push(std::mem::take(&mut field)),
            '\r' | '\n' => {
                if ch == '\r' {
                    chars.next_if_eq(&'\n');
                }
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(ch),
        }
    }

    row.push(field);
    if row.len() > 1 || row.first().is_some_and(|value| !value.trim().is_empty()) {
        rows.push(row);
    }
    rows
}

fn strip_bom(content: &str) -> &str {
    content.strip_prefix('\u{feff}').unwrap_or(content)
}
