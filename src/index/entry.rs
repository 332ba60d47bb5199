//! Markdown entry parsing: title, heading sections and the metadata comment.
//!
//! The metadata comment has the form
//! `<!-- learned: 2025-01-03 | confidence: high | source: capture | related_files: a, b -->`.
//! It is parsed field by field with a small quote- and bracket-aware
//! scanner, so `related_files: ["src/a, b.rs", c.rs]` keeps the comma inside
//! the quoted path.

use crate::backlink::{parse_backlinks, Backlink};
use crate::index::types::{Confidence, EntryMeta, Section};
use chrono::NaiveDate;
use std::collections::HashMap;

/// Whether the metadata comment was usable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaStatus {
    Parsed,
    Missing,
    Malformed(String),
}

/// Everything extracted from one markdown file
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub title: Option<String>,
    pub sections: Vec<Section>,
    pub meta: EntryMeta,
    pub meta_status: MetaStatus,
    pub backlinks: Vec<Backlink>,
    /// Recoverable field-level problems (bad date, unknown confidence)
    pub warnings: Vec<String>,
}

const KNOWN_KEYS: [&str; 4] = ["learned", "confidence", "source", "related_files"];

/// Parse a markdown document. Never fails: malformed metadata yields an
/// empty [`EntryMeta`] and a [`MetaStatus::Malformed`] diagnosis.
pub fn parse_document(content: &str) -> ParsedDocument {
    let mut warnings = Vec::new();

    let (text, meta, meta_status) = match find_meta_comment(content) {
        Some((start, end, body)) => {
            let stripped = format!("{}{}", &content[..start], &content[end..]);
            match parse_meta(body, &mut warnings) {
                Ok(meta) => (stripped, meta, MetaStatus::Parsed),
                Err(reason) => (stripped, EntryMeta::default(), MetaStatus::Malformed(reason)),
            }
        }
        None => (content.to_string(), EntryMeta::default(), MetaStatus::Missing),
    };

    let sections = split_sections(&text);
    let title = sections
        .iter()
        .find(|s| s.level == 1 && !s.heading.is_empty())
        .map(|s| s.heading.clone());
    let backlinks = parse_backlinks(&text);

    ParsedDocument {
        title,
        sections,
        meta,
        meta_status,
        backlinks,
        warnings,
    }
}

/// Returns `(start, end, body)` of the trailing metadata comment, if the last
/// HTML comment in the file looks like one.
fn find_meta_comment(content: &str) -> Option<(usize, usize, &str)> {
    let start = content.rfind("<!--")?;
    let close = content[start + 4..].find("-->")?;
    let body = &content[start + 4..start + 4 + close];
    let end = start + 4 + close + 3;

    let first_key = body
        .trim_start()
        .split(':')
        .next()
        .map(|k| k.trim().to_ascii_lowercase())?;
    if !KNOWN_KEYS.contains(&first_key.as_str()) {
        return None;
    }

    Some((start, end, body))
}

fn parse_meta(body: &str, warnings: &mut Vec<String>) -> Result<EntryMeta, String> {
    let mut meta = EntryMeta::default();

    for field in split_top_level(body, '|')? {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        let (key, value) = field
            .split_once(':')
            .ok_or_else(|| format!("field `{}` has no `key:` prefix", field))?;
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("invalid field name `{}`", key));
        }
        let value = value.trim();

        match key.as_str() {
            "learned" => {
                let raw = unquote(value)?;
                match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
                    Ok(date) => meta.learned = Some(date),
                    Err(_) => warnings.push(format!("unparsable learned date `{}`", raw)),
                }
            }
            "confidence" => match unquote(value)?.parse::<Confidence>() {
                Ok(c) => meta.confidence = Some(c),
                Err(e) => warnings.push(e),
            },
            "source" => {
                let raw = unquote(value)?;
                if !raw.is_empty() {
                    meta.source = Some(raw);
                }
            }
            "related_files" => meta.related_files = parse_list(value)?,
            _ => {
                meta.extra.insert(key, unquote(value)?);
            }
        }
    }

    Ok(meta)
}

/// Split on `sep` outside double quotes and brackets
fn split_top_level(s: &str, sep: char) -> Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut in_quote = false;
    let mut escaped = false;
    let mut depth = 0i32;
    let mut start = 0;

    for (i, ch) in s.char_indices() {
        if in_quote {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_quote = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_quote = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth < 0 {
                    return Err("unbalanced `]`".to_string());
                }
            }
            c if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }

    if in_quote {
        return Err("unterminated quote".to_string());
    }
    if depth != 0 {
        return Err("unterminated `[`".to_string());
    }
    parts.push(&s[start..]);
    Ok(parts)
}

/// Strip surrounding double quotes and resolve `\"` / `\\` escapes
fn unquote(raw: &str) -> Result<String, String> {
    let raw = raw.trim();
    let Some(inner) = raw.strip_prefix('"') else {
        return Ok(collapse_whitespace(raw));
    };
    let inner = inner
        .strip_suffix('"')
        .ok_or_else(|| format!("unterminated quote in `{}`", raw))?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    Ok(out)
}

/// `a, b` or `[a, "b, c"]`, possibly spanning lines
fn parse_list(raw: &str) -> Result<Vec<String>, String> {
    let raw = raw.trim();
    let inner = match raw.strip_prefix('[') {
        Some(rest) => rest
            .strip_suffix(']')
            .ok_or_else(|| "list is missing closing `]`".to_string())?,
        None => raw,
    };

    let mut items = Vec::new();
    for item in split_top_level(inner, ',')? {
        let value = unquote(item)?;
        if !value.is_empty() {
            items.push(value);
        }
    }
    Ok(items)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns the fence marker (```` ``` ```` or `~~~`) if the line opens or closes
/// a fenced code block
pub(crate) fn fence_marker(line: &str) -> Option<&'static str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("```") {
        Some("```")
    } else if trimmed.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

/// Parse an ATX heading line into `(level, text)`
fn parse_heading(line: &str) -> Option<(u8, String)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let level = rest.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let after = &rest[level..];
    if !after.is_empty() && !after.starts_with(' ') && !after.starts_with('\t') {
        return None;
    }
    let text = after.trim().trim_end_matches('#').trim_end();
    Some((level as u8, text.to_string()))
}

/// Split text into heading sections. Headings inside fenced code blocks are
/// ignored; duplicate headings are merged into their first occurrence.
fn split_sections(text: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut by_heading: HashMap<String, usize> = HashMap::new();
    let mut current = Section {
        heading: String::new(),
        level: 0,
        body: String::new(),
    };
    let mut fence: Option<&'static str> = None;

    let mut flush = |section: Section, sections: &mut Vec<Section>| {
        let body = section.body.trim_end().to_string();
        if section.level == 0 && body.trim().is_empty() {
            return;
        }
        match by_heading.get(&section.heading) {
            Some(&idx) => {
                let existing = &mut sections[idx];
                existing.body.push_str("\n\n");
                existing.body.push_str(&body);
            }
            None => {
                by_heading.insert(section.heading.clone(), sections.len());
                sections.push(Section { body, ..section });
            }
        }
    };

    for line in text.lines() {
        if let Some(marker) = fence_marker(line) {
            fence = match fence {
                Some(open) if open == marker => None,
                Some(open) => Some(open),
                None => Some(marker),
            };
        } else if fence.is_none() {
            if let Some((level, heading)) = parse_heading(line) {
                let next = Section {
                    heading,
                    level,
                    body: String::new(),
                };
                flush(std::mem::replace(&mut current, next), &mut sections);
            }
        }
        current.body.push_str(line);
        current.body.push('\n');
    }
    flush(current, &mut sections);

    sections
}
