//! `[[type:path#heading]]` references: parsing and resolution.
//!
//! Resolution always goes through an [`IndexReader`] snapshot of a single
//! store. A heading that does not exist under an existing path falls back to
//! the whole document; a path that does not exist is broken.

use crate::error::IndexError;
use crate::index::entry::fence_marker;
use crate::index::reader::IndexReader;
use crate::index::types::{Entry, SourceType};
use anyhow::Result;
use memchr::memmem;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A parsed backlink
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Backlink {
    #[serde(rename = "type")]
    pub link_type: SourceType,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
}

impl Backlink {
    /// Parse `[[type:path#heading]]`, with or without the brackets
    pub fn parse(s: &str) -> Result<Self, IndexError> {
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix("[[")
            .and_then(|rest| rest.strip_suffix("]]"))
            .unwrap_or(trimmed);
        parse_inner(inner).ok_or_else(|| IndexError::InvalidBacklink(s.to_string()))
    }

    /// Candidate link paths for this reference, most specific first
    pub(crate) fn candidates(&self) -> Vec<String> {
        let base = self.path.trim_matches('/');
        let base = base.strip_suffix(".md").unwrap_or(base);
        vec![
            base.to_string(),
            format!("{}/index", base),
            format!("{}/README", base),
        ]
    }
}

impl FromStr for Backlink {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Backlink::parse(s)
    }
}

impl fmt::Display for Backlink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.heading {
            Some(h) => write!(f, "[[{}:{}#{}]]", self.link_type, self.path, h),
            None => write!(f, "[[{}:{}]]", self.link_type, self.path),
        }
    }
}

fn parse_inner(inner: &str) -> Option<Backlink> {
    if inner.contains('\n') || inner.contains("[[") {
        return None;
    }
    let (kind, rest) = inner.split_once(':')?;
    let link_type = kind.parse::<SourceType>().ok()?;
    let (path, heading) = match rest.split_once('#') {
        Some((p, h)) => (p, Some(h.trim())),
        None => (rest, None),
    };
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    Some(Backlink {
        link_type,
        path: path.to_string(),
        heading: heading.filter(|h| !h.is_empty()).map(str::to_string),
    })
}

/// Extract every well-formed backlink from text, in order, without
/// duplicates. References inside fenced code blocks are examples, not links.
pub fn parse_backlinks(text: &str) -> Vec<Backlink> {
    let open = memmem::Finder::new(b"[[");
    let close = memmem::Finder::new(b"]]");
    let mut links: Vec<Backlink> = Vec::new();
    let mut fence: Option<&'static str> = None;

    for line in text.lines() {
        if let Some(marker) = fence_marker(line) {
            fence = match fence {
                Some(current) if current == marker => None,
                Some(current) => Some(current),
                None => Some(marker),
            };
            continue;
        }
        if fence.is_some() {
            continue;
        }

        let bytes = line.as_bytes();
        let mut from = 0;
        while let Some(rel) = open.find(&bytes[from..]) {
            let start = from + rel + 2;
            let Some(len) = close.find(&bytes[start..]) else {
                break;
            };
            if let Some(link) = parse_inner(&line[start..start + len]) {
                if !links.contains(&link) {
                    links.push(link);
                }
            }
            from = start + len + 2;
        }
    }

    links
}

/// How a resolved backlink matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    /// The heading exists; content is that section only
    Exact,
    /// The heading was not found; content is the whole document
    HeadingFallback,
    /// No heading was requested; content is the whole document
    Whole,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub link: Backlink,
    pub kind: ResolutionKind,
    /// Store-relative path of the target document
    pub path: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolved {
    Found(Resolution),
    Broken { link: Backlink },
}

impl Resolved {
    pub fn is_broken(&self) -> bool {
        matches!(self, Resolved::Broken { .. })
    }
}

/// Find the document a backlink points to
fn find_target(reader: &IndexReader, link: &Backlink) -> Result<Option<Entry>> {
    for candidate in link.candidates() {
        if let Some(entry) = reader.entry_by_link(link.link_type, &candidate)? {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}

/// Resolve a backlink against an index snapshot
pub fn resolve(reader: &IndexReader, link: &Backlink) -> Result<Resolved> {
    let Some(entry) = find_target(reader, link)? else {
        tracing::debug!(%link, "backlink target missing");
        return Ok(Resolved::Broken { link: link.clone() });
    };

    let (kind, content) = match &link.heading {
        Some(heading) => match reader.section_by_key(&entry.path, heading)? {
            Some(section) => (ResolutionKind::Exact, section.body),
            None => {
                tracing::debug!(%link, "heading not found; returning whole document");
                (ResolutionKind::HeadingFallback, entry.content.clone())
            }
        },
        None => (ResolutionKind::Whole, entry.content.clone()),
    };

    Ok(Resolved::Found(Resolution {
        link: link.clone(),
        kind,
        path: entry.path,
        title: entry.title,
        content,
    }))
}

/// Whether the target path of a backlink exists in the snapshot
pub fn is_broken(reader: &IndexReader, link: &Backlink) -> Result<bool> {
    Ok(find_target(reader, link)?.is_none())
}
