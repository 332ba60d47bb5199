use crate::error::IndexError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Unique identifier for a section row in the index
pub type SectionId = i64;

/// Which store a document belongs to; also the `type` of a backlink
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Knowledge,
    Work,
    Thread,
}

impl SourceType {
    pub const ALL: [SourceType; 3] = [SourceType::Knowledge, SourceType::Work, SourceType::Thread];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Knowledge => "knowledge",
            SourceType::Work => "work",
            SourceType::Thread => "thread",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "knowledge" => Ok(SourceType::Knowledge),
            "work" => Ok(SourceType::Work),
            "thread" => Ok(SourceType::Thread),
            other => Err(format!("unknown source type `{}`", other)),
        }
    }
}

/// Search restriction by source type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeFilter {
    Knowledge,
    Work,
    Thread,
    #[default]
    All,
}

impl TypeFilter {
    pub fn admits(&self, source_type: SourceType) -> bool {
        match self {
            TypeFilter::All => true,
            TypeFilter::Knowledge => source_type == SourceType::Knowledge,
            TypeFilter::Work => source_type == SourceType::Work,
            TypeFilter::Thread => source_type == SourceType::Thread,
        }
    }
}

impl FromStr for TypeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(TypeFilter::All),
            other => match SourceType::from_str(other)? {
                SourceType::Knowledge => Ok(TypeFilter::Knowledge),
                SourceType::Work => Ok(TypeFilter::Work),
                SourceType::Thread => Ok(TypeFilter::Thread),
            },
        }
    }
}

/// How well an entry's claims were verified when captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Confidence::High),
            "medium" => Ok(Confidence::Medium),
            "low" => Ok(Confidence::Low),
            other => Err(format!("unknown confidence `{}`", other)),
        }
    }
}

/// Metadata from the trailing HTML comment of an entry.
/// Every field is optional; noisy captures index with empty metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub learned: Option<NaiveDate>,
    pub confidence: Option<Confidence>,
    pub source: Option<String>,
    pub related_files: Vec<String>,
    /// Unrecognized `key: value` fields, preserved verbatim
    pub extra: BTreeMap<String, String>,
}

/// One markdown document in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Store-relative path, `/`-separated (`knowledge/hooks/stop-hook.md`)
    pub path: String,
    pub source_type: SourceType,
    /// Path relative to the type root without `.md`; what backlinks name
    pub link_path: String,
    pub category: String,
    pub title: String,
    pub mtime_ns: i64,
    pub size: i64,
    pub meta: EntryMeta,
    /// Full file content as read from disk
    pub content: String,
}

/// Addressable unit for search and similarity: `(path, heading)`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SectionKey {
    pub path: String,
    pub heading: String,
}

impl SectionKey {
    pub fn new(path: impl Into<String>, heading: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            heading: heading.into(),
        }
    }
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.heading.is_empty() {
            write!(f, "{}", self.path)
        } else {
            write!(f, "{}#{}", self.path, self.heading)
        }
    }
}

/// A parsed section before it is assigned an id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub heading: String,
    /// Heading level (1-6), 0 for text before the first heading
    pub level: u8,
    /// Section text including its heading line, metadata comment removed
    pub body: String,
}

/// A section as stored in the index
#[derive(Debug, Clone, PartialEq)]
pub struct SectionRow {
    pub id: SectionId,
    pub key: SectionKey,
    pub ordinal: u32,
    pub body: String,
    pub length: u32,
    pub source_type: SourceType,
    pub title: String,
}

/// One stored concordance edge, per direction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityEdge {
    pub source: SectionId,
    pub target: SectionId,
    pub score: f64,
    /// 0-based position in the source's neighbor list (descending score)
    pub rank: u32,
}

/// Directories below the store root holding each source type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeRoots {
    pub knowledge: String,
    pub work: String,
    pub thread: String,
}

impl Default for TypeRoots {
    fn default() -> Self {
        Self {
            knowledge: "knowledge".to_string(),
            work: "work".to_string(),
            thread: "threads".to_string(),
        }
    }
}

impl TypeRoots {
    pub fn dir(&self, source_type: SourceType) -> &str {
        match source_type {
            SourceType::Knowledge => &self.knowledge,
            SourceType::Work => &self.work,
            SourceType::Thread => &self.thread,
        }
    }
}

/// Configuration for the scanner and index store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub roots: TypeRoots,
    /// Glob patterns (relative to the store root) that are never indexed
    pub ignored_paths: Vec<String>,
    pub max_file_size: u64,
    /// How long a writer waits for the index lock before failing
    pub lock_timeout_ms: u64,
    /// Override for the index database location
    pub db_path: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            roots: TypeRoots::default(),
            ignored_paths: vec!["**/node_modules/**".to_string(), "**/*.draft.md".to_string()],
            max_file_size: 2 * 1024 * 1024,
            lock_timeout_ms: 2000,
            db_path: None,
        }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.max_file_size == 0 {
            return Err(IndexError::InvalidConfig(
                "index.max_file_size must be positive".to_string(),
            ));
        }
        for pattern in &self.ignored_paths {
            globset::Glob::new(pattern).map_err(|e| {
                IndexError::InvalidConfig(format!("index.ignored_paths `{}`: {}", pattern, e))
            })?;
        }
        Ok(())
    }
}

/// What a scan changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Files that could not be read or were too large
    pub skipped: usize,
}

impl ScanSummary {
    pub fn changed(&self) -> bool {
        self.added + self.updated + self.removed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_filter_parse() {
        assert_eq!("all".parse::<TypeFilter>().unwrap(), TypeFilter::All);
        assert_eq!("Work".parse::<TypeFilter>().unwrap(), TypeFilter::Work);
        assert!("plans".parse::<TypeFilter>().is_err());
    }

    #[test]
    fn test_type_filter_admits() {
        assert!(TypeFilter::All.admits(SourceType::Thread));
        assert!(TypeFilter::Knowledge.admits(SourceType::Knowledge));
        assert!(!TypeFilter::Knowledge.admits(SourceType::Work));
    }

    #[test]
    fn test_section_key_display() {
        assert_eq!(SectionKey::new("a.md", "").to_string(), "a.md");
        assert_eq!(SectionKey::new("a.md", "Intro").to_string(), "a.md#Intro");
    }

    #[test]
    fn test_section_key_order() {
        let a = SectionKey::new("a.md", "Z");
        let b = SectionKey::new("b.md", "A");
        assert!(a < b);
    }

    #[test]
    fn test_bad_ignore_glob_rejected() {
        let config = IndexConfig {
            ignored_paths: vec!["[".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
