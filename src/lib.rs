//! # kdex - knowledge retrieval and decay engine
//!
//! kdex indexes a store of markdown entries (`knowledge/`, `work/`,
//! `threads/`) and answers three kinds of question about it: what is
//! relevant to a query, which entries say the same thing, and which entries
//! are drifting out of date or out of use.
//!
//! ## Architecture
//!
//! - [`index`] - Scanning, parsing and the SQLite section index
//! - [`query`] - BM25 search over sections
//! - [`backlink`] - `[[type:path#heading]]` parsing and resolution
//! - [`analysis`] - Concordance, staleness and usage reports
//! - [`output`] - Human-readable CLI output
//! - [`utils`] - Tokenizer, configuration and store layout
//!
//! ## Quick Start
//!
//! ```no_run
//! use kdex::index::IndexReader;
//! use kdex::query::{SearchEngine, SearchOptions};
//! use kdex::utils::AppConfig;
//! use std::path::Path;
//!
//! let root = Path::new("/path/to/store");
//! let config = AppConfig::load(root)?;
//! let reader = IndexReader::open_or_build(root, &config)?;
//!
//! let engine = SearchEngine::new(&reader, config.search.clone());
//! for hit in engine.search("stop hook", &SearchOptions::default())? {
//!     println!("{} # {} ({:.2})", hit.path, hit.heading, hit.score);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Concurrency
//!
//! The index is a single SQLite database in WAL mode. Scans and the
//! concordance swap each run in one `BEGIN IMMEDIATE` transaction, so there
//! is at most one writer and a second writer fails fast with
//! [`IndexError::Locked`](error::IndexError::Locked). Readers hold a snapshot
//! for their lifetime and never block on a writer.

pub mod analysis;
pub mod backlink;
pub mod error;
pub mod index;
pub mod output;
pub mod query;
pub mod utils;
