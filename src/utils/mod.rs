//! Utility functions shared across the engine.
//!
//! ## Modules
//!
//! - [`app_data`] - Store layout, state directory and configuration loading
//! - [`encoding`] - Varint delta encoding for posting positions
//! - [`progress`] - Progress bars (no-op without the `progress` feature)
//! - [`tokenizer`] - Term extraction with hyphenated compounds
//!
//! ## Key Functions
//!
//! ```no_run
//! use kdex::utils::{query_terms, tokenize};
//!
//! let tokens = tokenize("The stop-hook fires twice");
//! // Terms: ["the", "stop", "hook", "fire", "twice", "stop-hook"]
//!
//! let terms = query_terms("stop-hooks");
//! // Returns: ["stop", "hook", "stop-hook"]
//! ```

pub mod app_data;
pub mod encoding;
pub mod progress;
pub mod tokenizer;

pub use app_data::*;
pub use encoding::*;
pub use tokenizer::*;
