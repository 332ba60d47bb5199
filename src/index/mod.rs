pub mod build;
pub mod entry;
pub mod reader;
pub mod stats;
pub mod store;
pub mod types;
pub mod writer;

pub use reader::IndexReader;
pub use types::*;
pub use writer::IndexWriter;
