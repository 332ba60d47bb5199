use crate::index::reader::IndexReader;
use crate::index::store::SCHEMA_VERSION;
use crate::utils::AppConfig;
use anyhow::Result;
use std::path::Path;

/// Display index statistics
pub fn show_stats(store_root: &Path, config: &AppConfig) -> Result<()> {
    let reader = IndexReader::open_or_build(store_root, config)?;
    let counts = reader.counts()?;
    let index_path = reader.index_path();

    println!("Index Statistics");
    println!("================");
    println!();
    println!("Store root:       {}", store_root.display());
    println!("Index location:   {}", index_path.display());
    println!("Schema version:   {}", SCHEMA_VERSION);
    println!("Generation:       {}", reader.generation());
    if let Some(repo_root) = reader.meta_value("repo_root")? {
        println!("Repository root:  {}", repo_root);
    }

    println!();
    println!("Entry count:      {}", counts.entries);
    for (kind, n) in &counts.entries_by_type {
        println!("  {:15} {}", kind, n);
    }
    println!("Section count:    {}", counts.sections);
    println!("Avg section len:  {:.1} tokens", counts.avg_section_length);
    println!("Distinct terms:   {}", counts.terms);
    println!("Postings:         {}", counts.postings);
    println!("Backlinks:        {}", counts.backlinks);
    println!("Similarity edges: {}", counts.similarity_edges);

    let size = index_files_size(index_path);
    if size > 0 {
        println!();
        println!("Index size:       {}", format_size(size));
    }

    Ok(())
}

/// Database plus its WAL side files
fn index_files_size(path: &Path) -> u64 {
    ["", "-wal", "-shm"]
        .iter()
        .filter_map(|suffix| {
            let mut os = path.as_os_str().to_os_string();
            os.push(suffix);
            std::fs::metadata(os).ok()
        })
        .map(|m| m.len())
        .sum()
}

/// Format byte size to human readable
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
