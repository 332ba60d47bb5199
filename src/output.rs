//! Human-readable output for the CLI

use crate::analysis::report::PairRecord;
use crate::analysis::staleness::{StalenessReport, Status};
use crate::analysis::usage::{Tier, UsageReport};
use crate::backlink::{Resolved, ResolutionKind};
use crate::index::types::{ScanSummary, SectionKey};
use crate::query::SearchHit;
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

fn stdout(color: bool) -> StandardStream {
    let choice = if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    StandardStream::stdout(choice)
}

fn write_colored<W: WriteColor>(out: &mut W, color: Color, bold: bool, text: &str) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(bold))?;
    write!(out, "{}", text)?;
    out.reset()
}

/// Print ranked search hits
pub fn print_search_hits(hits: &[SearchHit], color: bool) -> io::Result<()> {
    write_search_hits(&mut stdout(color), hits)
}

pub fn write_search_hits<W: WriteColor>(out: &mut W, hits: &[SearchHit]) -> io::Result<()> {
    if hits.is_empty() {
        writeln!(out, "No matches")?;
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        if i > 0 {
            writeln!(out)?;
        }
        write_colored(out, Color::Magenta, true, &hit.path)?;
        if !hit.heading.is_empty() {
            write!(out, " ")?;
            write_colored(out, Color::Cyan, false, &format!("# {}", hit.heading))?;
        }
        write!(out, "  ")?;
        write_colored(out, Color::Green, false, &format!("{:.3}", hit.score))?;
        writeln!(out, "  [{}]", hit.source_type)?;
        if !hit.snippet.is_empty() {
            writeln!(out, "    {}", hit.snippet)?;
        }
    }
    Ok(())
}

/// Print a resolved backlink with its content and stored neighbors
pub fn print_resolution(resolved: &Resolved, similar: &[(SectionKey, f64)], color: bool) -> io::Result<()> {
    write_resolution(&mut stdout(color), resolved, similar)
}

pub fn write_resolution<W: WriteColor>(
    out: &mut W,
    resolved: &Resolved,
    similar: &[(SectionKey, f64)],
) -> io::Result<()> {
    let resolution = match resolved {
        Resolved::Broken { link } => {
            write_colored(out, Color::Red, true, "broken")?;
            writeln!(out, " {}", link)?;
            return Ok(());
        }
        Resolved::Found(resolution) => resolution,
    };

    write_colored(out, Color::Magenta, true, &resolution.path)?;
    if resolution.kind == ResolutionKind::HeadingFallback {
        write!(out, " ")?;
        write_colored(out, Color::Yellow, false, "(heading not found, whole document)")?;
    }
    writeln!(out)?;
    writeln!(out)?;
    writeln!(out, "{}", resolution.content.trim_end())?;

    if !similar.is_empty() {
        writeln!(out)?;
        write_colored(out, Color::Cyan, true, "Similar sections")?;
        writeln!(out)?;
        for (key, score) in similar {
            writeln!(out, "  {:.2}  {}", score, key)?;
        }
    }
    Ok(())
}

pub fn print_scan_summary(summary: &ScanSummary) {
    println!(
        "Indexed: {} added, {} updated, {} removed, {} unchanged",
        summary.added, summary.updated, summary.removed, summary.unchanged
    );
    if summary.skipped > 0 {
        println!("Skipped: {} files (unreadable or too large)", summary.skipped);
    }
}

fn status_color(status: Status) -> Color {
    match status {
        Status::Fresh => Color::Green,
        Status::Aging => Color::Yellow,
        Status::Stale => Color::Red,
        Status::Unavailable => Color::White,
    }
}

/// Print the staleness summary, then every entry that is not fresh
pub fn print_staleness(report: &StalenessReport, color: bool) -> io::Result<()> {
    write_staleness(&mut stdout(color), report)
}

pub fn write_staleness<W: WriteColor>(out: &mut W, report: &StalenessReport) -> io::Result<()> {
    let s = &report.summary;
    writeln!(
        out,
        "{} entries: {} fresh, {} aging, {} stale, {} unavailable",
        report.entries.len(),
        s.fresh,
        s.aging,
        s.stale,
        s.unavailable
    )?;
    if let Some(repo) = &report.repo_root {
        writeln!(out, "Repository: {}", repo.display())?;
    }

    let mut shown: Vec<_> = report
        .entries
        .iter()
        .filter(|r| r.status != Status::Fresh)
        .collect();
    // Stale first; unavailable entries last since automation skips them
    let rank = |status: Status| match status {
        Status::Stale => 0,
        Status::Aging => 1,
        Status::Unavailable => 2,
        Status::Fresh => 3,
    };
    shown.sort_by(|a, b| rank(a.status).cmp(&rank(b.status)).then_with(|| a.path.cmp(&b.path)));
    if shown.is_empty() {
        return Ok(());
    }

    writeln!(out)?;
    for record in shown {
        write_colored(
            out,
            status_color(record.status),
            true,
            &format!("{:<11}", record.status.as_str()),
        )?;
        write!(out, " {:.2}  ", record.drift_score)?;
        write_colored(out, Color::Magenta, false, &record.path)?;
        write!(
            out,
            "  commits={} links={}/{}",
            record.file_drift.commit_count, record.backlink_drift.broken, record.backlink_drift.total
        )?;
        writeln!(out)?;
        for link in &record.broken_links {
            writeln!(out, "              broken {}", link)?;
        }
    }
    Ok(())
}

fn tier_color(tier: Tier) -> Color {
    match tier {
        Tier::Hot => Color::Red,
        Tier::Warm => Color::Yellow,
        Tier::Cold => Color::Blue,
    }
}

pub fn print_usage(report: &UsageReport, color: bool) -> io::Result<()> {
    write_usage(&mut stdout(color), report)
}

pub fn write_usage<W: WriteColor>(out: &mut W, report: &UsageReport) -> io::Result<()> {
    writeln!(
        out,
        "{} events over {} sessions ({} orphaned, {} malformed)",
        report.events, report.sessions_observed, report.orphan_events, report.malformed_events
    )?;
    writeln!(
        out,
        "hot: {}  warm: {}  cold: {}",
        report.buckets.hot.len(),
        report.buckets.warm.len(),
        report.buckets.cold.len()
    )?;

    let mut active: Vec<_> = report.sections.iter().filter(|s| s.events > 0).collect();
    active.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key().cmp(&b.key())));
    if !active.is_empty() {
        writeln!(out)?;
    }
    for usage in active {
        write_colored(out, tier_color(usage.tier), true, &format!("{:<5}", usage.tier.as_str()))?;
        writeln!(out, " {:>7.3}  {}  ({} events)", usage.score, usage.key(), usage.events)?;
    }

    if !report.prune_candidates.is_empty() {
        writeln!(out)?;
        write_colored(out, Color::Blue, true, "Never retrieved")?;
        writeln!(out)?;
        for path in &report.prune_candidates {
            writeln!(out, "  {}", path)?;
        }
    }
    Ok(())
}

/// Print similar pairs under a title
pub fn print_pairs(title: &str, pairs: &[PairRecord], color: bool) -> io::Result<()> {
    write_pairs(&mut stdout(color), title, pairs)
}

pub fn write_pairs<W: WriteColor>(out: &mut W, title: &str, pairs: &[PairRecord]) -> io::Result<()> {
    write_colored(out, Color::Cyan, true, title)?;
    writeln!(out, " ({})", pairs.len())?;
    for pair in pairs {
        write_colored(out, Color::Green, false, &format!("  {:.3}", pair.score))?;
        writeln!(out, "  {}  <->  {}", pair.a, pair.b)?;
    }
    Ok(())
}

/// Emit any serializable value as pretty JSON on stdout
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlink::{Backlink, Resolution};
    use crate::index::types::SourceType;
    use termcolor::NoColor;

    fn render(f: impl FnOnce(&mut NoColor<Vec<u8>>) -> io::Result<()>) -> String {
        let mut out = NoColor::new(Vec::new());
        f(&mut out).unwrap();
        String::from_utf8(out.into_inner()).unwrap()
    }

    #[test]
    fn test_search_hits_render() {
        let hits = vec![SearchHit {
            path: "knowledge/backlink-navigation.md".to_string(),
            heading: "Backlink Navigation".to_string(),
            title: "Backlink Navigation".to_string(),
            source_type: SourceType::Knowledge,
            score: 1.5,
            snippet: "Follow backlinks".to_string(),
        }];
        let text = render(|out| write_search_hits(out, &hits));
        assert!(text.contains("knowledge/backlink-navigation.md # Backlink Navigation  1.500  [knowledge]"));
        assert!(text.contains("    Follow backlinks"));
        assert_eq!(render(|out| write_search_hits(out, &[])), "No matches\n");
    }

    #[test]
    fn test_broken_resolution_render() {
        let link = Backlink::parse("[[knowledge:gone]]").unwrap();
        let text = render(|out| write_resolution(out, &Resolved::Broken { link }, &[]));
        assert_eq!(text, "broken [[knowledge:gone]]\n");
    }

    #[test]
    fn test_resolution_with_neighbors() {
        let resolved = Resolved::Found(Resolution {
            link: Backlink::parse("[[knowledge:conventions#Nope]]").unwrap(),
            kind: ResolutionKind::HeadingFallback,
            path: "knowledge/conventions.md".to_string(),
            title: "Conventions".to_string(),
            content: "# Conventions\nbody\n".to_string(),
        });
        let similar = vec![(SectionKey::new("knowledge/other.md", "Setup"), 0.42)];
        let text = render(|out| write_resolution(out, &resolved, &similar));
        assert!(text.contains("(heading not found, whole document)"));
        assert!(text.contains("# Conventions\nbody\n"));
        assert!(text.contains("0.42  knowledge/other.md#Setup"));
    }
}
