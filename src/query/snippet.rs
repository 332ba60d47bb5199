//! Snippets: a bounded window of section text around the densest cluster of
//! query-term hits.

use crate::utils::tokenize;
use rustc_hash::FxHashMap;

const ELLIPSIS: char = '…';

/// Build a snippet from a section body.
///
/// `hits` are `(word position, query term index)` pairs as stored in the
/// postings. The window of `window_words` words containing the most distinct
/// query terms wins (earliest on ties); it is then clipped to `max_chars`.
pub fn make_snippet(body: &str, hits: &[(u32, usize)], window_words: usize, max_chars: usize) -> String {
    // Word boundaries by position; compounds share a position with their head
    let words: Vec<(u32, usize, usize)> = tokenize(body)
        .into_iter()
        .filter(|t| !t.compound)
        .map(|t| (t.position, t.start, t.end))
        .collect();
    if words.is_empty() {
        return clip(&collapse_whitespace(body), max_chars, false, false);
    }

    let window = window_words.max(1) as u32;
    let first_pos = words[0].0;
    let last_pos = words[words.len() - 1].0;

    let start_pos = best_window_start(hits, window)
        .map(|p| p.saturating_sub(window / 4).max(first_pos))
        .unwrap_or(first_pos);
    let end_pos = start_pos.saturating_add(window);

    let mut in_window = words.iter().filter(|w| w.0 >= start_pos && w.0 < end_pos);
    let Some(&(_, byte_start, _)) = in_window.next() else {
        return clip(&collapse_whitespace(body), max_chars, false, false);
    };
    let byte_end = in_window.last().map(|w| w.2).unwrap_or_else(|| {
        words
            .iter()
            .find(|w| w.1 == byte_start)
            .map(|w| w.2)
            .unwrap_or(byte_start)
    });

    let leading = start_pos > first_pos;
    let trailing = end_pos <= last_pos;
    let text = collapse_whitespace(&body[byte_start..byte_end]);
    clip(&text, max_chars, leading, trailing)
}

/// Start position of the window covering the most distinct terms. One pass
/// over the sorted hits: the window end only moves forward.
fn best_window_start(hits: &[(u32, usize)], window: u32) -> Option<u32> {
    let mut sorted: Vec<(u32, usize)> = hits.to_vec();
    sorted.sort_unstable();

    let mut counts: FxHashMap<usize, u32> = FxHashMap::default();
    let mut distinct = 0usize;
    let mut end = 0;
    let mut best: Option<(usize, u32)> = None;

    for &(start, term) in &sorted {
        let limit = start.saturating_add(window);
        while end < sorted.len() && sorted[end].0 < limit {
            let count = counts.entry(sorted[end].1).or_insert(0);
            if *count == 0 {
                distinct += 1;
            }
            *count += 1;
            end += 1;
        }
        if best.is_none_or(|(count, _)| distinct > count) {
            best = Some((distinct, start));
        }

        // This hit leaves the window before the next start
        if let Some(count) = counts.get_mut(&term) {
            *count -= 1;
            if *count == 0 {
                distinct -= 1;
            }
        }
    }
    best.map(|(_, start)| start)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clip(text: &str, max_chars: usize, leading: bool, trailing: bool) -> String {
    let mut out = String::new();
    if leading {
        out.push(ELLIPSIS);
    }

    let lead = usize::from(leading);
    if lead + text.chars().count() + usize::from(trailing) > max_chars {
        let keep = max_chars.saturating_sub(lead + 1);
        out.extend(text.chars().take(keep));
        out.push(ELLIPSIS);
        return out;
    }

    out.push_str(text);
    if trailing {
        out.push(ELLIPSIS);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits_for(body: &str, terms: &[&str]) -> Vec<(u32, usize)> {
        tokenize(body)
            .into_iter()
            .filter_map(|t| {
                terms
                    .iter()
                    .position(|q| *q == t.term)
                    .map(|idx| (t.position, idx))
            })
            .collect()
    }

    #[test]
    fn test_short_body_is_whole() {
        let body = "## Intro\nshort   text\n";
        let snippet = make_snippet(body, &hits_for(body, &["text"]), 24, 200);
        assert_eq!(snippet, "Intro short text");
    }

    #[test]
    fn test_window_centers_on_hits() {
        let filler = "lorem ipsum ".repeat(40);
        let body = format!("{}the pool size matters {}", filler, filler);
        let snippet = make_snippet(&body, &hits_for(&body, &["pool", "size"]), 10, 200);
        assert!(snippet.contains("pool size"));
        assert!(snippet.starts_with('…'));
        assert!(snippet.ends_with('…'));
    }

    #[test]
    fn test_prefers_window_with_more_distinct_terms() {
        let gap = "filler ".repeat(30);
        let body = format!("alpha alpha alpha {}alpha beta {}", gap, gap);
        let snippet = make_snippet(&body, &hits_for(&body, &["alpha", "beta"]), 6, 200);
        assert!(snippet.contains("alpha beta"));
    }

    /// Quadratic reference: every hit as a window start
    fn best_start_by_scan(hits: &[(u32, usize)], window: u32) -> Option<u32> {
        let mut sorted = hits.to_vec();
        sorted.sort_unstable();
        let mut best: Option<(usize, u32)> = None;
        for (i, &(start, _)) in sorted.iter().enumerate() {
            let mut terms: Vec<usize> = sorted[i..]
                .iter()
                .take_while(|(pos, _)| *pos < start + window)
                .map(|&(_, term)| term)
                .collect();
            terms.sort_unstable();
            terms.dedup();
            if best.is_none_or(|(count, _)| terms.len() > count) {
                best = Some((terms.len(), start));
            }
        }
        best.map(|(_, start)| start)
    }

    #[test]
    fn test_window_search_matches_full_scan() {
        let hits: Vec<(u32, usize)> = (0..200u32)
            .map(|i| ((i * 37) % 500, ((i * 7) % 5) as usize))
            .chain([(3, 0), (3, 0), (499, 4)])
            .collect();
        for window in [1, 2, 5, 24, 100, 1000] {
            assert_eq!(
                best_window_start(&hits, window),
                best_start_by_scan(&hits, window),
                "window {}",
                window
            );
        }
        assert_eq!(best_window_start(&[], 10), None);
    }

    #[test]
    fn test_clipped_to_max_chars() {
        let body = "word ".repeat(200);
        let snippet = make_snippet(&body, &[], 100, 40);
        assert!(snippet.chars().count() <= 40);
        assert!(snippet.ends_with('…'));
    }
}
