use std::borrow::Cow;
use std::collections::BTreeMap;

/// Terms shorter than this carry no retrieval signal ("a", "x").
const MIN_TOKEN_LENGTH: usize = 2;

/// Maximum token length to store in the index.
/// Tokens longer than this are likely base64, hashes, or other non-searchable content.
const MAX_TOKEN_LENGTH: usize = 128;

/// A term occurrence in a piece of text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Lowercased, stemmed term
    pub term: String,
    /// Byte offset of the first character in the source text
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
    /// Word position (compounds share the position of their first part)
    pub position: u32,
    /// True for a hyphenated compound such as `stop-hook`
    pub compound: bool,
}

/// Per-term statistics for one section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermStats {
    pub tf: u32,
    pub positions: Vec<u32>,
}

struct Word {
    start: usize,
    end: usize,
}

/// Split text into maximal alphanumeric runs (Unicode-aware)
fn split_words(text: &str) -> Vec<Word> {
    let mut words = Vec::new();
    let mut start = None;

    for (i, ch) in text.char_indices() {
        if ch.is_alphanumeric() {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start.take() {
            words.push(Word { start: s, end: i });
        }
    }

    if let Some(s) = start {
        words.push(Word {
            start: s,
            end: text.len(),
        });
    }

    words
}

/// Tokenize text for indexing or snippet location.
///
/// Every word becomes a term. Words joined by single hyphens additionally
/// produce the whole compound (`stop-hook` yields `stop`, `hook` and
/// `stop-hook`) so that both spellings are searchable.
pub fn tokenize(text: &str) -> Vec<Token> {
    let words = split_words(text);
    let bytes = text.as_bytes();
    let mut tokens = Vec::with_capacity(words.len() + words.len() / 8);
    let mut group_start = 0usize;

    for (i, word) in words.iter().enumerate() {
        let joined = i > 0 && {
            let prev = &words[i - 1];
            word.start == prev.end + 1 && bytes[prev.end] == b'-'
        };
        if !joined {
            push_compound(text, &words, group_start, i, &mut tokens);
            group_start = i;
        }
        push_term(
            &mut tokens,
            &text[word.start..word.end],
            word.start,
            word.end,
            i as u32,
            false,
        );
    }
    push_compound(text, &words, group_start, words.len(), &mut tokens);

    tokens
}

fn push_compound(text: &str, words: &[Word], from: usize, to: usize, tokens: &mut Vec<Token>) {
    if to.saturating_sub(from) < 2 {
        return;
    }
    let start = words[from].start;
    let end = words[to - 1].end;
    push_term(tokens, &text[start..end], start, end, from as u32, true);
}

fn push_term(
    tokens: &mut Vec<Token>,
    raw: &str,
    start: usize,
    end: usize,
    position: u32,
    compound: bool,
) {
    let lower = raw.to_lowercase();
    let len = lower.chars().count();
    if !(MIN_TOKEN_LENGTH..=MAX_TOKEN_LENGTH).contains(&len) {
        return;
    }
    let term = stem(&lower).into_owned();
    tokens.push(Token {
        term,
        start,
        end,
        position,
        compound,
    });
}

/// Light plural folding so that `backlinks` finds `Backlink`.
///
/// Applied identically at index and query time; it only has to be
/// consistent, not linguistically complete.
pub fn stem(term: &str) -> Cow<'_, str> {
    if let Some(base) = term.strip_suffix("ies") {
        if base.chars().count() >= 2 {
            return Cow::Owned(format!("{}y", base));
        }
        return Cow::Borrowed(term);
    }
    if let Some(base) = term.strip_suffix("sses") {
        return Cow::Owned(format!("{}ss", base));
    }
    if term.ends_with("ss") || term.ends_with("us") || term.ends_with("is") {
        return Cow::Borrowed(term);
    }
    if let Some(base) = term.strip_suffix('s') {
        if base.chars().count() >= 3 {
            return Cow::Borrowed(base);
        }
    }
    Cow::Borrowed(term)
}

/// Distinct query terms in order of first appearance
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tokenize(query)
        .into_iter()
        .filter_map(|t| seen.insert(t.term.clone()).then_some(t.term))
        .collect()
}

/// Term frequencies and positions for a token stream
pub fn term_stats(tokens: &[Token]) -> BTreeMap<String, TermStats> {
    let mut stats: BTreeMap<String, TermStats> = BTreeMap::new();
    for token in tokens {
        let entry = stats.entry(token.term.clone()).or_default();
        entry.tf += 1;
        entry.positions.push(token.position);
    }
    for entry in stats.values_mut() {
        entry.positions.sort_unstable();
        entry.positions.dedup();
    }
    stats
}

/// Section length used for BM25 normalization (compounds are not counted)
pub fn token_length(tokens: &[Token]) -> u32 {
    tokens.iter().filter(|t| !t.compound).count() as u32
}
