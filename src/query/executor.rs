use crate::index::reader::IndexReader;
use crate::index::types::{SectionId, SectionRow, SourceType, TypeFilter};
use crate::query::scorer::{CorpusStats, Scorer, ScoringWeights};
use crate::query::snippet::make_snippet;
use crate::query::topk::{TopKEntry, TopKHeap};
use crate::utils::query_terms;
use anyhow::Result;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

/// Search request options
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub limit: usize,
    pub type_filter: TypeFilter,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: ScoringWeights::default().default_limit,
            type_filter: TypeFilter::All,
        }
    }
}

/// A ranked section
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub heading: String,
    pub title: String,
    pub source_type: SourceType,
    pub score: f64,
    pub snippet: String,
}

/// Per-section accumulator while walking posting lists
#[derive(Default)]
struct Candidate {
    bm25: f64,
    /// `(word position, query term index)`
    hits: Vec<(u32, usize)>,
}

/// Executes ranked queries against an index snapshot
pub struct SearchEngine<'a> {
    reader: &'a IndexReader,
    weights: ScoringWeights,
}

impl<'a> SearchEngine<'a> {
    pub fn new(reader: &'a IndexReader, weights: ScoringWeights) -> Self {
        Self { reader, weights }
    }

    /// Rank sections against a free-text query.
    ///
    /// Every query term contributes; sections matching only some terms still
    /// rank, lower. An empty query, an empty corpus or a query matching
    /// nothing yields no hits.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchHit>> {
        let terms = query_terms(query);
        if terms.is_empty() || options.limit == 0 {
            return Ok(Vec::new());
        }

        let stats = CorpusStats {
            section_count: self.reader.section_count()?,
            avg_length: self.reader.avg_section_length()?,
        };
        if stats.section_count == 0 {
            return Ok(Vec::new());
        }
        let scorer = Scorer::new(self.weights.clone(), stats);

        // Phase 1: gather postings; lengths are needed before scoring
        let mut candidates: FxHashMap<SectionId, Candidate> = FxHashMap::default();
        let mut per_term = Vec::with_capacity(terms.len());
        for (idx, term) in terms.iter().enumerate() {
            let postings = self.reader.postings(term)?;
            let idf = scorer.idf(postings.len() as u64);
            for posting in &postings {
                let candidate = candidates.entry(posting.section_id).or_default();
                candidate
                    .hits
                    .extend(posting.positions.iter().map(|&p| (p, idx)));
            }
            per_term.push((idf, postings));
        }
        if candidates.is_empty() {
            tracing::debug!(query, "no matching sections");
            return Ok(Vec::new());
        }

        let mut rows: FxHashMap<SectionId, SectionRow> = FxHashMap::default();
        for &id in candidates.keys() {
            if let Some(row) = self.reader.section(id)? {
                if options.type_filter.admits(row.source_type) {
                    rows.insert(id, row);
                }
            }
        }

        // Phase 2: BM25 per (term, section)
        for (idf, postings) in &per_term {
            for posting in postings {
                let (Some(row), Some(candidate)) =
                    (rows.get(&posting.section_id), candidates.get_mut(&posting.section_id))
                else {
                    continue;
                };
                candidate.bm25 += scorer.term_score(posting.tf, row.length, *idf);
            }
        }

        // Phase 3: heading boost and top-k
        let mut top_k = TopKHeap::new(options.limit);
        for (id, candidate) in candidates {
            let Some(row) = rows.remove(&id) else {
                continue;
            };
            let heading_terms: FxHashSet<String> = query_terms(&row.key.heading).into_iter().collect();
            let covered = terms.iter().filter(|t| heading_terms.contains(*t)).count();
            let coverage = covered as f64 / terms.len() as f64;
            let score = candidate.bm25 * scorer.heading_multiplier(coverage);

            top_k.try_insert(TopKEntry {
                score,
                key: row.key.clone(),
                item: (row, candidate.hits),
            });
        }

        let hits: Vec<SearchHit> = top_k
            .into_sorted_vec()
            .into_iter()
            .map(|entry| {
                let (row, positions) = entry.item;
                SearchHit {
                    snippet: make_snippet(
                        &row.body,
                        &positions,
                        self.weights.snippet_tokens,
                        self.weights.snippet_chars,
                    ),
                    path: row.key.path,
                    heading: row.key.heading,
                    title: row.title,
                    source_type: row.source_type,
                    score: entry.score,
                }
            })
            .collect();

        tracing::debug!(query, terms = terms.len(), results = hits.len(), "search complete");
        Ok(hits)
    }
}
