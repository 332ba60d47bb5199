//! Concordance: TF-IDF cosine similarity between every pair of sections.
//!
//! Vectors are built from the stored postings (`w = tf × ln(N / df)`,
//! L2-normalized). Candidate pairs are enumerated through the per-term
//! section lists, so sections that share no weighted term are never
//! compared. The whole neighbor table is computed on a read snapshot and
//! swapped in with a single write transaction.

use crate::analysis::report::{
    write_report, PairRecord, CONCORDANCE_REPORT, MERGE_CANDIDATES_REPORT, REPORT_SCHEMA_VERSION,
};
use crate::error::IndexError;
use crate::index::reader::IndexReader;
use crate::index::types::{SectionId, SectionKey, SimilarityEdge};
use crate::index::writer::IndexWriter;
use crate::utils::AppConfig;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcordanceConfig {
    /// Lowest score kept as a related ("see also") pair
    pub see_also_threshold: f64,
    /// Score at which a pair is a near-duplicate
    pub merge_threshold: f64,
    /// Neighbors each section selects; a section may store more when other
    /// sections select it
    pub max_neighbors: usize,
}

impl Default for ConcordanceConfig {
    fn default() -> Self {
        Self {
            see_also_threshold: 0.2,
            merge_threshold: 0.5,
            max_neighbors: 10,
        }
    }
}

impl ConcordanceConfig {
    pub fn validate(&self) -> Result<(), IndexError> {
        let ordered = 0.0 < self.see_also_threshold
            && self.see_also_threshold < self.merge_threshold
            && self.merge_threshold <= 1.0;
        if !ordered {
            return Err(IndexError::InvalidConfig(format!(
                "concordance thresholds must satisfy 0 < see_also_threshold ({}) < merge_threshold ({}) <= 1",
                self.see_also_threshold, self.merge_threshold
            )));
        }
        if self.max_neighbors == 0 {
            return Err(IndexError::InvalidConfig(
                "concordance.max_neighbors must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which report a pair belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    SeeAlso,
    Merge,
}

impl ConcordanceConfig {
    pub fn band(&self, score: f64) -> Option<Band> {
        if score >= self.merge_threshold {
            Some(Band::Merge)
        } else if score >= self.see_also_threshold {
            Some(Band::SeeAlso)
        } else {
            None
        }
    }
}

/// Sparse vector sorted by term index
type SparseVector = Vec<(u32, f64)>;

/// TF-IDF vectors for every section of a snapshot
pub struct TfIdfModel {
    ids: Vec<SectionId>,
    keys: FxHashMap<SectionId, SectionKey>,
    vectors: FxHashMap<SectionId, SparseVector>,
    /// Term index -> sections carrying it, with their normalized weight
    by_term: Vec<Vec<(SectionId, f64)>>,
}

impl TfIdfModel {
    /// Build from the index snapshot
    pub fn build(reader: &IndexReader) -> Result<Self> {
        let sections = reader
            .sections()?
            .into_iter()
            .map(|row| (row.id, row.key))
            .collect();
        Ok(Self::from_parts(sections, reader.term_frequencies()?))
    }

    /// Build from sections and `(term, section, tf)` triples grouped by term
    pub fn from_parts(
        sections: Vec<(SectionId, SectionKey)>,
        term_frequencies: Vec<(String, SectionId, u32)>,
    ) -> Self {
        let n = sections.len() as f64;
        let mut ids: Vec<SectionId> = sections.iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        let keys: FxHashMap<SectionId, SectionKey> = sections.into_iter().collect();

        let mut raw: FxHashMap<SectionId, SparseVector> = FxHashMap::default();
        let mut term_index = 0u32;
        let mut start = 0;
        while start < term_frequencies.len() {
            let term = &term_frequencies[start].0;
            let end = start
                + term_frequencies[start..]
                    .iter()
                    .take_while(|(t, _, _)| t == term)
                    .count();
            let group = &term_frequencies[start..end];
            start = end;

            let df = group.len() as f64;
            let idf = (n / df).ln();
            // A term present in every section carries no weight
            if idf <= 0.0 {
                continue;
            }
            for &(_, section, tf) in group {
                if keys.contains_key(&section) {
                    raw.entry(section).or_default().push((term_index, tf as f64 * idf));
                }
            }
            term_index += 1;
        }

        let mut by_term: Vec<Vec<(SectionId, f64)>> = vec![Vec::new(); term_index as usize];
        let mut vectors: FxHashMap<SectionId, SparseVector> = FxHashMap::default();
        for id in &ids {
            let Some(mut vector) = raw.remove(id) else {
                continue;
            };
            let norm = vector.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
            if norm == 0.0 {
                continue;
            }
            for (term, weight) in vector.iter_mut() {
                *weight /= norm;
                by_term[*term as usize].push((*id, *weight));
            }
            vectors.insert(*id, vector);
        }

        Self {
            ids,
            keys,
            vectors,
            by_term,
        }
    }

    pub fn key(&self, id: SectionId) -> Option<&SectionKey> {
        self.keys.get(&id)
    }

    /// Cosine similarity; 1 for a section with itself, 0 without shared terms
    pub fn similarity(&self, a: SectionId, b: SectionId) -> f64 {
        if a == b {
            return 1.0;
        }
        let (Some(va), Some(vb)) = (self.vectors.get(&a), self.vectors.get(&b)) else {
            return 0.0;
        };

        let (mut i, mut j, mut dot) = (0, 0, 0.0);
        while i < va.len() && j < vb.len() {
            match va[i].0.cmp(&vb[j].0) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    dot += va[i].1 * vb[j].1;
                    i += 1;
                    j += 1;
                }
            }
        }
        dot.min(1.0)
    }

    /// Neighbor lists for every section: scores at or above the see-also
    /// threshold, best first. Each section selects at most `max_neighbors`;
    /// a pair selected by either side is stored in both directions, so
    /// lookups agree whichever endpoint they start from. Sections of the same
    /// entry are never paired.
    pub fn neighbors(&self, config: &ConcordanceConfig) -> Vec<SimilarityEdge> {
        let selected: Vec<Vec<(SectionId, f64)>> = self
            .ids
            .par_iter()
            .map(|&source| self.neighbors_of(source, config))
            .collect();

        let mut adjacency: FxHashMap<SectionId, FxHashMap<SectionId, f64>> = FxHashMap::default();
        for (&source, list) in self.ids.iter().zip(selected) {
            for (target, score) in list {
                adjacency.entry(source).or_default().insert(target, score);
                adjacency.entry(target).or_default().insert(source, score);
            }
        }

        let mut edges = Vec::new();
        for &source in &self.ids {
            let Some(targets) = adjacency.remove(&source) else {
                continue;
            };
            let mut ranked: Vec<(SectionId, f64)> = targets.into_iter().collect();
            ranked.sort_by(|a, b| {
                b.1.total_cmp(&a.1)
                    .then_with(|| self.keys.get(&a.0).cmp(&self.keys.get(&b.0)))
            });
            edges.extend(ranked.into_iter().enumerate().map(|(rank, (target, score))| {
                SimilarityEdge {
                    source,
                    target,
                    score,
                    rank: rank as u32,
                }
            }));
        }
        edges
    }

    fn neighbors_of(&self, source: SectionId, config: &ConcordanceConfig) -> Vec<(SectionId, f64)> {
        let (Some(vector), Some(source_key)) = (self.vectors.get(&source), self.keys.get(&source))
        else {
            return Vec::new();
        };

        // Terms are visited in index order, so a pair accumulates its dot
        // product identically from either side
        let mut acc: FxHashMap<SectionId, f64> = FxHashMap::default();
        for &(term, weight) in vector {
            for &(other, other_weight) in &self.by_term[term as usize] {
                if other == source {
                    continue;
                }
                *acc.entry(other).or_insert(0.0) += weight * other_weight;
            }
        }

        let mut scored: Vec<(f64, &SectionKey, SectionId)> = acc
            .into_iter()
            .filter_map(|(other, score)| {
                let key = self.keys.get(&other)?;
                let score = score.min(1.0);
                (key.path != source_key.path && score >= config.see_also_threshold)
                    .then_some((score, key, other))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored.truncate(config.max_neighbors);
        scored
            .into_iter()
            .map(|(score, _, target)| (target, score))
            .collect()
    }
}

/// Collapse per-direction edges into pairs reported once (`a < b`), sorted
/// by score descending then keys
pub fn pairs_from_edges(
    edges: &[SimilarityEdge],
    keys: &FxHashMap<SectionId, SectionKey>,
) -> Vec<PairRecord> {
    let mut unique: BTreeMap<(SectionKey, SectionKey), f64> = BTreeMap::new();
    for edge in edges {
        let (Some(x), Some(y)) = (keys.get(&edge.source), keys.get(&edge.target)) else {
            continue;
        };
        let pair = if x < y {
            (x.clone(), y.clone())
        } else {
            (y.clone(), x.clone())
        };
        unique.entry(pair).or_insert(edge.score);
    }

    let mut pairs: Vec<PairRecord> = unique
        .into_iter()
        .map(|((a, b), score)| PairRecord { a, b, score })
        .collect();
    pairs.sort_by(|p, q| {
        q.score
            .total_cmp(&p.score)
            .then_with(|| p.a.cmp(&q.a))
            .then_with(|| p.b.cmp(&q.b))
    });
    pairs
}

/// Split pairs into the see-also and merge-candidate bands
pub fn split_bands(pairs: Vec<PairRecord>, config: &ConcordanceConfig) -> (Vec<PairRecord>, Vec<PairRecord>) {
    let mut see_also = Vec::new();
    let mut merge = Vec::new();
    for pair in pairs {
        match config.band(pair.score) {
            Some(Band::Merge) => merge.push(pair),
            Some(Band::SeeAlso) => see_also.push(pair),
            None => {}
        }
    }
    (see_also, merge)
}

/// `concordance.json` / `merge-candidates.json`
#[derive(Debug, Clone, Serialize)]
pub struct ConcordanceReport {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    /// Index generation the table was computed from
    pub generation: u64,
    pub band: Band,
    pub min_score: f64,
    /// Exclusive upper bound for the see-also band
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_score: Option<f64>,
    pub pairs: Vec<PairRecord>,
}

/// Result of one concordance run
#[derive(Debug, Clone)]
pub struct ConcordanceOutcome {
    pub generation: u64,
    pub edges: usize,
    pub see_also: Vec<PairRecord>,
    pub merge: Vec<PairRecord>,
}

impl ConcordanceOutcome {
    pub fn reports(&self, config: &ConcordanceConfig) -> (ConcordanceReport, ConcordanceReport) {
        let now = Utc::now();
        (
            ConcordanceReport {
                schema_version: REPORT_SCHEMA_VERSION,
                generated_at: now,
                generation: self.generation,
                band: Band::SeeAlso,
                min_score: config.see_also_threshold,
                max_score: Some(config.merge_threshold),
                pairs: self.see_also.clone(),
            },
            ConcordanceReport {
                schema_version: REPORT_SCHEMA_VERSION,
                generated_at: now,
                generation: self.generation,
                band: Band::Merge,
                min_score: config.merge_threshold,
                max_score: None,
                pairs: self.merge.clone(),
            },
        )
    }

    /// Write both band reports
    pub fn write_reports(&self, store_root: &Path, config: &ConcordanceConfig) -> Result<()> {
        let (see_also, merge) = self.reports(config);
        write_report(store_root, CONCORDANCE_REPORT, &see_also)?;
        write_report(store_root, MERGE_CANDIDATES_REPORT, &merge)?;
        Ok(())
    }
}

/// Recompute the similarity table from a snapshot and swap it in.
///
/// Nothing is written if the index changed while computing; the run then
/// fails with [`IndexError::Conflict`].
pub fn run_concordance(store_root: &Path, config: &AppConfig) -> Result<ConcordanceOutcome> {
    let reader = IndexReader::open_or_build(store_root, config)?;
    let snapshot = reader.generation();

    let model = TfIdfModel::build(&reader)?;
    let edges = model.neighbors(&config.concordance);
    let pairs = pairs_from_edges(&edges, &model.keys);
    drop(reader);

    let mut writer = IndexWriter::open(
        &crate::utils::get_index_path(store_root, &config.index),
        &config.index,
    )?;
    let mut txn = writer.begin()?;
    txn.expect_generation(snapshot)?;
    txn.replace_similarity(&edges)?;
    let generation = txn.commit()?;

    let (see_also, merge) = split_bands(pairs, &config.concordance);
    tracing::info!(
        sections = model.ids.len(),
        edges = edges.len(),
        see_also = see_also.len(),
        merge = merge.len(),
        generation,
        "concordance table replaced"
    );

    Ok(ConcordanceOutcome {
        generation,
        edges: edges.len(),
        see_also,
        merge,
    })
}

/// Bands from the stored table when it is current, otherwise recomputed
pub fn current_bands(store_root: &Path, config: &AppConfig) -> Result<ConcordanceOutcome> {
    let reader = IndexReader::open_or_build(store_root, config)?;
    if !reader.similarity_current()? {
        drop(reader);
        tracing::info!("similarity table out of date; recomputing");
        return run_concordance(store_root, config);
    }

    let keys: FxHashMap<SectionId, SectionKey> = reader
        .sections()?
        .into_iter()
        .map(|row| (row.id, row.key))
        .collect();
    let edges = reader.similarity_edges()?;
    let (see_also, merge) = split_bands(pairs_from_edges(&edges, &keys), &config.concordance);
    Ok(ConcordanceOutcome {
        generation: reader.generation(),
        edges: edges.len(),
        see_also,
        merge,
    })
}

/// Stored neighbors of one section, best first
pub fn neighbors_of_key(reader: &IndexReader, key: &SectionKey) -> Result<Vec<(SectionKey, f64)>> {
    let Some(row) = reader.section_by_key(&key.path, &key.heading)? else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for edge in reader.similar_to(row.id)? {
        if let Some(target) = reader.section(edge.target)? {
            out.push((target.key, edge.score));
        }
    }
    Ok(out)
}
