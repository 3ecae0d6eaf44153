//! Approximate phrase index.
//!
//! Derived from the dictionary and rebuilt wholesale after every mutation.
//! It is a cache, never the source of truth.

use super::types::CommandId;

/// Added to token-sorted scores so a reordered phrase never scores as
/// identical.
pub const REORDER_PENALTY: f32 = 0.05;

#[derive(Debug, Clone)]
struct FuzzyEntry {
    phrase: String,
    sorted_tokens: String,
    command_id: CommandId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyHit {
    pub command_id: CommandId,
    pub phrase: String,
    /// 0.0 = identical, 1.0 = nothing in common.
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct FuzzyIndex {
    entries: Vec<FuzzyEntry>,
}

impl FuzzyIndex {
    /// Build from already-normalized `(phrase, command)` pairs.
    pub fn build<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, CommandId)>,
    {
        let entries = pairs
            .into_iter()
            .map(|(phrase, command_id)| FuzzyEntry {
                sorted_tokens: sorted_tokens(&phrase),
                phrase,
                command_id,
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Best candidate strictly below `max_score`. Ties go to the earlier entry.
    pub fn best_match(&self, normalized_query: &str, max_score: f32) -> Option<FuzzyHit> {
        if normalized_query.is_empty() || self.entries.is_empty() {
            return None;
        }
        let query_sorted = sorted_tokens(normalized_query);

        let mut best: Option<(usize, f32)> = None;
        for (i, entry) in self.entries.iter().enumerate() {
            let direct = score(normalized_query, &entry.phrase);
            let reordered = (score(&query_sorted, &entry.sorted_tokens) + REORDER_PENALTY).min(1.0);
            let s = direct.min(reordered);
            if best.map_or(true, |(_, b)| s < b) {
                best = Some((i, s));
            }
        }

        let (i, s) = best?;
        if s >= max_score {
            return None;
        }
        let entry = &self.entries[i];
        Some(FuzzyHit {
            command_id: entry.command_id.clone(),
            phrase: entry.phrase.clone(),
            score: s,
        })
    }
}

fn sorted_tokens(phrase: &str) -> String {
    let mut tokens: Vec<&str> = phrase.split(' ').filter(|t| !t.is_empty()).collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Edit distance normalized by the longer input.
pub fn score(a: &str, b: &str) -> f32 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 0.0;
    }
    levenshtein(a, b) as f32 / longest as f32
}

pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for i in 1..=a.len() {
        cur[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}
