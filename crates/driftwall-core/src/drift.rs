//! Belief drift accounting.
//!
//! Each episode is replayed in step order against the agent's own predictions.
//! The analyzer keeps a per-episode belief map (what the agent last committed
//! for each key) and counts the steps where that belief disagrees with a newly
//! revealed gold value.

use std::collections::HashMap;
use std::iter::Sum;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DriftwallError, DriftwallResult};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub query_id: String,
    pub key: String,
    pub gold: Value,
    pub step: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub episode_id: String,
    pub queries: Vec<Query>,
}

impl Episode {
    /// Build an episode together with its prediction map from a list of
    /// predictions parallel to `queries`. `None` entries mean "no prediction".
    pub fn from_parallel(
        episode_id: impl Into<String>,
        queries: Vec<Query>,
        predictions: Vec<Option<Value>>,
    ) -> DriftwallResult<(Self, Predictions)> {
        let episode_id = episode_id.into();
        if queries.len() != predictions.len() {
            return Err(DriftwallError::Precondition(format!(
                "episode {episode_id}: {} queries but {} predictions",
                queries.len(),
                predictions.len()
            )));
        }
        let preds = queries
            .iter()
            .zip(predictions)
            .filter_map(|(q, p)| p.map(|v| (q.query_id.clone(), v)))
            .collect();
        Ok((
            Self {
                episode_id,
                queries,
            },
            preds,
        ))
    }

    fn in_step_order(&self) -> Vec<&Query> {
        let mut ordered: Vec<&Query> = self.queries.iter().collect();
        ordered.sort_by_key(|q| q.step);
        ordered
    }
}

/// Agent answers keyed by query id. A missing entry means no prediction.
pub type Predictions = HashMap<String, Value>;

/// Retrieval diagnostics keyed by query id.
pub type Diagnostics = HashMap<String, RetrievalDiagnostic>;

/// Whether the evidence supporting the gold value reached the predictor.
///
/// The three flags come from different upstream checks and are not always
/// redundant, so each one can veto on its own. Unset flags never veto.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalDiagnostic {
    pub gold_missing: Option<bool>,
    pub correct_included: Option<bool>,
    pub dropped_correct: Option<bool>,
}

impl RetrievalDiagnostic {
    pub fn gold_present(&self) -> bool {
        self.gold_missing != Some(true)
            && self.correct_included != Some(false)
            && self.dropped_correct != Some(true)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriftOptions {
    /// Score queries that have no diagnostic entry instead of skipping them.
    pub assume_gold_present: bool,
}

// ---------------------------------------------------------------------------
// Counts and metrics
// ---------------------------------------------------------------------------

/// Additive drift accumulator. `merge` is associative and commutative with
/// `DriftCounts::default()` as identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftCounts {
    pub steps_total: u64,
    pub steps_drift: u64,
    pub steps_persist: u64,
    pub wrong_commit: u64,
    pub episodes_total: u64,
    pub episodes_drift: u64,
}

impl DriftCounts {
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            steps_total: self.steps_total + other.steps_total,
            steps_drift: self.steps_drift + other.steps_drift,
            steps_persist: self.steps_persist + other.steps_persist,
            wrong_commit: self.wrong_commit + other.wrong_commit,
            episodes_total: self.episodes_total + other.episodes_total,
            episodes_drift: self.episodes_drift + other.episodes_drift,
        }
    }

    pub fn metrics(&self) -> DriftMetrics {
        DriftMetrics {
            step_rate: ratio(self.steps_drift, self.steps_total),
            persistence_rate: ratio(self.steps_persist, self.steps_total),
            wrong_commit_rate: ratio(self.wrong_commit, self.steps_total),
            run_rate: ratio(self.episodes_drift, self.episodes_total),
            step_count: self.steps_total,
            run_count: self.episodes_total,
        }
    }
}

impl Sum for DriftCounts {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Self::merge)
    }
}

fn ratio(num: u64, den: u64) -> Option<f64> {
    if den == 0 {
        None
    } else {
        Some(num as f64 / den as f64)
    }
}

/// Rates derived from [`DriftCounts`]; a rate is `None` when its denominator
/// is zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftMetrics {
    pub step_rate: Option<f64>,
    pub persistence_rate: Option<f64>,
    pub wrong_commit_rate: Option<f64>,
    pub run_rate: Option<f64>,
    pub step_count: u64,
    pub run_count: u64,
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

pub struct DriftAnalyzer<'a> {
    predictions: &'a Predictions,
    diagnostics: &'a Diagnostics,
    options: DriftOptions,
}

impl<'a> DriftAnalyzer<'a> {
    pub fn new(predictions: &'a Predictions, diagnostics: &'a Diagnostics) -> Self {
        Self {
            predictions,
            diagnostics,
            options: DriftOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DriftOptions) -> Self {
        self.options = options;
        self
    }

    fn scoreable(&self, query_id: &str) -> bool {
        match self.diagnostics.get(query_id) {
            Some(diag) => diag.gold_present(),
            None => self.options.assume_gold_present,
        }
    }

    /// Counts for a single episode. The belief map lives only for this call.
    pub fn analyze_episode(&self, episode: &Episode) -> DriftCounts {
        let mut belief: HashMap<&str, &Value> = HashMap::new();
        let mut counts = DriftCounts::default();
        let mut drifted = false;

        for query in episode.in_step_order() {
            if !self.scoreable(&query.query_id) {
                continue;
            }
            counts.steps_total += 1;

            let predicted = self.predictions.get(&query.query_id);
            let correct = predicted == Some(&query.gold);

            if belief.get(query.key.as_str()).is_some_and(|b| **b != query.gold) {
                counts.steps_drift += 1;
                drifted = true;
                if !correct {
                    counts.steps_persist += 1;
                }
            }

            if let Some(value) = predicted {
                if !correct {
                    counts.wrong_commit += 1;
                }
                belief.insert(query.key.as_str(), value);
            }
        }

        if counts.steps_total > 0 {
            counts.episodes_total = 1;
            counts.episodes_drift = u64::from(drifted);
        }
        counts
    }

    pub fn analyze(&self, episodes: &[Episode]) -> DriftCounts {
        let counts: DriftCounts = episodes.iter().map(|e| self.analyze_episode(e)).sum();
        tracing::debug!(
            episodes = episodes.len(),
            steps = counts.steps_total,
            drift = counts.steps_drift,
            "drift analysis complete"
        );
        counts
    }

    /// Same totals as [`Self::analyze`], computed episode-parallel.
    pub fn analyze_parallel(&self, episodes: &[Episode]) -> DriftCounts {
        let counts = episodes
            .par_iter()
            .map(|e| self.analyze_episode(e))
            .reduce(DriftCounts::default, DriftCounts::merge);
        tracing::debug!(
            episodes = episodes.len(),
            steps = counts.steps_total,
            drift = counts.steps_drift,
            "parallel drift analysis complete"
        );
        counts
    }
}
