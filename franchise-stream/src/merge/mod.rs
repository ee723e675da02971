//! Merge engine
//!
//! Folds one source's batch into the master table. A semantic collaborator
//! (an LLM behind [`SemanticMerger`]) is tried first when configured; its
//! answer is sanity-checked and normalized before adoption. Whenever it is
//! absent, fails, times out or returns something unusable, the
//! deterministic [`fallback_merge`] produces the table instead.
//!
//! The engine holds no table state: every call takes the current table and
//! returns a new one.

pub mod fallback;
pub mod gemini;
pub mod matcher;

pub use fallback::fallback_merge;
pub use gemini::GeminiMerger;
pub use matcher::AddressMatcher;

use async_trait::async_trait;
use franchise_common::models::{MasterTable, MergedEntry, SourcedLocation};
use franchise_common::normalize_phone;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default bound on one collaborator call
pub const DEFAULT_SEMANTIC_TIMEOUT: Duration = Duration::from_secs(30);

/// Semantic merge collaborator errors
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Result rejected: {0}")]
    Rejected(String),
}

/// External capability that merges a batch into a table by judgment
///
/// Implementations should return every entry of the updated table. The
/// engine does not trust the result: phones are re-normalized, sources
/// deduplicated, and a result that drops a source tag is rejected.
#[async_trait]
pub trait SemanticMerger: Send + Sync {
    /// Collaborator name for logs
    fn name(&self) -> &'static str;

    async fn merge_batch(
        &self,
        table: &MasterTable,
        batch: &[SourcedLocation],
    ) -> Result<Vec<MergedEntry>, MergeError>;
}

/// Which path produced a merge result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePath {
    /// Empty batch, table returned as-is
    Unchanged,
    Semantic,
    Fallback,
}

/// Merge result with the path that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub table: MasterTable,
    pub path: MergePath,
}

/// Batch merge with optional semantic collaborator
#[derive(Clone)]
pub struct MergeEngine {
    semantic: Option<Arc<dyn SemanticMerger>>,
    matcher: AddressMatcher,
    timeout: Duration,
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new(AddressMatcher::default())
    }
}

impl MergeEngine {
    /// Engine without a collaborator (fallback only)
    pub fn new(matcher: AddressMatcher) -> Self {
        Self {
            semantic: None,
            matcher,
            timeout: DEFAULT_SEMANTIC_TIMEOUT,
        }
    }

    pub fn with_semantic(mut self, merger: Arc<dyn SemanticMerger>) -> Self {
        self.semantic = Some(merger);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn matcher(&self) -> AddressMatcher {
        self.matcher
    }

    pub fn has_semantic(&self) -> bool {
        self.semantic.is_some()
    }

    /// Merge a batch, returning the new table
    pub async fn merge(
        &self,
        table: &MasterTable,
        batch: &[SourcedLocation],
        all_same_source: bool,
    ) -> MasterTable {
        self.merge_with_outcome(table, batch, all_same_source).await.table
    }

    /// Merge a batch and report which path was taken
    ///
    /// With `all_same_source == false` the collaborator is called once per
    /// run of consecutive records sharing a source.
    pub async fn merge_with_outcome(
        &self,
        table: &MasterTable,
        batch: &[SourcedLocation],
        all_same_source: bool,
    ) -> MergeOutcome {
        if batch.is_empty() {
            return MergeOutcome {
                table: table.clone(),
                path: MergePath::Unchanged,
            };
        }

        let Some(semantic) = &self.semantic else {
            debug!(records = batch.len(), "No semantic merger configured, using fallback merge");
            return self.fallback(table, batch);
        };

        match self.merge_semantic(semantic.as_ref(), table, batch, all_same_source).await {
            Ok(merged) => {
                info!(
                    merger = semantic.name(),
                    records = batch.len(),
                    entries = merged.len(),
                    "Semantic merge applied"
                );
                MergeOutcome {
                    table: merged,
                    path: MergePath::Semantic,
                }
            }
            Err(e) => {
                warn!(
                    merger = semantic.name(),
                    error = %e,
                    "Semantic merge failed, using fallback merge"
                );
                self.fallback(table, batch)
            }
        }
    }

    fn fallback(&self, table: &MasterTable, batch: &[SourcedLocation]) -> MergeOutcome {
        MergeOutcome {
            table: fallback_merge(table, batch, self.matcher),
            path: MergePath::Fallback,
        }
    }

    async fn merge_semantic(
        &self,
        semantic: &dyn SemanticMerger,
        table: &MasterTable,
        batch: &[SourcedLocation],
        all_same_source: bool,
    ) -> Result<MasterTable, MergeError> {
        let runs = if all_same_source {
            vec![batch]
        } else {
            source_runs(batch)
        };

        let mut current = table.clone();
        for run in runs {
            let entries = tokio::time::timeout(self.timeout, semantic.merge_batch(&current, run))
                .await
                .map_err(|_| MergeError::Timeout(self.timeout))??;
            current = sanitize_result(&current, run, entries)?;
        }
        Ok(current)
    }
}

/// Split a batch into maximal runs of consecutive records with one source
fn source_runs(batch: &[SourcedLocation]) -> Vec<&[SourcedLocation]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=batch.len() {
        if i == batch.len() || batch[i].source != batch[start].source {
            runs.push(&batch[start..i]);
            start = i;
        }
    }
    runs
}

/// Enforce table post-conditions on a collaborator result
///
/// Blank addresses are dropped; phones are normalized. Entries without
/// sources, or a result missing any source of the input, are rejected.
pub fn sanitize_result(
    previous: &MasterTable,
    batch: &[SourcedLocation],
    entries: Vec<MergedEntry>,
) -> Result<MasterTable, MergeError> {
    let mut cleaned = Vec::with_capacity(entries.len());

    for entry in entries {
        let address = entry.address.trim();
        if address.is_empty() {
            debug!("Dropping semantic merge entry with blank address");
            continue;
        }
        if entry.sources.is_empty() {
            return Err(MergeError::Rejected(format!("entry '{}' has no sources", address)));
        }
        cleaned.push(MergedEntry::new(
            address,
            normalize_phone(&entry.phone_number),
            entry.sources,
        ));
    }

    let merged = MasterTable::from_entries(cleaned);
    let present = merged.all_sources();
    let expected = previous
        .all_sources()
        .iter()
        .map(str::to_string)
        .chain(batch.iter().map(|r| r.source.clone()))
        .collect::<Vec<_>>();

    if let Some(missing) = expected.iter().find(|s| !present.contains(s)) {
        return Err(MergeError::Rejected(format!("source '{}' was dropped", missing)));
    }

    Ok(merged)
}
