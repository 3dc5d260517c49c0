//! Document-store collaborator consumed by the repositories.
//!
//! The traits here name exactly the operations the aggregation layer needs:
//! point lookups by the dedup key, conditional counter updates that are
//! atomic per document, predicate scans, paginated window queries, and bulk
//! removal where the store-side removed count is authoritative.
//!
//! Backends must guarantee per-document atomicity for the conditional
//! updates; no distributed lock is taken above them.

pub mod memory;

pub use memory::{InMemoryAggregateStats, InMemoryErrorStore, InMemoryStackStore};

use crate::types::{Error, ErrorStack, IncludeFlags, PageQuery, StackInfo};
use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate stack for project {project_id} signature {signature_hash}")]
    DuplicateSignature {
        project_id: String,
        signature_hash: String,
    },
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Backend(String),
}

/// Boolean predicates the derived-set queries scan for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPredicate {
    /// `is_hidden == true`
    Hidden,
    /// `date_fixed` present
    Fixed,
    /// signature carries the not-found path marker
    NotFound,
}

/// Which occurrence timestamp a window query filters and sorts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccurrenceWindow {
    Last,
    First,
}

/// Conjunctive filter for the paginated stack queries.
#[derive(Debug, Clone)]
pub struct StackQuery {
    pub project_id: String,
    pub utc_start: DateTime<Utc>,
    pub utc_end: DateTime<Utc>,
    pub window: OccurrenceWindow,
    pub include: IncludeFlags,
    pub page: PageQuery,
}

/// Slim projection used when deleting stacks in batches.
#[derive(Debug, Clone)]
pub struct StackRef {
    pub id: String,
    pub organization_id: String,
    pub project_id: String,
    pub signature_hash: String,
}

impl From<&ErrorStack> for StackRef {
    fn from(stack: &ErrorStack) -> Self {
        Self {
            id: stack.id.clone(),
            organization_id: stack.organization_id.clone(),
            project_id: stack.project_id.clone(),
            signature_hash: stack.signature_hash.clone(),
        }
    }
}

/// Stack document storage.
pub trait StackStore: Send + Sync {
    /// Insert a new stack. Fails on a duplicate (project, signature hash).
    fn insert(&self, stack: ErrorStack) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Option<ErrorStack>, StoreError>;

    /// Replace an existing stack document by id.
    fn replace(&self, stack: ErrorStack) -> Result<(), StoreError>;

    /// Single-match point lookup on the unique (project, signature hash) index.
    fn find_info_by_signature(
        &self,
        project_id: &str,
        signature_hash: &str,
    ) -> Result<Option<StackInfo>, StoreError>;

    /// Conditional update: set first occurrence (and last-updated) only when
    /// total occurrences is currently 0. Returns documents affected.
    fn set_first_occurrence_if_unset(
        &self,
        id: &str,
        occurrence_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Conditional update: increment total occurrences and advance last
    /// occurrence only when `occurrence_date` is strictly newer than the
    /// stored last occurrence. Returns documents affected.
    fn increment_if_newer(
        &self,
        id: &str,
        occurrence_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Unconditional increment of total occurrences alone. Returns documents
    /// affected.
    fn increment_total(&self, id: &str) -> Result<u64, StoreError>;

    /// Ids of all stacks in a project matching the predicate.
    fn ids_matching(
        &self,
        project_id: &str,
        predicate: StackPredicate,
    ) -> Result<Vec<String>, StoreError>;

    /// Filtered, sorted, paginated scan. The returned count reflects the full
    /// filtered set, computed before pagination is applied.
    fn find_page(&self, query: &StackQuery) -> Result<(Vec<ErrorStack>, u64), StoreError>;

    /// Up to `limit` slim refs for a project, for batched deletion.
    fn project_page(&self, project_id: &str, limit: usize) -> Result<Vec<StackRef>, StoreError>;

    /// Bulk remove by id set. Returns how many documents were actually
    /// removed; callers treat that count as authoritative.
    fn remove_by_ids(&self, ids: &[String]) -> Result<u64, StoreError>;
}

/// Error occurrence storage.
pub trait ErrorStore: Send + Sync {
    fn insert(&self, error: Error) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Option<Error>, StoreError>;

    /// Rewrite the denormalized fixed flag on every error under a stack.
    /// Returns documents affected.
    fn update_fixed_by_stack_id(&self, stack_id: &str, is_fixed: bool)
        -> Result<u64, StoreError>;

    /// Rewrite the denormalized hidden flag on every error under a stack.
    /// Returns documents affected.
    fn update_hidden_by_stack_id(
        &self,
        stack_id: &str,
        is_hidden: bool,
    ) -> Result<u64, StoreError>;

    fn remove_by_project(&self, project_id: &str) -> Result<u64, StoreError>;
}

/// Organization / project rollup counters maintained alongside deletes.
pub trait AggregateStats: Send + Sync {
    fn increment_org_stacks(&self, organization_id: &str, delta: i64);
    fn increment_project_stacks(&self, project_id: &str, delta: i64);

    /// Hard-set a project's error and stack counts (project removal).
    fn set_project_counts(&self, project_id: &str, error_count: i64, stack_count: i64);

    fn org_stack_count(&self, organization_id: &str) -> i64;
    fn project_stack_count(&self, project_id: &str) -> i64;
    fn project_error_count(&self, project_id: &str) -> i64;
}
