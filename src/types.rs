//! Core data model: error occurrences and their aggregation stacks.
//!
//! An [`Error`] is a single reported occurrence. Occurrences sharing a
//! signature hash within a project deduplicate into one [`ErrorStack`],
//! which carries the occurrence counters and operator-facing state
//! (fixed, hidden, regressed).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Signature metadata captured alongside the fingerprint.
///
/// Free-form key/value attributes describing what was hashed. A `path`
/// entry marks the stack as a not-found (404) stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureInfo(pub BTreeMap<String, String>);

impl SignatureInfo {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether this signature carries the not-found path marker.
    pub fn has_not_found_path(&self) -> bool {
        self.0.contains_key("path")
    }
}

/// A single reported error occurrence.
///
/// Immutable once persisted except for `is_fixed` / `is_hidden`, which are
/// denormalized from the owning stack and rewritten in bulk when the stack's
/// state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Error {
    pub id: String,
    pub organization_id: String,
    pub project_id: String,
    /// Owning stack, assigned by the pipeline.
    pub stack_id: Option<String>,
    /// Dedup fingerprint, assigned by the pipeline.
    pub signature_hash: Option<String>,
    pub occurrence_date: DateTime<Utc>,
    pub is_fixed: bool,
    pub is_hidden: bool,
    /// Free-form report payload (exception type, message, stack frames...).
    pub data: serde_json::Value,
}

impl Error {
    pub fn new(
        organization_id: impl Into<String>,
        project_id: impl Into<String>,
        occurrence_date: DateTime<Utc>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: organization_id.into(),
            project_id: project_id.into(),
            stack_id: None,
            signature_hash: None,
            occurrence_date,
            is_fixed: false,
            is_hidden: false,
            data,
        }
    }
}

/// The deduplication unit: one stack per distinct (project, signature hash).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorStack {
    pub id: String,
    pub organization_id: String,
    pub project_id: String,
    pub signature_hash: String,
    pub signature_info: SignatureInfo,
    pub title: String,
    pub description: Option<String>,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub total_occurrences: u64,
    pub fixed_in_version: Option<String>,
    /// Absence means the stack is unresolved.
    pub date_fixed: Option<DateTime<Utc>>,
    pub is_hidden: bool,
    pub is_regressed: bool,
    pub disable_notifications: bool,
    pub occurrences_are_critical: bool,
    pub references: Vec<String>,
    pub tags: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

impl ErrorStack {
    pub fn new(
        organization_id: impl Into<String>,
        project_id: impl Into<String>,
        signature_hash: impl Into<String>,
        occurrence_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: organization_id.into(),
            project_id: project_id.into(),
            signature_hash: signature_hash.into(),
            signature_info: SignatureInfo::default(),
            title: String::new(),
            description: None,
            first_occurrence: occurrence_date,
            last_occurrence: occurrence_date,
            total_occurrences: 0,
            fixed_in_version: None,
            date_fixed: None,
            is_hidden: false,
            is_regressed: false,
            disable_notifications: false,
            occurrences_are_critical: false,
            references: Vec::new(),
            tags: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.date_fixed.is_some()
    }
}

/// Point-lookup projection of a stack, cached per (project, signature hash).
///
/// The signature hash is overlaid after cache retrieval; it is never part of
/// the cached payload itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackInfo {
    pub id: String,
    pub date_fixed: Option<DateTime<Utc>>,
    pub occurrences_are_critical: bool,
    pub is_hidden: bool,
    #[serde(skip)]
    pub signature_hash: String,
}

impl StackInfo {
    pub fn is_fixed(&self) -> bool {
        self.date_fixed.is_some()
    }
}

/// Skip/limit pagination for the stack queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageQuery {
    pub skip: Option<usize>,
    pub take: Option<usize>,
}

impl PageQuery {
    pub fn new(skip: usize, take: usize) -> Self {
        Self {
            skip: Some(skip),
            take: Some(take),
        }
    }
}

/// Which otherwise-excluded stacks a query should include.
#[derive(Debug, Clone, Copy)]
pub struct IncludeFlags {
    pub hidden: bool,
    pub fixed: bool,
    pub not_found: bool,
}

impl Default for IncludeFlags {
    /// Hidden and fixed stacks are excluded by default; not-found stacks
    /// are included.
    fn default() -> Self {
        Self {
            hidden: false,
            fixed: false,
            not_found: true,
        }
    }
}
