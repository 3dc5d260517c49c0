//! In-memory store backends for tests and minimal deployments.
//!
//! Per-document atomicity comes from the dashmap entry locks: every
//! conditional update runs under the exclusive guard for that one document.
//! Not durable; data is lost on restart.

use super::{
    AggregateStats, ErrorStore, OccurrenceWindow, StackPredicate, StackQuery, StackRef,
    StackStore, StoreError,
};
use crate::types::{Error, ErrorStack, StackInfo};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// In-memory stack documents with a unique (project, signature hash) index.
#[derive(Default)]
pub struct InMemoryStackStore {
    docs: DashMap<String, ErrorStack>,
    signature_index: DashMap<(String, String), String>,
}

impl InMemoryStackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored documents, for tests.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn matches_predicate(stack: &ErrorStack, predicate: StackPredicate) -> bool {
        match predicate {
            StackPredicate::Hidden => stack.is_hidden,
            StackPredicate::Fixed => stack.date_fixed.is_some(),
            StackPredicate::NotFound => stack.signature_info.has_not_found_path(),
        }
    }

    fn matches_query(stack: &ErrorStack, query: &StackQuery) -> bool {
        if stack.project_id != query.project_id {
            return false;
        }

        let field = match query.window {
            OccurrenceWindow::Last => stack.last_occurrence,
            OccurrenceWindow::First => stack.first_occurrence,
        };
        if field < query.utc_start || field > query.utc_end {
            return false;
        }

        if !query.include.fixed && stack.date_fixed.is_some() {
            return false;
        }
        if !query.include.hidden && stack.is_hidden {
            return false;
        }
        if !query.include.not_found && stack.signature_info.has_not_found_path() {
            return false;
        }

        true
    }
}

impl StackStore for InMemoryStackStore {
    fn insert(&self, stack: ErrorStack) -> Result<(), StoreError> {
        let key = (stack.project_id.clone(), stack.signature_hash.clone());
        match self.signature_index.entry(key) {
            Entry::Occupied(_) => Err(StoreError::DuplicateSignature {
                project_id: stack.project_id,
                signature_hash: stack.signature_hash,
            }),
            Entry::Vacant(slot) => {
                slot.insert(stack.id.clone());
                self.docs.insert(stack.id.clone(), stack);
                Ok(())
            }
        }
    }

    fn get(&self, id: &str) -> Result<Option<ErrorStack>, StoreError> {
        Ok(self.docs.get(id).map(|s| s.clone()))
    }

    fn replace(&self, stack: ErrorStack) -> Result<(), StoreError> {
        match self.docs.get_mut(&stack.id) {
            Some(mut slot) => {
                *slot = stack;
                Ok(())
            }
            None => Err(StoreError::NotFound(stack.id)),
        }
    }

    fn find_info_by_signature(
        &self,
        project_id: &str,
        signature_hash: &str,
    ) -> Result<Option<StackInfo>, StoreError> {
        let key = (project_id.to_string(), signature_hash.to_string());
        let Some(id) = self.signature_index.get(&key).map(|id| id.clone()) else {
            return Ok(None);
        };

        Ok(self.docs.get(&id).map(|stack| StackInfo {
            id: stack.id.clone(),
            date_fixed: stack.date_fixed,
            occurrences_are_critical: stack.occurrences_are_critical,
            is_hidden: stack.is_hidden,
            signature_hash: String::new(),
        }))
    }

    fn set_first_occurrence_if_unset(
        &self,
        id: &str,
        occurrence_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        match self.docs.get_mut(id) {
            Some(mut stack) if stack.total_occurrences == 0 => {
                stack.first_occurrence = occurrence_date;
                stack.last_updated = now;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn increment_if_newer(
        &self,
        id: &str,
        occurrence_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        match self.docs.get_mut(id) {
            Some(mut stack) if stack.last_occurrence < occurrence_date => {
                stack.total_occurrences += 1;
                stack.last_occurrence = occurrence_date;
                stack.last_updated = now;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn increment_total(&self, id: &str) -> Result<u64, StoreError> {
        match self.docs.get_mut(id) {
            Some(mut stack) => {
                stack.total_occurrences += 1;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn ids_matching(
        &self,
        project_id: &str,
        predicate: StackPredicate,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .docs
            .iter()
            .filter(|s| s.project_id == project_id && Self::matches_predicate(&s, predicate))
            .map(|s| s.id.clone())
            .collect())
    }

    fn find_page(&self, query: &StackQuery) -> Result<(Vec<ErrorStack>, u64), StoreError> {
        let mut matches: Vec<ErrorStack> = self
            .docs
            .iter()
            .filter(|s| Self::matches_query(&s, query))
            .map(|s| s.clone())
            .collect();

        matches.sort_by(|a, b| {
            let (ka, kb) = match query.window {
                OccurrenceWindow::Last => (a.last_occurrence, b.last_occurrence),
                OccurrenceWindow::First => (a.first_occurrence, b.first_occurrence),
            };
            kb.cmp(&ka).then_with(|| a.id.cmp(&b.id))
        });

        let total = matches.len() as u64;

        let skip = query.page.skip.unwrap_or(0);
        let page: Vec<ErrorStack> = match query.page.take {
            Some(take) => matches.into_iter().skip(skip).take(take).collect(),
            None => matches.into_iter().skip(skip).collect(),
        };

        Ok((page, total))
    }

    fn project_page(&self, project_id: &str, limit: usize) -> Result<Vec<StackRef>, StoreError> {
        Ok(self
            .docs
            .iter()
            .filter(|s| s.project_id == project_id)
            .take(limit)
            .map(|s| StackRef::from(&*s))
            .collect())
    }

    fn remove_by_ids(&self, ids: &[String]) -> Result<u64, StoreError> {
        let mut removed = 0;
        for id in ids {
            if let Some((_, stack)) = self.docs.remove(id) {
                self.signature_index
                    .remove(&(stack.project_id, stack.signature_hash));
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// In-memory error occurrence documents.
#[derive(Default)]
pub struct InMemoryErrorStore {
    docs: DashMap<String, Error>,
}

impl InMemoryErrorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

impl ErrorStore for InMemoryErrorStore {
    fn insert(&self, error: Error) -> Result<(), StoreError> {
        self.docs.insert(error.id.clone(), error);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Error>, StoreError> {
        Ok(self.docs.get(id).map(|e| e.clone()))
    }

    fn update_fixed_by_stack_id(
        &self,
        stack_id: &str,
        is_fixed: bool,
    ) -> Result<u64, StoreError> {
        let mut affected = 0;
        for mut entry in self.docs.iter_mut() {
            if entry.stack_id.as_deref() == Some(stack_id) {
                entry.is_fixed = is_fixed;
                affected += 1;
            }
        }
        Ok(affected)
    }

    fn update_hidden_by_stack_id(
        &self,
        stack_id: &str,
        is_hidden: bool,
    ) -> Result<u64, StoreError> {
        let mut affected = 0;
        for mut entry in self.docs.iter_mut() {
            if entry.stack_id.as_deref() == Some(stack_id) {
                entry.is_hidden = is_hidden;
                affected += 1;
            }
        }
        Ok(affected)
    }

    fn remove_by_project(&self, project_id: &str) -> Result<u64, StoreError> {
        let ids: Vec<String> = self
            .docs
            .iter()
            .filter(|e| e.project_id == project_id)
            .map(|e| e.id.clone())
            .collect();

        let mut removed = 0;
        for id in &ids {
            if self.docs.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// In-memory organization / project rollup counters.
#[derive(Default)]
pub struct InMemoryAggregateStats {
    org_stacks: DashMap<String, i64>,
    project_stacks: DashMap<String, i64>,
    project_errors: DashMap<String, i64>,
}

impl InMemoryAggregateStats {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AggregateStats for InMemoryAggregateStats {
    fn increment_org_stacks(&self, organization_id: &str, delta: i64) {
        *self.org_stacks.entry(organization_id.to_string()).or_default() += delta;
    }

    fn increment_project_stacks(&self, project_id: &str, delta: i64) {
        *self.project_stacks.entry(project_id.to_string()).or_default() += delta;
    }

    fn set_project_counts(&self, project_id: &str, error_count: i64, stack_count: i64) {
        self.project_errors
            .insert(project_id.to_string(), error_count);
        self.project_stacks
            .insert(project_id.to_string(), stack_count);
    }

    fn org_stack_count(&self, organization_id: &str) -> i64 {
        self.org_stacks
            .get(organization_id)
            .map(|v| *v)
            .unwrap_or(0)
    }

    fn project_stack_count(&self, project_id: &str) -> i64 {
        self.project_stacks.get(project_id).map(|v| *v).unwrap_or(0)
    }

    fn project_error_count(&self, project_id: &str) -> i64 {
        self.project_errors.get(project_id).map(|v| *v).unwrap_or(0)
    }
}
