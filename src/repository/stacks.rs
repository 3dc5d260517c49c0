//! Stack repository: dedup lookups, occurrence counters, derived-set caches,
//! and cascading cache invalidation.
//!
//! ## Cache layout
//!
//! - entity cache keyed by stack id (prior-version diff in [`StackRepository::update`])
//! - point lookup keyed `"{project}{hash}:v2"`
//! - derived sets keyed `"{project}@__HIDDEN"` / `"@__FIXED"` / `"@__NOTFOUND"`
//!
//! Any write that can change a stack's fixed/hidden/not-found/point-lookup
//! status invalidates every cache entry whose predicate could now read
//! differently. Point and derived-set entries are invalidated independently
//! because they key differently.

use super::{ErrorRepository, RepositoryError};
use crate::cache::CacheClient;
use crate::config::Settings;
use crate::store::{
    AggregateStats, OccurrenceWindow, StackPredicate, StackQuery, StackRef, StackStore,
    StoreError,
};
use crate::types::{ErrorStack, IncludeFlags, PageQuery, StackInfo};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const HIDDEN_SUFFIX: &str = "@__HIDDEN";
const FIXED_SUFFIX: &str = "@__FIXED";
const NOT_FOUND_SUFFIX: &str = "@__NOTFOUND";

pub struct StackRepository {
    stacks: Arc<dyn StackStore>,
    errors: Arc<ErrorRepository>,
    aggregates: Arc<dyn AggregateStats>,
    cache: Arc<dyn CacheClient>,
    cache_ttl: Duration,
    delete_batch_size: usize,
}

impl StackRepository {
    pub fn new(
        stacks: Arc<dyn StackStore>,
        errors: Arc<ErrorRepository>,
        aggregates: Arc<dyn AggregateStats>,
        cache: Arc<dyn CacheClient>,
        settings: &Settings,
    ) -> Self {
        Self {
            stacks,
            errors,
            aggregates,
            cache,
            cache_ttl: Duration::from_secs(settings.cache_ttl_secs),
            delete_batch_size: settings.delete_batch_size,
        }
    }

    fn point_key(project_id: &str, signature_hash: &str) -> String {
        format!("{project_id}{signature_hash}:v2")
    }

    fn derived_key(project_id: &str, suffix: &str) -> String {
        format!("{project_id}{suffix}")
    }

    fn check_preconditions(stack: &ErrorStack) -> Result<(), RepositoryError> {
        if stack.id.is_empty() {
            return Err(RepositoryError::Precondition("stack id is empty".into()));
        }
        if stack.project_id.is_empty() {
            return Err(RepositoryError::Precondition(
                "stack project id is empty".into(),
            ));
        }
        if stack.signature_hash.is_empty() {
            return Err(RepositoryError::Precondition(
                "stack signature hash is empty".into(),
            ));
        }
        Ok(())
    }

    /// Cache-then-store read shared by the derived-set queries.
    fn cached_or_fetch<T, F>(&self, key: &str, fetch: F) -> Result<T, RepositoryError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, StoreError>,
    {
        if let Some(hit) = self.cache.get::<T>(key) {
            return Ok(hit);
        }

        let value = fetch()?;
        self.cache.set(key, &value, Some(self.cache_ttl));
        Ok(value)
    }

    /// Entity read through the id-keyed cache.
    pub fn get_by_id_cached(&self, id: &str) -> Result<Option<ErrorStack>, RepositoryError> {
        if let Some(hit) = self.cache.get::<ErrorStack>(id) {
            return Ok(Some(hit));
        }

        let found = self.stacks.get(id)?;
        if let Some(stack) = &found {
            self.cache.set(id, stack, Some(self.cache_ttl));
        }
        Ok(found)
    }

    /// Persist a new stack. Sets last-updated to now and optionally warms the
    /// entity cache.
    pub fn add(&self, mut stack: ErrorStack, warm_cache: bool) -> Result<ErrorStack, RepositoryError> {
        Self::check_preconditions(&stack)?;

        stack.last_updated = Utc::now();
        self.stacks.insert(stack.clone())?;

        if warm_cache {
            self.cache.set(&stack.id, &stack, Some(self.cache_ttl));
        }

        debug!(
            stack_id = %stack.id,
            project_id = %stack.project_id,
            signature_hash = %stack.signature_hash,
            "stack added"
        );
        Ok(stack)
    }

    pub fn add_many(
        &self,
        stacks: Vec<ErrorStack>,
        warm_cache: bool,
    ) -> Result<Vec<ErrorStack>, RepositoryError> {
        stacks
            .into_iter()
            .map(|stack| self.add(stack, warm_cache))
            .collect()
    }

    /// Persist a changed stack. Before persisting, diffs against the cached
    /// prior version: a changed fixed date propagates the fixed flag to the
    /// stack's errors and invalidates the fixed-ids set; a changed hidden
    /// flag does the same for hidden. Both paths drop the point lookup.
    pub fn update(
        &self,
        mut stack: ErrorStack,
        warm_cache: bool,
    ) -> Result<ErrorStack, RepositoryError> {
        Self::check_preconditions(&stack)?;
        stack.last_updated = Utc::now();

        if let Some(original) = self.get_by_id_cached(&stack.id)? {
            if original.date_fixed != stack.date_fixed {
                self.errors
                    .update_fixed_by_stack_id(&stack.id, stack.is_fixed())?;
                self.invalidate_fixed_ids(&stack.project_id);
            }

            if original.is_hidden != stack.is_hidden {
                self.errors
                    .update_hidden_by_stack_id(&stack.id, stack.is_hidden)?;
                self.invalidate_hidden_ids(&stack.project_id);
            }

            self.cache
                .remove(&Self::point_key(&stack.project_id, &stack.signature_hash));
        }

        self.stacks.replace(stack.clone())?;

        if warm_cache {
            self.cache.set(&stack.id, &stack, Some(self.cache_ttl));
        } else {
            self.cache.remove(&stack.id);
        }

        Ok(stack)
    }

    /// Record one occurrence against a stack.
    ///
    /// Two-step conditional update: (a) when total occurrences is 0 the first
    /// occurrence is (re)set to the incoming date; (b) the counter increments
    /// and last occurrence advances only when the incoming date is strictly
    /// newer. When (b) matches nothing the counter is incremented
    /// unconditionally without touching last occurrence, and the stack's
    /// cache entries are dropped. Keeps last occurrence monotonic under
    /// out-of-order arrival while never losing a count.
    pub fn increment_stats(
        &self,
        stack_id: &str,
        occurrence_date: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        if stack_id.is_empty() {
            return Err(RepositoryError::Precondition("stack id is empty".into()));
        }

        let now = Utc::now();
        self.stacks
            .set_first_occurrence_if_unset(stack_id, occurrence_date, now)?;

        let affected = self
            .stacks
            .increment_if_newer(stack_id, occurrence_date, now)?;
        if affected > 0 {
            return Ok(());
        }

        // Stale or concurrent date: count it without advancing the clock.
        self.stacks.increment_total(stack_id)?;
        self.invalidate_stack_caches(stack_id)?;
        Ok(())
    }

    fn invalidate_stack_caches(&self, stack_id: &str) -> Result<(), RepositoryError> {
        self.cache.remove(stack_id);
        if let Some(stack) = self.stacks.get(stack_id)? {
            self.cache
                .remove(&Self::point_key(&stack.project_id, &stack.signature_hash));
        }
        Ok(())
    }

    /// Cache-first point lookup by the dedup key. The queried signature hash
    /// is overlaid onto the result; it is not part of the cached payload.
    pub fn stack_info_by_signature(
        &self,
        project_id: &str,
        signature_hash: &str,
    ) -> Result<Option<StackInfo>, RepositoryError> {
        let key = Self::point_key(project_id, signature_hash);

        let mut info = match self.cache.get::<StackInfo>(&key) {
            Some(hit) => Some(hit),
            None => {
                let found = self
                    .stacks
                    .find_info_by_signature(project_id, signature_hash)?;
                if let Some(found) = &found {
                    self.cache.set(&key, found, Some(self.cache_ttl));
                }
                found
            }
        };

        if let Some(info) = &mut info {
            info.signature_hash = signature_hash.to_string();
        }
        Ok(info)
    }

    pub fn hidden_ids(&self, project_id: &str) -> Result<Vec<String>, RepositoryError> {
        self.cached_or_fetch(&Self::derived_key(project_id, HIDDEN_SUFFIX), || {
            self.stacks.ids_matching(project_id, StackPredicate::Hidden)
        })
    }

    pub fn fixed_ids(&self, project_id: &str) -> Result<Vec<String>, RepositoryError> {
        self.cached_or_fetch(&Self::derived_key(project_id, FIXED_SUFFIX), || {
            self.stacks.ids_matching(project_id, StackPredicate::Fixed)
        })
    }

    pub fn not_found_ids(&self, project_id: &str) -> Result<Vec<String>, RepositoryError> {
        self.cached_or_fetch(&Self::derived_key(project_id, NOT_FOUND_SUFFIX), || {
            self.stacks
                .ids_matching(project_id, StackPredicate::NotFound)
        })
    }

    pub fn invalidate_hidden_ids(&self, project_id: &str) {
        self.cache.remove(&Self::derived_key(project_id, HIDDEN_SUFFIX));
    }

    pub fn invalidate_fixed_ids(&self, project_id: &str) {
        self.cache.remove(&Self::derived_key(project_id, FIXED_SUFFIX));
    }

    pub fn invalidate_not_found_ids(&self, project_id: &str) {
        self.cache
            .remove(&Self::derived_key(project_id, NOT_FOUND_SUFFIX));
    }

    /// Delete stacks, grouped by (organization, project): one bulk remove per
    /// group, counters decremented by the count the store reports as removed.
    /// Returns the total removed.
    pub fn delete(&self, stacks: &[StackRef]) -> Result<u64, RepositoryError> {
        let mut groups: HashMap<(String, String), Vec<String>> = HashMap::new();
        for stack in stacks {
            groups
                .entry((stack.organization_id.clone(), stack.project_id.clone()))
                .or_default()
                .push(stack.id.clone());
        }

        let mut total_removed = 0;
        for ((organization_id, project_id), ids) in groups {
            let removed = self.stacks.remove_by_ids(&ids)?;
            if removed == 0 {
                continue;
            }

            let delta = -(removed as i64);
            self.aggregates.increment_org_stacks(&organization_id, delta);
            self.aggregates.increment_project_stacks(&project_id, delta);
            total_removed += removed;
        }

        // Derived-set entries need no invalidation here: deleted ids drop out
        // when the 5-minute TTL rolls the sets over.
        for stack in stacks {
            self.cache
                .remove(&Self::point_key(&stack.project_id, &stack.signature_hash));
            self.cache.remove(&stack.id);
        }

        Ok(total_removed)
    }

    /// Delete every stack in a project in fixed-size pages, then reset the
    /// project's error/stack counters to zero.
    pub fn remove_all_by_project(&self, project_id: &str) -> Result<u64, RepositoryError> {
        let mut total = 0;

        loop {
            let page = self.stacks.project_page(project_id, self.delete_batch_size)?;
            if page.is_empty() {
                break;
            }

            let removed = self.delete(&page)?;
            total += removed;
            if removed == 0 {
                warn!(project_id, "project removal made no progress, stopping");
                break;
            }
        }

        self.aggregates.set_project_counts(project_id, 0, 0);
        info!(project_id, removed = total, "removed all stacks for project");
        Ok(total)
    }

    pub async fn remove_all_by_project_async(
        self: &Arc<Self>,
        project_id: &str,
    ) -> Result<u64, RepositoryError> {
        let repo = Arc::clone(self);
        let project_id = project_id.to_string();
        tokio::task::spawn_blocking(move || repo.remove_all_by_project(&project_id))
            .await
            .map_err(|e| RepositoryError::Store(StoreError::Backend(e.to_string())))?
    }

    /// Stacks whose last occurrence falls in the window, newest first, plus
    /// the total matching count before pagination.
    pub fn most_recent(
        &self,
        project_id: &str,
        utc_start: DateTime<Utc>,
        utc_end: DateTime<Utc>,
        page: PageQuery,
        include: IncludeFlags,
    ) -> Result<(Vec<ErrorStack>, u64), RepositoryError> {
        Ok(self.stacks.find_page(&StackQuery {
            project_id: project_id.to_string(),
            utc_start,
            utc_end,
            window: OccurrenceWindow::Last,
            include,
            page,
        })?)
    }

    /// Stacks whose first occurrence falls in the window, newest first, plus
    /// the total matching count before pagination.
    pub fn new_stacks(
        &self,
        project_id: &str,
        utc_start: DateTime<Utc>,
        utc_end: DateTime<Utc>,
        page: PageQuery,
        include: IncludeFlags,
    ) -> Result<(Vec<ErrorStack>, u64), RepositoryError> {
        Ok(self.stacks.find_page(&StackQuery {
            project_id: project_id.to_string(),
            utc_start,
            utc_end,
            window: OccurrenceWindow::First,
            include,
            page,
        })?)
    }
}
