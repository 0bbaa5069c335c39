use std::time::Instant;

/// Identity of one cached query: the entity it reads plus the serialized
/// filter parameters. All keys sharing an entity invalidate together, since
/// a change event cannot say which filtered subsets it touched.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub entity: String,
    pub filter: String,
}

impl QueryKey {
    pub fn new(entity: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            filter: filter.into(),
        }
    }

    /// The unfiltered query over an entity.
    pub fn entity(entity: impl Into<String>) -> Self {
        Self::new(entity, "")
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.filter.is_empty() {
            f.write_str(&self.entity)
        } else {
            write!(f, "{}?{}", self.entity, self.filter)
        }
    }
}

/// Freshness of a cache entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    /// Matches what the backend last confirmed.
    Fresh,
    /// Invalidated; a refetch is needed (or already queued by a consumer).
    Stale,
    /// A refetch is in flight. At most one per key.
    Fetching,
    /// The last refetch failed. Rows hold the last known value.
    Error,
}

/// Cached result of one query, tagged with freshness.
///
/// Snapshots handed to consumers are clones; the coordinator's copy is the
/// single source of truth and is only mutated through its contract.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub key: QueryKey,
    pub rows: Vec<serde_json::Value>,
    /// When the rows were last confirmed by the backend. `None` until the
    /// first successful fetch.
    pub fetched_at: Option<Instant>,
    pub status: CacheStatus,
    /// Failure detail when `status` is [`CacheStatus::Error`].
    pub error: Option<String>,
    /// Bumped whenever an invalidation or mutation supersedes an in-flight
    /// request; a fetch result only lands if its stamp still matches.
    pub(crate) generation: u64,
}

impl CacheEntry {
    pub(crate) fn pending(key: QueryKey) -> Self {
        Self {
            key,
            rows: Vec::new(),
            fetched_at: None,
            status: CacheStatus::Fetching,
            error: None,
            generation: 0,
        }
    }

    /// Whether consumers should show a loading indicator.
    pub fn is_loading(&self) -> bool {
        self.status == CacheStatus::Fetching && self.fetched_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_elides_empty_filter() {
        assert_eq!(QueryKey::entity("tasks").to_string(), "tasks");
        assert_eq!(
            QueryKey::new("tasks", "assignee=7").to_string(),
            "tasks?assignee=7"
        );
    }

    #[test]
    fn pending_entries_are_loading() {
        let entry = CacheEntry::pending(QueryKey::entity("tasks"));
        assert!(entry.is_loading());
        assert!(entry.rows.is_empty());
    }
}
