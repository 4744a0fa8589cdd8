//! Worker selection over a route's candidate set.
//!
//! Candidates arrive sorted lexicographically (the registry guarantees it),
//! which doubles as the deterministic tie-break: strategies that are
//! indifferent between candidates always see them in the same order.

use crate::models::job::HttpMethod;
use crate::models::route::StrategyKind;
use crate::services::store::{StoreClient, StoreError};
use crate::utils::keys;
use rand::Rng;
use std::sync::Arc;

/// Header that pins a request to one worker version.
pub const PIN_HEADER: &str = "X-Worker-Version";

/// Picks a worker version for each dispatch.
///
/// Round-robin keeps its cursor in the store (`route:cursor:<method>|<path>`,
/// advanced with an atomic increment), so concurrent gate replicas share a
/// single rotation instead of each counting locally.
#[derive(Clone)]
pub struct RouteStrategy {
    kind: StrategyKind,
    store: Arc<StoreClient>,
}

impl RouteStrategy {
    pub fn new(kind: StrategyKind, store: Arc<StoreClient>) -> Self {
        Self { kind, store }
    }

    /// Chooses a worker version, or `None` when the candidate set (after the
    /// optional pin filter) is empty.
    pub async fn select(
        &self,
        method: HttpMethod,
        path: &str,
        candidates: &[String],
        pinned_version: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        let candidates = filter_pinned(candidates, pinned_version);
        if candidates.is_empty() {
            return Ok(None);
        }

        let chosen = match self.kind {
            StrategyKind::RoundRobin => {
                let cursor = self
                    .store
                    .atomic_increment(&keys::route_cursor(method, path), 1)
                    .await?;
                pick_round_robin(&candidates, cursor)
            }
            StrategyKind::Random => {
                let index = rand::thread_rng().gen_range(0..candidates.len());
                candidates[index]
            }
        };
        Ok(Some(chosen.to_string()))
    }
}

/// Restricts the candidate set to the pinned version, when one is requested.
fn filter_pinned<'a>(candidates: &'a [String], pinned: Option<&str>) -> Vec<&'a String> {
    match pinned {
        Some(version) => candidates.iter().filter(|c| *c == version).collect(),
        None => candidates.iter().collect(),
    }
}

/// Maps a store cursor value onto a candidate index.
///
/// The cursor starts at 1 (first INCR on a fresh key), so the first dispatch
/// lands on the first candidate in sort order.
fn pick_round_robin<'a>(candidates: &[&'a String], cursor: i64) -> &'a String {
    let index = (cursor - 1).rem_euclid(candidates.len() as i64) as usize;
    candidates[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn round_robin_alternates_in_sorted_order() {
        let candidates = versions(&["v1", "v2"]);
        let refs: Vec<&String> = candidates.iter().collect();

        let picks: Vec<&str> = (1..=4)
            .map(|cursor| pick_round_robin(&refs, cursor).as_str())
            .collect();
        assert_eq!(picks, vec!["v1", "v2", "v1", "v2"]);
    }

    #[test]
    fn round_robin_splits_evenly_over_many_dispatches() {
        let candidates = versions(&["a", "b"]);
        let refs: Vec<&String> = candidates.iter().collect();

        let mut counts = [0usize; 2];
        for cursor in 1..=100 {
            match pick_round_robin(&refs, cursor).as_str() {
                "a" => counts[0] += 1,
                _ => counts[1] += 1,
            }
        }
        assert_eq!(counts, [50, 50]);
    }

    #[test]
    fn round_robin_survives_cursor_wraparound() {
        let candidates = versions(&["a", "b", "c"]);
        let refs: Vec<&String> = candidates.iter().collect();

        // A cursor that wrapped negative still maps into range.
        let pick = pick_round_robin(&refs, -5);
        assert!(candidates.contains(pick));
    }

    #[test]
    fn pin_filter_restricts_to_the_requested_version() {
        let candidates = versions(&["v1", "v2"]);

        let pinned = filter_pinned(&candidates, Some("v2"));
        assert_eq!(pinned.len(), 1);
        assert_eq!(pinned[0], "v2");

        let absent = filter_pinned(&candidates, Some("v9"));
        assert!(absent.is_empty());

        let unpinned = filter_pinned(&candidates, None);
        assert_eq!(unpinned.len(), 2);
    }
}
