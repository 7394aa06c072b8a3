//! Registry of the virtual device IDs published by the latest fingerprint

use std::collections::BTreeSet;
use std::collections::HashSet;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Duration;
use std::time::Instant;

#[derive(Debug, Default)]
struct Snapshot {
    ids: HashSet<String>,
    generation: u64,
    updated_at: Option<Instant>,
}

/// Set of currently known virtual device IDs.
///
/// The set is only ever replaced as a whole, so readers always observe the
/// complete result of one fingerprint tick.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    snapshot: RwLock<Snapshot>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in the IDs of a new tick. The set is built by the caller so the
    /// write lock only covers the swap itself.
    pub fn replace(&self, ids: HashSet<String>) {
        let now = Instant::now();
        let previous = {
            let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
            snapshot.generation += 1;
            snapshot.updated_at = Some(now);
            std::mem::replace(&mut snapshot.ids, ids)
        };
        // the old set is freed outside the lock
        drop(previous);
    }

    /// Returns the requested IDs that are not present, sorted and deduplicated.
    /// An empty result means every ID is known.
    pub fn contains_all<S: AsRef<str>>(&self, ids: &[S]) -> Vec<String> {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        ids.iter()
            .map(AsRef::as_ref)
            .filter(|id| !snapshot.ids.contains(*id))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ids
            .contains(id)
    }

    pub fn len(&self) -> usize {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ids
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of completed replacements
    pub fn generation(&self) -> u64 {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    /// Time since the last replacement, `None` if nothing was published yet.
    pub fn age(&self) -> Option<Duration> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .updated_at
            .map(|at| at.elapsed())
    }

    /// Sorted copy of the current set
    pub fn ids(&self) -> Vec<String> {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = snapshot.ids.iter().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use similar_asserts::assert_eq;

    use super::*;

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_registry_reports_everything_missing() {
        let registry = DeviceRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.age(), None);
        assert_eq!(registry.contains_all(&["gpu0-0"]), vec!["gpu0-0"]);
    }

    #[test]
    fn replace_swaps_whole_set() {
        let registry = DeviceRegistry::new();
        registry.replace(set(&["gpu0-0", "gpu0-1", "gpu1-0", "gpu1-1"]));
        registry.replace(set(&["gpu0-0", "gpu0-1"]));

        assert_eq!(registry.generation(), 2);
        assert_eq!(registry.ids(), vec!["gpu0-0", "gpu0-1"]);
        assert!(!registry.contains("gpu1-0"));
        assert!(registry.age().is_some());
    }

    #[test]
    fn contains_all_returns_sorted_unique_missing() {
        let registry = DeviceRegistry::new();
        registry.replace(set(&["gpu0-0", "gpu0-1"]));

        assert!(registry.contains_all(&["gpu0-1", "gpu0-0", "gpu0-1"]).is_empty());
        assert_eq!(
            registry.contains_all(&["gpu2-0", "gpu0-0", "gpu1-1", "gpu2-0"]),
            vec!["gpu1-1", "gpu2-0"]
        );
    }

    #[test]
    fn readers_never_observe_partial_sets() {
        let registry = Arc::new(DeviceRegistry::new());
        let small = set(&["a-0", "a-1"]);
        let large: HashSet<String> = (0..64).map(|i| format!("b-{i}")).collect();
        registry.replace(small.clone());

        let writer = {
            let registry = registry.clone();
            let (small, large) = (small.clone(), large.clone());
            std::thread::spawn(move || {
                for i in 0..200 {
                    registry.replace(if i % 2 == 0 { large.clone() } else { small.clone() });
                }
            })
        };

        for _ in 0..200 {
            let len = registry.len();
            assert!(len == small.len() || len == large.len(), "observed {len} entries");
        }
        writer.join().unwrap();
    }
}
