use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! merge_counters {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        /// Process-wide merge counters. Updated with relaxed atomics and read
        /// lock-free by introspection tooling.
        #[derive(Debug, Default)]
        pub struct MergeStats {
            $(pub(crate) $name: AtomicU64,)*
        }

        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct MergeStatsSnapshot {
            $($(#[$doc])* pub $name: u64,)*
        }

        impl MergeStats {
            pub fn snapshot(&self) -> MergeStatsSnapshot {
                MergeStatsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

merge_counters! {
    /// One-time unit setups.
    initial_merges,
    /// Compacted hoistable classes published directly.
    hoistable,
    hoistable_persistent,
    /// Passes where a hoistable class could not be defined optimistically.
    redo_hoistable,
    mergeable_class,
    mergeable_unique,
    mergeable_define,
    mergeable_global,
    mergeable_require,
    /// Required units whose top-level code had to run.
    pseudo_main_reentered,
    /// Required merge-only units, fully handled by the merge pass.
    pseudo_main_skip_deep,
    /// Requires skipped because the unit was already loaded.
    pseudo_main_guarded,
    compactions,
}

#[inline]
pub(crate) fn inc(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let stats = MergeStats::default();
        inc(&stats.compactions);
        inc(&stats.compactions);
        inc(&stats.mergeable_define);

        let snap = stats.snapshot();
        assert_eq!(snap.compactions, 2);
        assert_eq!(snap.mergeable_define, 1);
        assert_eq!(snap.hoistable, 0);
    }
}
