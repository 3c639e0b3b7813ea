//! The macro analysis cache: a cache of analyses indexed by result type.
//!
//! An analysis derives a fact structure from a graph. The cache curates a
//! list of distinct analyses, maps every result type an analysis can
//! satisfy to its slot, and reference-counts slots by the number of result
//! types pointing at them. Registering a replacement analysis retires the
//! slots it shadows; slots whose refcount reaches zero are reused or
//! compacted away.
//!
//! The cache itself is a value: [`MacroCache::with_analysis`] and
//! [`MacroCache::update`] derive new caches, and swapping the active cache
//! is the caller's concern. Cached results are memoized per graph revision
//! behind a shared lock, so repeated queries against one cache and one
//! graph return the same `Arc`.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::sync::Arc;

use crate::graph::FlowGraph;
use crate::tag::{BlockTag, ValueTag};

// =============================================================================
// Analyses
// =============================================================================

/// A type-erased analysis result.
pub type AnalysisValue = Arc<dyn Any + Send + Sync>;

/// A change notice handed to [`MacroCache::update`].
///
/// The delta names the new graph and what changed relative to the graph the
/// cached results were computed against.
pub struct GraphUpdate<'a> {
    pub graph: &'a FlowGraph,
    pub kind: UpdateKind,
}

/// What a graph edit touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    /// Anything may have changed.
    Rebuilt,
    /// A block was added, removed, or had its parameters or flow replaced.
    BlockChanged(BlockTag),
    /// An instruction was inserted, replaced, or removed.
    InstructionChanged(ValueTag),
}

/// An analysis deriving facts from a graph.
///
/// `result_types` lists every result type id the analysis satisfies: its
/// concrete result plus any supertype results the caller's assignability
/// relation grants. The cache binds the analysis to each of them.
pub trait GraphAnalysis: Send + Sync {
    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;

    /// Every result type this analysis can satisfy.
    fn result_types(&self) -> Vec<TypeId>;

    /// Compute the result from scratch.
    fn analyze(&self, graph: &FlowGraph) -> AnalysisValue;

    /// Refresh a previous result after a graph edit. The default
    /// invalidates and recomputes; incremental analyses override this.
    fn update(&self, _previous: &AnalysisValue, delta: &GraphUpdate<'_>) -> AnalysisValue {
        self.analyze(delta.graph)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// The cache was queried for a result type no analysis provides.
#[derive(Debug, Clone)]
pub struct AnalysisNotRegistered {
    pub result_type: &'static str,
}

impl std::fmt::Display for AnalysisNotRegistered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "no analysis registered for result type '{}'",
            self.result_type
        )
    }
}

impl std::error::Error for AnalysisNotRegistered {}

// =============================================================================
// Cache slots
// =============================================================================

/// One distinct analysis with its memoized result.
#[derive(Clone)]
struct CacheSlot {
    analysis: Arc<dyn GraphAnalysis>,
    /// Number of result types bound to this slot.
    refcount: usize,
    /// Last computed result, keyed by graph revision. Shared between
    /// derived caches so result identity survives unrelated derivations.
    memo: Arc<RwLock<Option<(u64, AnalysisValue)>>>,
}

impl CacheSlot {
    fn new(analysis: Arc<dyn GraphAnalysis>, refcount: usize) -> Self {
        Self {
            analysis,
            refcount,
            memo: Arc::new(RwLock::new(None)),
        }
    }

    /// Result for `graph`, computing and memoizing on first use.
    fn result(&self, graph: &FlowGraph) -> AnalysisValue {
        if let Some((revision, value)) = self.memo.read().as_ref() {
            if *revision == graph.revision() {
                return value.clone();
            }
        }
        let value = self.analysis.analyze(graph);
        *self.memo.write() = Some((graph.revision(), value.clone()));
        value
    }

    /// Derive a slot refreshed against an edited graph.
    fn refreshed(&self, delta: &GraphUpdate<'_>) -> CacheSlot {
        let previous = self.memo.read().clone();
        let memo = match previous {
            Some((_, value)) => {
                let refreshed = self.analysis.update(&value, delta);
                Some((delta.graph.revision(), refreshed))
            }
            None => None,
        };
        CacheSlot {
            analysis: self.analysis.clone(),
            refcount: self.refcount,
            memo: Arc::new(RwLock::new(memo)),
        }
    }
}

// =============================================================================
// Macro Cache
// =============================================================================

/// The cache of distinct analyses, indexed by result type.
#[derive(Clone, Default)]
pub struct MacroCache {
    index: FxHashMap<TypeId, usize>,
    slots: Vec<CacheSlot>,
}

impl MacroCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct analyses.
    pub fn distinct_analyses(&self) -> usize {
        self.slots.len()
    }

    /// Whether a result type has a provider.
    pub fn provides<T: Any>(&self) -> bool {
        self.index.contains_key(&TypeId::of::<T>())
    }

    /// Derive a cache with `analysis` registered for every result type it
    /// satisfies, displacing whatever previously provided those types.
    pub fn with_analysis(&self, analysis: Arc<dyn GraphAnalysis>) -> MacroCache {
        let satisfied = analysis.result_types();
        let mut index = self.index.clone();
        let mut slots = self.slots.clone();

        // Unbind the displaced result types.
        for ty in &satisfied {
            if let Some(old_slot) = index.remove(ty) {
                slots[old_slot].refcount -= 1;
            }
        }

        // Reuse one dangling slot; compact away any others.
        let dangling: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.refcount == 0)
            .map(|(i, _)| i)
            .collect();

        let new_slot = CacheSlot::new(analysis, satisfied.len());
        let slot_index = match dangling.first() {
            Some(&reused) => {
                slots[reused] = new_slot;
                reused
            }
            None => {
                slots.push(new_slot);
                slots.len() - 1
            }
        };

        if dangling.len() > 1 {
            // More than one hole: rebuild the slot list and rewrite every
            // index through the remap.
            let mut remap: FxHashMap<usize, usize> = FxHashMap::default();
            let mut compacted = Vec::with_capacity(slots.len());
            for (i, slot) in slots.into_iter().enumerate() {
                if slot.refcount > 0 {
                    remap.insert(i, compacted.len());
                    compacted.push(slot);
                } else if i == slot_index {
                    // The freshly reused slot has not been bound yet.
                    remap.insert(i, compacted.len());
                    compacted.push(slot);
                }
            }
            slots = compacted;
            for target in index.values_mut() {
                *target = remap[target];
            }
            let slot_index = remap[&slot_index];
            for ty in satisfied {
                index.insert(ty, slot_index);
            }
            return MacroCache { index, slots };
        }

        for ty in satisfied {
            index.insert(ty, slot_index);
        }
        MacroCache { index, slots }
    }

    /// Derive a cache whose slots have been refreshed against an edited
    /// graph. Each distinct analysis decides whether to refresh
    /// incrementally or recompute.
    pub fn update(&self, delta: &GraphUpdate<'_>) -> MacroCache {
        MacroCache {
            index: self.index.clone(),
            slots: self.slots.iter().map(|slot| slot.refreshed(delta)).collect(),
        }
    }

    /// The result of the analysis providing `T`, computed against `graph`.
    pub fn get_result<T: Any + Send + Sync>(
        &self,
        graph: &FlowGraph,
    ) -> Result<Arc<T>, AnalysisNotRegistered> {
        let slot_index =
            self.index
                .get(&TypeId::of::<T>())
                .copied()
                .ok_or(AnalysisNotRegistered {
                    result_type: std::any::type_name::<T>(),
                })?;
        let value = self.slots[slot_index].result(graph);
        value.downcast::<T>().map_err(|_| AnalysisNotRegistered {
            result_type: std::any::type_name::<T>(),
        })
    }

    #[cfg(test)]
    fn refcount_for<T: Any>(&self) -> Option<usize> {
        self.index
            .get(&TypeId::of::<T>())
            .map(|&i| self.slots[i].refcount)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Result: number of blocks in the graph.
    #[derive(Debug)]
    struct BlockCount(pub usize);

    /// Result: number of instruction values in the graph.
    struct ValueCount(pub usize);

    struct BlockCountAnalysis {
        /// Distinguishes replacement registrations in tests.
        bias: usize,
    }

    impl GraphAnalysis for BlockCountAnalysis {
        fn name(&self) -> &str {
            "block-count"
        }

        fn result_types(&self) -> Vec<TypeId> {
            vec![TypeId::of::<BlockCount>()]
        }

        fn analyze(&self, graph: &FlowGraph) -> AnalysisValue {
            Arc::new(BlockCount(graph.block_count() + self.bias))
        }
    }

    struct ValueCountAnalysis;

    impl GraphAnalysis for ValueCountAnalysis {
        fn name(&self) -> &str {
            "value-count"
        }

        fn result_types(&self) -> Vec<TypeId> {
            vec![TypeId::of::<ValueCount>()]
        }

        fn analyze(&self, graph: &FlowGraph) -> AnalysisValue {
            Arc::new(ValueCount(graph.instructions().count()))
        }
    }

    #[test]
    fn registered_analysis_answers_its_type() {
        let graph = FlowGraph::new();
        let cache = MacroCache::new().with_analysis(Arc::new(BlockCountAnalysis { bias: 0 }));
        let result = cache.get_result::<BlockCount>(&graph).unwrap();
        assert_eq!(result.0, 1);
    }

    #[test]
    fn missing_analysis_fails() {
        let graph = FlowGraph::new();
        let cache = MacroCache::new();
        let err = cache.get_result::<BlockCount>(&graph).unwrap_err();
        assert!(err.to_string().contains("no analysis registered"));
    }

    #[test]
    fn result_identity_on_same_graph() {
        let graph = FlowGraph::new();
        let cache = MacroCache::new().with_analysis(Arc::new(BlockCountAnalysis { bias: 0 }));
        let a = cache.get_result::<BlockCount>(&graph).unwrap();
        let b = cache.get_result::<BlockCount>(&graph).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn replacement_displaces_only_its_types() {
        // S5: replace A while B stays registered.
        let graph = FlowGraph::new();
        let cache = MacroCache::new()
            .with_analysis(Arc::new(BlockCountAnalysis { bias: 0 }))
            .with_analysis(Arc::new(ValueCountAnalysis));
        assert_eq!(cache.distinct_analyses(), 2);

        let replaced = cache.with_analysis(Arc::new(BlockCountAnalysis { bias: 100 }));
        assert_eq!(replaced.distinct_analyses(), 2);

        let blocks = replaced.get_result::<BlockCount>(&graph).unwrap();
        assert_eq!(blocks.0, 101, "the replacement analysis must answer");
        let values = replaced.get_result::<ValueCount>(&graph).unwrap();
        assert_eq!(values.0, 0, "the untouched analysis keeps answering");

        // The displaced slot was reused in place, so the replacement's
        // refcount is one and nothing dangles.
        assert_eq!(replaced.refcount_for::<BlockCount>(), Some(1));
        assert!(replaced.slots.iter().all(|s| s.refcount > 0));
    }

    #[test]
    fn compaction_rewrites_indices() {
        struct WideAnalysis;
        impl GraphAnalysis for WideAnalysis {
            fn name(&self) -> &str {
                "wide"
            }
            fn result_types(&self) -> Vec<TypeId> {
                vec![TypeId::of::<BlockCount>(), TypeId::of::<ValueCount>()]
            }
            fn analyze(&self, graph: &FlowGraph) -> AnalysisValue {
                Arc::new(BlockCount(graph.block_count()))
            }
        }

        // Two one-type slots, then one analysis shadowing both: two slots
        // dangle, one is reused, the other is compacted away.
        let cache = MacroCache::new()
            .with_analysis(Arc::new(BlockCountAnalysis { bias: 0 }))
            .with_analysis(Arc::new(ValueCountAnalysis))
            .with_analysis(Arc::new(WideAnalysis));

        assert_eq!(cache.distinct_analyses(), 1);
        assert_eq!(cache.refcount_for::<BlockCount>(), Some(2));

        let graph = FlowGraph::new();
        assert_eq!(cache.get_result::<BlockCount>(&graph).unwrap().0, 1);
    }

    #[test]
    fn update_refreshes_existing_slots() {
        // Regression: the refreshed cache must be built from the existing
        // distinct slots, not from an empty list.
        let graph = FlowGraph::new();
        let cache = MacroCache::new()
            .with_analysis(Arc::new(BlockCountAnalysis { bias: 0 }))
            .with_analysis(Arc::new(ValueCountAnalysis));

        // Warm both memos.
        assert_eq!(cache.get_result::<BlockCount>(&graph).unwrap().0, 1);
        assert_eq!(cache.get_result::<ValueCount>(&graph).unwrap().0, 0);

        let (edited, block) = graph.add_block("extra");
        let refreshed = cache.update(&GraphUpdate {
            graph: &edited,
            kind: UpdateKind::BlockChanged(block),
        });

        assert_eq!(refreshed.distinct_analyses(), 2);
        assert_eq!(refreshed.get_result::<BlockCount>(&edited).unwrap().0, 2);
        assert_eq!(refreshed.get_result::<ValueCount>(&edited).unwrap().0, 0);

        // The source cache still answers for the old graph.
        assert_eq!(cache.get_result::<BlockCount>(&graph).unwrap().0, 1);
    }

    #[test]
    fn monotonicity_fresh_registration_matches_direct_analysis() {
        let graph = FlowGraph::new();
        let analysis = Arc::new(BlockCountAnalysis { bias: 7 });
        let direct = analysis.analyze(&graph);
        let cache = MacroCache::new().with_analysis(analysis);
        let via_cache = cache.get_result::<BlockCount>(&graph).unwrap();
        let direct = direct.downcast::<BlockCount>().unwrap();
        assert_eq!(via_cache.0, direct.0);
    }
}
