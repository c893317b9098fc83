//! Proptest strategies for keys, tag streams and batch layouts.

use proptest::collection::{btree_set, vec};
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Key components including the delimiter and escape characters
pub fn key_component_string() -> impl Strategy<Value = String> {
    "[a-z0-9:%_-]{0,12}"
}

/// Unique ids drawn from a small alphabet so streams overlap; the
/// delimiter and escape characters make escaped order differ from raw order
pub fn id_stream() -> impl Strategy<Value = BTreeSet<String>> {
    btree_set("[ab:%][0:%]{0,2}", 0..30)
}

pub fn page_size() -> impl Strategy<Value = usize> {
    1usize..8
}

/// Layout of a partitioned message: target count, batch size, which
/// targets fail, and the order in which batches report
#[derive(Debug, Clone)]
pub struct BatchLayout {
    pub targets: usize,
    pub batch_size: usize,
    pub failing: Vec<bool>,
    pub completion_order: Vec<usize>,
}

impl BatchLayout {
    pub fn batch_count(&self) -> usize {
        self.targets.div_ceil(self.batch_size)
    }
}

pub fn batch_layout() -> impl Strategy<Value = BatchLayout> {
    (1usize..24, 1usize..6).prop_flat_map(|(targets, batch_size)| {
        let batches = targets.div_ceil(batch_size);
        (
            vec(prop::bool::weighted(0.15), targets),
            Just((0..batches).collect::<Vec<_>>()).prop_shuffle(),
        )
            .prop_map(move |(failing, completion_order)| BatchLayout {
                targets,
                batch_size,
                failing,
                completion_order,
            })
    })
}
