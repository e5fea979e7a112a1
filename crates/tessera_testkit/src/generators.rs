//! Property-based test generators using proptest.
//!
//! Cells are generated with distinct, sorted row coordinates so that a
//! row-major read returns them in generation order.

use crate::fixtures::{VarCell, MAX_ROW};
use proptest::prelude::*;

/// Strategy for the values of one var-sized cell, possibly empty.
pub fn var_values_strategy(max_len: usize) -> impl Strategy<Value = Vec<i32>> {
    prop::collection::vec(any::<i32>(), 0..=max_len)
}

/// Strategy for a nullable attribute value.
pub fn nullable_strategy() -> impl Strategy<Value = Option<i32>> {
    prop::option::of(any::<i32>())
}

/// Strategy for up to `max_cells` cells with distinct rows in ascending
/// order.
pub fn var_cells_strategy(max_cells: usize, max_len: usize) -> impl Strategy<Value = Vec<VarCell>> {
    prop::collection::btree_set(1..=MAX_ROW, 1..=max_cells.max(1)).prop_flat_map(move |rows| {
        let count = rows.len();
        (
            Just(rows),
            prop::collection::vec(var_values_strategy(max_len), count),
            prop::collection::vec(nullable_strategy(), count),
        )
            .prop_map(|(rows, values, nullables)| {
                rows.into_iter()
                    .zip(values)
                    .zip(nullables)
                    .map(|((row, values), nullable)| (row, values, nullable))
                    .collect()
            })
    })
}

/// Strategy for an initial buffer size in elements.
pub fn buffer_elements_strategy() -> impl Strategy<Value = usize> {
    1usize..16
}

/// Strategy for a tile capacity; `None` leaves the engine default.
pub fn capacity_strategy() -> impl Strategy<Value = Option<u64>> {
    prop::option::of(1u64..8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn cells_are_sorted_and_distinct() {
        let mut runner = TestRunner::default();
        let strategy = var_cells_strategy(20, 4);
        for _ in 0..32 {
            let cells = strategy.new_tree(&mut runner).unwrap().current();
            assert!(!cells.is_empty());
            assert!(cells.windows(2).all(|w| w[0].0 < w[1].0));
            assert!(cells.iter().all(|(_, values, _)| values.len() <= 4));
        }
    }
}
