//! Property-based tests for loader windows and the stale queue.

use livesql_core::{QueryDefinition, QueryId, TableName};
use livesql_reactive::{Loader, LoadingKind, StaleQueue};
use proptest::prelude::*;
use std::collections::VecDeque;

fn query() -> QueryDefinition {
    QueryDefinition::new(TableName::new("public", "people"))
}

#[derive(Clone, Debug)]
enum QueueOp {
    Push(u8),
    Take(usize),
    Remove(u8),
}

fn arb_op() -> impl Strategy<Value = QueueOp> {
    prop_oneof![
        (0u8..6).prop_map(QueueOp::Push),
        (0usize..4).prop_map(QueueOp::Take),
        (0u8..6).prop_map(QueueOp::Remove),
    ]
}

fn id(n: u8) -> QueryId {
    QueryId::from(format!("q{}", n))
}

proptest! {
    #[test]
    fn prop_stale_queue_is_a_deduplicated_fifo(ops in prop::collection::vec(arb_op(), 0..64)) {
        let queue = StaleQueue::new();
        let mut model: VecDeque<u8> = VecDeque::new();
        for op in ops {
            match op {
                QueueOp::Push(n) => {
                    let fresh = !model.contains(&n);
                    if fresh {
                        model.push_back(n);
                    }
                    prop_assert_eq!(queue.push(id(n)), fresh);
                }
                QueueOp::Take(max) => {
                    let n = max.min(model.len());
                    let expected: Vec<QueryId> = model.drain(..n).map(id).collect();
                    prop_assert_eq!(queue.take_batch(max), expected);
                }
                QueueOp::Remove(n) => {
                    let queued = model.contains(&n);
                    model.retain(|m| *m != n);
                    prop_assert_eq!(queue.remove(&id(n)), queued);
                }
            }
            prop_assert_eq!(queue.len(), model.len());
        }
    }

    #[test]
    fn prop_paging_windows_cover_the_result(total in 0u64..500, page_size in 1u64..50, page in 0u64..30) {
        let mut loader = Loader::new(LoadingKind::Paging, page_size, &query()).unwrap();
        loader.record_total(total);
        let pages = total.div_ceil(page_size);
        prop_assert_eq!(loader.total_page_count(), Some(pages));

        let moved = loader.page(page).unwrap();
        let exists = page == 1 || (page > 1 && page <= pages);
        prop_assert_eq!(moved.is_some(), exists);
        if let Some(moved) = moved {
            prop_assert_eq!(moved.current_page(), Some(page));
            prop_assert_eq!(moved.window(), (Some(page_size), Some((page - 1) * page_size)));
        }
    }

    #[test]
    fn prop_incremental_stops_once_everything_is_loaded(total in 0u64..500, page_size in 1u64..50) {
        let mut loader = Loader::new(LoadingKind::Incremental, page_size, &query()).unwrap();
        loader.record_total(total);
        let mut steps = 0u64;
        while let Some(next) = loader.next_increment().unwrap() {
            loader = next;
            steps += 1;
            prop_assert!(steps <= total);
        }
        let limit = loader.current_limit().unwrap();
        prop_assert!(limit >= total);
        prop_assert!(limit == page_size || limit - page_size < total);
        prop_assert_eq!(loader.window(), (Some(limit), None));
    }
}
