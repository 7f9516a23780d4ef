//! Property-based tests.
//!
//! Key invariants:
//! - A reduction hub's result does not depend on the order contributions arrive in
//! - Partitions are contiguous, ordered and cover every element exactly once

use graphcollective::plan::even_partition;
use graphcollective::session::Accumulator;
use graphcollective::{Buffer, DataType, ReduceOp};
use proptest::prelude::*;

fn hub_case() -> impl Strategy<Value = (Vec<i64>, Vec<Vec<i64>>, Vec<usize>)> {
    (1usize..16, 1usize..6).prop_flat_map(|(len, n)| {
        (
            prop::collection::vec(-1000i64..1000, len),
            prop::collection::vec(prop::collection::vec(-1000i64..1000, len), n),
            Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
        )
    })
}

fn reduce_op() -> impl Strategy<Value = ReduceOp> {
    prop_oneof![
        Just(ReduceOp::Sum),
        Just(ReduceOp::Prod),
        Just(ReduceOp::Min),
        Just(ReduceOp::Max),
    ]
}

fn fold_in_order(send: &Buffer, contributions: &[Buffer], order: &[usize], op: ReduceOp) -> Vec<i64> {
    let mut recv = Buffer::zeros(send.count(), DataType::I64);
    let mut acc = Accumulator::default();
    for &i in order {
        acc.fold(&mut recv.view_mut(), send.view(), contributions[i].view(), op)
            .unwrap();
    }
    assert_eq!(acc.contributions(), order.len());
    recv.to_vec().unwrap()
}

proptest! {
    /// Any arrival order folds to the same value as arrival in rank order.
    #[test]
    fn hub_fold_is_order_independent(
        (send, contributions, order) in hub_case(),
        op in reduce_op()
    ) {
        let send = Buffer::from_slice(&send);
        let contributions: Vec<Buffer> = contributions.iter().map(|c| Buffer::from_slice(c)).collect();
        let in_rank_order: Vec<usize> = (0..contributions.len()).collect();

        let shuffled = fold_in_order(&send, &contributions, &order, op);
        let ordered = fold_in_order(&send, &contributions, &in_rank_order, op);
        prop_assert_eq!(shuffled, ordered);
    }

    /// With sum, the hub ends up with its own value plus every contribution.
    #[test]
    fn hub_sum_includes_own_value(
        (send, contributions, order) in hub_case()
    ) {
        let mut expected = send.clone();
        for c in &contributions {
            for (e, v) in expected.iter_mut().zip(c) {
                *e += v;
            }
        }
        let send = Buffer::from_slice(&send);
        let contributions: Vec<Buffer> = contributions.iter().map(|c| Buffer::from_slice(c)).collect();
        prop_assert_eq!(fold_in_order(&send, &contributions, &order, ReduceOp::Sum), expected);
    }

    /// Even partition covers 0..count contiguously with sizes differing by at most one.
    #[test]
    fn even_partition_covers(count in 0usize..10_000, parts in 1usize..64) {
        let ranges = even_partition(count, parts);
        prop_assert_eq!(ranges.len(), parts);
        let mut next = 0;
        for r in &ranges {
            prop_assert_eq!(r.start, next);
            next = r.end;
        }
        prop_assert_eq!(next, count);
        let lens: Vec<usize> = ranges.iter().map(|r| r.len()).collect();
        let (min, max) = (lens.iter().min().unwrap(), lens.iter().max().unwrap());
        prop_assert!(max - min <= 1);
    }
}
