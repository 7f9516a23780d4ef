//! Whole-cluster runs over the in-process fabric, one tokio task per rank.

use std::sync::Arc;
use std::time::Duration;

use graphcollective::error::CollectiveError;
use graphcollective::fabric::{FaultFn, LocalFabric};
use graphcollective::plan::{Addr, PartitionFn};
use graphcollective::{
    status, Buffer, Cluster, Config, DataType, Fabric, NetAddr, PeerSpec, ReduceOp, Session, Workspace,
};
use tokio::time::timeout;

const ALGOS: [&str; 4] = ["STAR", "CLIQUE", "RING", "TREE"];

#[derive(Clone, Copy, Debug)]
enum Op {
    AllReduce,
    AllReduceWith(PartitionFn),
    Reduce,
    Broadcast,
    Warmup,
}

type RankResult = (graphcollective::Result<()>, Vec<i64>);

fn local_addrs(k: usize) -> Vec<NetAddr> {
    (0..k).map(|i| NetAddr::new("local", i as u16)).collect()
}

fn sessions(addrs: Vec<NetAddr>, algo: &str, fault: Option<FaultFn>) -> Vec<Session> {
    let peers: Vec<PeerSpec> = addrs.iter().cloned().map(PeerSpec::from).collect();
    LocalFabric::from_addrs(addrs, fault)
        .into_iter()
        .enumerate()
        .map(|(rank, fabric)| {
            let cluster = Cluster::new(peers.clone(), rank).unwrap();
            Session::new(&Config::with_algorithm(algo), cluster, Arc::new(fabric)).unwrap()
        })
        .collect()
}

/// Rank r contributes (r + 1) * (j + 1) with alternating sign at element j.
fn inputs(k: usize, count: usize) -> Vec<Vec<i64>> {
    (0..k)
        .map(|r| {
            (0..count)
                .map(|j| {
                    let v = ((r + 1) * (j + 1)) as i64;
                    if j % 2 == 0 {
                        v
                    } else {
                        -v
                    }
                })
                .collect()
        })
        .collect()
}

fn column_sum(inputs: &[Vec<i64>]) -> Vec<i64> {
    let mut sum = vec![0i64; inputs[0].len()];
    for input in inputs {
        for (s, v) in sum.iter_mut().zip(input) {
            *s += v;
        }
    }
    sum
}

async fn run_all(sessions: Vec<Session>, op: Op, reduce_op: ReduceOp, inputs: Vec<Vec<i64>>) -> Vec<RankResult> {
    let handles: Vec<_> = sessions
        .into_iter()
        .zip(inputs)
        .map(|(sess, input)| {
            tokio::spawn(async move {
                let send = Buffer::from_slice(&input);
                let mut recv = Buffer::zeros(input.len(), DataType::I64);
                let w = Workspace::new(&send, &mut recv, reduce_op, "grad").unwrap();
                let result = match op {
                    Op::AllReduce => sess.all_reduce(w).await,
                    Op::AllReduceWith(p) => sess.all_reduce_with(w, p).await,
                    Op::Reduce => sess.reduce(w).await,
                    Op::Broadcast => sess.broadcast(w).await,
                    Op::Warmup => {
                        drop(w);
                        sess.warmup().await
                    }
                };
                (result, recv.to_vec::<i64>().unwrap())
            })
        })
        .collect();

    let mut out = Vec::new();
    for h in handles {
        let joined = timeout(Duration::from_secs(30), h)
            .await
            .expect("collective stalled");
        out.push(joined.unwrap());
    }
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_allreduce_sum_every_topology_and_size() {
    for algo in ALGOS {
        for k in 1..=5 {
            let data = inputs(k, 7);
            let expected = column_sum(&data);
            let results = run_all(sessions(local_addrs(k), algo, None), Op::AllReduce, ReduceOp::Sum, data).await;
            for (rank, (result, recv)) in results.into_iter().enumerate() {
                assert!(result.is_ok(), "{algo} k={k} rank={rank}: {result:?}");
                assert_eq!(recv, expected, "{algo} k={k} rank={rank}");
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_allreduce_min_max() {
    for (op, pick) in [(ReduceOp::Min, i64::min as fn(i64, i64) -> i64), (ReduceOp::Max, i64::max)] {
        let data = inputs(4, 10);
        let expected: Vec<i64> = (0..10)
            .map(|j| data.iter().map(|d| d[j]).reduce(pick).unwrap())
            .collect();
        let results = run_all(sessions(local_addrs(4), "RING", None), Op::AllReduce, op, data).await;
        for (result, recv) in results {
            result.unwrap();
            assert_eq!(recv, expected, "{op:?}");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tree_spanning_hosts() {
    let addrs: Vec<NetAddr> = [("a", 1), ("a", 2), ("b", 1), ("b", 2), ("c", 1)]
        .into_iter()
        .map(|(h, p)| NetAddr::new(h, p))
        .collect();
    let data = inputs(5, 6);
    let expected = column_sum(&data);
    for (result, recv) in run_all(sessions(addrs, "TREE", None), Op::AllReduce, ReduceOp::Sum, data).await {
        result.unwrap();
        assert_eq!(recv, expected);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reduce_lands_on_root() {
    for algo in ALGOS {
        let data = inputs(4, 5);
        let expected = column_sum(&data);
        let results = run_all(sessions(local_addrs(4), algo, None), Op::Reduce, ReduceOp::Sum, data).await;
        for (result, _) in &results {
            assert!(result.is_ok(), "{algo}: {result:?}");
        }
        assert_eq!(results[0].1, expected, "{algo}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_broadcast_from_root() {
    for algo in ALGOS {
        let data = inputs(4, 5);
        let root = data[0].clone();
        let results = run_all(sessions(local_addrs(4), algo, None), Op::Broadcast, ReduceOp::Sum, data).await;
        for (rank, (result, recv)) in results.into_iter().enumerate() {
            assert!(result.is_ok(), "{algo}: {result:?}");
            assert_eq!(recv, root, "{algo} rank={rank}");
        }
    }
}

#[tokio::test]
async fn test_single_peer_is_local_copy() {
    let fabric = LocalFabric::new_group(1).remove(0);
    let cluster = Cluster::new(vec![fabric.self_addr().clone().into()], 0).unwrap();
    let sess = Session::new(&Config::with_algorithm("CLIQUE"), cluster, Arc::new(fabric.clone())).unwrap();
    let send = Buffer::from_slice(&[3i64, -1, 4]);
    let mut recv = Buffer::zeros(3, DataType::I64);
    sess.all_reduce(Workspace::new(&send, &mut recv, ReduceOp::Sum, "x").unwrap())
        .await
        .unwrap();
    assert_eq!(recv, send);
    assert_eq!(fabric.messages_sent(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_warmup_ignores_configured_algorithm() {
    for algo in ["RING", "TREE", "NOT_AN_ALGO"] {
        let results = run_all(sessions(local_addrs(3), algo, None), Op::Warmup, ReduceOp::Sum, inputs(3, 1)).await;
        for (result, _) in results {
            assert_eq!(status::code(&result), 0, "{algo}: {result:?}");
        }
    }
}

fn all_in_first(count: usize, parts: usize) -> Vec<std::ops::Range<usize>> {
    let mut ranges = vec![0..count];
    ranges.extend((1..parts).map(|_| count..count));
    ranges
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_partitioned_equals_unpartitioned() {
    let data = inputs(4, 11);
    let whole = run_all(sessions(local_addrs(4), "STAR", None), Op::AllReduce, ReduceOp::Sum, data.clone()).await;
    let split = run_all(sessions(local_addrs(4), "CLIQUE", None), Op::AllReduce, ReduceOp::Sum, data.clone()).await;
    let lopsided = run_all(
        sessions(local_addrs(4), "RING", None),
        Op::AllReduceWith(all_in_first),
        ReduceOp::Sum,
        data,
    )
    .await;
    for ((a, b), c) in whole.into_iter().zip(split).zip(lopsided) {
        a.0.unwrap();
        b.0.unwrap();
        c.0.unwrap();
        assert_eq!(a.1, b.1);
        assert_eq!(a.1, c.1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_failed_partition_is_isolated() {
    let fault: FaultFn = Arc::new(|addr: &Addr| addr.name.ends_with("[1/3]"));
    let data = inputs(3, 9);
    let expected = column_sum(&data);
    let results = run_all(sessions(local_addrs(3), "CLIQUE", Some(fault)), Op::AllReduce, ReduceOp::Sum, data).await;

    for (rank, (result, recv)) in results.into_iter().enumerate() {
        assert_eq!(status::code(&result), 1);
        match result {
            Err(CollectiveError::PartitionsFailed { failed, total, failures }) => {
                assert_eq!((failed, total), (1, 3), "rank={rank}");
                assert_eq!(failures[0].index, 1);
            }
            other => panic!("rank={rank}: unexpected {other:?}"),
        }
        // partitions 0 and 2 cover elements 0..3 and 6..9
        assert_eq!(recv[0..3], expected[0..3], "rank={rank}");
        assert_eq!(recv[6..9], expected[6..9], "rank={rank}");
    }
}
