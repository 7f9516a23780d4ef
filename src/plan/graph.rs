//! Directed communication graphs over peer ranks and the standard shapes
//! the topology builders are made of.

use std::collections::BTreeMap;

use super::PeerSpec;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Node {
    self_loop: bool,
    prevs: Vec<usize>,
    nexts: Vec<usize>,
}

/// A directed graph with one node per rank.
///
/// A self loop marks a reduction hub: the node folds its own data together
/// with every predecessor's. Nodes without a self loop are relays and take
/// their value from at most one predecessor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new(k: usize) -> Self {
        Self {
            nodes: vec![Node::default(); k],
        }
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Add the edge `i -> j`; `i == j` marks `i` as a reduction hub.
    ///
    /// # Panics
    ///
    /// Panics if `i` or `j` is not below [`Graph::size`]. The generators in
    /// this module only add in-range edges, and hand-built graphs are checked
    /// against the cluster when a session is created.
    pub fn add_edge(&mut self, i: usize, j: usize) {
        if i == j {
            self.nodes[i].self_loop = true;
        } else {
            self.nodes[i].nexts.push(j);
            self.nodes[j].prevs.push(i);
        }
    }

    pub fn prevs(&self, rank: usize) -> &[usize] {
        self.nodes.get(rank).map(|n| n.prevs.as_slice()).unwrap_or(&[])
    }

    pub fn nexts(&self, rank: usize) -> &[usize] {
        self.nodes.get(rank).map(|n| n.nexts.as_slice()).unwrap_or(&[])
    }

    pub fn is_self_loop(&self, rank: usize) -> bool {
        self.nodes.get(rank).is_some_and(|n| n.self_loop)
    }

    /// The same edges reversed, self loops dropped.
    fn reversed(&self) -> Self {
        let mut g = Graph::new(self.size());
        for (i, n) in self.nodes.iter().enumerate() {
            for &j in &n.nexts {
                g.add_edge(j, i);
            }
        }
        g
    }
}

/// `root` sends to every other rank.
pub fn gen_star_bcast_graph(k: usize, root: usize) -> Graph {
    let mut g = Graph::new(k);
    for i in 0..k {
        if i != root {
            g.add_edge(root, i);
        }
    }
    g
}

/// The reduce graph matching a broadcast graph: every edge reversed and
/// every node a reduction hub.
pub fn gen_default_reduce_graph(bcast: &Graph) -> Graph {
    let mut g = bcast.reversed();
    for i in 0..g.size() {
        g.add_edge(i, i);
    }
    g
}

/// Two-level tree: rank 0 feeds the first peer of every other host, each
/// host master feeds its local peers.
pub fn gen_default_bcast_graph(peers: &[PeerSpec]) -> Graph {
    let mut g = Graph::new(peers.len());
    let mut hosts: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (rank, p) in peers.iter().enumerate() {
        hosts.entry(p.net_addr.host.as_str()).or_default().push(rank);
    }
    for ranks in hosts.values() {
        let master = ranks[0];
        if master != 0 {
            g.add_edge(0, master);
        }
        for &r in &ranks[1..] {
            g.add_edge(master, r);
        }
    }
    g
}

/// Ring rooted at `root`: the reduce chain runs root+1 -> root+2 -> .. -> root,
/// the broadcast chain root -> root+1 -> .. -> root-1.
pub fn gen_circular_graph_pair(k: usize, root: usize) -> (Graph, Graph) {
    let mut reduce = Graph::new(k);
    let mut bcast = Graph::new(k);
    for i in 0..k {
        reduce.add_edge(i, i);
    }
    for i in 1..k {
        reduce.add_edge((root + i) % k, (root + i + 1) % k);
        bcast.add_edge((root + i - 1) % k, (root + i) % k);
    }
    (reduce, bcast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::NetAddr;

    #[test]
    fn test_star_pair() {
        let bcast = gen_star_bcast_graph(4, 2);
        assert_eq!(bcast.nexts(2), &[0, 1, 3]);
        assert!(bcast.prevs(2).is_empty());
        assert_eq!(bcast.prevs(0), &[2]);
        assert!(!bcast.is_self_loop(2));

        let reduce = gen_default_reduce_graph(&bcast);
        assert_eq!(reduce.prevs(2), &[0, 1, 3]);
        assert_eq!(reduce.nexts(1), &[2]);
        assert!((0..4).all(|r| reduce.is_self_loop(r)));
    }

    #[test]
    fn test_circular_pair() {
        let (reduce, bcast) = gen_circular_graph_pair(4, 1);
        // reduce: 2 -> 3 -> 0 -> 1
        assert!(reduce.prevs(2).is_empty());
        assert_eq!(reduce.nexts(2), &[3]);
        assert_eq!(reduce.nexts(0), &[1]);
        assert_eq!(reduce.prevs(1), &[0]);
        assert!(reduce.nexts(1).is_empty());
        // bcast: 1 -> 2 -> 3 -> 0
        assert_eq!(bcast.nexts(1), &[2]);
        assert_eq!(bcast.prevs(0), &[3]);
        assert!(bcast.nexts(0).is_empty());
        assert!((0..4).all(|r| !bcast.is_self_loop(r) && bcast.prevs(r).len() <= 1));
    }

    #[test]
    fn test_default_bcast_groups_hosts() {
        let peers: Vec<PeerSpec> = [("a", 1), ("a", 2), ("b", 1), ("b", 2), ("c", 1)]
            .into_iter()
            .map(|(h, p)| NetAddr::new(h, p).into())
            .collect();
        let g = gen_default_bcast_graph(&peers);
        assert_eq!(g.nexts(0), &[1, 2, 4]);
        assert_eq!(g.nexts(2), &[3]);
        assert!((1..5).all(|r| g.prevs(r).len() == 1));
    }

    #[test]
    fn test_out_of_range_rank_is_empty() {
        let g = gen_star_bcast_graph(2, 0);
        assert!(g.prevs(7).is_empty());
        assert!(!g.is_self_loop(7));
    }

    #[test]
    #[should_panic]
    fn test_add_edge_out_of_range_panics() {
        let mut g = Graph::new(2);
        g.add_edge(0, 2);
    }
}
