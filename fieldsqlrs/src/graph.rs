//! Generic graph helpers used by the join-path solver and CTE hoisting.
//!
//! Nothing here knows about tables or keys. Nodes are any small `Copy + Ord`
//! handle so iteration order, and therefore every result, is deterministic.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use petgraph::graphmap::{NodeTrait, UnGraphMap};
use petgraph::visit::Bfs;

/// Breadth-first search from `start` until `is_goal` accepts a node.
///
/// Neighbors are expanded in the order `neighbors` returns them, and a goal is
/// accepted as soon as it is discovered, so among equally short paths the one
/// reached through the earliest neighbor wins. Returns the path including both
/// endpoints, or `None` when no goal is reachable.
pub fn bfs_path<N, F, G>(start: N, mut neighbors: F, mut is_goal: G) -> Option<Vec<N>>
where
    N: Copy + Eq + Hash,
    F: FnMut(N) -> Vec<N>,
    G: FnMut(N) -> bool,
{
    if is_goal(start) {
        return Some(vec![start]);
    }

    let mut parents: HashMap<N, N> = HashMap::new();
    let mut visited: HashSet<N> = HashSet::new();
    let mut queue: VecDeque<N> = VecDeque::new();
    visited.insert(start);
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        for next in neighbors(current) {
            if !visited.insert(next) {
                continue;
            }
            parents.insert(next, current);
            if is_goal(next) {
                return Some(reconstruct(start, next, &parents));
            }
            queue.push_back(next);
        }
    }
    None
}

fn reconstruct<N: Copy + Eq + Hash>(start: N, end: N, parents: &HashMap<N, N>) -> Vec<N> {
    let mut path = vec![end];
    let mut current = end;
    while current != start {
        current = parents[&current];
        path.push(current);
    }
    path.reverse();
    path
}

/// Undirected graph over ordered node handles.
///
/// Neighbor lists come back sorted so traversal order never depends on edge
/// insertion order.
#[derive(Debug, Clone, Default)]
pub struct UndirectedGraph<N: NodeTrait> {
    inner: UnGraphMap<N, ()>,
}

impl<N: NodeTrait> UndirectedGraph<N> {
    pub fn new() -> Self {
        Self {
            inner: UnGraphMap::new(),
        }
    }

    pub fn add_node(&mut self, node: N) {
        self.inner.add_node(node);
    }

    pub fn add_edge(&mut self, a: N, b: N) {
        self.inner.add_edge(a, b, ());
    }

    pub fn contains(&self, node: N) -> bool {
        self.inner.contains_node(node)
    }

    pub fn len(&self) -> usize {
        self.inner.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.node_count() == 0
    }

    pub fn nodes(&self) -> impl Iterator<Item = N> {
        let mut nodes: Vec<N> = self.inner.nodes().collect();
        nodes.sort();
        nodes.into_iter()
    }

    pub fn neighbors(&self, node: N) -> Vec<N> {
        if !self.inner.contains_node(node) {
            return Vec::new();
        }
        let mut out: Vec<N> = self.inner.neighbors(node).collect();
        out.sort();
        out
    }

    pub fn degree(&self, node: N) -> usize {
        if !self.inner.contains_node(node) {
            return 0;
        }
        self.inner.neighbors(node).count()
    }

    /// Shortest path between two nodes, endpoints included.
    pub fn shortest_path(&self, from: N, to: N) -> Option<Vec<N>> {
        if !self.contains(from) || !self.contains(to) {
            return None;
        }
        bfs_path(from, |n| self.neighbors(n), |n| n == to)
    }

    /// Parent of every node when the graph is rooted at `root`.
    ///
    /// Only meaningful for trees; nodes unreachable from `root` are absent.
    pub fn parents_from(&self, root: N) -> HashMap<N, N> {
        let mut parents = HashMap::new();
        if !self.inner.contains_node(root) {
            return parents;
        }
        let mut bfs = Bfs::new(&self.inner, root);
        while let Some(current) = bfs.next(&self.inner) {
            for next in self.neighbors(current) {
                if next != root && !parents.contains_key(&next) {
                    parents.insert(next, current);
                }
            }
        }
        parents
    }

    /// Order nodes by repeatedly removing leaves (degree <= 1).
    ///
    /// `defer` is held back and re-queued for as long as any other node is
    /// waiting, so on a tree it is always emitted last. Nodes on a cycle never
    /// become leaves and are left out of the result.
    pub fn leaf_peeling_order(&self, defer: Option<N>) -> Vec<N> {
        let mut remaining = self.inner.clone();
        let mut order = Vec::with_capacity(remaining.node_count());
        let mut queue: VecDeque<N> = self.nodes().filter(|n| self.degree(*n) <= 1).collect();

        while let Some(node) = queue.pop_front() {
            if !remaining.contains_node(node) {
                continue;
            }
            if Some(node) == defer && !queue.is_empty() {
                queue.push_back(node);
                continue;
            }
            order.push(node);
            let mut others: Vec<N> = remaining.neighbors(node).collect();
            others.sort();
            remaining.remove_node(node);
            for other in others {
                if remaining.neighbors(other).count() == 1 {
                    queue.push_back(other);
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> UndirectedGraph<char> {
        let mut graph = UndirectedGraph::new();
        for (a, b) in [
            ('a', 'b'),
            ('a', 'c'),
            ('c', 'd'),
            ('c', 'e'),
            ('c', 'f'),
            ('e', 'g'),
            ('a', 'h'),
            ('h', 'i'),
            ('i', 'j'),
            ('i', 'k'),
            ('e', 'l'),
        ] {
            graph.add_edge(a, b);
        }
        graph
    }

    #[test]
    fn peeling_visits_children_before_parents_and_defers_root() {
        let graph = sample_tree();
        let order = graph.leaf_peeling_order(Some('a'));
        assert_eq!(order.len(), graph.len());
        assert_eq!(order.last(), Some(&'a'));

        let position = |n: char| order.iter().position(|x| *x == n).unwrap();
        let parents = graph.parents_from('a');
        for (child, parent) in parents {
            assert!(
                position(child) < position(parent),
                "{child} must come before {parent} in {order:?}"
            );
        }
    }

    #[test]
    fn deferred_leaf_waits_for_everything_else() {
        let mut graph = UndirectedGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 3);
        assert_eq!(graph.leaf_peeling_order(Some(1)), vec![3, 2, 1]);
        assert_eq!(graph.leaf_peeling_order(None), vec![1, 3, 2]);
    }

    #[test]
    fn parents_follow_the_chosen_root() {
        let graph = sample_tree();
        let from_a = graph.parents_from('a');
        assert_eq!(from_a.get(&'g'), Some(&'e'));
        assert_eq!(from_a.get(&'c'), Some(&'a'));
        assert!(!from_a.contains_key(&'a'));
        assert_eq!(from_a.len(), graph.len() - 1);

        let from_e = graph.parents_from('e');
        assert_eq!(from_e.get(&'c'), Some(&'e'));
        assert_eq!(from_e.get(&'a'), Some(&'c'));
        assert_eq!(from_e.get(&'k'), Some(&'i'));
        assert!(graph.parents_from('z').is_empty());
    }

    #[test]
    fn neighbors_are_sorted_regardless_of_insertion() {
        let mut graph = UndirectedGraph::new();
        graph.add_edge(5, 9);
        graph.add_edge(5, 1);
        graph.add_edge(5, 3);
        assert_eq!(graph.neighbors(5), vec![1, 3, 9]);
        assert_eq!(graph.degree(5), 3);
        assert_eq!(graph.degree(42), 0);
        assert_eq!(graph.nodes().collect::<Vec<_>>(), vec![1, 3, 5, 9]);
    }

    #[test]
    fn single_node_is_its_own_order() {
        let mut graph = UndirectedGraph::new();
        graph.add_node(7);
        assert_eq!(graph.leaf_peeling_order(Some(7)), vec![7]);
    }

    #[test]
    fn shortest_path_prefers_fewest_hops() {
        let graph = sample_tree();
        assert_eq!(
            graph.shortest_path('g', 'k'),
            Some(vec!['g', 'e', 'c', 'a', 'h', 'i', 'k'])
        );
        assert_eq!(graph.shortest_path('d', 'd'), Some(vec!['d']));
        assert_eq!(graph.shortest_path('d', 'z'), None);
    }

    #[test]
    fn bfs_breaks_ties_by_neighbor_order() {
        // 0 connects to both 1 and 2, each of which reaches a goal in one hop.
        let adjacency = |n: u8| match n {
            0 => vec![2, 1],
            1 => vec![0, 3],
            2 => vec![0, 4],
            _ => vec![],
        };
        let path = bfs_path(0u8, adjacency, |n| n == 3 || n == 4);
        assert_eq!(path, Some(vec![0, 2, 4]));
    }
}
