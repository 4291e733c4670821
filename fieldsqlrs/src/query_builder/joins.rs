//! Minimal connecting join tree over the schema forest.
//!
//! Finding the smallest subtree that touches a set of tables is a Steiner
//! tree problem. The solver is greedy: required tables are taken shallowest
//! first and each is attached to the running tree by a shortest path.

use std::collections::HashSet;

use crate::error::{FieldsqlError, Result};
use crate::graph::{bfs_path, UndirectedGraph};
use crate::schema::{TableGraph, TableId};

/// Incoming join of a table: `from` is already in the tree, `to` is the table
/// being attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinEdge {
    pub from: TableId,
    pub from_keys: Vec<String>,
    pub to: TableId,
    pub to_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinEntry {
    pub table: TableId,
    /// `None` only for the first table of the tree.
    pub edge: Option<JoinEdge>,
}

/// Tables in insertion order, each with the edge that attached it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinTree {
    entries: Vec<JoinEntry>,
    members: HashSet<TableId>,
}

impl JoinTree {
    fn push(&mut self, table: TableId, edge: Option<JoinEdge>) {
        if self.members.insert(table) {
            self.entries.push(JoinEntry { table, edge });
        }
    }

    pub fn entries(&self) -> &[JoinEntry] {
        &self.entries
    }

    pub fn tables(&self) -> impl Iterator<Item = TableId> + '_ {
        self.entries.iter().map(|e| e.table)
    }

    pub fn contains(&self, table: TableId) -> bool {
        self.members.contains(&table)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn root(&self) -> Option<TableId> {
        self.entries.first().map(|e| e.table)
    }

    /// Undirected view of the tree, for ordering and re-rooting.
    pub fn to_graph(&self) -> UndirectedGraph<TableId> {
        let mut graph = UndirectedGraph::new();
        for entry in &self.entries {
            graph.add_node(entry.table);
            if let Some(edge) = &entry.edge {
                graph.add_edge(edge.from, edge.to);
            }
        }
        graph
    }

    pub fn edge_between(&self, a: TableId, b: TableId) -> Option<&JoinEdge> {
        self.entries.iter().filter_map(|e| e.edge.as_ref()).find(|edge| {
            (edge.from == a && edge.to == b) || (edge.from == b && edge.to == a)
        })
    }
}

/// Build the join tree connecting `required`.
///
/// Tables are processed by `(depth, id)`, so the result does not depend on
/// the order of `required`. Each table is attached through the shortest path
/// to any table already in the tree; the search expands declared parents
/// before children, so among equal-length paths the first-parent route wins.
pub fn minimal_join_tree<G: TableGraph>(graph: &G, required: &[TableId]) -> Result<JoinTree> {
    let mut tables = required.to_vec();
    tables.sort_by_key(|t| (graph.depth(*t), *t));
    tables.dedup();

    let mut tree = JoinTree::default();
    let Some((&seed, rest)) = tables.split_first() else {
        return Ok(tree);
    };
    tree.push(seed, None);

    for &table in rest {
        if tree.contains(table) {
            continue;
        }
        let path = bfs_path(table, |n| graph.neighbors(n), |n| tree.contains(n)).ok_or_else(
            || FieldsqlError::DisconnectedSchema {
                from: graph.name(table).to_string(),
                to: tree
                    .tables()
                    .map(|t| graph.name(t).to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            },
        )?;

        // path runs from `table` to a tree member; attach from the tree outward
        for pair in path.windows(2).rev() {
            let (new, existing) = (pair[0], pair[1]);
            let keys = graph.edge_keys(new, existing)?;
            tree.push(
                new,
                Some(JoinEdge {
                    from: existing,
                    from_keys: keys.clone(),
                    to: new,
                    to_keys: keys,
                }),
            );
        }
    }

    tracing::debug!(
        required = required.len(),
        joined = tree.len(),
        tables = ?tree.tables().map(|t| graph.name(t)).collect::<Vec<_>>(),
        "join tree solved"
    );
    Ok(tree)
}
