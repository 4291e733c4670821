//! Schema graph: tables arranged as a rooted forest.
//!
//! Tables live in an arena addressed by [`TableId`]. Parents are declared, and
//! children are derived once when the registry is built. The first parent of a
//! table is its canonical path toward the forest root.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FieldsqlError, Result};
use crate::fields::{Aggregation, FieldSelection, Transformation};

/// Stable handle to a table in a [`SchemaRegistry`] or [`SchemaView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(usize);

impl TableId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where the rows of a table come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSource {
    /// A physical table in the database namespace.
    Physical,
    /// Raw SQL rendered as a derived table.
    Custom { sql: String },
    /// A pre-aggregation subquery rendered in the WITH clause.
    Cte,
}

#[derive(Debug, Clone)]
pub struct TableNode {
    pub name: String,
    pub parents: Vec<TableId>,
    pub children: Vec<TableId>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<String>,
    /// Date column ordering rows for the `first` transformation.
    pub date_field: Option<String>,
    /// Column shown when the table is used as a dimension lookup.
    pub default_lookup: Option<String>,
    /// Namespace override; `Some("")` means no namespace at all.
    pub schema: Option<String>,
    pub source: TableSource,
}

impl TableNode {
    pub fn is_cte(&self) -> bool {
        matches!(self.source, TableSource::Cte)
    }

    pub fn is_custom(&self) -> bool {
        matches!(self.source, TableSource::Custom { .. })
    }

    pub fn first_parent(&self) -> Option<TableId> {
        self.parents.first().copied()
    }
}

/// Declarative table definition, as written in `tables/*.yml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableSpec {
    pub name: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<String>,
    pub date_field: Option<String>,
    pub default_lookup: Option<String>,
    pub schema: Option<String>,
    /// Raw SQL body; present only for custom tables.
    pub sql: Option<String>,
}

/// Registry-wide settings, as written in `context.yml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextSpec {
    /// SQL namespace prefixed to physical tables (empty for none).
    pub schema: String,
    pub transformations: Vec<Transformation>,
    pub aggregations: Vec<Aggregation>,
    /// SQL literal used to replace NULL lookup results, e.g. `'Unknown'`.
    pub coalesce_default: Option<String>,
    /// Aggregation keyword to alias prefix, e.g. `rows -> num`.
    pub aggregation_aliases: BTreeMap<String, String>,
    /// Named WHERE fragments that lookups may reference with `where_ref`.
    pub where_fragments: BTreeMap<String, String>,
}

impl Default for ContextSpec {
    fn default() -> Self {
        Self {
            schema: String::new(),
            transformations: Transformation::ALL.to_vec(),
            aggregations: Aggregation::builtin().to_vec(),
            coalesce_default: None,
            aggregation_aliases: [("rows".to_string(), "num".to_string())]
                .into_iter()
                .collect(),
            where_fragments: BTreeMap::new(),
        }
    }
}

/// Structural queries over a table forest.
///
/// Implemented by the immutable [`SchemaRegistry`] and by the per-query
/// [`SchemaView`] that layers CTE tables on top of it.
pub trait TableGraph {
    fn node(&self, id: TableId) -> &TableNode;

    /// Children in registration order, including any derived tables.
    fn children(&self, id: TableId) -> Vec<TableId>;

    fn name(&self, id: TableId) -> &str {
        &self.node(id).name
    }

    /// Number of first-parent hops to the forest root.
    fn depth(&self, id: TableId) -> usize {
        self.ancestors(id).len()
    }

    /// First-parent chain from `id` (exclusive) to its root (inclusive).
    fn ancestors(&self, id: TableId) -> Vec<TableId> {
        let mut chain = Vec::new();
        let mut current = self.node(id).first_parent();
        while let Some(parent) = current {
            chain.push(parent);
            current = self.node(parent).first_parent();
        }
        chain
    }

    fn root(&self, id: TableId) -> TableId {
        self.ancestors(id).last().copied().unwrap_or(id)
    }

    /// Join columns between `id` and a candidate parent.
    ///
    /// The table's primary key is matched against the candidate's primary and
    /// foreign keys first; only when that is empty are its foreign keys tried.
    fn common_keys(&self, id: TableId, candidate: TableId) -> Result<Vec<String>> {
        let node = self.node(id);
        let other = self.node(candidate);
        let reachable = |col: &&String| {
            other.primary_key.contains(*col) || other.foreign_keys.contains(*col)
        };

        let mut keys: Vec<String> = node.primary_key.iter().filter(reachable).cloned().collect();
        if keys.is_empty() {
            keys = node.foreign_keys.iter().filter(reachable).cloned().collect();
        }
        if keys.is_empty() {
            return Err(FieldsqlError::NoCommonKey {
                table: node.name.clone(),
                other: other.name.clone(),
            });
        }
        Ok(keys)
    }

    /// Join columns for an edge in either direction.
    ///
    /// The child side of the edge (the one listing the other as a parent) is
    /// the one whose keys are matched.
    fn edge_keys(&self, a: TableId, b: TableId) -> Result<Vec<String>> {
        if self.node(a).parents.contains(&b) {
            self.common_keys(a, b)
        } else {
            self.common_keys(b, a)
        }
    }

    /// Undirected adjacency: declared parents first, then children.
    fn neighbors(&self, id: TableId) -> Vec<TableId> {
        let mut out = self.node(id).parents.clone();
        for child in self.children(id) {
            if !out.contains(&child) {
                out.push(child);
            }
        }
        out
    }
}

/// Immutable schema graph plus the query context shared by every request.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    nodes: Vec<TableNode>,
    by_name: HashMap<String, TableId>,
    context: ContextSpec,
}

impl SchemaRegistry {
    pub fn new(context: ContextSpec, tables: Vec<TableSpec>) -> Result<Self> {
        let mut by_name = HashMap::new();
        for (idx, spec) in tables.iter().enumerate() {
            if by_name.insert(spec.name.clone(), TableId(idx)).is_some() {
                return Err(FieldsqlError::Validation(format!(
                    "duplicate table {}",
                    spec.name
                )));
            }
        }

        let mut nodes = Vec::with_capacity(tables.len());
        for spec in tables {
            let parents = spec
                .parents
                .iter()
                .map(|p| {
                    by_name.get(p).copied().ok_or_else(|| {
                        FieldsqlError::Validation(format!(
                            "table {} references unknown parent {p}",
                            spec.name
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let source = match spec.sql {
                Some(sql) => TableSource::Custom { sql },
                None => TableSource::Physical,
            };
            nodes.push(TableNode {
                name: spec.name,
                parents,
                children: Vec::new(),
                primary_key: spec.primary_key,
                foreign_keys: spec.foreign_keys,
                date_field: spec.date_field,
                default_lookup: spec.default_lookup,
                schema: spec.schema,
                source,
            });
        }

        for idx in 0..nodes.len() {
            for parent in nodes[idx].parents.clone() {
                nodes[parent.0].children.push(TableId(idx));
            }
        }

        let registry = Self {
            nodes,
            by_name,
            context,
        };
        registry.check_forest()?;
        Ok(registry)
    }

    fn check_forest(&self) -> Result<()> {
        for (idx, node) in self.nodes.iter().enumerate() {
            let mut hops = 0;
            let mut current = node.first_parent();
            while let Some(parent) = current {
                hops += 1;
                if parent.0 == idx || hops > self.nodes.len() {
                    return Err(FieldsqlError::Validation(format!(
                        "table {} has a cyclic parent chain",
                        node.name
                    )));
                }
                current = self.nodes[parent.0].first_parent();
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.by_name.get(name).copied()
    }

    pub fn tables(&self) -> impl Iterator<Item = (TableId, &TableNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (TableId(i), n))
    }

    pub fn context(&self) -> &ContextSpec {
        &self.context
    }

    pub fn namespace(&self) -> &str {
        &self.context.schema
    }

    pub fn coalesce_default(&self) -> Option<&str> {
        self.context.coalesce_default.as_deref()
    }

    pub fn allows_transformation(&self, t: Transformation) -> bool {
        self.context.transformations.contains(&t)
    }

    pub fn allows_aggregation(&self, agg: &Aggregation) -> bool {
        self.context.aggregations.contains(agg)
    }

    /// Alias prefix for an aggregation keyword after applying the rename table.
    pub fn aggregation_prefix(&self, agg: &Aggregation) -> String {
        let keyword = agg.keyword();
        self.context
            .aggregation_aliases
            .get(keyword)
            .cloned()
            .unwrap_or_else(|| keyword.to_string())
    }

    pub fn where_fragment(&self, name: &str) -> Option<&str> {
        self.context.where_fragments.get(name).map(String::as_str)
    }

    /// Replace the namespace, e.g. from a configuration override.
    pub fn with_namespace(mut self, schema: impl Into<String>) -> Self {
        self.context.schema = schema.into();
        self
    }
}

impl TableGraph for SchemaRegistry {
    fn node(&self, id: TableId) -> &TableNode {
        &self.nodes[id.0]
    }

    fn children(&self, id: TableId) -> Vec<TableId> {
        self.nodes[id.0].children.clone()
    }
}

/// A table materialized by a WITH-clause subquery.
///
/// Its primary key is the grouping key of the hoisted aggregation and its
/// foreign keys are the remaining output columns of `fields`.
#[derive(Debug, Clone)]
pub struct CteNode {
    pub node: TableNode,
    pub fields: Vec<FieldSelection>,
}

impl CteNode {
    pub fn new(
        name: String,
        parent: TableId,
        keys: Vec<String>,
        columns: Vec<String>,
        fields: Vec<FieldSelection>,
    ) -> Self {
        let foreign_keys = columns.into_iter().filter(|c| !keys.contains(c)).collect();
        Self {
            node: TableNode {
                name,
                parents: vec![parent],
                children: Vec::new(),
                primary_key: keys,
                foreign_keys,
                date_field: None,
                default_lookup: None,
                schema: Some(String::new()),
                source: TableSource::Cte,
            },
            fields,
        }
    }
}

/// Per-query overlay: the shared registry plus the CTEs created for one call.
///
/// CTE ids continue after the registry's ids, so handles from both halves can
/// be mixed freely.
#[derive(Debug, Clone)]
pub struct SchemaView<'r> {
    registry: &'r SchemaRegistry,
    ctes: Vec<CteNode>,
}

impl<'r> SchemaView<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self {
            registry,
            ctes: Vec::new(),
        }
    }

    pub fn registry(&self) -> &'r SchemaRegistry {
        self.registry
    }

    /// Id the next call to [`SchemaView::add_cte`] will return.
    pub fn next_cte_id(&self) -> TableId {
        TableId(self.registry.len() + self.ctes.len())
    }

    pub fn add_cte(&mut self, cte: CteNode) -> TableId {
        let id = self.next_cte_id();
        self.ctes.push(cte);
        id
    }

    /// CTEs in creation order; later ones may reference earlier ones.
    pub fn ctes(&self) -> &[CteNode] {
        &self.ctes
    }

    pub fn cte(&self, id: TableId) -> Option<&CteNode> {
        id.0.checked_sub(self.registry.len())
            .and_then(|idx| self.ctes.get(idx))
    }
}

impl TableGraph for SchemaView<'_> {
    fn node(&self, id: TableId) -> &TableNode {
        match self.cte(id) {
            Some(cte) => &cte.node,
            None => self.registry.node(id),
        }
    }

    fn children(&self, id: TableId) -> Vec<TableId> {
        let mut out = if id.0 < self.registry.len() {
            self.registry.children(id)
        } else {
            Vec::new()
        };
        for (idx, cte) in self.ctes.iter().enumerate() {
            if cte.node.parents.contains(&id) {
                out.push(TableId(self.registry.len() + idx));
            }
        }
        out
    }
}
