//! CTE hoisting: pre-aggregate finer-grained tables before the outer join.
//!
//! The join tree is walked leaves first, with the primary field's table held
//! back until last. Every other table that owns an aggregated field is
//! replaced by a CTE grouped on the keys joining it to its tree parent, and
//! the fields that referenced it are redirected to the CTE's output columns.
//! A table that receives a redirected aggregate while sitting below the
//! primary table is hoisted as well, rolling the value up to its own parent.

use std::collections::{BTreeMap, HashSet};

use crate::error::{FieldsqlError, Result};
use crate::fields::{template_column, FieldSelection};
use crate::schema::{CteNode, SchemaView, TableGraph, TableId};

use super::joins::minimal_join_tree;

/// Rewrite `fields` so every secondary aggregation on a non-primary table is
/// computed inside a CTE registered on `view`.
///
/// Returns the outer field list, in the caller's original order. Without
/// anything to hoist, the fields come back as-is.
pub(crate) fn hoist_aggregations(
    view: &mut SchemaView<'_>,
    fields: Vec<FieldSelection>,
) -> Result<Vec<FieldSelection>> {
    let Some(primary_table) = fields.iter().find(|f| f.is_primary()).map(|f| f.table()) else {
        return Ok(fields);
    };
    let needs_hoisting = fields
        .iter()
        .any(|f| !f.is_primary() && f.is_aggregated() && f.table() != primary_table);
    if !needs_hoisting {
        return Ok(fields);
    }

    let required: Vec<TableId> = fields.iter().map(|f| f.table()).collect();
    let tree = minimal_join_tree(&*view, &required)?;
    let graph = tree.to_graph();
    let order = graph.leaf_peeling_order(Some(primary_table));
    let tree_parents = graph.parents_from(primary_table);

    let mut pending: BTreeMap<TableId, Vec<FieldSelection>> = BTreeMap::new();
    for field in fields {
        pending.entry(field.table()).or_default().push(field);
    }

    for table in order {
        if table == primary_table {
            continue;
        }
        let Some(mut collected) = pending.remove(&table) else {
            continue;
        };
        let parent = *tree_parents.get(&table).ok_or_else(|| {
            FieldsqlError::Other(anyhow::anyhow!(
                "table {} is not connected to the primary table in the join tree",
                view.name(table)
            ))
        })?;

        if collected
            .iter()
            .any(|f| f.is_aggregated() || f.carried.is_some())
        {
            collected = extract_cte(view, table, parent, collected)?;
        }
        pending.entry(parent).or_default().extend(collected);
    }

    let mut outer = pending.remove(&primary_table).unwrap_or_default();
    outer.sort_by_key(|f| f.position);
    Ok(outer)
}

/// Move `fields` into a new CTE below `parent` and return their outer
/// replacements.
fn extract_cte(
    view: &mut SchemaView<'_>,
    table: TableId,
    parent: TableId,
    mut fields: Vec<FieldSelection>,
) -> Result<Vec<FieldSelection>> {
    fields.sort_by_key(|f| f.position);
    let keys = view.edge_keys(table, parent)?;
    let registry = view.registry();
    let cte_id = view.next_cte_id();

    let mut inner: Vec<FieldSelection> = Vec::with_capacity(keys.len() + fields.len());
    for key in &keys {
        let present = fields.iter().any(|f| {
            f.table() == table
                && !f.is_aggregated()
                && f.carried.is_none()
                && f.transformation().is_none()
                && !f.performs_lookup()
                && template_column(f.template()) == Some(key.as_str())
                && f.output_alias(registry) == *key
        });
        if !present {
            inner.push(FieldSelection::key_column(table, key));
        }
    }

    let mut outer = Vec::with_capacity(fields.len());
    for field in fields {
        let mut copy = field.clone();
        copy.set_primary(false);
        copy.force_lookup(false);
        if field.performs_lookup() {
            // the lookup and its transformation are applied by the outer query
            copy.force_transformation(None);
            copy.coalesce = None;
        }
        if let Some(carried) = &field.carried {
            copy.force_aggregation(Some(carried.rollup()));
        }
        let column = copy.output_alias(registry);

        let aggregated = field.aggregation().cloned().or_else(|| field.carried.clone());
        let performs_lookup = field.performs_lookup();
        let mut redirected = field;
        redirected.table = cte_id;
        redirected.template = format!("{{alias}}{column}");
        redirected.force_aggregation(None);
        if aggregated.is_some() {
            redirected.force_transformation(None);
            redirected.lookup = None;
            redirected.alias_override = Some(column);
            // the CTE is outer-joined; missing groups count as zero
            redirected.coalesce = Some("0".to_string());
            redirected.carried = aggregated;
        } else if !performs_lookup {
            redirected.force_transformation(None);
            redirected.alias_override = Some(column);
        }

        inner.push(copy);
        outer.push(redirected);
    }

    for (position, field) in inner.iter_mut().enumerate() {
        field.position = position;
    }

    let columns: Vec<String> = inner.iter().map(|f| f.output_alias(registry)).collect();
    let duplicates = columns.len() - columns.iter().collect::<HashSet<_>>().len();
    if duplicates > 0 {
        return Err(FieldsqlError::InvalidSelection(format!(
            "hoisting {} would produce duplicate CTE columns: [{}]",
            view.name(table),
            columns.join(", ")
        )));
    }

    let name = unique_cte_name(view, &format!("{}_agg", view.name(table).to_lowercase()));
    tracing::debug!(
        table = %view.name(table),
        parent = %view.name(parent),
        cte = %name,
        keys = ?keys,
        columns = ?columns,
        "hoisting aggregation into CTE"
    );
    let id = view.add_cte(CteNode::new(name, parent, keys, columns, inner));
    debug_assert_eq!(id, cte_id);
    Ok(outer)
}

fn unique_cte_name(view: &SchemaView<'_>, base: &str) -> String {
    let taken = |name: &str| {
        view.ctes().iter().any(|c| c.node.name == name)
            || view.registry().table_id(name).is_some()
    };
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}
