//! Field transform engine: one selection to SELECT items and predicates.

use crate::dialect::Dialect;
use crate::error::{FieldsqlError, Result};
use crate::fields::{FieldSelection, Transformation};
use crate::schema::{SchemaView, TableGraph, TableId};
use crate::sql_ast::{SelectItem, SqlExpr};

/// Output of rendering one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RenderedField {
    pub items: Vec<SelectItem>,
    pub predicates: Vec<String>,
    /// Expressions this field contributes to GROUP BY when it is not aggregated.
    pub group_keys: Vec<SqlExpr>,
}

/// Aliases available to a field while rendering.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldAliases<'a> {
    /// Alias of the field's own table (may be empty).
    pub table: &'a str,
    /// Alias of the dimension join when the lookup is performed.
    pub lookup: Option<&'a str>,
}

fn prefix(alias: &str) -> String {
    if alias.is_empty() {
        String::new()
    } else {
        format!("{alias}.")
    }
}

pub(crate) fn render_field(
    view: &SchemaView<'_>,
    dialect: &dyn Dialect,
    field: &FieldSelection,
    aliases: FieldAliases<'_>,
    coalesce: Option<&str>,
) -> Result<RenderedField> {
    let table_prefix = prefix(aliases.table);
    let mut predicates = Vec::new();

    let mut expr = match (field.lookup(), aliases.lookup) {
        (Some(lookup), Some(lookup_alias)) if field.performs_lookup() => {
            let lookup_prefix = prefix(lookup_alias);
            if let Some(predicate) = &lookup.predicate {
                predicates.push(predicate.replace("{alias}", &lookup_prefix));
            }
            format!("{lookup_prefix}{}", lookup.column)
        }
        _ => field.template().replace("{alias}", &table_prefix),
    };

    if let Some(t) = field.transformation() {
        if t == Transformation::First {
            // the table itself is ranked, see `first_row_window`
            predicates.push(format!("{table_prefix}rn = 1"));
        } else {
            expr = dialect.render_transformation(t, &expr);
        }
    }
    if let Some(agg) = field.aggregation() {
        expr = dialect.render_aggregation(agg, &expr);
    }
    if let Some(default) = coalesce {
        expr = format!("COALESCE({expr}, {default})");
    }

    let alias = field.output_alias(view.registry());
    let item = SelectItem {
        expr: SqlExpr::Raw(expr.clone()),
        alias: (alias != expr).then_some(alias),
    };

    Ok(RenderedField {
        items: vec![item],
        predicates,
        group_keys: vec![SqlExpr::Raw(expr)],
    })
}

/// `ROW_NUMBER()` window ranking the rows of `table` per root key by date.
///
/// The window is evaluated inside a derived table wrapping `table`, so its
/// columns are unqualified and the outer statement filters on `rn = 1`
/// without the window leaking into SELECT or GROUP BY.
pub(crate) fn first_row_window(view: &SchemaView<'_>, table: TableId) -> Result<String> {
    let node = view.node(table);
    let depth = view.depth(table);
    if depth > 1 {
        return Err(FieldsqlError::InvalidTransformContext(format!(
            "'first' on {} requires a table at most one join from the root, found depth {depth}",
            node.name
        )));
    }
    let date_field = node.date_field.as_deref().ok_or_else(|| {
        FieldsqlError::InvalidTransformContext(format!(
            "'first' on {} requires the table to declare a date_field",
            node.name
        ))
    })?;
    let root = view.node(view.root(table));
    let root_key = root.primary_key.first().ok_or_else(|| {
        FieldsqlError::InvalidTransformContext(format!(
            "'first' on {} requires root table {} to have a primary key",
            node.name, root.name
        ))
    })?;
    Ok(format!(
        "ROW_NUMBER() OVER (PARTITION BY {root_key} ORDER BY {date_field})"
    ))
}
