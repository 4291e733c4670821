//! Pipeline orchestration: validate, hoist, assemble, then render CTE bodies.

use crate::dialect::Dialect;
use crate::error::{FieldsqlError, Result};
use crate::fields::FieldSelection;
use crate::schema::{SchemaRegistry, SchemaView};
use crate::sql_ast::{CommonTableExpr, SelectQuery};

use super::hoist::hoist_aggregations;
use super::statement::Statement;

pub(crate) fn build_query(
    registry: &SchemaRegistry,
    dialect: &dyn Dialect,
    mut fields: Vec<FieldSelection>,
) -> Result<SelectQuery> {
    if fields.is_empty() {
        return Err(FieldsqlError::EmptySelection);
    }
    let primaries: Vec<String> = fields
        .iter()
        .filter(|f| f.is_primary())
        .map(|f| f.name().to_string())
        .collect();
    match primaries.len() {
        0 => return Err(FieldsqlError::NoPrimaryField),
        1 => {}
        _ => return Err(FieldsqlError::MultiplePrimaryFields(primaries)),
    }
    for (position, field) in fields.iter_mut().enumerate() {
        field.position = position;
    }

    let mut view = SchemaView::new(registry);
    let outer = hoist_aggregations(&mut view, fields)?;
    tracing::debug!(
        dialect = dialect.name(),
        fields = outer.len(),
        ctes = view.ctes().len(),
        "assembling statement"
    );

    let mut query = Statement::new(&view, dialect).assemble(&outer)?;
    // Creation order is dependency order: a CTE only reads from earlier ones.
    for cte in view.ctes() {
        let body = Statement::new(&view, dialect).assemble(&cte.fields)?;
        query.with.push(CommonTableExpr {
            name: cte.node.name.clone(),
            query: Box::new(body),
        });
    }
    Ok(query)
}
