use crate::config::FieldsqlConfig;
use crate::dialect::{Dialect, DialectKind};
use crate::error::Result;
use crate::fields::FieldSelection;
use crate::registry::{CatalogRegistry, QueryRequest};
use crate::schema::SchemaRegistry;
use crate::sql_ast::{SelectQuery, SqlRenderer};

mod hoist;
mod joins;
mod planner;
mod render;
mod statement;

pub use joins::{minimal_join_tree, JoinEdge, JoinEntry, JoinTree};

/// Compiles field selections into SQL text for one dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlBuilder {
    dialect: DialectKind,
}

impl SqlBuilder {
    pub fn new(dialect: DialectKind) -> Self {
        Self { dialect }
    }

    pub fn from_config(config: &FieldsqlConfig) -> Self {
        Self::new(config.compiler.dialect)
    }

    pub fn dialect(&self) -> DialectKind {
        self.dialect
    }

    /// Resolve a request against the catalog and build SQL.
    pub fn build(&self, registry: &CatalogRegistry, request: &QueryRequest) -> Result<String> {
        let fields = registry.resolve(request)?;
        self.build_selections(registry.schema(), fields)
    }

    /// Build SQL from already-resolved selections.
    pub fn build_selections(
        &self,
        schema: &SchemaRegistry,
        fields: Vec<FieldSelection>,
    ) -> Result<String> {
        self.build_with_dialect(schema, fields, self.dialect.dialect())
    }

    /// Build SQL using a provided dialect (useful for tests).
    pub fn build_with_dialect(
        &self,
        schema: &SchemaRegistry,
        fields: Vec<FieldSelection>,
        dialect: &dyn Dialect,
    ) -> Result<String> {
        let query = self.build_query(schema, fields, dialect)?;
        let sql = SqlRenderer::new(dialect).render_select(&query);
        tracing::trace!(sql = %sql, "generated sql");
        Ok(sql)
    }

    /// Build the statement tree without rendering it.
    pub fn build_query(
        &self,
        schema: &SchemaRegistry,
        fields: Vec<FieldSelection>,
        dialect: &dyn Dialect,
    ) -> Result<SelectQuery> {
        planner::build_query(schema, dialect, fields)
    }
}
