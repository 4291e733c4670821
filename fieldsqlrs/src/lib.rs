pub mod catalog;
pub mod config;
pub mod dialect;
pub mod error;
pub mod fields;
pub mod graph;
pub mod query_builder;
pub mod registry;
pub mod schema;
pub mod sql_ast;
pub mod standard_queries;

use crate::config::FieldsqlConfig;
use crate::error::Result;

/// Load the configured catalog and compile one request with the configured dialect.
pub fn compile_with_config(config: &FieldsqlConfig, request: &QueryRequest) -> Result<String> {
    let registry = CatalogRegistry::load_with_config(config)?;
    SqlBuilder::from_config(config).build(&registry, request)
}

pub use catalog::{FieldCatalog, FieldFile, FieldSpec, LookupSpec};
pub use dialect::{Dialect, DialectKind};
pub use error::FieldsqlError;
pub use fields::{Aggregation, FieldDefinition, FieldSelection, Transformation};
pub use query_builder::SqlBuilder;
pub use registry::{CatalogRegistry, FieldRequest, QueryRequest};
pub use schema::{ContextSpec, SchemaRegistry, TableGraph, TableId, TableSpec};
pub use standard_queries::StandardQueries;
