use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::glob;
use serde::{Deserialize, Serialize};

use crate::catalog::{FieldCatalog, FieldFile};
use crate::config::FieldsqlConfig;
use crate::error::{FieldsqlError, Result};
use crate::fields::{Aggregation, FieldDefinition, FieldSelection, Transformation};
use crate::schema::{ContextSpec, SchemaRegistry, TableSpec};

/// One requested field. Transformation and aggregation are taken literally:
/// `None` means none, not the catalog default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldRequest {
    pub field: String,
    #[serde(default)]
    pub transformation: Option<String>,
    #[serde(default)]
    pub aggregation: Option<Aggregation>,
    /// Defaults to the lookup's `enabled` flag.
    #[serde(default)]
    pub lookup: Option<bool>,
    /// Defaults to `!secondary` from the catalog.
    #[serde(default)]
    pub primary: Option<bool>,
}

impl FieldRequest {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ..Default::default()
        }
    }

    pub fn transform(mut self, t: impl Into<String>) -> Self {
        self.transformation = Some(t.into());
        self
    }

    pub fn aggregate(mut self, agg: impl Into<Aggregation>) -> Self {
        self.aggregation = Some(agg.into());
        self
    }

    pub fn lookup(mut self, enabled: bool) -> Self {
        self.lookup = Some(enabled);
        self
    }

    pub fn primary(mut self, primary: bool) -> Self {
        self.primary = Some(primary);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub fields: Vec<FieldRequest>,
}

impl QueryRequest {
    pub fn new(fields: Vec<FieldRequest>) -> Self {
        Self { fields }
    }
}

/// Schema graph plus validated field catalog, built once and shared.
#[derive(Debug, Clone)]
pub struct CatalogRegistry {
    schema: SchemaRegistry,
    catalog: FieldCatalog,
}

impl CatalogRegistry {
    pub fn from_parts(
        context: ContextSpec,
        tables: Vec<TableSpec>,
        fields: Vec<FieldFile>,
    ) -> Result<Self> {
        let schema = SchemaRegistry::new(context, tables)?;
        let catalog = FieldCatalog::from_specs(&schema, fields)?;
        Ok(Self { schema, catalog })
    }

    /// Load `context.yml`, `tables/*.yml` and `fields/*.yml` under `root`.
    ///
    /// Tables are registered in file-name order, which also fixes join
    /// tie-breaks.
    pub fn load_from_dir<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let context = load_context(root)?;

        let mut tables = Vec::new();
        for path in yaml_files(&root.join("tables"))? {
            let contents = fs::read_to_string(&path)?;
            let table: TableSpec = serde_yaml::from_str(&contents)?;
            tables.push(table);
        }

        let mut fields = Vec::new();
        for path in yaml_files(&root.join("fields"))? {
            let contents = fs::read_to_string(&path)?;
            let file: FieldFile = serde_yaml::from_str(&contents)?;
            fields.push(file);
        }

        tracing::info!(
            root = %root.display(),
            tables = tables.len(),
            field_files = fields.len(),
            "loading catalog"
        );
        Self::from_parts(context, tables, fields)
    }

    /// Load the catalog named by `[catalog] dir`, applying the schema override.
    pub fn load_with_config(config: &FieldsqlConfig) -> Result<Self> {
        let dir = config.catalog.dir.as_ref().ok_or_else(|| {
            FieldsqlError::Config("catalog.dir is not set".to_string())
        })?;
        let mut registry = Self::load_from_dir(dir)?;
        if let Some(schema) = &config.catalog.schema {
            registry.schema = registry.schema.with_namespace(schema.clone());
        }
        Ok(registry)
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    pub fn field(&self, name: &str) -> Option<&Arc<FieldDefinition>> {
        self.catalog.get(name)
    }

    /// Turn a request into independent per-query selections.
    pub fn resolve(&self, request: &QueryRequest) -> Result<Vec<FieldSelection>> {
        request
            .fields
            .iter()
            .map(|req| self.resolve_field(req))
            .collect()
    }

    fn resolve_field(&self, req: &FieldRequest) -> Result<FieldSelection> {
        let definition = self
            .field(&req.field)
            .ok_or_else(|| FieldsqlError::Validation(format!("unknown field {}", req.field)))?;
        let transformation = req
            .transformation
            .as_deref()
            .map(str::parse::<Transformation>)
            .transpose()?;

        let mut selection = FieldSelection::new(Arc::clone(definition));
        // clear defaults first so the requested pair is validated on its own
        selection.select_aggregation(None)?;
        selection.select_transformation(transformation)?;
        selection.select_aggregation(req.aggregation.clone())?;
        if let Some(lookup) = req.lookup {
            selection.set_lookup(lookup)?;
        }
        if let Some(primary) = req.primary {
            selection.set_primary(primary);
        }
        Ok(selection)
    }
}

fn load_context(root: &Path) -> Result<ContextSpec> {
    for name in ["context.yml", "context.yaml"] {
        let path = root.join(name);
        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            return Ok(serde_yaml::from_str(&contents)?);
        }
    }
    tracing::debug!(root = %root.display(), "no context file, using defaults");
    Ok(ContextSpec::default())
}

fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Err(FieldsqlError::Validation(format!(
            "directory not found: {}",
            dir.display()
        )));
    }
    let mut paths = Vec::new();
    for pattern in ["*.yml", "*.yaml"] {
        for entry in glob(&format!("{}/{pattern}", dir.display()))
            .map_err(|e| FieldsqlError::Other(e.into()))?
            .flatten()
        {
            paths.push(entry);
        }
    }
    paths.sort();
    Ok(paths)
}
