//! Field catalog: declarative field specs validated into shared definitions.
//!
//! Validation is strict and happens once, when the catalog is built. Nothing
//! downstream re-checks table names, vocabularies or lookup shapes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FieldsqlError, Result};
use crate::fields::{
    template_column, Aggregation, DimensionLookup, FieldDefinition, Transformation,
};
use crate::schema::{SchemaRegistry, TableGraph, TableId};

/// Table name that binds fields to raw-SQL custom tables.
pub const CUSTOM_TABLE: &str = "custom";

fn default_true() -> bool {
    true
}

/// One `fields/*.yml` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldFile {
    pub table: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub label: Option<String>,
    pub sql: String,
    /// Kept as text so unknown keywords surface as `UnknownTransformation`.
    #[serde(default)]
    pub transformations: Vec<String>,
    pub default_transformation: Option<String>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
    pub default_aggregation: Option<Aggregation>,
    pub alias: Option<String>,
    pub lookup: Option<LookupSpec>,
    #[serde(default = "default_true")]
    pub secondary: bool,
    pub coalesce: Option<String>,
    /// Custom table backing this field when the file's table is `custom`.
    pub custom_table: Option<String>,
}

impl FieldSpec {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            label: None,
            sql: sql.into(),
            transformations: Vec::new(),
            default_transformation: None,
            aggregations: Vec::new(),
            default_aggregation: None,
            alias: None,
            lookup: None,
            secondary: true,
            coalesce: None,
            custom_table: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookupSpec {
    pub table: String,
    /// Defaults to the dimension table's `default_lookup`.
    pub column: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(rename = "where")]
    pub where_clause: Option<String>,
    /// Name of a shared fragment in the context's `where_fragments`.
    pub where_ref: Option<String>,
}

/// Validated, immutable field definitions.
#[derive(Debug, Clone, Default)]
pub struct FieldCatalog {
    fields: Vec<Arc<FieldDefinition>>,
    by_name: HashMap<String, usize>,
}

impl FieldCatalog {
    pub fn from_specs(schema: &SchemaRegistry, files: Vec<FieldFile>) -> Result<Self> {
        let mut catalog = FieldCatalog::default();
        for file in files {
            for (name, spec) in file.fields {
                let definition = build_definition(schema, &file.table, &name, spec)?;
                let key = name.to_lowercase();
                if catalog.by_name.contains_key(&key) {
                    return Err(FieldsqlError::Validation(format!(
                        "duplicate field {name}"
                    )));
                }
                catalog.by_name.insert(key, catalog.fields.len());
                catalog.fields.push(Arc::new(definition));
            }
        }
        tracing::debug!(fields = catalog.fields.len(), "field catalog built");
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<FieldDefinition>> {
        self.fields.iter()
    }

    /// Look a field up by name, then by label; both case-insensitive.
    pub fn get(&self, name: &str) -> Option<&Arc<FieldDefinition>> {
        let key = name.to_lowercase();
        if let Some(idx) = self.by_name.get(&key) {
            return self.fields.get(*idx);
        }
        self.fields.iter().find(|f| f.label.to_lowercase() == key)
    }

    pub fn fields_for_table(&self, table: TableId) -> impl Iterator<Item = &Arc<FieldDefinition>> {
        self.fields.iter().filter(move |f| f.table == table)
    }
}

fn build_definition(
    schema: &SchemaRegistry,
    table_name: &str,
    name: &str,
    spec: FieldSpec,
) -> Result<FieldDefinition> {
    let table = resolve_table(schema, table_name, name, spec.custom_table.as_deref())?;

    if !spec.sql.contains("{alias}") {
        tracing::warn!(
            field = %name,
            sql = %spec.sql,
            "no table alias placeholder found (expecting e.g. '{{alias}}column')"
        );
    }

    let mut transformations = Vec::with_capacity(spec.transformations.len());
    for keyword in &spec.transformations {
        let t: Transformation = keyword.parse()?;
        if !schema.allows_transformation(t) {
            return Err(FieldsqlError::Validation(format!(
                "field {name}: transformation {t} is not in the registry vocabulary"
            )));
        }
        transformations.push(t);
    }
    for agg in &spec.aggregations {
        if !schema.allows_aggregation(agg) {
            return Err(FieldsqlError::Validation(format!(
                "field {name}: aggregation {agg} is not in the registry vocabulary"
            )));
        }
    }

    let default_transformation = spec
        .default_transformation
        .as_deref()
        .map(str::parse::<Transformation>)
        .transpose()?;
    if let Some(t) = default_transformation {
        if !transformations.contains(&t) {
            return Err(FieldsqlError::Validation(format!(
                "field {name}: default transformation {t} is not in its own list"
            )));
        }
    }
    if let Some(agg) = &spec.default_aggregation {
        if !spec.aggregations.contains(agg) {
            return Err(FieldsqlError::Validation(format!(
                "field {name}: default aggregation {agg} is not in its own list"
            )));
        }
    }
    if default_transformation.is_some() && spec.default_aggregation.is_some() {
        return Err(FieldsqlError::Validation(format!(
            "field {name}: a default transformation and a default aggregation cannot be combined"
        )));
    }

    let lookup = spec
        .lookup
        .map(|lookup| build_lookup(schema, name, &spec.sql, lookup))
        .transpose()?;

    Ok(FieldDefinition {
        name: name.to_string(),
        label: spec.label.unwrap_or_else(|| name.to_string()),
        template: spec.sql,
        table,
        transformations,
        default_transformation,
        aggregations: spec.aggregations,
        default_aggregation: spec.default_aggregation,
        alias: spec.alias,
        lookup,
        secondary: spec.secondary,
        coalesce: spec.coalesce,
    })
}

fn resolve_table(
    schema: &SchemaRegistry,
    table_name: &str,
    field: &str,
    custom_table: Option<&str>,
) -> Result<TableId> {
    if table_name.eq_ignore_ascii_case(CUSTOM_TABLE) {
        let custom = custom_table.unwrap_or(field);
        return match schema.table_id(custom) {
            Some(id) if schema.node(id).is_custom() => Ok(id),
            Some(_) => Err(FieldsqlError::Validation(format!(
                "field {field}: table {custom} is not a custom table"
            ))),
            None => Err(FieldsqlError::Validation(format!(
                "field {field}: unknown custom table {custom}"
            ))),
        };
    }
    if custom_table.is_some() {
        return Err(FieldsqlError::Validation(format!(
            "field {field}: custom_table is only valid when table is '{CUSTOM_TABLE}'"
        )));
    }
    schema.table_id(table_name).ok_or_else(|| {
        FieldsqlError::Validation(format!("field {field}: unknown table {table_name}"))
    })
}

fn build_lookup(
    schema: &SchemaRegistry,
    field: &str,
    template: &str,
    spec: LookupSpec,
) -> Result<DimensionLookup> {
    if template_column(template).is_none() {
        return Err(FieldsqlError::Validation(format!(
            "field {field}: lookups require a bare column template like '{{alias}}column', got '{template}'"
        )));
    }
    let table = schema.table_id(&spec.table).ok_or_else(|| {
        FieldsqlError::Validation(format!(
            "field {field}: unknown lookup table {}",
            spec.table
        ))
    })?;
    let node = schema.node(table);
    if node.primary_key.is_empty() {
        return Err(FieldsqlError::Validation(format!(
            "field {field}: lookup table {} has no primary key",
            spec.table
        )));
    }
    let column = spec
        .column
        .or_else(|| node.default_lookup.clone())
        .ok_or_else(|| {
            FieldsqlError::Validation(format!(
                "field {field}: lookup table {} has no default lookup column",
                spec.table
            ))
        })?;

    let predicate = match (spec.where_clause, spec.where_ref) {
        (Some(_), Some(_)) => {
            return Err(FieldsqlError::Validation(format!(
                "field {field}: lookup cannot set both where and where_ref"
            )))
        }
        (Some(clause), None) => Some(clause),
        (None, Some(reference)) => Some(
            schema
                .where_fragment(&reference)
                .map(str::to_string)
                .ok_or_else(|| {
                    FieldsqlError::Validation(format!(
                        "field {field}: unknown where fragment {reference}"
                    ))
                })?,
        ),
        (None, None) => None,
    };

    Ok(DimensionLookup {
        table,
        column,
        predicate,
        enabled_by_default: spec.enabled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ContextSpec, TableSpec};

    fn schema() -> SchemaRegistry {
        let mut context = ContextSpec::default();
        context
            .where_fragments
            .insert("standard".into(), "{alias}standard_concept = 'S'".into());
        SchemaRegistry::new(
            context,
            vec![
                TableSpec {
                    name: "Person".into(),
                    primary_key: vec!["person_id".into()],
                    ..Default::default()
                },
                TableSpec {
                    name: "Concept".into(),
                    primary_key: vec!["concept_id".into()],
                    default_lookup: Some("concept_name".into()),
                    ..Default::default()
                },
                TableSpec {
                    name: "Cohort".into(),
                    parents: vec!["Person".into()],
                    primary_key: vec!["person_id".into()],
                    sql: Some("SELECT person_id FROM {schema}cohort".into()),
                    ..Default::default()
                },
            ],
        )
        .unwrap()
    }

    fn file(table: &str, fields: Vec<(&str, FieldSpec)>) -> FieldFile {
        FieldFile {
            table: table.into(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }

    fn lookup(table: &str) -> LookupSpec {
        LookupSpec {
            table: table.into(),
            column: None,
            enabled: true,
            where_clause: None,
            where_ref: None,
        }
    }

    #[test]
    fn builds_definitions_with_resolved_lookups() {
        let schema = schema();
        let mut sex = FieldSpec::new("{alias}gender_concept_id");
        sex.lookup = Some(LookupSpec {
            where_ref: Some("standard".into()),
            ..lookup("Concept")
        });
        let catalog = FieldCatalog::from_specs(&schema, vec![file("Person", vec![("Sex", sex)])])
            .unwrap();

        let def = catalog.get("sex").unwrap();
        assert_eq!(def.label, "Sex");
        let lookup = def.lookup.as_ref().unwrap();
        assert_eq!(lookup.column, "concept_name");
        assert_eq!(
            lookup.predicate.as_deref(),
            Some("{alias}standard_concept = 'S'")
        );
    }

    #[test]
    fn rejects_lookup_on_computed_expression() {
        let mut age = FieldSpec::new("2020 - {alias}year_of_birth");
        age.lookup = Some(lookup("Concept"));
        let err = FieldCatalog::from_specs(&schema(), vec![file("Person", vec![("Age", age)])])
            .unwrap_err();
        assert!(err.to_string().contains("bare column"));
    }

    #[test]
    fn rejects_unknown_tables_and_keywords() {
        let err = FieldCatalog::from_specs(
            &schema(),
            vec![file("Nope", vec![("X", FieldSpec::new("{alias}x"))])],
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown table Nope"));

        let mut spec = FieldSpec::new("{alias}x");
        spec.transformations = vec!["quarter".into()];
        let err = FieldCatalog::from_specs(&schema(), vec![file("Person", vec![("X", spec)])])
            .unwrap_err();
        assert!(matches!(err, FieldsqlError::UnknownTransformation(_)));
    }

    #[test]
    fn rejects_vocabulary_outside_registry() {
        let mut context = ContextSpec::default();
        context.aggregations = vec![Aggregation::Count];
        let schema = SchemaRegistry::new(
            context,
            vec![TableSpec {
                name: "Person".into(),
                primary_key: vec!["person_id".into()],
                ..Default::default()
            }],
        )
        .unwrap();
        let mut spec = FieldSpec::new("{alias}person_id");
        spec.aggregations = vec![Aggregation::Sum];
        let err = FieldCatalog::from_specs(&schema, vec![file("Person", vec![("P", spec)])])
            .unwrap_err();
        assert!(err.to_string().contains("not in the registry vocabulary"));
    }

    #[test]
    fn rejects_defaults_outside_own_lists() {
        let mut spec = FieldSpec::new("{alias}person_id");
        spec.aggregations = vec![Aggregation::Count];
        spec.default_aggregation = Some(Aggregation::Rows);
        let err = FieldCatalog::from_specs(&schema(), vec![file("Person", vec![("P", spec)])])
            .unwrap_err();
        assert!(err.to_string().contains("default aggregation"));
    }

    #[test]
    fn rejects_both_where_forms() {
        let mut spec = FieldSpec::new("{alias}gender_concept_id");
        spec.lookup = Some(LookupSpec {
            where_clause: Some("{alias}invalid_reason IS NULL".into()),
            where_ref: Some("standard".into()),
            ..lookup("Concept")
        });
        let err = FieldCatalog::from_specs(&schema(), vec![file("Person", vec![("Sex", spec)])])
            .unwrap_err();
        assert!(err.to_string().contains("both where and where_ref"));
    }

    #[test]
    fn custom_fields_bind_to_custom_tables() {
        let schema = schema();
        let mut spec = FieldSpec::new("{alias}person_id");
        spec.custom_table = Some("Cohort".into());
        let catalog = FieldCatalog::from_specs(
            &schema,
            vec![file(CUSTOM_TABLE, vec![("In cohort", spec)])],
        )
        .unwrap();
        assert_eq!(
            catalog.get("in cohort").unwrap().table,
            schema.table_id("Cohort").unwrap()
        );

        let err = FieldCatalog::from_specs(
            &schema,
            vec![file(CUSTOM_TABLE, vec![("Person", FieldSpec::new("{alias}x"))])],
        )
        .unwrap_err();
        assert!(err.to_string().contains("not a custom table"));
    }

    #[test]
    fn lookup_by_label_is_case_insensitive() {
        let mut spec = FieldSpec::new("{alias}year_of_birth");
        spec.label = Some("Year of Birth".into());
        let catalog =
            FieldCatalog::from_specs(&schema(), vec![file("Person", vec![("yob", spec)])]).unwrap();
        assert_eq!(catalog.get("YEAR OF BIRTH").unwrap().name, "yob");
        assert!(catalog.get("missing").is_none());
    }
}
