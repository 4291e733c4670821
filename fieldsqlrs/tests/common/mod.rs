//! OMOP-shaped fixture shared by the integration tests.
#![allow(dead_code)]

use fieldsql::catalog::FieldFile;
use fieldsql::registry::CatalogRegistry;
use fieldsql::schema::{ContextSpec, TableSpec};

pub const CONTEXT: &str = r#"
schema: ""
aggregation_aliases:
  rows: num
where_fragments:
  standard: "{alias}standard_concept = 'S'"
"#;

pub const TABLES: &[&str] = &[
    r#"
name: Person
primary_key: [person_id]
foreign_keys: [gender_concept_id]
date_field: birth_datetime
"#,
    r#"
name: Visit_Occurrence
parents: [Person]
primary_key: [visit_occurrence_id]
foreign_keys: [person_id]
date_field: visit_start_datetime
"#,
    r#"
name: Visit_Detail
parents: [Visit_Occurrence]
primary_key: [visit_detail_id]
foreign_keys: [visit_occurrence_id, care_site_id]
date_field: visit_detail_start_datetime
"#,
    r#"
name: Care_Site
parents: [Visit_Detail]
primary_key: [care_site_id]
"#,
    r#"
name: Death
parents: [Person]
primary_key: [person_id]
date_field: death_date
"#,
    r#"
name: Measurement
parents: [Person]
primary_key: [measurement_id]
foreign_keys: [person_id, visit_occurrence_id]
date_field: measurement_datetime
"#,
    r#"
name: Concept
primary_key: [concept_id]
default_lookup: concept_name
"#,
    r#"
name: Cohort
parents: [Person]
primary_key: [person_id]
sql: "SELECT person_id FROM {schema}cohort_members"
"#,
];

pub const FIELDS: &[&str] = &[
    r#"
table: Person
fields:
  Person:
    sql: "{alias}person_id"
    aggregations: [count, rows]
    secondary: false
  Sex:
    sql: "{alias}gender_concept_id"
    lookup:
      table: Concept
  Age:
    label: Age
    sql: "2020 - {alias}year_of_birth"
    transformations: [tens]
  Date of birth:
    sql: "{alias}birth_datetime"
    transformations: [year, month, day, week]
"#,
    r#"
table: Visit_Occurrence
fields:
  Visit:
    sql: "{alias}visit_occurrence_id"
    aggregations: [rows, count]
  Visit start:
    sql: "{alias}visit_start_datetime"
    transformations: [first, year, week, hour, weekday]
"#,
    r#"
table: Visit_Detail
fields:
  Visit detail:
    sql: "{alias}visit_detail_id"
    aggregations: [rows, count]
  Visit detail start:
    sql: "{alias}visit_detail_start_datetime"
    transformations: [first]
"#,
    r#"
table: Care_Site
fields:
  Care site:
    sql: "{alias}care_site_name"
"#,
    r#"
table: Death
fields:
  Death:
    sql: "{alias}death_date"
    transformations: [not null]
    aggregations: [rows, count, max]
"#,
    r#"
table: Measurement
fields:
  Measurement:
    sql: "{alias}measurement_id"
    aggregations: [rows, count]
  Measurement value:
    sql: "{alias}value_as_number"
    aggregations: [avg, min, max]
  Measurement type:
    sql: "{alias}measurement_concept_id"
    lookup:
      table: Concept
      where_ref: standard
"#,
    r#"
table: custom
fields:
  In cohort:
    sql: "CASE WHEN {alias}person_id IS NULL THEN 0 ELSE 1 END"
    custom_table: Cohort
    aggregations: [max]
"#,
];

pub fn context() -> ContextSpec {
    serde_yaml::from_str(CONTEXT).unwrap()
}

pub fn tables() -> Vec<TableSpec> {
    TABLES
        .iter()
        .map(|t| serde_yaml::from_str(t).unwrap())
        .collect()
}

pub fn field_files() -> Vec<FieldFile> {
    FIELDS
        .iter()
        .map(|f| serde_yaml::from_str(f).unwrap())
        .collect()
}

pub fn omop_registry() -> CatalogRegistry {
    omop_registry_with(|_| {})
}

pub fn omop_registry_with(configure: impl FnOnce(&mut ContextSpec)) -> CatalogRegistry {
    let mut context = context();
    configure(&mut context);
    CatalogRegistry::from_parts(context, tables(), field_files()).unwrap()
}

/// Collapse all whitespace runs so layout does not matter in comparisons.
pub fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
