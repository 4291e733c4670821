mod common;

use std::fs;
use std::path::Path;

use fieldsql::config::FieldsqlConfig;
use fieldsql::error::FieldsqlError;
use fieldsql::{compile_with_config, CatalogRegistry, FieldRequest, QueryRequest, SqlBuilder};

fn write(dir: &Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn write_catalog(dir: &Path) {
    write(dir, "context.yml", common::CONTEXT);
    for (idx, table) in common::TABLES.iter().enumerate() {
        write(dir, &format!("tables/{idx:02}.yml"), table);
    }
    for (idx, fields) in common::FIELDS.iter().enumerate() {
        write(dir, &format!("fields/{idx:02}.yaml"), fields);
    }
}

fn sex_request() -> QueryRequest {
    QueryRequest::new(vec![
        FieldRequest::new("Person").aggregate("count"),
        FieldRequest::new("Sex"),
    ])
}

#[test]
fn loads_catalog_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    write_catalog(dir.path());

    let registry = CatalogRegistry::load_from_dir(dir.path()).unwrap();
    assert_eq!(registry.schema().len(), common::TABLES.len());
    assert!(registry.field("measurement value").is_some());
    assert_eq!(
        registry.schema().table_id("Person").map(|t| t.index()),
        Some(0)
    );

    let from_files = SqlBuilder::default().build(&registry, &sex_request()).unwrap();
    let from_parts = SqlBuilder::default()
        .build(&common::omop_registry(), &sex_request())
        .unwrap();
    assert_eq!(from_files, from_parts);
}

#[test]
fn context_file_is_optional() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "tables/person.yml",
        "name: Person\nprimary_key: [person_id]\n",
    );
    write(
        dir.path(),
        "fields/person.yml",
        "table: Person\nfields:\n  Person:\n    sql: \"{alias}person_id\"\n    aggregations: [rows]\n",
    );
    let registry = CatalogRegistry::load_from_dir(dir.path()).unwrap();
    assert_eq!(registry.schema().namespace(), "");
    let sql = SqlBuilder::default()
        .build(
            &registry,
            &QueryRequest::new(vec![FieldRequest::new("Person").aggregate("rows")]),
        )
        .unwrap();
    assert_eq!(sql, "SELECT COUNT(person_id) AS num_person\nFROM Person");
}

#[test]
fn missing_tables_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "fields/person.yml", "table: Person\n");
    let err = CatalogRegistry::load_from_dir(dir.path()).unwrap_err();
    assert!(err.to_string().contains("directory not found"), "{err}");
}

#[test]
fn malformed_yaml_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "tables/person.yml", "name: Person\nprimary_key: [person_id\n");
    write(dir.path(), "fields/person.yml", "table: Person\n");
    let err = CatalogRegistry::load_from_dir(dir.path()).unwrap_err();
    assert!(matches!(err, FieldsqlError::Yaml(_)), "{err}");
}

#[test]
fn unknown_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "tables/person.yml",
        "name: Person\nprimary_key: [person_id]\nprimary_keys: [oops]\n",
    );
    write(dir.path(), "fields/person.yml", "table: Person\n");
    assert!(CatalogRegistry::load_from_dir(dir.path()).is_err());
}

#[test]
fn schema_rejects_unknown_parents_and_cycles() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "tables/visit.yml",
        "name: Visit\nparents: [Persons]\nprimary_key: [visit_id]\n",
    );
    write(dir.path(), "fields/none.yml", "table: Visit\n");
    let err = CatalogRegistry::load_from_dir(dir.path()).unwrap_err();
    assert!(matches!(err, FieldsqlError::Validation(_)), "{err}");

    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "tables/a.yml", "name: A\nparents: [B]\nprimary_key: [id]\n");
    write(dir.path(), "tables/b.yml", "name: B\nparents: [A]\nprimary_key: [id]\n");
    write(dir.path(), "fields/none.yml", "table: A\n");
    let err = CatalogRegistry::load_from_dir(dir.path()).unwrap_err();
    assert!(err.to_string().contains("cyclic"), "{err}");
}

#[test]
fn config_points_at_catalog_and_overrides_schema() {
    let dir = tempfile::tempdir().unwrap();
    write_catalog(dir.path());
    let config = FieldsqlConfig::from_toml(&format!(
        "[compiler]\ndialect = \"mssql\"\n\n[catalog]\ndir = {:?}\nschema = \"cdm\"\n",
        dir.path().display().to_string()
    ))
    .unwrap();

    let sql = compile_with_config(&config, &sex_request()).unwrap();
    assert!(sql.contains("FROM cdm.Person p"), "sql: {sql}");
    assert!(sql.contains("LEFT JOIN cdm.Concept c"));
}

#[test]
fn config_without_catalog_dir_fails() {
    let err = compile_with_config(&FieldsqlConfig::default(), &sex_request()).unwrap_err();
    assert!(matches!(err, FieldsqlError::Config(_)));
}

#[test]
fn requests_deserialize_from_json() {
    let request: QueryRequest = serde_json::from_str(
        r#"{"fields": [
            {"field": "Person", "aggregation": "count"},
            {"field": "Sex", "lookup": false}
        ]}"#,
    )
    .unwrap();
    assert_eq!(request.fields[1].lookup, Some(false));
    let sql = SqlBuilder::default()
        .build(&common::omop_registry(), &request)
        .unwrap();
    assert!(sql.contains("gender_concept_id AS sex_id"));
}

#[test]
fn demo_catalog_compiles_its_standard_queries() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/omop");
    let registry = CatalogRegistry::load_from_dir(&root).unwrap();
    let queries = fieldsql::StandardQueries::from_file(root.join("standard_queries.json")).unwrap();
    assert!(!queries.is_empty());
    for dialect in [fieldsql::DialectKind::Postgres, fieldsql::DialectKind::MsSql] {
        let builder = SqlBuilder::new(dialect);
        for (name, request) in queries.iter() {
            let sql = builder.build(&registry, request);
            assert!(sql.is_ok(), "{name} ({dialect}): {:?}", sql.err());
        }
    }

    let sql = SqlBuilder::default()
        .build(&registry, queries.get("Distribution of Sex").unwrap())
        .unwrap();
    assert!(sql.contains("COALESCE(c.concept_name, 'Unknown') AS sex"));
    assert!(sql.contains("FROM cdm.Person p"));
}
