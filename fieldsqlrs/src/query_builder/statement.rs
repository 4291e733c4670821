//! Per-call statement state: aliases, FROM clause, lookup joins and GROUP BY.

use std::collections::{HashMap, HashSet};

use crate::dialect::Dialect;
use crate::error::{FieldsqlError, Result};
use crate::fields::{template_column, FieldSelection, Transformation};
use crate::schema::{SchemaView, TableGraph, TableId, TableSource};
use crate::sql_ast::{Join, SelectQuery, SqlExpr, SqlJoinType, TableFactor, TableRef};

use super::joins::{minimal_join_tree, JoinTree};
use super::render::{first_row_window, render_field, FieldAliases};

/// Short words that are SQL keywords in at least one supported dialect.
const RESERVED_ALIASES: &[&str] = &[
    "as", "at", "by", "do", "go", "if", "in", "is", "no", "of", "on", "or", "to", "add", "all",
    "and", "any", "asc", "end", "for", "key", "not", "set", "top", "use",
];

/// Dimension join identity: source table, foreign-key column, dimension table.
type LookupKey = (TableId, String, TableId);

/// Ephemeral build state for one SELECT statement.
pub(crate) struct Statement<'v, 'r> {
    view: &'v SchemaView<'r>,
    dialect: &'v dyn Dialect,
    aliases: HashMap<TableId, String>,
    lookup_aliases: HashMap<LookupKey, String>,
    /// Tables ranked for `first`, with their `ROW_NUMBER()` window.
    ranked: HashMap<TableId, String>,
    taken: HashSet<String>,
    query: SelectQuery,
}

impl<'v, 'r> Statement<'v, 'r> {
    pub(crate) fn new(view: &'v SchemaView<'r>, dialect: &'v dyn Dialect) -> Self {
        Self {
            view,
            dialect,
            aliases: HashMap::new(),
            lookup_aliases: HashMap::new(),
            ranked: HashMap::new(),
            taken: HashSet::new(),
            query: SelectQuery::default(),
        }
    }

    /// Assemble SELECT/FROM/WHERE/GROUP BY for `fields`, in the given order.
    pub(crate) fn assemble(mut self, fields: &[FieldSelection]) -> Result<SelectQuery> {
        if fields.is_empty() {
            return Err(FieldsqlError::EmptySelection);
        }
        let required: Vec<TableId> = fields.iter().map(FieldSelection::table).collect();
        let tree = minimal_join_tree(self.view, &required)?;
        let lookups = self.collect_lookups(fields)?;
        self.collect_ranked(fields)?;

        self.add_from(&tree, !lookups.is_empty())?;
        self.add_lookup_joins(&lookups)?;

        let has_aggregation = fields.iter().any(FieldSelection::is_aggregated);
        for field in fields {
            self.add_field(field, has_aggregation)?;
        }
        Ok(self.query)
    }

    fn collect_lookups(&self, fields: &[FieldSelection]) -> Result<Vec<LookupKey>> {
        let mut lookups: Vec<LookupKey> = Vec::new();
        for field in fields.iter().filter(|f| f.performs_lookup()) {
            let Some(lookup) = field.lookup() else {
                continue;
            };
            if self.view.node(lookup.table).is_cte() {
                return Err(FieldsqlError::UnsupportedCteLookup {
                    field: field.name().to_string(),
                    table: self.view.name(lookup.table).to_string(),
                });
            }
            let fk = lookup_column(field)?;
            let key = (field.table(), fk.to_string(), lookup.table);
            if !lookups.contains(&key) {
                lookups.push(key);
            }
        }
        Ok(lookups)
    }

    fn collect_ranked(&mut self, fields: &[FieldSelection]) -> Result<()> {
        let first = fields
            .iter()
            .filter(|f| f.transformation() == Some(Transformation::First));
        for field in first {
            let table = field.table();
            if !self.ranked.contains_key(&table) {
                let window = first_row_window(self.view, table)?;
                self.ranked.insert(table, window);
            }
        }
        Ok(())
    }

    fn add_from(&mut self, tree: &JoinTree, force_alias: bool) -> Result<()> {
        let view = self.view;
        for (idx, entry) in tree.entries().iter().enumerate() {
            // derived tables always need an alias
            let bare = tree.len() == 1
                && !force_alias
                && !view.node(entry.table).is_custom()
                && !self.ranked.contains_key(&entry.table);
            let alias = if idx == 0 && bare {
                String::new()
            } else {
                self.unique_alias(view.name(entry.table))
            };
            self.aliases.insert(entry.table, alias.clone());
            let table = self.table_ref(entry.table, alias);

            match &entry.edge {
                None => self.query.from = table,
                Some(edge) => {
                    let from_alias = self.alias_of(edge.from)?;
                    let to_alias = self.alias_of(edge.to)?;
                    let on = edge
                        .from_keys
                        .iter()
                        .zip(&edge.to_keys)
                        .map(|(l, r)| {
                            SqlExpr::eq(
                                SqlExpr::column(&from_alias, l),
                                SqlExpr::column(&to_alias, r),
                            )
                        })
                        .collect();
                    self.query.joins.push(Join {
                        join_type: SqlJoinType::Left,
                        table,
                        on,
                    });
                }
            }
        }
        Ok(())
    }

    fn add_lookup_joins(&mut self, lookups: &[LookupKey]) -> Result<()> {
        let view = self.view;
        for key in lookups {
            let (source, fk, dimension) = key;
            let dim_key = view
                .node(*dimension)
                .primary_key
                .first()
                .cloned()
                .ok_or_else(|| {
                    FieldsqlError::Validation(format!(
                        "lookup table {} has no primary key",
                        view.name(*dimension)
                    ))
                })?;
            let alias = self.unique_alias(view.name(*dimension));
            let source_alias = self.alias_of(*source)?;
            let table = self.table_ref(*dimension, alias.clone());
            self.query.joins.push(Join {
                join_type: SqlJoinType::Left,
                table,
                on: vec![SqlExpr::eq(
                    SqlExpr::column(&source_alias, fk),
                    SqlExpr::column(&alias, &dim_key),
                )],
            });
            self.lookup_aliases.insert(key.clone(), alias);
        }
        Ok(())
    }

    fn add_field(&mut self, field: &FieldSelection, has_aggregation: bool) -> Result<()> {
        let table_alias = self.alias_of(field.table())?;
        let lookup_alias = match field.lookup() {
            Some(lookup) if field.performs_lookup() => {
                let key = (
                    field.table(),
                    lookup_column(field)?.to_string(),
                    lookup.table,
                );
                self.lookup_aliases.get(&key).cloned()
            }
            _ => None,
        };

        let registry = self.view.registry();
        let coalesce = field.coalesce.clone().or_else(|| {
            field
                .performs_lookup()
                .then(|| registry.coalesce_default().map(str::to_string))
                .flatten()
        });

        let rendered = render_field(
            self.view,
            self.dialect,
            field,
            FieldAliases {
                table: &table_alias,
                lookup: lookup_alias.as_deref(),
            },
            coalesce.as_deref(),
        )?;

        self.query.select.extend(rendered.items);
        for predicate in rendered.predicates {
            let expr = SqlExpr::Raw(predicate);
            if !self.query.filters.contains(&expr) {
                self.query.filters.push(expr);
            }
        }
        if has_aggregation && !field.is_aggregated() {
            self.query.group_by.extend(rendered.group_keys);
        }
        Ok(())
    }

    fn alias_of(&self, table: TableId) -> Result<String> {
        self.aliases.get(&table).cloned().ok_or_else(|| {
            FieldsqlError::Other(anyhow::anyhow!(
                "table {} is not part of the join tree",
                self.view.name(table)
            ))
        })
    }

    fn table_ref(&self, table: TableId, alias: String) -> TableRef {
        let node = self.view.node(table);
        let namespace = self.view.registry().namespace();
        let factor = match &node.source {
            TableSource::Physical => TableFactor::Named {
                schema: node.schema.clone().unwrap_or_else(|| namespace.to_string()),
                name: node.name.clone(),
            },
            TableSource::Cte => TableFactor::Named {
                schema: String::new(),
                name: node.name.clone(),
            },
            TableSource::Custom { sql } => {
                let schema = node.schema.as_deref().unwrap_or(namespace);
                let prefix = if schema.is_empty() {
                    String::new()
                } else {
                    format!("{schema}.")
                };
                TableFactor::Subquery(sql.replace("{schema}", &prefix))
            }
        };
        let factor = match self.ranked.get(&table) {
            Some(window) => {
                let source = match factor {
                    TableFactor::Named { schema, name } => {
                        self.dialect.qualify_table(&schema, &name)
                    }
                    TableFactor::Subquery(sql) => format!("({}) src", sql.trim()),
                };
                TableFactor::Subquery(format!("SELECT *, {window} AS rn FROM {source}"))
            }
            None => factor,
        };
        TableRef {
            factor,
            alias: Some(alias),
        }
    }

    /// Reserve a short alias for `name`, unique across table and lookup joins.
    fn unique_alias(&mut self, name: &str) -> String {
        let alias = alias_candidates(name)
            .into_iter()
            .find(|c| !self.taken.contains(c) && !RESERVED_ALIASES.contains(&c.as_str()))
            .unwrap_or_else(|| {
                let base = first_letter(name);
                (2..)
                    .map(|n| format!("{base}{n}"))
                    .find(|c| !self.taken.contains(c))
                    .unwrap_or(base)
            });
        self.taken.insert(alias.clone());
        alias
    }
}

fn lookup_column(field: &FieldSelection) -> Result<&str> {
    template_column(field.template()).ok_or_else(|| {
        FieldsqlError::Validation(format!(
            "field {} performs a lookup but its template '{}' is not a bare column",
            field.name(),
            field.template()
        ))
    })
}

fn first_letter(name: &str) -> String {
    name.chars()
        .find(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_lowercase().to_string())
        .unwrap_or_else(|| "t".to_string())
}

/// First letter, then the initials of `_`-separated words.
fn alias_candidates(name: &str) -> Vec<String> {
    let mut out = vec![first_letter(name)];
    let initials: String = name
        .split('_')
        .filter_map(|part| part.chars().find(char::is_ascii_alphabetic))
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if initials.len() > 1 && !out.contains(&initials) {
        out.push(initials);
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dialect::DialectKind;
    use crate::fields::{DimensionLookup, FieldDefinition};
    use crate::schema::{ContextSpec, CteNode, SchemaRegistry, TableSpec};

    fn registry() -> SchemaRegistry {
        let table = |name: &str, parents: &[&str], pk: &str, fks: &[&str]| TableSpec {
            name: name.into(),
            parents: parents.iter().map(|p| p.to_string()).collect(),
            primary_key: vec![pk.into()],
            foreign_keys: fks.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        };
        SchemaRegistry::new(
            ContextSpec::default(),
            vec![
                table("Person", &[], "person_id", &[]),
                table("Procedure", &["Person"], "procedure_id", &["person_id"]),
                table("Payer", &["Person"], "payer_id", &["person_id"]),
                table("Drug_Occurrence", &["Person"], "drug_id", &["person_id"]),
                table("Provider", &["Person"], "provider_id", &["person_id"]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn aliases_lengthen_then_number_on_collision() {
        let reg = registry();
        let view = SchemaView::new(&reg);
        let mut stmt = Statement::new(&view, DialectKind::Postgres.dialect());
        assert_eq!(stmt.unique_alias("Person"), "p");
        assert_eq!(stmt.unique_alias("Procedure"), "p2");
        assert_eq!(stmt.unique_alias("Payer"), "p3");
        assert_eq!(stmt.unique_alias("Visit_Occurrence"), "v");
        assert_eq!(stmt.unique_alias("Visit_Detail"), "vd");
        assert_eq!(stmt.unique_alias("Visit_Occurrence"), "vo");
        assert_eq!(stmt.unique_alias("Visit_Occurrence"), "v2");
    }

    #[test]
    fn reserved_words_are_skipped() {
        let reg = registry();
        let view = SchemaView::new(&reg);
        let mut stmt = Statement::new(&view, DialectKind::Postgres.dialect());
        stmt.taken.insert("d".into());
        assert_eq!(stmt.unique_alias("Drug_Occurrence"), "d2");
    }

    #[test]
    fn lookup_against_cte_is_rejected() {
        let reg = registry();
        let person = reg.table_id("Person").unwrap();
        let mut view = SchemaView::new(&reg);
        let cte = view.add_cte(CteNode::new(
            "payer_agg".into(),
            person,
            vec!["person_id".into()],
            vec!["person_id".into(), "num_payer".into()],
            Vec::new(),
        ));
        let mut def = FieldDefinition::column(person, "person_id");
        def.alias = None;
        def.lookup = Some(DimensionLookup {
            table: cte,
            column: "num_payer".into(),
            predicate: None,
            enabled_by_default: true,
        });
        let field = FieldSelection::new(Arc::new(def));
        let err = Statement::new(&view, DialectKind::Postgres.dialect())
            .assemble(&[field])
            .unwrap_err();
        assert!(matches!(err, FieldsqlError::UnsupportedCteLookup { .. }));
    }

    #[test]
    fn single_table_without_lookups_has_no_alias() {
        let reg = registry();
        let view = SchemaView::new(&reg);
        let field = FieldSelection::key_column(reg.table_id("Person").unwrap(), "person_id");
        let query = Statement::new(&view, DialectKind::Postgres.dialect())
            .assemble(&[field])
            .unwrap();
        assert_eq!(query.from.alias.as_deref(), Some(""));
        assert!(query.joins.is_empty());
        assert!(query.group_by.is_empty());
    }
}
