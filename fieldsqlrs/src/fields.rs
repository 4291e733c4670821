//! Field vocabulary and per-request selections.
//!
//! A [`FieldDefinition`] is read-only catalog data shared behind an `Arc`.
//! Every query builds its own [`FieldSelection`] values on top of those
//! definitions, so the catalog itself is never mutated.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{FieldsqlError, Result};
use crate::schema::{SchemaRegistry, TableId};

/// Row-level transformation applied before any grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Transformation {
    NotNull,
    Day,
    Week,
    Month,
    Year,
    Hour,
    Weekday,
    /// Earliest row per root key, ordered by the table's date field.
    First,
    /// Decade bucket rendered as a `"lo-hi"` string.
    Tens,
}

impl Transformation {
    pub const ALL: [Transformation; 9] = [
        Transformation::NotNull,
        Transformation::Day,
        Transformation::Week,
        Transformation::Month,
        Transformation::Year,
        Transformation::Hour,
        Transformation::Weekday,
        Transformation::First,
        Transformation::Tens,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            Transformation::NotNull => "not null",
            Transformation::Day => "day",
            Transformation::Week => "week",
            Transformation::Month => "month",
            Transformation::Year => "year",
            Transformation::Hour => "hour",
            Transformation::Weekday => "weekday",
            Transformation::First => "first",
            Transformation::Tens => "tens",
        }
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for Transformation {
    type Err = FieldsqlError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        let t = match normalized.as_str() {
            "not null" | "notnull" => Transformation::NotNull,
            "day" => Transformation::Day,
            "week" => Transformation::Week,
            "month" => Transformation::Month,
            "year" => Transformation::Year,
            "hour" => Transformation::Hour,
            "weekday" => Transformation::Weekday,
            "first" => Transformation::First,
            "tens" => Transformation::Tens,
            _ => return Err(FieldsqlError::UnknownTransformation(s.to_string())),
        };
        Ok(t)
    }
}

impl TryFrom<String> for Transformation {
    type Error = FieldsqlError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Transformation> for String {
    fn from(t: Transformation) -> Self {
        t.keyword().to_string()
    }
}

/// Grouping aggregation. The vocabulary is open: unrecognised keywords are
/// kept as [`Aggregation::Other`] and rendered as an uppercase function call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Aggregation {
    /// `COUNT(expr)`
    Rows,
    /// `COUNT(DISTINCT expr)`
    Count,
    Avg,
    Sum,
    Min,
    Max,
    Other(String),
}

impl Aggregation {
    pub fn builtin() -> [Aggregation; 6] {
        [
            Aggregation::Rows,
            Aggregation::Count,
            Aggregation::Avg,
            Aggregation::Sum,
            Aggregation::Min,
            Aggregation::Max,
        ]
    }

    pub fn keyword(&self) -> &str {
        match self {
            Aggregation::Rows => "rows",
            Aggregation::Count => "count",
            Aggregation::Avg => "avg",
            Aggregation::Sum => "sum",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Other(name) => name,
        }
    }

    /// Aggregation that combines values already aggregated with `self`
    /// into one value per coarser group.
    ///
    /// Counts add up. `Avg` and `Other` are reapplied as-is, which is exact
    /// only when groups are equally sized.
    pub fn rollup(&self) -> Aggregation {
        match self {
            Aggregation::Rows | Aggregation::Count | Aggregation::Sum => Aggregation::Sum,
            Aggregation::Min => Aggregation::Min,
            Aggregation::Max => Aggregation::Max,
            Aggregation::Avg => Aggregation::Avg,
            Aggregation::Other(name) => Aggregation::Other(name.clone()),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl From<&str> for Aggregation {
    fn from(value: &str) -> Self {
        let lower = value.trim().to_ascii_lowercase();
        match lower.as_str() {
            "rows" => Aggregation::Rows,
            "count" => Aggregation::Count,
            "avg" => Aggregation::Avg,
            "sum" => Aggregation::Sum,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            _ => Aggregation::Other(lower),
        }
    }
}

impl From<String> for Aggregation {
    fn from(value: String) -> Self {
        Aggregation::from(value.as_str())
    }
}

impl From<Aggregation> for String {
    fn from(agg: Aggregation) -> Self {
        agg.keyword().to_string()
    }
}

/// Replace a foreign-key column by a descriptive column of a reference table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionLookup {
    pub table: TableId,
    /// Column of the dimension table selected in place of the raw id.
    pub column: String,
    /// Optional restriction on dimension rows, with an `{alias}` placeholder.
    pub predicate: Option<String>,
    pub enabled_by_default: bool,
}

/// Immutable catalog entry for one selectable field.
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub name: String,
    pub label: String,
    /// SQL expression with an `{alias}` placeholder for the table alias.
    pub template: String,
    pub table: TableId,
    pub transformations: Vec<Transformation>,
    pub default_transformation: Option<Transformation>,
    pub aggregations: Vec<Aggregation>,
    pub default_aggregation: Option<Aggregation>,
    pub alias: Option<String>,
    pub lookup: Option<DimensionLookup>,
    /// Secondary fields never define the output grain.
    pub secondary: bool,
    /// SQL literal wrapped around the result with `COALESCE`.
    pub coalesce: Option<String>,
}

impl FieldDefinition {
    /// Bare column definition with no vocabulary; used for join keys.
    pub fn column(table: TableId, column: &str) -> Self {
        Self {
            name: column.to_string(),
            label: column.to_string(),
            template: format!("{{alias}}{column}"),
            table,
            transformations: Vec::new(),
            default_transformation: None,
            aggregations: Vec::new(),
            default_aggregation: None,
            alias: Some(column.to_string()),
            lookup: None,
            secondary: true,
            coalesce: None,
        }
    }
}

/// One use of a field inside a single query construction.
#[derive(Debug, Clone)]
pub struct FieldSelection {
    definition: Arc<FieldDefinition>,
    pub(crate) table: TableId,
    pub(crate) template: String,
    transformation: Option<Transformation>,
    aggregation: Option<Aggregation>,
    pub(crate) lookup: Option<DimensionLookup>,
    perform_lookup: bool,
    primary: bool,
    pub(crate) coalesce: Option<String>,
    pub(crate) alias_override: Option<String>,
    /// Aggregation already applied inside a hoisted CTE; set on the
    /// redirected field so an enclosing CTE rolls the value up again.
    pub(crate) carried: Option<Aggregation>,
    /// Index in the caller's selection; keeps SELECT order stable through hoisting.
    pub(crate) position: usize,
}

impl FieldSelection {
    /// Start from the definition's defaults.
    pub fn new(definition: Arc<FieldDefinition>) -> Self {
        let perform_lookup = definition
            .lookup
            .as_ref()
            .is_some_and(|l| l.enabled_by_default);
        Self {
            table: definition.table,
            template: definition.template.clone(),
            transformation: definition.default_transformation,
            aggregation: definition.default_aggregation.clone(),
            lookup: definition.lookup.clone(),
            perform_lookup,
            primary: !definition.secondary,
            coalesce: definition.coalesce.clone(),
            alias_override: None,
            carried: None,
            position: 0,
            definition,
        }
    }

    /// Pass-through selection of a key column, used inside CTE bodies.
    pub(crate) fn key_column(table: TableId, column: &str) -> Self {
        Self::new(Arc::new(FieldDefinition::column(table, column)))
    }

    pub fn definition(&self) -> &FieldDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn transformation(&self) -> Option<Transformation> {
        self.transformation
    }

    pub fn aggregation(&self) -> Option<&Aggregation> {
        self.aggregation.as_ref()
    }

    pub fn is_aggregated(&self) -> bool {
        self.aggregation.is_some()
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn set_primary(&mut self, primary: bool) {
        self.primary = primary;
    }

    pub fn lookup(&self) -> Option<&DimensionLookup> {
        self.lookup.as_ref()
    }

    /// True only when a lookup exists and is switched on.
    pub fn performs_lookup(&self) -> bool {
        self.perform_lookup && self.lookup.is_some()
    }

    pub fn set_lookup(&mut self, enabled: bool) -> Result<()> {
        if enabled && self.lookup.is_none() {
            return Err(FieldsqlError::InvalidSelection(format!(
                "field {} has no dimension lookup",
                self.name()
            )));
        }
        self.perform_lookup = enabled;
        Ok(())
    }

    pub fn select_transformation(&mut self, t: Option<Transformation>) -> Result<()> {
        if let Some(t) = t {
            if !self.definition.transformations.contains(&t) {
                return Err(FieldsqlError::InvalidSelection(format!(
                    "transformation {t} is not allowed for {}; allowed: [{}]",
                    self.name(),
                    join_keywords(self.definition.transformations.iter())
                )));
            }
            if let Some(agg) = &self.aggregation {
                return Err(composition_error(self.name(), t, agg));
            }
        }
        self.transformation = t;
        Ok(())
    }

    pub fn select_aggregation(&mut self, agg: Option<Aggregation>) -> Result<()> {
        if let Some(agg) = &agg {
            if !self.definition.aggregations.contains(agg) {
                return Err(FieldsqlError::InvalidSelection(format!(
                    "aggregation {agg} is not allowed for {}; allowed: [{}]",
                    self.name(),
                    join_keywords(self.definition.aggregations.iter())
                )));
            }
            if let Some(t) = self.transformation {
                return Err(composition_error(self.name(), t, agg));
            }
        }
        self.aggregation = agg;
        Ok(())
    }

    /// Set the transformation without validation; only used while rewriting.
    pub(crate) fn force_transformation(&mut self, t: Option<Transformation>) {
        self.transformation = t;
    }

    /// Set the aggregation without validation; only used while rewriting.
    pub(crate) fn force_aggregation(&mut self, agg: Option<Aggregation>) {
        self.aggregation = agg;
    }

    pub(crate) fn force_lookup(&mut self, enabled: bool) {
        self.perform_lookup = enabled;
    }

    pub fn with_coalesce(mut self, literal: impl Into<String>) -> Self {
        self.coalesce = Some(literal.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias_override = Some(alias.into());
        self
    }

    fn explicit_alias(&self) -> Option<&str> {
        self.alias_override
            .as_deref()
            .or(self.definition.alias.as_deref())
    }

    /// Column name of this field in the SELECT list.
    pub fn output_alias(&self, registry: &SchemaRegistry) -> String {
        if let Some(alias) = self.explicit_alias() {
            return alias.to_string();
        }

        let mut alias = sanitize_identifier(&self.definition.label);
        if alias.is_empty() {
            alias = sanitize_identifier(&self.definition.name);
        }
        if self.lookup.is_some() && !self.performs_lookup() {
            alias.push_str("_id");
        }
        if let Some(agg) = &self.aggregation {
            let is_case = self
                .template
                .trim_start()
                .get(..4)
                .is_some_and(|head| head.eq_ignore_ascii_case("case"));
            let prefix = if *agg == Aggregation::Max && is_case {
                "has".to_string()
            } else {
                registry.aggregation_prefix(agg)
            };
            alias = format!("{prefix}_{alias}");
        }
        alias
    }
}

fn composition_error(field: &str, t: Transformation, agg: &Aggregation) -> FieldsqlError {
    FieldsqlError::InvalidSelection(format!(
        "field {field} cannot combine transformation {t} with aggregation {agg}"
    ))
}

fn join_keywords<T: fmt::Display>(items: impl Iterator<Item = T>) -> String {
    items.map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
}

/// Lowercase identifier: runs of non-alphanumerics become one underscore.
pub fn sanitize_identifier(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for ch in label.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

static BARE_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\{alias\}([A-Za-z_][A-Za-z0-9_]*)$").expect("valid column regex")
});

/// Column name of a bare `{alias}column` template, if it is one.
pub fn template_column(template: &str) -> Option<&str> {
    BARE_COLUMN
        .captures(template.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
