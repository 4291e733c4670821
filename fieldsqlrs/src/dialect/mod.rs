//! SQL dialect abstractions.
//!
//! Dialects only map transformation and aggregation keywords to SQL
//! fragments. Everything structural (joins, aliases, clause layout) lives in
//! the query builder and is shared by every dialect.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FieldsqlError, Result};
use crate::fields::{Aggregation, Transformation};

mod mssql;
mod postgres;

pub use mssql::MsSqlDialect;
pub use postgres::PostgresDialect;

/// Date components extracted by the simple date-part transformations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Day,
    Month,
    Year,
    Hour,
    Weekday,
}

impl DatePart {
    pub fn as_sql(self) -> &'static str {
        match self {
            DatePart::Day => "DAY",
            DatePart::Month => "MONTH",
            DatePart::Year => "YEAR",
            DatePart::Hour => "HOUR",
            DatePart::Weekday => "WEEKDAY",
        }
    }
}

pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn date_part(&self, part: DatePart, expr: &str) -> String;

    /// Start of the ISO week (Monday) containing `expr`.
    fn week_start(&self, expr: &str) -> String;

    fn concat(&self, parts: &[String]) -> String;

    fn cast_varchar(&self, expr: &str) -> String {
        format!("CAST({expr} AS VARCHAR)")
    }

    fn qualify_table(&self, schema: &str, table: &str) -> String {
        if schema.is_empty() {
            table.to_string()
        } else {
            format!("{schema}.{table}")
        }
    }

    /// Row-level transformation of `expr`.
    ///
    /// `First` is not an expression rewrite (the table is ranked in a derived
    /// table and filtered on `rn = 1`), so the value passes through unchanged here.
    fn render_transformation(&self, t: Transformation, expr: &str) -> String {
        match t {
            Transformation::NotNull => {
                format!("CASE WHEN {expr} IS NOT NULL THEN 1 ELSE 0 END")
            }
            Transformation::Day => self.date_part(DatePart::Day, expr),
            Transformation::Month => self.date_part(DatePart::Month, expr),
            Transformation::Year => self.date_part(DatePart::Year, expr),
            Transformation::Hour => self.date_part(DatePart::Hour, expr),
            Transformation::Weekday => self.date_part(DatePart::Weekday, expr),
            Transformation::Week => self.week_start(expr),
            Transformation::First => expr.to_string(),
            Transformation::Tens => {
                let lower = format!("(({expr})/10)*10");
                let upper = format!("{lower}+9");
                self.concat(&[
                    self.cast_varchar(&lower),
                    "'-'".to_string(),
                    self.cast_varchar(&upper),
                ])
            }
        }
    }

    fn render_aggregation(&self, agg: &Aggregation, expr: &str) -> String {
        match agg {
            Aggregation::Rows => format!("COUNT({expr})"),
            Aggregation::Count => format!("COUNT(DISTINCT {expr})"),
            Aggregation::Avg => format!("AVG({expr})"),
            Aggregation::Sum => format!("SUM({expr})"),
            Aggregation::Min => format!("MIN({expr})"),
            Aggregation::Max => format!("MAX({expr})"),
            Aggregation::Other(name) => {
                tracing::warn!(
                    aggregation = %name,
                    dialect = self.name(),
                    "aggregation outside the built-in set, rendering as a plain function call"
                );
                format!("{}({expr})", name.to_ascii_uppercase())
            }
        }
    }
}

/// Serializable dialect selector used by configuration and callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DialectKind {
    #[serde(rename = "mssql", alias = "msss", alias = "tsql")]
    MsSql,
    #[default]
    #[serde(rename = "postgres", alias = "postgresql")]
    Postgres,
}

static MSSQL: MsSqlDialect = MsSqlDialect;
static POSTGRES: PostgresDialect = PostgresDialect;

impl DialectKind {
    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            DialectKind::MsSql => &MSSQL,
            DialectKind::Postgres => &POSTGRES,
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dialect().name())
    }
}

impl FromStr for DialectKind {
    type Err = FieldsqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mssql" | "msss" | "tsql" => Ok(DialectKind::MsSql),
            "postgres" | "postgresql" => Ok(DialectKind::Postgres),
            other => Err(FieldsqlError::Config(format!("unknown dialect {other}"))),
        }
    }
}
