//! PostgreSQL dialect implementation.

use super::{DatePart, Dialect};

#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn date_part(&self, part: DatePart, expr: &str) -> String {
        match part {
            // ISO numbering: Monday = 1 .. Sunday = 7
            DatePart::Weekday => format!("EXTRACT(ISODOW FROM {expr})"),
            _ => format!("EXTRACT({} FROM {expr})", part.as_sql()),
        }
    }

    fn week_start(&self, expr: &str) -> String {
        format!("CAST({expr} AS DATE) - CAST(EXTRACT(ISODOW FROM {expr}) AS INT) + 1")
    }

    fn concat(&self, parts: &[String]) -> String {
        format!("CONCAT({})", parts.join(", "))
    }
}
