//! SQL Server (T-SQL) dialect implementation.

use super::{DatePart, Dialect};

#[derive(Debug, Default, Clone, Copy)]
pub struct MsSqlDialect;

impl Dialect for MsSqlDialect {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn date_part(&self, part: DatePart, expr: &str) -> String {
        match part {
            DatePart::Day | DatePart::Month | DatePart::Year => {
                format!("{}({expr})", part.as_sql())
            }
            DatePart::Hour => format!("DATEPART(HOUR, {expr})"),
            // ISO numbering (Monday = 1) whatever the session's DATEFIRST
            DatePart::Weekday => {
                format!("(DATEPART(WEEKDAY, {expr}) + @@DATEFIRST + 5) % 7 + 1")
            }
        }
    }

    fn week_start(&self, expr: &str) -> String {
        // Day 0 (1900-01-01) is a Monday; shifting by one day keeps Sundays
        // in the preceding week.
        format!("DATEADD(WEEK, DATEDIFF(WEEK, 0, DATEADD(DAY, -1, {expr})), 0)")
    }

    fn concat(&self, parts: &[String]) -> String {
        parts.join(" + ")
    }
}
