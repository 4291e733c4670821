use crate::dialect::Dialect;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlExpr {
    /// Pre-rendered SQL text, e.g. a field template after alias substitution.
    Raw(String),
    Column {
        table: Option<String>,
        name: String,
    },
    Eq(Box<SqlExpr>, Box<SqlExpr>),
}

impl SqlExpr {
    pub fn column(table: &str, name: &str) -> Self {
        SqlExpr::Column {
            table: (!table.is_empty()).then(|| table.to_string()),
            name: name.to_string(),
        }
    }

    pub fn eq(left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::Eq(Box::new(left), Box::new(right))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectItem {
    pub expr: SqlExpr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableFactor {
    Named { schema: String, name: String },
    /// Raw SQL rendered as a parenthesized derived table.
    Subquery(String),
}

impl Default for TableFactor {
    fn default() -> Self {
        TableFactor::Named {
            schema: String::new(),
            name: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRef {
    pub factor: TableFactor,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlJoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub join_type: SqlJoinType,
    pub table: TableRef,
    pub on: Vec<SqlExpr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonTableExpr {
    pub name: String,
    pub query: Box<SelectQuery>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectQuery {
    pub with: Vec<CommonTableExpr>,
    pub select: Vec<SelectItem>,
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub filters: Vec<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
}

const SELECT_INDENT: &str = "       ";
const CTE_INDENT: &str = "    ";

pub struct SqlRenderer<'d> {
    dialect: &'d dyn Dialect,
}

impl<'d> SqlRenderer<'d> {
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        Self { dialect }
    }

    /// Render a full statement. Empty clauses are omitted.
    pub fn render_select(&self, query: &SelectQuery) -> String {
        let mut lines: Vec<String> = Vec::new();

        if !query.with.is_empty() {
            let blocks: Vec<String> = query
                .with
                .iter()
                .map(|cte| {
                    let body = indent(&self.render_select(&cte.query), CTE_INDENT);
                    format!("{} AS (\n{body}\n)", cte.name)
                })
                .collect();
            lines.push(format!("WITH {}", blocks.join(",\n")));
        }

        let select_items: Vec<String> = query
            .select
            .iter()
            .map(|item| {
                let expr_sql = self.render_expr(&item.expr);
                match &item.alias {
                    Some(alias) => format!("{expr_sql} AS {alias}"),
                    None => expr_sql,
                }
            })
            .collect();
        lines.push(format!(
            "SELECT {}",
            select_items.join(&format!(",\n{SELECT_INDENT}"))
        ));
        lines.push(format!("FROM {}", self.render_table_ref(&query.from)));

        for join in &query.joins {
            let join_kw = match join.join_type {
                SqlJoinType::Inner => "JOIN",
                SqlJoinType::Left => "LEFT JOIN",
            };
            let on_clause: Vec<String> = join.on.iter().map(|e| self.render_expr(e)).collect();
            lines.push(format!(
                "{join_kw} {} ON {}",
                self.render_table_ref(&join.table),
                on_clause.join(" AND ")
            ));
        }

        if !query.filters.is_empty() {
            let filters: Vec<String> = query
                .filters
                .iter()
                .map(|f| format!("({})", self.render_expr(f)))
                .collect();
            lines.push(format!("WHERE {}", filters.join("\n  AND ")));
        }

        if !query.group_by.is_empty() {
            let groups: Vec<String> = query.group_by.iter().map(|g| self.render_expr(g)).collect();
            lines.push(format!("GROUP BY {}", groups.join(", ")));
        }

        lines.join("\n")
    }

    fn render_table_ref(&self, table: &TableRef) -> String {
        let factor = match &table.factor {
            TableFactor::Named { schema, name } => self.dialect.qualify_table(schema, name),
            TableFactor::Subquery(sql) => format!("({})", sql.trim()),
        };
        match &table.alias {
            Some(alias) if !alias.is_empty() => format!("{factor} {alias}"),
            _ => factor,
        }
    }

    fn render_expr(&self, expr: &SqlExpr) -> String {
        match expr {
            SqlExpr::Raw(sql) => sql.clone(),
            SqlExpr::Column { table, name } => match table {
                Some(t) => format!("{t}.{name}"),
                None => name.clone(),
            },
            SqlExpr::Eq(left, right) => {
                format!("{} = {}", self.render_expr(left), self.render_expr(right))
            }
        }
    }
}

fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
