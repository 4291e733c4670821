use thiserror::Error;

pub type Result<T> = std::result::Result<T, FieldsqlError>;

#[derive(Debug, Error)]
pub enum FieldsqlError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unknown transformation: {0}")]
    UnknownTransformation(String),
    #[error("invalid transformation context: {0}")]
    InvalidTransformContext(String),
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
    #[error("no common key between {table} and {other}")]
    NoCommonKey { table: String, other: String },
    #[error("disconnected schema: no join path from {from} to any of [{to}]")]
    DisconnectedSchema { from: String, to: String },
    #[error("no primary field selected: exactly one field must define the output grain")]
    NoPrimaryField,
    #[error("multiple primary fields selected: {}", .0.join(", "))]
    MultiplePrimaryFields(Vec<String>),
    #[error("field {field} cannot look up values in CTE {table}")]
    UnsupportedCteLookup { field: String, table: String },
    #[error("empty selection: at least one field is required")]
    EmptySelection,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
