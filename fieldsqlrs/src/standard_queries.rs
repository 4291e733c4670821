//! Canned queries stored as JSON.
//!
//! ```json
//! {
//!   "Distribution of Sex": [["Person", null, "count"], ["Sex", null, null, true]]
//! }
//! ```
//!
//! Each entry is `[field, transformation, aggregation, lookup?]`, naming the
//! field as in the catalog. The first entry is the primary field.

use std::path::Path;

use serde_json::Value;

use crate::error::{FieldsqlError, Result};
use crate::fields::Aggregation;
use crate::registry::{FieldRequest, QueryRequest};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StandardQueries {
    queries: Vec<(String, QueryRequest)>,
}

impl StandardQueries {
    pub fn from_json(json: &str) -> Result<Self> {
        let root: serde_json::Map<String, Value> = serde_json::from_str(json)?;
        let mut queries = Vec::with_capacity(root.len());
        for (name, entries) in root {
            let request = parse_query(&name, &entries)?;
            queries.push((name, request));
        }
        Ok(Self { queries })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&contents)
    }

    /// Query names in file order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.queries.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&QueryRequest> {
        self.queries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, request)| request)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryRequest)> {
        self.queries.iter().map(|(n, r)| (n.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

fn parse_query(name: &str, entries: &Value) -> Result<QueryRequest> {
    let entries = entries
        .as_array()
        .ok_or_else(|| invalid(name, "expected a list of field tuples"))?;
    if entries.is_empty() {
        return Err(invalid(name, "at least one field is required"));
    }
    let fields = entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| parse_tuple(name, entry, idx == 0))
        .collect::<Result<Vec<_>>>()?;
    Ok(QueryRequest::new(fields))
}

fn parse_tuple(name: &str, entry: &Value, primary: bool) -> Result<FieldRequest> {
    let items = entry
        .as_array()
        .filter(|items| (3..=4).contains(&items.len()))
        .ok_or_else(|| {
            invalid(
                name,
                &format!("expected [field, transformation, aggregation, lookup?], got {entry}"),
            )
        })?;
    let field = items[0]
        .as_str()
        .ok_or_else(|| invalid(name, "field name must be a string"))?;
    let transformation = optional_str(name, &items[1])?;
    let aggregation = optional_str(name, &items[2])?;
    let lookup = match items.get(3) {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(other) => return Err(invalid(name, &format!("lookup flag must be a bool, got {other}"))),
    };

    Ok(FieldRequest {
        field: field.to_string(),
        transformation: transformation.map(str::to_string),
        aggregation: aggregation.map(Aggregation::from),
        lookup,
        primary: Some(primary),
    })
}

fn optional_str<'a>(name: &str, value: &'a Value) -> Result<Option<&'a str>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.as_str())),
        other => Err(invalid(name, &format!("expected a string or null, got {other}"))),
    }
}

fn invalid(name: &str, message: &str) -> FieldsqlError {
    FieldsqlError::Validation(format!("standard query '{name}': {message}"))
}
