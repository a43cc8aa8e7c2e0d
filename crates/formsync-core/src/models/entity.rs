//! Entity schema descriptor and the capability trait every synced type implements

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::util::is_sql_identifier;

/// Static description of one entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitySchema {
    /// Human-readable name used in logs and the conflict/rejection logs
    pub name: &'static str,
    /// Local table name
    pub table: &'static str,
    /// Remote collection path, e.g. `/api/surveys/`
    pub endpoint: &'static str,
    /// Payload keys matched by the text filter
    pub searchable_fields: &'static [&'static str],
    /// Payload key holding the entity's natural date, used for ordering
    pub date_field: Option<&'static str>,
}

impl EntitySchema {
    /// Check that every name spliced into SQL is a plain identifier.
    pub fn validate(&self) -> Result<()> {
        if !is_sql_identifier(self.table) {
            return Err(Error::InvalidInput(format!(
                "{}: invalid table name '{}'",
                self.name, self.table
            )));
        }
        if let Some(field) = self
            .searchable_fields
            .iter()
            .chain(self.date_field.iter())
            .find(|field| !is_sql_identifier(field))
        {
            return Err(Error::InvalidInput(format!(
                "{}: invalid field name '{field}'",
                self.name
            )));
        }
        if !self.endpoint.starts_with('/') || !self.endpoint.ends_with('/') {
            return Err(Error::InvalidInput(format!(
                "{}: endpoint '{}' must start and end with '/'",
                self.name, self.endpoint
            )));
        }
        Ok(())
    }
}

/// A domain payload the engine can store locally and exchange with the remote.
///
/// The default `encode`/`decode` go through serde; override them when the
/// wire shape differs from the Rust shape.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const SCHEMA: EntitySchema;

    /// Encode as a flat JSON object (no identity keys).
    fn encode(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(Error::InvalidInput(format!(
                "{} must encode to a JSON object, got {other}",
                Self::SCHEMA.name
            ))),
        }
    }

    /// Decode from a flat JSON object.
    fn decode(fields: Map<String, Value>) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(fields))?)
    }

    /// Remote collection path.
    fn endpoint() -> &'static str {
        Self::SCHEMA.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: EntitySchema = EntitySchema {
        name: "survey",
        table: "surveys",
        endpoint: "/api/surveys/",
        searchable_fields: &["title", "area"],
        date_field: Some("surveyed_on"),
    };

    #[test]
    fn valid_schema_passes() {
        VALID.validate().unwrap();
    }

    #[test]
    fn rejects_unsafe_table_and_field_names() {
        let bad_table = EntitySchema {
            table: "surveys; DROP",
            ..VALID
        };
        assert!(bad_table.validate().is_err());

        let bad_field = EntitySchema {
            searchable_fields: &["title", "a.b"],
            ..VALID
        };
        assert!(bad_field.validate().is_err());

        let bad_date = EntitySchema {
            date_field: Some("date')"),
            ..VALID
        };
        assert!(bad_date.validate().is_err());
    }

    #[test]
    fn rejects_endpoint_without_slashes() {
        let schema = EntitySchema {
            endpoint: "api/surveys",
            ..VALID
        };
        assert!(schema.validate().is_err());
    }
}
