//! Entity types synchronized by the field app

use serde::{Deserialize, Serialize};

use super::entity::{Entity, EntitySchema};

/// Work authorization issued for an area
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Authorization {
    pub number: String,
    pub holder: String,
    pub area: String,
    /// ISO date (`YYYY-MM-DD`)
    pub issued_on: Option<String>,
    pub valid_until: Option<String>,
}

impl Entity for Authorization {
    const SCHEMA: EntitySchema = EntitySchema {
        name: "authorization",
        table: "authorizations",
        endpoint: "/api/authorizations/",
        searchable_fields: &["number", "holder", "area"],
        date_field: Some("issued_on"),
    };
}

/// Measurement bulletin for one parameter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementBulletin {
    pub code: String,
    pub area: String,
    pub parameter: String,
    /// Reading as entered, kept as text so units and precision survive
    pub value: String,
    pub unit: String,
    pub measured_on: Option<String>,
}

impl Entity for MeasurementBulletin {
    const SCHEMA: EntitySchema = EntitySchema {
        name: "measurement_bulletin",
        table: "measurement_bulletins",
        endpoint: "/api/bulletins/",
        searchable_fields: &["code", "area", "parameter"],
        date_field: Some("measured_on"),
    };
}

/// Site survey
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Survey {
    pub title: String,
    pub area: String,
    pub surveyor: String,
    pub notes: String,
    pub surveyed_on: Option<String>,
}

impl Entity for Survey {
    const SCHEMA: EntitySchema = EntitySchema {
        name: "survey",
        table: "surveys",
        endpoint: "/api/surveys/",
        searchable_fields: &["title", "area", "surveyor"],
        date_field: Some("surveyed_on"),
    };
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecklistItem {
    pub label: String,
    pub checked: bool,
    pub remark: Option<String>,
}

/// Inspection checklist
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Checklist {
    pub title: String,
    pub area: String,
    pub inspector: String,
    pub items: Vec<ChecklistItem>,
    pub inspected_on: Option<String>,
}

impl Checklist {
    /// Number of items ticked off
    pub fn completed_items(&self) -> usize {
        self.items.iter().filter(|item| item.checked).count()
    }
}

impl Entity for Checklist {
    const SCHEMA: EntitySchema = EntitySchema {
        name: "checklist",
        table: "checklists",
        endpoint: "/api/checklists/",
        searchable_fields: &["title", "area", "inspector"],
        date_field: Some("inspected_on"),
    };
}

/// Quality report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityReport {
    pub reference: String,
    pub area: String,
    pub summary: String,
    pub reported_on: Option<String>,
}

impl Entity for QualityReport {
    const SCHEMA: EntitySchema = EntitySchema {
        name: "quality_report",
        table: "quality_reports",
        endpoint: "/api/quality-reports/",
        searchable_fields: &["reference", "area", "summary"],
        date_field: Some("reported_on"),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_schemas_validate() {
        Authorization::SCHEMA.validate().unwrap();
        MeasurementBulletin::SCHEMA.validate().unwrap();
        Survey::SCHEMA.validate().unwrap();
        Checklist::SCHEMA.validate().unwrap();
        QualityReport::SCHEMA.validate().unwrap();
    }

    #[test]
    fn decode_tolerates_missing_and_extra_keys() {
        let fields = serde_json::json!({
            "area": "North",
            "created_by": 7,
        });
        let serde_json::Value::Object(map) = fields else {
            unreachable!()
        };
        let survey = Survey::decode(map).unwrap();
        assert_eq!(survey.area, "North");
        assert!(survey.title.is_empty());
        assert_eq!(survey.surveyed_on, None);
    }

    #[test]
    fn encode_produces_flat_object() {
        let checklist = Checklist {
            title: "Scaffold".into(),
            items: vec![ChecklistItem {
                label: "Guard rails".into(),
                checked: true,
                remark: None,
            }],
            ..Checklist::default()
        };
        let map = checklist.encode().unwrap();
        assert_eq!(map["title"], "Scaffold");
        assert_eq!(map["items"][0]["checked"], true);
        assert!(!map.contains_key("id"));
        assert_eq!(checklist.completed_items(), 1);
    }
}
