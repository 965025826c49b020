//! Entity kinds and change records

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// Column name to loosely-typed value
pub type FieldMap = BTreeMap<String, Value>;

/// Language ID to the columns written for that language
pub type LanguageMap = BTreeMap<String, FieldMap>;

/// Fixed categories of exported data, each with its own table shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Item,
    Reference,
    Subtable,
    Mapping,
    Configuration,
    Language,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        Self::Item,
        Self::Reference,
        Self::Subtable,
        Self::Mapping,
        Self::Configuration,
        Self::Language,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Reference => "reference",
            Self::Subtable => "subtable",
            Self::Mapping => "mapping",
            Self::Configuration => "configuration",
            Self::Language => "language",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lowered)
            .ok_or_else(|| CoreError::UnknownEntityKind(s.to_string()))
    }
}

/// One entity as handed over by the upstream feed
///
/// Consumed once by the schema evolver and then dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_kind: EntityKind,
    /// Entity name the table is derived from (e.g. `Pdmarticle`)
    pub entity: String,
    #[serde(default)]
    pub primary_key_fields: FieldMap,
    #[serde(default)]
    pub language_scoped_attributes: LanguageMap,
}

impl EntityRecord {
    pub fn new(entity_kind: EntityKind, entity: impl Into<String>) -> Self {
        Self {
            entity_kind,
            entity: entity.into(),
            primary_key_fields: FieldMap::new(),
            language_scoped_attributes: LanguageMap::new(),
        }
    }

    pub fn with_key(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.primary_key_fields.insert(column.into(), value.into());
        self
    }

    pub fn with_attribute(
        mut self,
        language_id: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.language_scoped_attributes
            .entry(language_id.into())
            .or_default()
            .insert(column.into(), value.into());
        self
    }

    pub fn with_languages(mut self, languages: LanguageMap) -> Self {
        self.language_scoped_attributes = languages;
        self
    }

    /// Languages carried by this record, in ascending key order
    pub fn languages(&self) -> impl Iterator<Item = &String> {
        self.language_scoped_attributes.keys()
    }
}

/// Operation carried by a change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    #[default]
    Upsert,
    Delete,
}

/// A change event as delivered by the upstream feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(default)]
    pub op: ChangeOp,
    pub kind: EntityKind,
    pub entity: String,
    #[serde(default)]
    pub keys: FieldMap,
    #[serde(default)]
    pub languages: LanguageMap,
}

impl ChangeEvent {
    /// Parse one event from a JSON line
    pub fn from_json(line: &str) -> Result<Self, CoreError> {
        let event: ChangeEvent =
            serde_json::from_str(line).map_err(|e| CoreError::InvalidEvent(e.to_string()))?;
        if event.entity.trim().is_empty() {
            return Err(CoreError::InvalidEvent("entity name is empty".to_string()));
        }
        Ok(event)
    }

    pub fn into_record(self) -> EntityRecord {
        EntityRecord {
            entity_kind: self.kind,
            entity: self.entity,
            primary_key_fields: self.keys,
            language_scoped_attributes: self.languages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_kind_parsing() {
        assert_eq!("Item".parse::<EntityKind>().unwrap(), EntityKind::Item);
        assert_eq!(
            " configuration ".parse::<EntityKind>().unwrap(),
            EntityKind::Configuration
        );
        assert!("workflow".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_record_builder() {
        let record = EntityRecord::new(EntityKind::Item, "Pdmarticle")
            .with_key("ID", 42)
            .with_attribute("1", "Label", "Bolt")
            .with_attribute("2", "Label", "Schraube");

        assert_eq!(record.primary_key_fields["ID"], json!(42));
        assert_eq!(record.languages().count(), 2);
        assert_eq!(record.language_scoped_attributes["2"]["Label"], json!("Schraube"));
    }

    #[test]
    fn test_change_event_from_json() {
        let line = r#"{"kind":"item","entity":"Pdmarticle","keys":{"ID":7},"languages":{"1":{"Label":"x"}}}"#;
        let event = ChangeEvent::from_json(line).unwrap();
        assert_eq!(event.op, ChangeOp::Upsert);
        assert_eq!(event.kind, EntityKind::Item);

        let record = event.into_record();
        assert_eq!(record.entity, "Pdmarticle");
        assert_eq!(record.primary_key_fields["ID"], json!(7));
    }

    #[test]
    fn test_change_event_rejects_empty_entity() {
        let line = r#"{"op":"delete","kind":"language","entity":""}"#;
        assert!(ChangeEvent::from_json(line).is_err());
    }
}
