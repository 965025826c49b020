//! Table, view and index names derived from entity names

use pim_sync_core::EntityKind;

use crate::schema::table_ident;

/// Suffix of structure (view) entities, which share their base entity's tables
const STRUCTURE_SUFFIX: &str = "structure";
const RECORD_SUFFIX: &str = "record";
const WORKFLOW_ENTITY: &str = "workflow";

/// The single language table
pub const LANGUAGE_TABLE: &str = "language";

/// Entity name without a trailing `structure`, case preserved
pub fn base_entity_name(entity: &str) -> &str {
    let entity = entity.trim();
    let split = entity.len().saturating_sub(STRUCTURE_SUFFIX.len());
    match (entity.get(..split), entity.get(split..)) {
        (Some(base), Some(suffix)) if !base.is_empty() && suffix.eq_ignore_ascii_case(STRUCTURE_SUFFIX) => base,
        _ => entity,
    }
}

/// Physical table of `entity` for `kind`
pub fn table_name(kind: EntityKind, entity: &str) -> String {
    let base = base_entity_name(entity);
    match kind {
        EntityKind::Item => table_ident(base),
        EntityKind::Language => LANGUAGE_TABLE.to_string(),
        other => table_ident(&format!("{}_{}", base, other.as_str())),
    }
}

/// Key of a header in the schema header document: `<kind>:<Entity>`
pub fn header_key(kind: EntityKind, entity: &str) -> String {
    format!("{}:{}", kind, base_entity_name(entity))
}

pub fn parse_header_key(key: &str) -> Option<(EntityKind, String)> {
    let (kind, entity) = key.split_once(':')?;
    let kind = kind.parse().ok()?;
    let entity = entity.trim();
    if entity.is_empty() {
        return None;
    }
    Some((kind, entity.to_string()))
}

/// Record-like entities are keyed by `(ID, StateID)` instead of by language
pub fn is_record_entity(entity: &str) -> bool {
    base_entity_name(entity)
        .to_ascii_lowercase()
        .ends_with(RECORD_SUFFIX)
}

/// Configuration entity holding workflow states
pub fn is_workflow(entity: &str) -> bool {
    base_entity_name(entity).eq_ignore_ascii_case(WORKFLOW_ENTITY)
}

/// Materialized view of `table` keyed by `field`
pub fn view_name(table: &str, field: &str) -> String {
    table_ident(&format!("{}_by_{}", table, field))
}

pub fn index_name(table: &str, field: &str) -> String {
    table_ident(&format!("{}_{}_idx", table, field))
}

pub fn text_index_name(table: &str, field: &str) -> String {
    table_ident(&format!("{}_{}_sasi", table, field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_suffix_is_stripped_for_every_kind() {
        assert_eq!(base_entity_name("Pdmarticlestructure"), "Pdmarticle");
        assert_eq!(base_entity_name("PdmarticleStructure"), "Pdmarticle");
        assert_eq!(base_entity_name("Structure"), "Structure");
        assert_eq!(base_entity_name("Pdmarticle"), "Pdmarticle");

        assert_eq!(table_name(EntityKind::Item, "Pdmarticlestructure"), "pdmarticle");
        assert_eq!(
            table_name(EntityKind::Mapping, "Pdmarticlestructure"),
            "pdmarticle_mapping"
        );
        assert_eq!(
            table_name(EntityKind::Configuration, "Pdmarticlestructure"),
            "pdmarticle_configuration"
        );
        assert_eq!(
            table_name(EntityKind::Item, "Pdmarticlestructure"),
            table_name(EntityKind::Item, "Pdmarticle")
        );
    }

    #[test]
    fn test_table_names() {
        assert_eq!(table_name(EntityKind::Reference, "Pdmarticle"), "pdmarticle_reference");
        assert_eq!(table_name(EntityKind::Subtable, "Mamfile"), "mamfile_subtable");
        assert_eq!(table_name(EntityKind::Language, "anything"), "language");
    }

    #[test]
    fn test_header_key_round_trip() {
        let key = header_key(EntityKind::Item, "Pdmarticlestructure");
        assert_eq!(key, "item:Pdmarticle");
        assert_eq!(
            parse_header_key(&key),
            Some((EntityKind::Item, "Pdmarticle".to_string()))
        );
        assert_eq!(parse_header_key("item:"), None);
        assert_eq!(parse_header_key("nothing"), None);
        assert_eq!(parse_header_key("widget:Pdmarticle"), None);
    }

    #[test]
    fn test_entity_classes() {
        assert!(is_record_entity("Pricerecord"));
        assert!(is_record_entity("PriceRecordStructure"));
        assert!(!is_record_entity("Pdmarticle"));
        assert!(is_workflow("Workflow"));
        assert!(!is_workflow("Workflowstate"));
    }

    #[test]
    fn test_object_names() {
        assert_eq!(view_name("pdmarticle", "StateID"), "pdmarticle_by_stateid");
        assert_eq!(index_name("language", "IsDefault"), "language_isdefault_idx");
        assert_eq!(text_index_name("pdmarticle", "_Path"), "pdmarticle__path_sasi");
    }
}
