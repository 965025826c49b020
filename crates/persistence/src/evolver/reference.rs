//! Reference tables: one row per link from an item to a target

use pim_sync_core::{ColumnType, EntityKind};

use super::{KindStrategy, Secondary, TableLayout, LANGUAGE_ID};
use crate::schema::PrimaryKey;

pub(super) static STRATEGY: KindStrategy = KindStrategy {
    kind: EntityKind::Reference,
    language_scoped: true,
    fixed_shape: false,
    layout,
    meta_columns: &[],
    stamp: super::no_stamp,
    secondary: Secondary::None,
    cascade: super::no_cascade,
};

fn layout(_entity: &str) -> TableLayout {
    TableLayout::new(
        &[
            ("ItemID", ColumnType::BigInt),
            ("SourceType", ColumnType::Text),
            (LANGUAGE_ID, ColumnType::BigInt),
            ("AttributeID", ColumnType::BigInt),
            ("TargetID", ColumnType::BigInt),
            ("TargetType", ColumnType::Text),
            ("SortOrder", ColumnType::Int),
        ],
        PrimaryKey::new(
            &["ItemID"],
            &["SourceType", LANGUAGE_ID, "AttributeID", "TargetID"],
        ),
    )
}
