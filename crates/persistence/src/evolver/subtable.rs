//! Subtable tables: one row per child record of an item attribute

use pim_sync_core::{ColumnType, EntityKind};

use super::{KindStrategy, Secondary, TableLayout, LANGUAGE_ID};
use crate::schema::PrimaryKey;

pub(super) static STRATEGY: KindStrategy = KindStrategy {
    kind: EntityKind::Subtable,
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
            ("ItemType", ColumnType::Text),
            (LANGUAGE_ID, ColumnType::BigInt),
            ("AttributeID", ColumnType::BigInt),
            ("SubtableID", ColumnType::BigInt),
            ("SortOrder", ColumnType::Int),
        ],
        PrimaryKey::new(
            &["ItemID"],
            &["ItemType", LANGUAGE_ID, "AttributeID", "SubtableID"],
        ),
    )
}
