//! Mapping tables: class to attribute association

use pim_sync_core::{ColumnType, EntityKind};

use super::{KindStrategy, Secondary, TableLayout};
use crate::schema::PrimaryKey;

pub(super) static STRATEGY: KindStrategy = KindStrategy {
    kind: EntityKind::Mapping,
    language_scoped: false,
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
            ("ClassID", ColumnType::BigInt),
            ("AttributeID", ColumnType::BigInt),
        ],
        PrimaryKey::new(&["ClassID"], &["AttributeID"]),
    )
}
