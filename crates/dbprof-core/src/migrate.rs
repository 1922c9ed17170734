use crate::meta::TableMeta;

/// Carry human-entered annotations from a previous snapshot into a fresh one.
///
/// Only annotation fields move: table display name, comment, tags and owner,
/// plus per-column display name, comment, tags and foreign-key notes. Columns
/// are matched by exact name; old columns without a match are dropped.
/// Statistics in `new` are never replaced, even when `old` has richer ones.
pub fn migrate_table_meta(old: Option<&TableMeta>, mut new: TableMeta) -> TableMeta {
    let Some(old) = old else {
        return new;
    };

    new.table_name_nls = old.table_name_nls.clone();
    new.comment = old.comment.clone();
    new.tags = old.tags.clone();
    new.owner = old.owner.clone();

    for column in &mut new.columns {
        let Some(previous) = old.column(&column.name) else {
            continue;
        };
        column.column_name_nls = previous.column_name_nls.clone();
        column.comment = previous.comment.clone();
        column.tags = previous.tags.clone();
        column.fk = previous.fk.clone();
        column.fk_ref = previous.fk_ref.clone();
    }

    new
}
