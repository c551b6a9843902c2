use redb::TableDefinition;

use super::models::RecordKind;

/// Upload records: uuid -> JSON-encoded `Record::Upload`
pub const UPLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("uploads");

/// Form records: uuid -> JSON-encoded `Record::Form`
pub const FORMS: TableDefinition<&str, &[u8]> = TableDefinition::new("forms");

/// Table holding records of the given kind.
pub fn table_for(kind: RecordKind) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match kind {
        RecordKind::Upload => UPLOADS,
        RecordKind::Form => FORMS,
    }
}
