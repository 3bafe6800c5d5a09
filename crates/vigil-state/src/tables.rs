//! redb table definitions for the Vigil state store.

use redb::TableDefinition;

/// Task records (with their status history) keyed by task id.
pub const TASKS: TableDefinition<&str, &[u8]> = TableDefinition::new("tasks");
