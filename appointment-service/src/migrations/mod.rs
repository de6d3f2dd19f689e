pub mod v1_schema;

pub use v1_schema::{is_migration_needed, migrate_to_v1, upgrade_fields, MigrationResult};
