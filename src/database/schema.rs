//! Embedded schema bootstrap and version-gated migrations.
//!
//! `mt_internal_setting` carries one sentinel row `db_version`; a fresh
//! database is bootstrapped at the current version, an old one is
//! upgraded step by step, a newer one is refused.

pub const DB_VERSION: i64 = 5;

/// Bootstrap DDL for a fresh database, at schema version 5.
///
/// Three fixed rows seed the object tree: the `-1` sentinel every root
/// parent_id points at, the Root container (id 0) and the PC Directory
/// (id 1) under which physical filesystem objects live.
pub const CREATE_SQL: &str = r#"
CREATE TABLE mt_cds_object (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ref_id INTEGER DEFAULT NULL,
    parent_id INTEGER NOT NULL DEFAULT 0,
    object_type INTEGER NOT NULL,
    upnp_class TEXT DEFAULT NULL,
    dc_title TEXT DEFAULT NULL,
    dc_description TEXT DEFAULT NULL,
    location BLOB DEFAULT NULL,
    mime_type TEXT DEFAULT NULL,
    action TEXT DEFAULT NULL,
    state TEXT DEFAULT NULL,
    update_id INTEGER NOT NULL DEFAULT 0,
    searchable INTEGER NOT NULL DEFAULT 0,
    metadata BLOB DEFAULT NULL,
    auxdata BLOB DEFAULT NULL,
    resources BLOB DEFAULT NULL,
    track_number INTEGER DEFAULT NULL,
    service_id TEXT DEFAULT NULL,
    flags INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX mt_cds_object_ref_id ON mt_cds_object(ref_id);
CREATE INDEX mt_cds_object_parent_id ON mt_cds_object(parent_id, object_type, dc_title);
CREATE INDEX mt_cds_object_location ON mt_cds_object(location);
CREATE INDEX mt_cds_object_track_number ON mt_cds_object(track_number);
CREATE INDEX mt_cds_object_service_id ON mt_cds_object(service_id);

INSERT INTO mt_cds_object (id, parent_id, object_type, upnp_class, dc_title, flags)
    VALUES (-1, -1, 0, NULL, NULL, 9);
INSERT INTO mt_cds_object (id, parent_id, object_type, upnp_class, dc_title, flags)
    VALUES (0, -1, 1, 'object.container', 'Root', 9);
INSERT INTO mt_cds_object (id, parent_id, object_type, upnp_class, dc_title, flags)
    VALUES (1, 0, 1, 'object.container', 'PC Directory', 9);

CREATE TABLE mt_autoscan (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    obj_id INTEGER DEFAULT NULL REFERENCES mt_cds_object(id) ON DELETE CASCADE,
    scan_level TEXT NOT NULL,
    scan_mode TEXT NOT NULL,
    recursive INTEGER NOT NULL,
    hidden INTEGER NOT NULL,
    interval INTEGER DEFAULT NULL,
    last_modified INTEGER DEFAULT NULL,
    persistent INTEGER NOT NULL DEFAULT 0,
    location BLOB DEFAULT NULL,
    path_ids BLOB DEFAULT NULL,
    touched INTEGER NOT NULL DEFAULT 1
);
CREATE UNIQUE INDEX mt_autoscan_obj_id ON mt_autoscan(obj_id);

CREATE TABLE mt_metadata (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL REFERENCES mt_cds_object(id) ON DELETE CASCADE,
    property_name TEXT NOT NULL,
    property_value TEXT NOT NULL
);
CREATE INDEX mt_metadata_item_id ON mt_metadata(item_id);

CREATE TABLE mt_internal_setting (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
INSERT INTO mt_internal_setting (key, value) VALUES ('db_version', '5');
"#;

/// One migration step: statements upgrading from `version` to
/// `version + 1`, bounded by the version-update row. Each step is
/// idempotent DDL/DML.
pub struct Migration {
    pub from_version: i64,
    pub statements: &'static [&'static str],
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        from_version: 1,
        statements: &[
            "ALTER TABLE mt_cds_object ADD COLUMN dc_description TEXT DEFAULT NULL",
            "UPDATE mt_internal_setting SET value = '2' WHERE key = 'db_version'",
        ],
    },
    Migration {
        from_version: 2,
        statements: &[
            "ALTER TABLE mt_cds_object ADD COLUMN service_id TEXT DEFAULT NULL",
            "CREATE INDEX IF NOT EXISTS mt_cds_object_service_id ON mt_cds_object(service_id)",
            "ALTER TABLE mt_cds_object ADD COLUMN flags INTEGER NOT NULL DEFAULT 1",
            "UPDATE mt_internal_setting SET value = '3' WHERE key = 'db_version'",
        ],
    },
    Migration {
        from_version: 3,
        statements: &[
            "ALTER TABLE mt_cds_object ADD COLUMN track_number INTEGER DEFAULT NULL",
            "CREATE INDEX IF NOT EXISTS mt_cds_object_track_number ON mt_cds_object(track_number)",
            "UPDATE mt_internal_setting SET value = '4' WHERE key = 'db_version'",
        ],
    },
    Migration {
        from_version: 4,
        statements: &[
            // Metadata moves out of the per-object blob into normalized
            // rows; the blob column stays behind for old rows.
            "CREATE TABLE IF NOT EXISTS mt_metadata (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL REFERENCES mt_cds_object(id) ON DELETE CASCADE,
                property_name TEXT NOT NULL,
                property_value TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS mt_metadata_item_id ON mt_metadata(item_id)",
            "UPDATE mt_internal_setting SET value = '5' WHERE key = 'db_version'",
        ],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_cover_every_old_version() {
        let mut expected = 1;
        for migration in MIGRATIONS {
            assert_eq!(migration.from_version, expected);
            expected += 1;
        }
        assert_eq!(expected, DB_VERSION);
    }

    #[test]
    fn test_each_migration_bumps_the_version_row() {
        for migration in MIGRATIONS {
            let last = migration.statements.last().unwrap();
            assert!(last.contains("db_version"));
            assert!(last.contains(&format!("'{}'", migration.from_version + 1)));
        }
    }
}
