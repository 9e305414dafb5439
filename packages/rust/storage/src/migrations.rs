//! SQL migration definitions for the Prospector cache database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: registry_cache",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per resolved identifier
CREATE TABLE IF NOT EXISTS registry_cache (
    cnpj             TEXT PRIMARY KEY,
    payload_json     TEXT NOT NULL,
    status           TEXT NOT NULL,
    source           TEXT NOT NULL,
    fetched_at       TEXT NOT NULL,
    expires_at       TEXT NOT NULL,
    hit_count        INTEGER NOT NULL DEFAULT 0,
    last_accessed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_registry_cache_expires ON registry_cache(expires_at);
CREATE INDEX IF NOT EXISTS idx_registry_cache_status ON registry_cache(status);

INSERT OR IGNORE INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
