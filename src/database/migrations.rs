//! Database migrations for popularity-sync
//!
//! This module contains SQL migrations for the SQLite database schema.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
-- Content records (projected view of the document store)
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    record_type TEXT NOT NULL,
    locale TEXT NOT NULL,
    published INTEGER NOT NULL DEFAULT 1,
    public_url TEXT,
    popularity_metrics TEXT NOT NULL DEFAULT '{}',
    popularity_score REAL NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_records_partition ON records(record_type, locale, id);

-- Resume state per (record type, locale, provider)
CREATE TABLE IF NOT EXISTS sync_progress (
    record_type TEXT NOT NULL,
    locale TEXT NOT NULL,
    provider TEXT NOT NULL,
    cursor TEXT,
    status TEXT NOT NULL DEFAULT 'in_progress',
    error_message TEXT,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (record_type, locale, provider)
);
"#;
