use std::path::Path;
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::store::StoreError;

mod content;
mod filters;
mod timeline;

pub use content::*;
pub use filters::*;
pub use timeline::*;

pub const CURRENT_SCHEMA_VERSION: i64 = 3;
pub const STORAGE_KEY_META: &str = "storage_key_sha256";

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: [Migration; 3] = [
    Migration {
        version: 1,
        name: "content_schema_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE account (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL,
    acct TEXT NOT NULL,
    display_name TEXT NOT NULL,
    moved_id TEXT REFERENCES account(id) ON DELETE SET NULL,
    payload TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE status (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    account_id TEXT NOT NULL REFERENCES account(id),
    in_reply_to_id TEXT,
    reblog_id TEXT REFERENCES status(id) ON DELETE CASCADE,
    quote_id TEXT REFERENCES status(id) ON DELETE SET NULL,
    visibility TEXT NOT NULL,
    favourited INTEGER NOT NULL DEFAULT 0,
    reblogged INTEGER NOT NULL DEFAULT 0,
    muted INTEGER NOT NULL DEFAULT 0,
    bookmarked INTEGER NOT NULL DEFAULT 0,
    pinned INTEGER,
    reblogs_count INTEGER NOT NULL DEFAULT 0,
    favourites_count INTEGER NOT NULL DEFAULT 0,
    replies_count INTEGER NOT NULL DEFAULT 0,
    poll TEXT,
    body TEXT NOT NULL
);

CREATE TABLE status_reaction (
    status_id TEXT NOT NULL REFERENCES status(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    position INTEGER NOT NULL,
    count INTEGER NOT NULL DEFAULT 0,
    me INTEGER NOT NULL DEFAULT 0,
    url TEXT,
    static_url TEXT,
    PRIMARY KEY (status_id, name)
);

CREATE TABLE notification (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    created_at TEXT NOT NULL,
    account_id TEXT NOT NULL REFERENCES account(id) ON DELETE CASCADE,
    status_id TEXT REFERENCES status(id) ON DELETE CASCADE
);

CREATE TABLE timeline_entry (
    timeline_id TEXT NOT NULL,
    run INTEGER NOT NULL,
    position INTEGER NOT NULL,
    item_kind TEXT NOT NULL,
    item_id TEXT NOT NULL,
    PRIMARY KEY (timeline_id, item_id)
);

CREATE TABLE timeline_cursor (
    timeline_id TEXT PRIMARY KEY,
    next_max_id TEXT
);

CREATE TRIGGER status_delete_timeline_entries AFTER DELETE ON status
BEGIN
    DELETE FROM timeline_entry WHERE item_kind = 'status' AND item_id = OLD.id;
END;

CREATE TRIGGER notification_delete_timeline_entries AFTER DELETE ON notification
BEGIN
    DELETE FROM timeline_entry WHERE item_kind = 'notification' AND item_id = OLD.id;
END;

CREATE INDEX idx_status_in_reply_to ON status(in_reply_to_id);
CREATE INDEX idx_status_account ON status(account_id);
CREATE INDEX idx_status_reblog ON status(reblog_id);
CREATE INDEX idx_notification_status ON notification(status_id);
CREATE INDEX idx_timeline_entry_order ON timeline_entry(timeline_id, run, position);
CREATE INDEX idx_timeline_entry_item ON timeline_entry(item_kind, item_id);
"#,
    },
    Migration {
        version: 2,
        name: "filters_v1",
        sql: r#"
CREATE TABLE filter_rule (
    id TEXT PRIMARY KEY,
    filter_id TEXT NOT NULL,
    phrase TEXT NOT NULL,
    whole_word INTEGER NOT NULL DEFAULT 0,
    contexts TEXT NOT NULL,
    expires_at TEXT,
    action TEXT NOT NULL
);

CREATE TABLE status_filter_match (
    status_id TEXT NOT NULL REFERENCES status(id) ON DELETE CASCADE,
    context TEXT NOT NULL,
    filter_id TEXT NOT NULL,
    PRIMARY KEY (status_id, context, filter_id)
);

CREATE TABLE show_anyway (
    status_id TEXT NOT NULL REFERENCES status(id) ON DELETE CASCADE,
    context TEXT NOT NULL,
    PRIMARY KEY (status_id, context)
);

CREATE INDEX idx_filter_rule_filter ON filter_rule(filter_id);
"#,
    },
    Migration {
        version: 3,
        name: "pins_and_conversations_v1",
        sql: r#"
CREATE TABLE pinned_status (
    account_id TEXT NOT NULL REFERENCES account(id) ON DELETE CASCADE,
    status_id TEXT NOT NULL REFERENCES status(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    PRIMARY KEY (account_id, status_id)
);

CREATE TABLE conversation (
    id TEXT PRIMARY KEY,
    unread INTEGER NOT NULL DEFAULT 0,
    last_status_id TEXT REFERENCES status(id) ON DELETE SET NULL
);

CREATE TABLE conversation_account (
    conversation_id TEXT NOT NULL REFERENCES conversation(id) ON DELETE CASCADE,
    account_id TEXT NOT NULL REFERENCES account(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    PRIMARY KEY (conversation_id, account_id)
);

CREATE TRIGGER conversation_delete_timeline_entries AFTER DELETE ON conversation
BEGIN
    DELETE FROM timeline_entry WHERE item_kind = 'conversation' AND item_id = OLD.id;
END;
"#,
    },
];

/// Opens the writer connection. Pending migrations and the storage-key check
/// run in one transaction, so a failure of either leaves the file exactly as
/// it was before the call. A fresh file records `storage_key_digest`.
pub fn open_connection(
    path: &Path,
    busy_timeout: Duration,
    storage_key_digest: &str,
) -> Result<Connection, StoreError> {
    let mut conn = Connection::open(path)?;
    configure(&conn, busy_timeout)?;
    apply_migrations(&mut conn, path, storage_key_digest)?;
    Ok(conn)
}

/// Reader connections never migrate; they are opened after the writer.
pub fn open_reader(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn, busy_timeout)?;
    Ok(conn)
}

fn configure(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.pragma_update(None::<DatabaseName>, "journal_mode", "WAL")?;
    conn.pragma_update(None::<DatabaseName>, "synchronous", "NORMAL")?;
    conn.pragma_update(None::<DatabaseName>, "foreign_keys", "ON")?;
    conn.pragma_update(None::<DatabaseName>, "temp_store", "MEMORY")?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

fn apply_migrations(
    conn: &mut Connection,
    path: &Path,
    storage_key_digest: &str,
) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
"#,
    )?;

    for migration in MIGRATIONS {
        let already_applied: Option<i64> = tx
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get(0),
            )
            .optional()?;

        if already_applied.is_some() {
            continue;
        }

        tx.execute_batch(migration.sql)
            .map_err(|source| StoreError::Migration {
                version: migration.version,
                name: migration.name,
                source,
            })?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, now_utc_rfc3339()],
        )?;
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "applied store migration"
        );
    }

    tx.execute(
        r#"
INSERT INTO meta (key, value)
VALUES ('schema_version', ?1)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    match get_meta(&tx, STORAGE_KEY_META)? {
        Some(existing) if existing == storage_key_digest => {}
        Some(_) => return Err(StoreError::KeyMismatch(path.to_path_buf())),
        None => set_meta(&tx, STORAGE_KEY_META, storage_key_digest)?,
    }

    tx.commit()?;
    Ok(())
}

pub fn now_utc_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .expect("RFC3339 formatting for UTC timestamp should never fail")
}

pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO meta (key, value)
VALUES (?1, ?2)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![key, value],
    )?;
    Ok(())
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
}

pub(crate) fn from_json<T: DeserializeOwned>(column: usize, raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err)))
}

#[cfg(test)]
mod tests;
