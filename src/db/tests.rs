use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{
    delete_account, delete_status, get_account, get_meta, get_status, list_reactions,
    load_runs, open_connection, purge_account_from_timeline, replace_reactions, replace_runs,
    set_status_flag, upsert_account, upsert_status, StatusFlag, StatusRecord,
    CURRENT_SCHEMA_VERSION,
};
use crate::entities::{Account, Reaction};
use crate::store::StoreError;
use crate::test_support::{account, status, status_with};

fn unique_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("fedicache-db-{}.sqlite", Uuid::now_v7()))
}

fn cleanup_db_files(path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
    }
}

fn open(path: &Path) -> Connection {
    open_connection(path, Duration::from_millis(1000), "digest").expect("connection should open")
}

fn table_exists(conn: &Connection, table_name: &str) -> bool {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
        params![table_name],
        |row| row.get(0),
    )
    .expect("table existence query should be readable")
}

fn save(conn: &Connection, author: &Account, record: &StatusRecord) {
    upsert_account(conn, author).expect("account should save");
    upsert_status(conn, record).expect("status should save");
}

#[test]
fn configures_connection_pragmas() {
    let path = unique_db_path();
    let conn = open(&path);

    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .expect("journal_mode pragma should be readable");
    assert_eq!(journal_mode.to_uppercase(), "WAL");

    let foreign_keys: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .expect("foreign_keys pragma should be readable");
    assert_eq!(foreign_keys, 1);

    let busy_timeout: i64 = conn
        .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
        .expect("busy_timeout pragma should be readable");
    assert_eq!(busy_timeout, 1000);

    drop(conn);
    cleanup_db_files(&path);
}

#[test]
fn migrations_apply_once_and_record_schema_version() {
    let path = unique_db_path();
    drop(open(&path));
    let conn = open(&path);

    let applied: i64 = conn
        .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
        .expect("migration count should be readable");
    assert_eq!(applied, CURRENT_SCHEMA_VERSION);
    assert_eq!(
        get_meta(&conn, "schema_version").expect("meta should read"),
        Some(CURRENT_SCHEMA_VERSION.to_string())
    );
    for table in ["account", "status", "timeline_entry", "filter_rule", "conversation"] {
        assert!(table_exists(&conn, table), "{table} should exist");
    }

    drop(conn);
    cleanup_db_files(&path);
}

#[test]
fn failed_migration_leaves_no_partial_schema() {
    let path = unique_db_path();
    {
        let conn = Connection::open(&path).expect("raw connection should open");
        conn.execute_batch("CREATE TABLE account (id TEXT PRIMARY KEY);")
            .expect("conflicting table should be created");
    }

    let err = open_connection(&path, Duration::from_millis(1000), "digest")
        .expect_err("conflicting schema should fail the open");
    assert!(matches!(err, StoreError::Migration { version: 1, .. }));

    let conn = Connection::open(&path).expect("raw connection should reopen");
    assert!(!table_exists(&conn, "schema_migrations"));
    assert!(!table_exists(&conn, "status"));

    drop(conn);
    cleanup_db_files(&path);
}

#[test]
fn status_without_account_violates_constraint() {
    let path = unique_db_path();
    let conn = open(&path);
    let record = StatusRecord::from_status(&status("1", "a"));

    let err: StoreError = upsert_status(&conn, &record)
        .expect_err("orphan status should be rejected")
        .into();
    assert!(matches!(err, StoreError::ConstraintViolation(_)));

    drop(conn);
    cleanup_db_files(&path);
}

#[test]
fn upsert_keeps_one_row_per_id() {
    let path = unique_db_path();
    let conn = open(&path);
    let first = status("1", "a");
    save(&conn, &first.account, &StatusRecord::from_status(&first));

    let mut edited = first.clone();
    edited.content = "<p>edited</p>".to_string();
    edited.favourites_count = 7;
    save(&conn, &edited.account, &StatusRecord::from_status(&edited));

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM status", [], |row| row.get(0))
        .expect("count should be readable");
    assert_eq!(count, 1);
    let stored = get_status(&conn, "1")
        .expect("status should read")
        .expect("status should exist");
    assert_eq!(stored.body.content, "<p>edited</p>");
    assert_eq!(stored.favourites_count, 7);

    drop(conn);
    cleanup_db_files(&path);
}

#[test]
fn moved_account_chain_is_reattached() {
    let path = unique_db_path();
    let conn = open(&path);
    let target = account("new");
    let mut old = account("old");
    old.moved = Some(Box::new(target.clone()));
    upsert_account(&conn, &target).expect("target should save");
    upsert_account(&conn, &old).expect("moved account should save");

    let loaded = get_account(&conn, "old")
        .expect("account should read")
        .expect("account should exist");
    assert_eq!(loaded.moved.as_deref().map(|moved| moved.id.as_str()), Some("new"));

    drop(conn);
    cleanup_db_files(&path);
}

#[test]
fn deleting_a_status_removes_reblogs_and_timeline_entries() {
    let path = unique_db_path();
    let conn = open(&path);
    let original = status("1", "a");
    let reblog = status_with(
        "2",
        "b",
        serde_json::json!({ "reblog": serde_json::to_value(&original).expect("status should encode") }),
    );
    save(&conn, &original.account, &StatusRecord::from_status(&original));
    save(&conn, &reblog.account, &StatusRecord::from_status(&reblog));
    replace_runs(
        &conn,
        "home",
        "status",
        &[vec!["2".to_string(), "1".to_string()]],
    )
    .expect("runs should save");
    replace_reactions(
        &conn,
        "1",
        &[Reaction {
            name: "👍".to_string(),
            count: 1,
            me: false,
            url: None,
            static_url: None,
        }],
    )
    .expect("reactions should save");

    assert_eq!(delete_status(&conn, "1").expect("delete should succeed"), 2);
    assert!(get_status(&conn, "2").expect("status should read").is_none());
    assert!(load_runs(&conn, "home").expect("runs should read").is_empty());
    assert!(list_reactions(&conn, "1").expect("reactions should read").is_empty());

    drop(conn);
    cleanup_db_files(&path);
}

#[test]
fn deleting_an_account_removes_its_statuses() {
    let path = unique_db_path();
    let conn = open(&path);
    let own = status("1", "a");
    let other = status("2", "b");
    save(&conn, &own.account, &StatusRecord::from_status(&own));
    save(&conn, &other.account, &StatusRecord::from_status(&other));

    assert_eq!(delete_account(&conn, "a").expect("delete should succeed"), 1);
    assert!(get_status(&conn, "1").expect("status should read").is_none());
    assert!(get_status(&conn, "2").expect("status should read").is_some());
    assert!(get_account(&conn, "a").expect("account should read").is_none());

    drop(conn);
    cleanup_db_files(&path);
}

#[test]
fn flag_updates_report_missing_rows_and_purge_keeps_rows() {
    let path = unique_db_path();
    let conn = open(&path);
    let first = status("1", "a");
    let second = status("2", "b");
    save(&conn, &first.account, &StatusRecord::from_status(&first));
    save(&conn, &second.account, &StatusRecord::from_status(&second));
    replace_runs(&conn, "home", "status", &[vec!["2".to_string(), "1".to_string()]])
        .expect("runs should save");

    assert_eq!(set_status_flag(&conn, "1", StatusFlag::Bookmarked, true).expect("update"), 1);
    assert_eq!(set_status_flag(&conn, "missing", StatusFlag::Bookmarked, true).expect("update"), 0);
    assert!(get_status(&conn, "1").expect("read").expect("exists").bookmarked);

    assert_eq!(purge_account_from_timeline(&conn, "home", "a").expect("purge"), 1);
    assert_eq!(load_runs(&conn, "home").expect("runs"), vec![vec!["2".to_string()]]);
    assert!(get_status(&conn, "1").expect("read").is_some());

    drop(conn);
    cleanup_db_files(&path);
}
