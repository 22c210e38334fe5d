use serde_json::json;

use super::Normalizer;
use crate::db;
use crate::entities::{FilterContext, Notification, Status};
use crate::store::StoreError;
use crate::test_support::{account_json, status, status_with, TempStore};

fn nested_quotes(depth: usize) -> Status {
    let mut value = json!({
        "id": "q0",
        "created_at": "2024-03-01T12:00:00Z",
        "account": account_json("a0"),
    });
    for level in 1..depth {
        value = json!({
            "id": format!("q{level}"),
            "created_at": "2024-03-01T12:00:00Z",
            "account": account_json(&format!("a{}", level % 3)),
            "quote": value,
        });
    }
    serde_json::from_value(value).expect("quote chain should decode")
}

#[test]
fn referenced_entities_are_saved_with_the_status() {
    let temp = TempStore::open("normalize-order");
    let mut moved_author = account_json("old");
    moved_author["moved"] = account_json("new");
    let quoted = status("10", "q");
    let original = status_with(
        "20",
        "o",
        json!({ "quote": serde_json::to_value(&quoted).expect("status should encode") }),
    );
    let reblog = status_with(
        "30",
        "old",
        json!({
            "account": moved_author,
            "reblog": serde_json::to_value(&original).expect("status should encode"),
        }),
    );

    let stats = temp
        .store
        .write(|tx| {
            let mut normalizer = Normalizer::new(tx, None);
            normalizer.save_status(&reblog)?;
            Ok(normalizer.stats())
        })
        .expect("graph should save");
    assert_eq!(stats.statuses, 3);
    assert_eq!(stats.accounts, 4);

    temp.store
        .read(|conn| {
            let row = db::get_status(conn, "30")?.expect("reblog should exist");
            assert_eq!(row.reblog_id.as_deref(), Some("20"));
            let inner = db::get_status(conn, "20")?.expect("reblogged status should exist");
            assert_eq!(inner.quote_id.as_deref(), Some("10"));
            let author = db::get_account(conn, "old")?.expect("author should exist");
            assert_eq!(author.moved.map(|moved| moved.id), Some("new".to_string()));
            Ok(())
        })
        .expect("read should succeed");
}

#[test]
fn duplicate_reactions_collapse_to_one_entry() {
    let temp = TempStore::open("normalize-reactions");
    let fixture = status_with(
        "1",
        "a",
        json!({
            "emoji_reactions": [
                { "name": "👍", "count": 2 },
                { "name": "👍", "count": 2 },
                { "name": "🎉", "count": 1 },
            ]
        }),
    );

    let stats = temp
        .store
        .write(|tx| {
            let mut normalizer = Normalizer::new(tx, None);
            normalizer.save_status(&fixture)?;
            Ok(normalizer.stats())
        })
        .expect("status should save");
    assert_eq!(stats.duplicate_reactions, 1);

    let names: Vec<String> = temp
        .store
        .read(|conn| Ok(db::list_reactions(conn, "1")?))
        .expect("reactions should read")
        .into_iter()
        .map(|reaction| reaction.name)
        .collect();
    assert_eq!(names, vec!["👍".to_string(), "🎉".to_string()]);
}

#[test]
fn deep_quote_chains_save_without_recursion() {
    let temp = TempStore::open("normalize-deep");
    let chain = nested_quotes(64);

    temp.store
        .write(|tx| Normalizer::new(tx, None).save_status(&chain))
        .expect("deep chain should save");

    temp.store
        .read(|conn| {
            let top = db::get_status(conn, "q63")?.expect("top should exist");
            assert_eq!(top.quote_id.as_deref(), Some("q62"));
            assert!(db::status_exists(conn, "q0")?);
            Ok(())
        })
        .expect("read should succeed");
}

#[test]
fn a_quote_cycle_is_rejected_and_nothing_is_kept() {
    let temp = TempStore::open("normalize-cycle");
    let inner = status_with("A", "a", json!({}));
    let middle = status_with(
        "B",
        "b",
        json!({ "quote": serde_json::to_value(&inner).expect("status should encode") }),
    );
    let outer = status_with(
        "A",
        "a",
        json!({ "quote": serde_json::to_value(&middle).expect("status should encode") }),
    );

    let result = temp
        .store
        .write(|tx| Normalizer::new(tx, None).save_status(&outer));
    assert!(matches!(result, Err(StoreError::ConstraintViolation(_))));

    temp.store
        .read(|conn| {
            assert!(!db::status_exists(conn, "A")?);
            assert!(!db::status_exists(conn, "B")?);
            assert!(db::get_account(conn, "a")?.is_none());
            Ok(())
        })
        .expect("read should succeed");
}

#[test]
fn a_status_repeated_in_one_batch_is_written_once() {
    let temp = TempStore::open("normalize-batch");
    let shared = status("1", "a");
    let reblog = status_with(
        "2",
        "b",
        json!({ "reblog": serde_json::to_value(&shared).expect("status should encode") }),
    );

    let stats = temp
        .store
        .write(|tx| {
            let mut normalizer = Normalizer::new(tx, None);
            normalizer.save_statuses(&[shared.clone(), reblog.clone()])?;
            Ok(normalizer.stats())
        })
        .expect("batch should save");
    assert_eq!(stats.statuses, 2);
    assert_eq!(stats.accounts, 2);
}

#[test]
fn server_filter_matches_are_recorded_per_context() {
    let temp = TempStore::open("normalize-filtered");
    let fixture = status_with(
        "1",
        "a",
        json!({ "filtered": [{ "filter": { "id": "f1" }, "keyword_matches": ["cats"] }] }),
    );

    temp.store
        .write(|tx| Normalizer::new(tx, Some(FilterContext::Home)).save_status(&fixture))
        .expect("status should save");

    temp.store
        .read(|conn| {
            assert_eq!(
                db::list_server_filter_matches(conn, "1", &FilterContext::Home)?,
                vec!["f1".to_string()]
            );
            assert!(db::list_server_filter_matches(conn, "1", &FilterContext::Public)?.is_empty());
            Ok(())
        })
        .expect("read should succeed");
}

#[test]
fn notifications_save_account_then_status_then_row() {
    let temp = TempStore::open("normalize-notification");
    let notification: Notification = serde_json::from_value(json!({
        "id": "n1",
        "type": "favourite",
        "created_at": "2024-03-01T12:00:00+02:00",
        "account": account_json("fan"),
        "status": serde_json::to_value(status("1", "me")).expect("status should encode"),
    }))
    .expect("notification should decode");

    let stats = temp
        .store
        .write(|tx| {
            let mut normalizer = Normalizer::new(tx, None);
            normalizer.save_notification(&notification)?;
            Ok(normalizer.stats())
        })
        .expect("notification should save");
    assert_eq!(stats.notifications, 1);
    assert_eq!(stats.statuses, 1);

    let row = temp
        .store
        .read(|conn| Ok(db::get_notification(conn, "n1")?))
        .expect("read should succeed")
        .expect("notification should exist");
    assert_eq!(row.account_id, "fan");
    assert_eq!(row.status_id.as_deref(), Some("1"));
    assert_eq!(row.created_at, "2024-03-01T10:00:00Z");
}
