use std::sync::mpsc;
use std::time::Duration;

use serde_json::json;
use time::macros::datetime;

use super::{Engine, EngineError, EngineOptions, EntityKind};
use crate::capability::{CapabilityError, CapabilityMode, Operation, ServerDescriptor};
use crate::collection::{CollectionItem, CollectionSection};
use crate::db::StatusFlag;
use crate::entities::{Context, FilterContext, FilterPayload, Notification};
use crate::events::CollectionEventKind;
use crate::reactive::Delivery;
use crate::test_support::{account_json, ids, reply, status, status_with, TempStore};
use crate::timeline::{PageAnchor, TimelineKey};

fn engine(temp: &TempStore, mode: CapabilityMode) -> Engine {
    Engine::new(
        std::sync::Arc::clone(&temp.store),
        EngineOptions {
            capability_mode: mode,
            ..EngineOptions::default()
        },
    )
    .with_fixed_now(datetime!(2024-03-02 00:00 UTC))
}

fn status_ids(section: &CollectionSection) -> Vec<String> {
    section
        .items
        .iter()
        .filter_map(|item| match item {
            CollectionItem::Status { status, .. } => Some(status.id().to_string()),
            _ => None,
        })
        .collect()
}

fn filter(id: &str, action: &str, keywords: &[&str]) -> FilterPayload {
    let keywords: Vec<_> = keywords
        .iter()
        .map(|keyword| json!({ "keyword": keyword, "whole_word": true }))
        .collect();
    serde_json::from_value(json!({
        "id": id,
        "title": id,
        "context": ["home", "thread"],
        "filter_action": action,
        "keywords": keywords,
    }))
    .expect("filter payload should decode")
}

#[test]
fn unsupported_timelines_fail_in_strict_mode_and_skip_in_lenient_mode() {
    let temp = TempStore::open("engine-gate");
    let page = [status("1", "a")];
    let tag = TimelineKey::Tag("rust".to_string());

    let strict = engine(&temp, CapabilityMode::Strict);
    let err = strict
        .save_timeline_page(&tag, &page, &PageAnchor::Top, None)
        .expect_err("unknown server should not get tag timelines");
    assert!(matches!(
        err,
        EngineError::CapabilityUnsupported(CapabilityError::Unsupported { .. })
    ));
    assert!(strict
        .save_timeline_page(&TimelineKey::Public, &page, &PageAnchor::Top, None)
        .expect("public timelines are ungated")
        .is_some());

    let lenient = engine(&temp, CapabilityMode::Lenient);
    assert_eq!(
        lenient
            .save_timeline_page(&tag, &[status("2", "a")], &PageAnchor::Top, None)
            .expect("lenient mode should not fail"),
        None
    );
    assert!(lenient.status("2").expect("read should succeed").is_none());
}

#[test]
fn recorded_server_drives_capability_checks() {
    let temp = TempStore::open("engine-server");
    let engine = engine(&temp, CapabilityMode::Lenient);

    engine
        .set_server(&ServerDescriptor::detect("mastodon", "4.2.0"))
        .expect("server should save");
    assert_eq!(
        engine.server().expect("server should load"),
        ServerDescriptor::detect("mastodon", "4.2.0")
    );
    assert!(engine.check(Operation::Trends).expect("check should run"));

    engine
        .set_server(&ServerDescriptor::detect("gotosocial", "0.9.0"))
        .expect("server should save");
    assert!(!engine.check(Operation::ListTimeline).expect("check should run"));
    assert!(engine.check(Operation::MuteStatus).expect("check should run"));
}

#[test]
fn pages_merge_into_the_timeline_and_record_the_cursor() {
    let temp = TempStore::open("engine-pages");
    let engine = engine(&temp, CapabilityMode::Strict);

    engine
        .save_timeline_page(
            &TimelineKey::Home,
            &[status("30", "a"), status("20", "b")],
            &PageAnchor::Top,
            Some("20"),
        )
        .expect("page should save");
    engine
        .save_timeline_page(
            &TimelineKey::Home,
            &[status("40", "a")],
            &PageAnchor::NewerThan("30".to_string()),
            Some("1"),
        )
        .expect("newer page should save");

    let section = engine.timeline(&TimelineKey::Home).expect("timeline should read");
    assert_eq!(status_ids(&section), ids(&["40", "30", "20"]));
    assert_eq!(
        engine.cursor(&TimelineKey::Home).expect("cursor should read").as_deref(),
        Some("20")
    );
}

#[test]
fn deleting_the_focused_thread_root_asks_the_ui_to_navigate_back() {
    let temp = TempStore::open("engine-delete");
    let engine = engine(&temp, CapabilityMode::Strict);
    let root = status("1", "a");
    engine
        .save_context(&root, &Context {
            ancestors: Vec::new(),
            descendants: vec![reply("2", "b", "1")],
        })
        .expect("context should save");
    let events = engine.events().subscribe();
    engine.focus_context("1");

    assert!(!engine.delete_status("missing").expect("delete should run"));
    assert!(events.try_recv().is_err());

    assert!(engine.delete_status("1").expect("delete should run"));
    let kinds: Vec<CollectionEventKind> = events.try_iter().map(|event| event.kind).collect();
    assert_eq!(
        kinds,
        vec![
            CollectionEventKind::StatusDeleted {
                status_id: "1".to_string()
            },
            CollectionEventKind::ContextParentDeleted {
                status_id: "1".to_string()
            },
        ]
    );
    assert!(engine.context("1").expect("context should read").is_empty());
}

#[test]
fn updates_to_missing_statuses_report_not_found() {
    let temp = TempStore::open("engine-not-found");
    let engine = engine(&temp, CapabilityMode::Strict);

    let err = engine
        .set_show_anyway("ghost", &FilterContext::Home, true)
        .expect_err("missing status should fail");
    assert!(matches!(err, EngineError::NotFound { kind: "status", .. }));
    let err = engine
        .set_status_flag("ghost", StatusFlag::Bookmarked, true)
        .expect_err("missing status should fail");
    assert!(matches!(err, EngineError::NotFound { .. }));

    engine
        .save_statuses(&[status("1", "a")], None)
        .expect("status should save");
    engine
        .set_status_flag("1", StatusFlag::Favourited, true)
        .expect("flag should update");
    let view = engine
        .status("1")
        .expect("read should succeed")
        .expect("status should exist");
    assert!(view.record.favourited);
}

#[test]
fn filter_rules_can_be_replaced_updated_and_removed() {
    let temp = TempStore::open("engine-filters");
    let engine = engine(&temp, CapabilityMode::Strict);

    let saved = engine
        .replace_filters(vec![
            filter("f1", "hide", &["spiders", "snakes"]),
            filter("f2", "warn", &["election"]),
        ])
        .expect("filters should save");
    assert_eq!(saved, 3);

    engine
        .upsert_filter(filter("f1", "hide", &["wasps"]))
        .expect("filter should update");
    let mut phrases: Vec<String> = engine
        .filter_rules()
        .expect("rules should read")
        .into_iter()
        .map(|rule| rule.phrase)
        .collect();
    phrases.sort();
    assert_eq!(phrases, vec!["election".to_string(), "wasps".to_string()]);

    assert_eq!(engine.delete_filter("f2").expect("delete should run"), 1);
    assert_eq!(engine.delete_filter("f2").expect("delete should run"), 0);
    assert_eq!(engine.filter_rules().expect("rules should read").len(), 1);
}

#[test]
fn a_live_timeline_rereads_when_filters_change() {
    let temp = TempStore::open("engine-live");
    let engine = engine(&temp, CapabilityMode::Strict);
    engine
        .save_timeline_page(
            &TimelineKey::Home,
            &[
                status_with("2", "a", json!({ "content": "<p>spiders</p>" })),
                status("1", "b"),
            ],
            &PageAnchor::Top,
            None,
        )
        .expect("page should save");

    let (tx, rx) = mpsc::channel();
    let _subscription = engine
        .subscribe(
            engine.timeline_query(TimelineKey::Home),
            Delivery::Immediate,
            move |value| {
                let _ = tx.send(value.map(|section| status_ids(&section)));
            },
        )
        .expect("subscribe should succeed");
    let next = || {
        rx.recv_timeout(Duration::from_secs(5))
            .expect("a value should arrive")
            .expect("query should run")
    };
    assert_eq!(next(), ids(&["2", "1"]));

    engine
        .upsert_filter(filter("f1", "hide", &["spiders"]))
        .expect("filter should save");
    assert_eq!(next(), ids(&["1"]));
}

#[test]
fn purging_an_account_only_touches_home() {
    let temp = TempStore::open("engine-purge");
    let engine = engine(&temp, CapabilityMode::Strict);
    let page = [status("2", "gone"), status("1", "kept")];
    for key in [TimelineKey::Home, TimelineKey::Public] {
        engine
            .save_timeline_page(&key, &page, &PageAnchor::Top, None)
            .expect("page should save");
    }

    assert_eq!(engine.purge_account_from_home("gone").expect("purge should run"), 1);
    assert_eq!(
        status_ids(&engine.timeline(&TimelineKey::Home).expect("home should read")),
        ids(&["1"])
    );
    assert_eq!(
        status_ids(&engine.timeline(&TimelineKey::Public).expect("public should read")),
        ids(&["2", "1"])
    );
}

#[test]
fn a_notification_reported_gone_is_dropped_from_its_timeline() {
    let temp = TempStore::open("engine-notification");
    let engine = engine(&temp, CapabilityMode::Strict);
    let notification: Notification = serde_json::from_value(json!({
        "id": "n1",
        "type": "follow",
        "created_at": "2024-03-01T12:00:00Z",
        "account": account_json("fan"),
    }))
    .expect("notification should decode");
    engine
        .save_notifications_page(&[notification], &PageAnchor::Top, None)
        .expect("notifications should save");

    assert!(engine
        .handle_not_found(EntityKind::Notification, "n1")
        .expect("delete should run"));
    assert!(engine
        .timeline(&TimelineKey::Notifications)
        .expect("timeline should read")
        .items
        .is_empty());
}
