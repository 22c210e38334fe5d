use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::entities::{Account, Status};
use crate::store::{Store, StoreOptions};

/// A store in its own temp directory; the directory goes away on drop.
pub(crate) struct TempStore {
    pub store: Arc<Store>,
    dir: PathBuf,
}

impl TempStore {
    pub fn open(label: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("fedicache-{label}-{}", Uuid::now_v7()));
        let store = Store::open(&dir.join("content.sqlite"), "test-key", &StoreOptions::default())
            .expect("temp store should open");
        Self {
            store: Arc::new(store),
            dir,
        }
    }
}

impl Drop for TempStore {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

pub(crate) fn account_json(id: &str) -> Value {
    json!({
        "id": id,
        "username": format!("user{id}"),
        "acct": format!("user{id}@example.social"),
        "display_name": format!("User {id}"),
    })
}

pub(crate) fn account(id: &str) -> Account {
    serde_json::from_value(account_json(id)).expect("account fixture should decode")
}

/// A status by `account_id`; `extra` keys override the defaults.
pub(crate) fn status_with(id: &str, account_id: &str, extra: Value) -> Status {
    let mut value = json!({
        "id": id,
        "created_at": "2024-03-01T12:00:00Z",
        "account": account_json(account_id),
        "content": format!("<p>post {id}</p>"),
    });
    if let (Some(base), Value::Object(extra)) = (value.as_object_mut(), extra) {
        base.extend(extra);
    }
    serde_json::from_value(value).expect("status fixture should decode")
}

pub(crate) fn status(id: &str, account_id: &str) -> Status {
    status_with(id, account_id, json!({}))
}

pub(crate) fn reply(id: &str, account_id: &str, parent_id: &str) -> Status {
    status_with(id, account_id, json!({ "in_reply_to_id": parent_id }))
}

pub(crate) fn ids(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|id| id.to_string()).collect()
}
