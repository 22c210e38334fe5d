use std::collections::HashMap;

use time::{Date, UtcOffset};

use crate::db::NotificationRecord;
use crate::entities::{parse_datetime, NotificationType};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub kind: NotificationType,
    pub status_id: Option<String>,
    pub day: Option<Date>,
}

impl GroupKey {
    pub fn of(record: &NotificationRecord) -> Self {
        Self {
            kind: record.kind.clone(),
            status_id: record.status_id.clone(),
            day: parse_datetime(&record.created_at).map(|ts| ts.to_offset(UtcOffset::UTC).date()),
        }
    }
}

/// Buckets notifications by type, target status and UTC calendar day. A
/// bucket sits where its newest member sat; input order is preserved
/// otherwise. Recomputed from scratch on every read, so a late arrival joins
/// an older bucket.
pub fn group(records: Vec<NotificationRecord>) -> Vec<Vec<NotificationRecord>> {
    let mut buckets: Vec<Vec<NotificationRecord>> = Vec::new();
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    for record in records {
        let key = GroupKey::of(&record);
        // Undated notifications never merge.
        if key.day.is_none() {
            buckets.push(vec![record]);
            continue;
        }
        match index.get(&key) {
            Some(&position) => buckets[position].push(record),
            None => {
                index.insert(key, buckets.len());
                buckets.push(vec![record]);
            }
        }
    }
    buckets
}
