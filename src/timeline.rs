use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use rusqlite::Connection;
use serde::Serialize;

use crate::capability::Operation;
use crate::db;
use crate::entities::FilterContext;
use crate::store::{StoreError, Table, WriteTx};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimelineKey {
    Home,
    Local,
    Public,
    List(String),
    Tag(String),
    Notifications,
    Conversations,
    ThreadContext(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Status,
    Notification,
    Conversation,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Status => "status",
            ItemKind::Notification => "notification",
            ItemKind::Conversation => "conversation",
        }
    }
}

impl TimelineKey {
    pub fn id(&self) -> String {
        match self {
            TimelineKey::Home => "home".to_string(),
            TimelineKey::Local => "local".to_string(),
            TimelineKey::Public => "public".to_string(),
            TimelineKey::List(id) => format!("list:{id}"),
            TimelineKey::Tag(name) => format!("tag:{name}"),
            TimelineKey::Notifications => "notifications".to_string(),
            TimelineKey::Conversations => "conversations".to_string(),
            TimelineKey::ThreadContext(id) => format!("thread-context:{id}"),
        }
    }

    pub fn item_kind(&self) -> ItemKind {
        match self {
            TimelineKey::Notifications => ItemKind::Notification,
            TimelineKey::Conversations => ItemKind::Conversation,
            _ => ItemKind::Status,
        }
    }

    /// Where filter rules are looked up for items of this timeline.
    pub fn filter_context(&self) -> FilterContext {
        match self {
            TimelineKey::Home | TimelineKey::List(_) => FilterContext::Home,
            TimelineKey::Local | TimelineKey::Public | TimelineKey::Tag(_) => FilterContext::Public,
            TimelineKey::Notifications => FilterContext::Notifications,
            TimelineKey::Conversations | TimelineKey::ThreadContext(_) => FilterContext::Thread,
        }
    }

    /// The gated server call needed to fetch this timeline, if any.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            TimelineKey::Local | TimelineKey::Public => Some(Operation::PublicTimeline),
            TimelineKey::List(_) => Some(Operation::ListTimeline),
            TimelineKey::Tag(_) => Some(Operation::TagTimeline),
            _ => None,
        }
    }
}

impl fmt::Display for TimelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

impl FromStr for TimelineKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key = match value.split_once(':') {
            Some(("list", id)) if !id.is_empty() => TimelineKey::List(id.to_string()),
            Some(("tag", name)) if !name.is_empty() => TimelineKey::Tag(name.to_string()),
            Some(("thread-context", id)) if !id.is_empty() => {
                TimelineKey::ThreadContext(id.to_string())
            }
            None => match value {
                "home" => TimelineKey::Home,
                "local" => TimelineKey::Local,
                "public" => TimelineKey::Public,
                "notifications" => TimelineKey::Notifications,
                "conversations" => TimelineKey::Conversations,
                _ => return Err(format!("unknown timeline '{}'", value)),
            },
            _ => return Err(format!("unknown timeline '{}'", value)),
        };
        Ok(key)
    }
}

/// Where a fetched page sits relative to what is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAnchor {
    /// The newest page, fetched without a cursor.
    Top,
    /// Items older than the cursor (`max_id`); the page follows it.
    OlderThan(String),
    /// Items newer than the cursor (`min_id`); the page precedes it.
    NewerThan(String),
}

impl PageAnchor {
    pub fn cursor(&self) -> Option<&str> {
        match self {
            PageAnchor::Top => None,
            PageAnchor::OlderThan(id) | PageAnchor::NewerThan(id) => Some(id),
        }
    }
}

/// Server ids sort by length, then lexically.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// The effective "load older" cursor: the server's suggestion, but never past
/// the oldest item already cached.
pub fn real_max_id(server_max_id: Option<&str>, last_cached_id: Option<&str>) -> Option<String> {
    match (server_max_id, last_cached_id) {
        (Some(server), Some(cached)) => {
            let oldest = if compare_ids(server, cached) == Ordering::Greater {
                cached
            } else {
                server
            };
            Some(oldest.to_string())
        }
        (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
        (None, None) => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gap {
    pub above_id: String,
    pub below_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub inserted: usize,
    pub gaps_before: usize,
    pub gaps_after: usize,
}

/// An ordered item sequence as contiguous runs, newest first. Every boundary
/// between two runs is one gap, so there is exactly one load-more placeholder
/// per unresolved gap by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sequence {
    runs: Vec<Vec<String>>,
}

impl Sequence {
    pub fn from_runs(runs: Vec<Vec<String>>) -> Self {
        Self {
            runs: runs.into_iter().filter(|run| !run.is_empty()).collect(),
        }
    }

    pub fn runs(&self) -> &[Vec<String>] {
        &self.runs
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.runs.iter().flatten().map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids().any(|candidate| candidate == id)
    }

    pub fn last_id(&self) -> Option<&str> {
        self.runs.last().and_then(|run| run.last()).map(String::as_str)
    }

    pub fn gaps(&self) -> Vec<Gap> {
        self.runs
            .windows(2)
            .filter_map(|pair| {
                Some(Gap {
                    above_id: pair[0].last()?.clone(),
                    below_id: pair[1].first()?.clone(),
                })
            })
            .collect()
    }

    /// Merges a fetched page. Ids already cached stay where they are. New ids
    /// keep the page's order and go next to the cached id they follow in the
    /// page, or before the cached id they precede. Two runs fuse only where
    /// the page runs from the end of one straight into the start of the next,
    /// which is what closes a gap. A page overlapping nothing becomes a new run.
    pub fn merge(&mut self, page: &[String], anchor: &PageAnchor) -> MergeOutcome {
        let gaps_before = self.gaps().len();
        let cursor = anchor
            .cursor()
            .filter(|cursor| self.contains(cursor))
            .map(str::to_string);

        let mut ordered: Vec<&String> = Vec::with_capacity(page.len() + 1);
        match (anchor, cursor.as_ref()) {
            (PageAnchor::OlderThan(_), Some(cursor)) => {
                ordered.push(cursor);
                ordered.extend(page);
            }
            (PageAnchor::NewerThan(_), Some(cursor)) => {
                ordered.extend(page);
                ordered.push(cursor);
            }
            _ => ordered.extend(page),
        }
        let mut seen = HashSet::new();
        let extended: Vec<String> = ordered
            .into_iter()
            .filter(|id| seen.insert(id.to_string()))
            .cloned()
            .collect();

        let mut inserted = 0;
        let mut above: Option<String> = None;
        let mut pending: Vec<String> = Vec::new();
        for id in extended {
            if !self.contains(&id) {
                pending.push(id);
                continue;
            }
            if !pending.is_empty() {
                inserted += pending.len();
                let batch = std::mem::take(&mut pending);
                match above.take() {
                    Some(previous) => above = Some(self.insert_after(&previous, batch)),
                    None => self.insert_before(&id, batch),
                }
            }
            if let Some(previous) = &above {
                self.fuse_if_bridged(previous, &id);
            }
            above = Some(id);
        }

        if !pending.is_empty() {
            inserted += pending.len();
            match above {
                Some(previous) => {
                    self.insert_after(&previous, pending);
                }
                None => {
                    let index = match anchor {
                        PageAnchor::Top => 0,
                        _ => self.insertion_index(&pending[0]),
                    };
                    self.runs.insert(index, pending);
                }
            }
        }

        MergeOutcome {
            inserted,
            gaps_before,
            gaps_after: self.gaps().len(),
        }
    }

    fn locate(&self, id: &str) -> Option<(usize, usize)> {
        self.runs.iter().enumerate().find_map(|(run, ids)| {
            ids.iter()
                .position(|candidate| candidate == id)
                .map(|position| (run, position))
        })
    }

    /// Splices `batch` in right after `above` and returns the new last id of
    /// the spliced stretch.
    fn insert_after(&mut self, above: &str, batch: Vec<String>) -> String {
        let tail = batch.last().cloned().unwrap_or_else(|| above.to_string());
        if let Some((run, position)) = self.locate(above) {
            let at = position + 1;
            self.runs[run].splice(at..at, batch);
        }
        tail
    }

    fn insert_before(&mut self, below: &str, batch: Vec<String>) {
        if let Some((run, position)) = self.locate(below) {
            self.runs[run].splice(position..position, batch);
        }
    }

    /// Fuses two neighbouring runs when `above` ends one and `below` starts
    /// the next.
    fn fuse_if_bridged(&mut self, above: &str, below: &str) {
        let (Some((upper, top)), Some((lower, bottom))) = (self.locate(above), self.locate(below))
        else {
            return;
        };
        if lower == upper + 1 && bottom == 0 && top + 1 == self.runs[upper].len() {
            let run = self.runs.remove(lower);
            self.runs[upper].extend(run);
        }
    }

    /// Position for a run that overlaps nothing: before the first run whose
    /// newest item is older than `newest`.
    fn insertion_index(&self, newest: &str) -> usize {
        self.runs
            .iter()
            .position(|run| {
                run.first()
                    .is_some_and(|first| compare_ids(first, newest) == Ordering::Less)
            })
            .unwrap_or(self.runs.len())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.ids().count();
        for run in &mut self.runs {
            run.retain(|candidate| candidate != id);
        }
        self.runs.retain(|run| !run.is_empty());
        before != self.ids().count()
    }
}

pub fn load_sequence(conn: &Connection, key: &TimelineKey) -> Result<Sequence, StoreError> {
    Ok(Sequence::from_runs(db::load_runs(conn, &key.id())?))
}

/// Loads, merges and rewrites the timeline inside the caller's transaction,
/// so readers see either the old sequence or the merged one.
pub fn merge_page(
    tx: &mut WriteTx<'_>,
    key: &TimelineKey,
    page_ids: &[String],
    anchor: &PageAnchor,
) -> Result<MergeOutcome, StoreError> {
    let mut sequence = load_sequence(tx.conn(), key)?;
    let outcome = sequence.merge(page_ids, anchor);
    db::replace_runs(tx.conn(), &key.id(), key.item_kind().as_str(), sequence.runs())?;
    tx.touch(Table::Timeline);
    tracing::debug!(
        timeline = %key,
        inserted = outcome.inserted,
        gaps_before = outcome.gaps_before,
        gaps_after = outcome.gaps_after,
        "merged timeline page"
    );
    Ok(outcome)
}

/// Replaces the whole sequence with one contiguous run.
pub fn replace_sequence(
    tx: &mut WriteTx<'_>,
    key: &TimelineKey,
    ids: Vec<String>,
) -> Result<(), StoreError> {
    let runs = if ids.is_empty() { Vec::new() } else { vec![ids] };
    db::replace_runs(tx.conn(), &key.id(), key.item_kind().as_str(), &runs)?;
    tx.touch(Table::Timeline);
    Ok(())
}

pub fn next_page_max_id(conn: &Connection, key: &TimelineKey) -> Result<Option<String>, StoreError> {
    let sequence = load_sequence(conn, key)?;
    let server = db::get_next_max_id(conn, &key.id())?;
    Ok(real_max_id(server.as_deref(), sequence.last_id()))
}
