use std::error::Error;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use time::OffsetDateTime;

use crate::capability::{
    CapabilityError, CapabilityGate, CapabilityMode, Operation, ServerDescriptor, ServerFamily,
};
use crate::collection::{self, CollectionSection, ReadScope, SearchResults, StatusView};
use crate::config::{Config, ConfigError};
use crate::context;
use crate::db::{self, EngagementCounts, StatusFlag};
use crate::entities::{
    Context, Conversation, FilterContext, FilterPayload, FilterRule, Notification, Poll, Status,
};
use crate::events::{CollectionEventKind, EventBus};
use crate::filters::FilterSet;
use crate::identity::{IdentityError, IdentityId, StoreDirectory};
use crate::normalize::{NormalizeStats, Normalizer};
use crate::reactive::{self, Delivery, Query, Subscription};
use crate::store::{Store, StoreError, Table};
use crate::timeline::{self, MergeOutcome, PageAnchor, TimelineKey};

const SERVER_DESCRIPTOR_META: &str = "server_descriptor";

#[derive(Debug)]
pub enum EngineError {
    Store(StoreError),
    Identity(IdentityError),
    Config(ConfigError),
    CapabilityUnsupported(CapabilityError),
    NotFound { kind: &'static str, id: String },
    InvalidArgument(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Store(err) => write!(f, "{}", err),
            EngineError::Identity(err) => write!(f, "{}", err),
            EngineError::Config(err) => write!(f, "{}", err),
            EngineError::CapabilityUnsupported(err) => write!(f, "{}", err),
            EngineError::NotFound { kind, id } => {
                write!(f, "{} '{}' not found in local cache", kind, id)
            }
            EngineError::InvalidArgument(message) => write!(f, "{}", message),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EngineError::Store(err) => Some(err),
            EngineError::Identity(err) => Some(err),
            EngineError::Config(err) => Some(err),
            EngineError::CapabilityUnsupported(err) => Some(err),
            EngineError::NotFound { .. } | EngineError::InvalidArgument(_) => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound { kind, id } => EngineError::NotFound { kind, id },
            other => EngineError::Store(other),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(value: rusqlite::Error) -> Self {
        EngineError::Store(value.into())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(value: std::io::Error) -> Self {
        EngineError::Store(StoreError::Io(value))
    }
}

impl From<IdentityError> for EngineError {
    fn from(value: IdentityError) -> Self {
        EngineError::Identity(value)
    }
}

impl From<ConfigError> for EngineError {
    fn from(value: ConfigError) -> Self {
        EngineError::Config(value)
    }
}

impl From<CapabilityError> for EngineError {
    fn from(value: CapabilityError) -> Self {
        EngineError::CapabilityUnsupported(value)
    }
}

/// Entities a server can report as gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Status,
    Account,
    Notification,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub capability_mode: CapabilityMode,
    pub notification_grouping: bool,
    pub search_limit: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            capability_mode: CapabilityMode::Strict,
            notification_grouping: true,
            search_limit: 5,
        }
    }
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        Self {
            capability_mode: config.capabilities.mode,
            notification_grouping: config.timeline.notification_grouping,
            search_limit: config.timeline.search_limit,
        }
    }
}

/// Everything one identity's client needs: fetched pages go in through the
/// `save_*` calls, sections come out through reads or live subscriptions.
pub struct Engine {
    store: Arc<Store>,
    gate: CapabilityGate,
    events: EventBus,
    options: EngineOptions,
    active_context: Mutex<Option<String>>,
    fixed_now: Option<OffsetDateTime>,
}

impl Engine {
    pub fn new(store: Arc<Store>, options: EngineOptions) -> Self {
        Self {
            store,
            gate: CapabilityGate::new(options.capability_mode),
            events: EventBus::default(),
            options,
            active_context: Mutex::new(None),
            fixed_now: None,
        }
    }

    pub fn open(
        directory: &StoreDirectory,
        identity: &IdentityId,
        storage_key: &str,
        config: &Config,
    ) -> Result<Self, EngineError> {
        let store = directory.open(identity, storage_key)?;
        Ok(Self::new(store, EngineOptions::from(config)))
    }

    /// Pins the clock used for filter expiry.
    pub fn with_fixed_now(mut self, now: OffsetDateTime) -> Self {
        self.fixed_now = Some(now);
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // Capabilities

    pub fn set_server(&self, server: &ServerDescriptor) -> Result<(), EngineError> {
        let raw = serde_json::to_string(server).map_err(StoreError::from)?;
        self.store.write(|tx| {
            db::set_meta(tx.conn(), SERVER_DESCRIPTOR_META, &raw)?;
            tx.touch(Table::Meta);
            Ok(())
        })?;
        tracing::info!(family = %server.family, "recorded server descriptor");
        Ok(())
    }

    /// The last recorded descriptor; an unknown, unversioned server before
    /// any was recorded.
    pub fn server(&self) -> Result<ServerDescriptor, EngineError> {
        let raw = self
            .store
            .read(|conn| Ok(db::get_meta(conn, SERVER_DESCRIPTOR_META)?))?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw).map_err(StoreError::from)?),
            None => Ok(ServerDescriptor::new(
                ServerFamily::Unknown("unknown".to_string()),
                None,
            )),
        }
    }

    pub fn check(&self, operation: Operation) -> Result<bool, EngineError> {
        Ok(self.gate.check(operation, &self.server()?)?)
    }

    fn gated(&self, key: &TimelineKey) -> Result<bool, EngineError> {
        match key.operation() {
            Some(operation) => self.check(operation),
            None => Ok(true),
        }
    }

    // Ingest

    /// Saves a fetched status page and merges it into the timeline. `None`
    /// when lenient capability mode skipped an unsupported timeline.
    pub fn save_timeline_page(
        &self,
        key: &TimelineKey,
        statuses: &[Status],
        anchor: &PageAnchor,
        next_max_id: Option<&str>,
    ) -> Result<Option<MergeOutcome>, EngineError> {
        if !self.gated(key)? {
            return Ok(None);
        }
        let ids: Vec<String> = statuses.iter().map(|status| status.id.clone()).collect();
        let outcome = self.store.write(|tx| {
            Normalizer::new(tx, Some(key.filter_context())).save_statuses(statuses)?;
            let outcome = timeline::merge_page(tx, key, &ids, anchor)?;
            record_cursor(tx.conn(), key, anchor, next_max_id)?;
            Ok(outcome)
        })?;
        Ok(Some(outcome))
    }

    pub fn save_notifications_page(
        &self,
        notifications: &[Notification],
        anchor: &PageAnchor,
        next_max_id: Option<&str>,
    ) -> Result<MergeOutcome, EngineError> {
        let key = TimelineKey::Notifications;
        let ids: Vec<String> = notifications.iter().map(|item| item.id.clone()).collect();
        Ok(self.store.write(|tx| {
            {
                let mut normalizer = Normalizer::new(tx, None);
                for notification in notifications {
                    normalizer.save_notification(notification)?;
                }
            }
            let outcome = timeline::merge_page(tx, &key, &ids, anchor)?;
            record_cursor(tx.conn(), &key, anchor, next_max_id)?;
            Ok(outcome)
        })?)
    }

    pub fn save_conversations_page(
        &self,
        conversations: &[Conversation],
        anchor: &PageAnchor,
        next_max_id: Option<&str>,
    ) -> Result<MergeOutcome, EngineError> {
        let key = TimelineKey::Conversations;
        let ids: Vec<String> = conversations.iter().map(|item| item.id.clone()).collect();
        Ok(self.store.write(|tx| {
            {
                let mut normalizer = Normalizer::new(tx, Some(FilterContext::Thread));
                for conversation in conversations {
                    normalizer.save_conversation(conversation)?;
                }
            }
            let outcome = timeline::merge_page(tx, &key, &ids, anchor)?;
            record_cursor(tx.conn(), &key, anchor, next_max_id)?;
            Ok(outcome)
        })?)
    }

    pub fn save_context(&self, parent: &Status, thread: &Context) -> Result<NormalizeStats, EngineError> {
        Ok(self
            .store
            .write(|tx| context::save_context(tx, parent, thread))?)
    }

    /// Saves search hits so their statuses can be assembled like any other.
    pub fn save_search(&self, results: &SearchResults) -> Result<NormalizeStats, EngineError> {
        Ok(self.store.write(|tx| {
            let mut normalizer = Normalizer::new(tx, Some(FilterContext::Public));
            for account in &results.accounts {
                normalizer.save_account(account)?;
            }
            normalizer.save_statuses(&results.statuses)?;
            Ok(normalizer.stats())
        })?)
    }

    pub fn save_statuses(
        &self,
        statuses: &[Status],
        context: Option<FilterContext>,
    ) -> Result<NormalizeStats, EngineError> {
        Ok(self.store.write(|tx| {
            let mut normalizer = Normalizer::new(tx, context);
            normalizer.save_statuses(statuses)?;
            Ok(normalizer.stats())
        })?)
    }

    // Filters

    /// Replaces the whole rule set with a freshly fetched one.
    pub fn replace_filters(&self, payloads: Vec<FilterPayload>) -> Result<usize, EngineError> {
        let rules: Vec<FilterRule> = payloads.into_iter().flat_map(FilterPayload::into_rules).collect();
        Ok(self.store.write(|tx| {
            db::clear_filter_rules(tx.conn())?;
            for rule in &rules {
                db::upsert_filter_rule(tx.conn(), rule)?;
            }
            tx.touch(Table::Filter);
            Ok(rules.len())
        })?)
    }

    /// Creates or replaces one filter and all of its keywords.
    pub fn upsert_filter(&self, payload: FilterPayload) -> Result<usize, EngineError> {
        let filter_id = payload.id().to_string();
        let rules = payload.into_rules();
        Ok(self.store.write(|tx| {
            db::delete_filter(tx.conn(), &filter_id)?;
            for rule in &rules {
                db::upsert_filter_rule(tx.conn(), rule)?;
            }
            tx.touch(Table::Filter);
            Ok(rules.len())
        })?)
    }

    pub fn delete_filter(&self, filter_id: &str) -> Result<usize, EngineError> {
        Ok(self.store.write(|tx| {
            let removed = db::delete_filter(tx.conn(), filter_id)?;
            if removed > 0 {
                tx.touch(Table::Filter);
            }
            Ok(removed)
        })?)
    }

    pub fn filter_rules(&self) -> Result<Vec<FilterRule>, EngineError> {
        Ok(self.store.read(|conn| Ok(db::list_filter_rules(conn)?))?)
    }

    pub fn set_show_anyway(
        &self,
        status_id: &str,
        context: &FilterContext,
        shown: bool,
    ) -> Result<(), EngineError> {
        Ok(self.store.write(|tx| {
            require_status(tx.conn(), status_id)?;
            if db::set_show_anyway(tx.conn(), status_id, context, shown)? > 0 {
                tx.touch(Table::Filter);
            }
            Ok(())
        })?)
    }

    // Targeted updates

    pub fn set_status_flag(&self, status_id: &str, flag: StatusFlag, value: bool) -> Result<(), EngineError> {
        Ok(self.store.write(|tx| {
            if db::set_status_flag(tx.conn(), status_id, flag, value)? == 0 {
                return Err(not_found("status", status_id));
            }
            tx.touch(Table::Status);
            Ok(())
        })?)
    }

    pub fn set_status_counts(&self, status_id: &str, counts: EngagementCounts) -> Result<(), EngineError> {
        Ok(self.store.write(|tx| {
            if db::set_status_counts(tx.conn(), status_id, counts)? == 0 {
                return Err(not_found("status", status_id));
            }
            tx.touch(Table::Status);
            Ok(())
        })?)
    }

    pub fn set_status_poll(&self, status_id: &str, poll: &Poll) -> Result<(), EngineError> {
        Ok(self.store.write(|tx| {
            if db::set_status_poll(tx.conn(), status_id, poll)? == 0 {
                return Err(not_found("status", status_id));
            }
            tx.touch(Table::Status);
            Ok(())
        })?)
    }

    pub fn set_pinned(&self, account_id: &str, status_ids: &[String]) -> Result<(), EngineError> {
        Ok(self.store.write(|tx| {
            for status_id in status_ids {
                require_status(tx.conn(), status_id)?;
            }
            db::replace_pinned(tx.conn(), account_id, status_ids)?;
            tx.touch(Table::Status);
            Ok(())
        })?)
    }

    pub fn pinned(&self, account_id: &str) -> Result<Vec<String>, EngineError> {
        Ok(self.store.read(|conn| Ok(db::list_pinned(conn, account_id)?))?)
    }

    /// Deletes a status and its reblogs. Returns false when it was not cached.
    pub fn delete_status(&self, status_id: &str) -> Result<bool, EngineError> {
        let deleted = self.store.write(|tx| {
            let deleted = db::delete_status(tx.conn(), status_id)?;
            if deleted > 0 {
                tx.touch(Table::Status);
                tx.touch(Table::Notification);
                tx.touch(Table::Timeline);
            }
            Ok(deleted)
        })?;
        if deleted == 0 {
            return Ok(false);
        }
        tracing::debug!(status_id, deleted, "deleted status");
        self.events.emit(CollectionEventKind::StatusDeleted {
            status_id: status_id.to_string(),
        });
        self.notify_if_active_context(status_id);
        Ok(true)
    }

    pub fn delete_account(&self, account_id: &str) -> Result<bool, EngineError> {
        let deleted = self.store.write(|tx| {
            let deleted = db::delete_account(tx.conn(), account_id)?;
            if deleted > 0 {
                tx.touch(Table::Account);
                tx.touch(Table::Status);
                tx.touch(Table::Notification);
                tx.touch(Table::Timeline);
            }
            Ok(deleted)
        })?;
        if deleted == 0 {
            return Ok(false);
        }
        self.events.emit(CollectionEventKind::AccountRemoved {
            account_id: account_id.to_string(),
        });
        Ok(true)
    }

    /// Drops an unfollowed account's statuses from the home timeline while
    /// keeping the rows for other timelines.
    pub fn purge_account_from_home(&self, account_id: &str) -> Result<usize, EngineError> {
        Ok(self.store.write(|tx| {
            let removed =
                db::purge_account_from_timeline(tx.conn(), &TimelineKey::Home.id(), account_id)?;
            if removed > 0 {
                tx.touch(Table::Timeline);
            }
            Ok(removed)
        })?)
    }

    pub fn clear_timeline(&self, key: &TimelineKey) -> Result<usize, EngineError> {
        let removed = self.store.write(|tx| {
            let removed = db::clear_timeline(tx.conn(), &key.id())?;
            tx.touch(Table::Timeline);
            Ok(removed)
        })?;
        self.events.emit(CollectionEventKind::TimelineCleared { timeline: key.id() });
        Ok(removed)
    }

    /// The server reported an entity as gone: drop it locally.
    pub fn handle_not_found(&self, kind: EntityKind, id: &str) -> Result<bool, EngineError> {
        match kind {
            EntityKind::Status => self.delete_status(id),
            EntityKind::Account => self.delete_account(id),
            EntityKind::Notification => Ok(self.store.write(|tx| {
                let deleted = db::delete_notification(tx.conn(), id)?;
                if deleted > 0 {
                    tx.touch(Table::Notification);
                    tx.touch(Table::Timeline);
                }
                Ok(deleted > 0)
            })?),
        }
    }

    // Context focus

    /// Marks `status_id` as the thread the UI is showing; losing it emits a
    /// navigate-back event.
    pub fn focus_context(&self, status_id: &str) {
        *self.active_context.lock() = Some(status_id.to_string());
    }

    pub fn clear_context_focus(&self) {
        *self.active_context.lock() = None;
    }

    fn notify_if_active_context(&self, status_id: &str) {
        let mut active = self.active_context.lock();
        if active.as_deref() == Some(status_id) {
            *active = None;
            drop(active);
            self.events.emit(CollectionEventKind::ContextParentDeleted {
                status_id: status_id.to_string(),
            });
        }
    }

    // Reads

    fn now(&self) -> OffsetDateTime {
        self.fixed_now.unwrap_or_else(OffsetDateTime::now_utc)
    }

    pub fn timeline_query(&self, key: TimelineKey) -> TimelineQuery {
        TimelineQuery {
            key,
            group_notifications: self.options.notification_grouping,
            now: self.fixed_now,
        }
    }

    pub fn context_query(&self, parent_id: &str) -> ContextQuery {
        ContextQuery {
            parent_id: parent_id.to_string(),
            now: self.fixed_now,
        }
    }

    pub fn timeline(&self, key: &TimelineKey) -> Result<CollectionSection, EngineError> {
        let query = self.timeline_query(key.clone());
        Ok(self.store.read(|conn| query.run(conn))?)
    }

    pub fn context(&self, parent_id: &str) -> Result<Vec<CollectionSection>, EngineError> {
        let query = self.context_query(parent_id);
        Ok(self.store.read(|conn| query.run(conn))?)
    }

    pub fn search(&self, results: &SearchResults) -> Result<Vec<CollectionSection>, EngineError> {
        let limit = self.options.search_limit;
        let now = self.now();
        Ok(self.store.read(|conn| {
            let filters = FilterSet::compile(&db::list_filter_rules(conn)?);
            let scope = ReadScope {
                filters: &filters,
                context: FilterContext::Public,
                now,
            };
            collection::search_sections(conn, results, limit, &scope)
        })?)
    }

    pub fn status(&self, status_id: &str) -> Result<Option<StatusView>, EngineError> {
        Ok(self
            .store
            .read(|conn| collection::load_status_view(conn, status_id))?)
    }

    /// Cursor for the next "load older" request.
    pub fn cursor(&self, key: &TimelineKey) -> Result<Option<String>, EngineError> {
        Ok(self.store.read(|conn| timeline::next_page_max_id(conn, key))?)
    }

    // Live queries

    pub fn subscribe<Q, F>(&self, query: Q, delivery: Delivery, sink: F) -> Result<Subscription, EngineError>
    where
        Q: Query,
        F: FnMut(Result<Q::Output, StoreError>) + Send + 'static,
    {
        Ok(reactive::subscribe(Arc::clone(&self.store), query, delivery, sink)?)
    }
}

fn not_found(kind: &'static str, id: &str) -> StoreError {
    StoreError::NotFound {
        kind,
        id: id.to_string(),
    }
}

fn require_status(conn: &Connection, status_id: &str) -> Result<(), StoreError> {
    if db::status_exists(conn, status_id)? {
        Ok(())
    } else {
        Err(not_found("status", status_id))
    }
}

/// Pages fetched newer-than a cursor say nothing about what lies below.
fn record_cursor(
    conn: &Connection,
    key: &TimelineKey,
    anchor: &PageAnchor,
    next_max_id: Option<&str>,
) -> Result<(), StoreError> {
    match anchor {
        PageAnchor::NewerThan(_) => Ok(()),
        PageAnchor::Top | PageAnchor::OlderThan(_) => {
            Ok(db::set_next_max_id(conn, &key.id(), next_max_id)?)
        }
    }
}

fn load_filters(conn: &Connection) -> Result<FilterSet, StoreError> {
    Ok(FilterSet::compile(&db::list_filter_rules(conn)?))
}

/// One timeline as a single section, re-read whenever a table it draws
/// from changes.
#[derive(Debug, Clone)]
pub struct TimelineQuery {
    pub key: TimelineKey,
    pub group_notifications: bool,
    pub now: Option<OffsetDateTime>,
}

impl Query for TimelineQuery {
    type Output = CollectionSection;

    fn tables(&self) -> &[Table] {
        &[
            Table::Timeline,
            Table::Status,
            Table::Account,
            Table::Notification,
            Table::Conversation,
            Table::Filter,
        ]
    }

    fn run(&self, conn: &Connection) -> Result<CollectionSection, StoreError> {
        let filters = load_filters(conn)?;
        let scope = ReadScope {
            filters: &filters,
            context: self.key.filter_context(),
            now: self.now.unwrap_or_else(OffsetDateTime::now_utc),
        };
        collection::timeline_section(conn, &self.key, &scope, self.group_notifications)
    }
}

/// A thread as ancestors, parent and descendants sections.
#[derive(Debug, Clone)]
pub struct ContextQuery {
    pub parent_id: String,
    pub now: Option<OffsetDateTime>,
}

impl Query for ContextQuery {
    type Output = Vec<CollectionSection>;

    fn tables(&self) -> &[Table] {
        &[Table::Timeline, Table::Status, Table::Account, Table::Filter]
    }

    fn run(&self, conn: &Connection) -> Result<Vec<CollectionSection>, StoreError> {
        let filters = load_filters(conn)?;
        let scope = ReadScope {
            filters: &filters,
            context: FilterContext::Thread,
            now: self.now.unwrap_or_else(OffsetDateTime::now_utc),
        };
        collection::context_sections(conn, &self.parent_id, &scope)
    }
}

#[cfg(test)]
mod tests;
