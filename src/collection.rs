use std::collections::HashSet;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::context::{self, ContextFlags};
use crate::db::{self, StatusRecord};
use crate::entities::{
    Account, Announcement, Card, FilterContext, NotificationType, Reaction, Status, Tag,
};
use crate::filters::{verdict_of, FilterSet, SearchableText, Verdict};
use crate::notifications;
use crate::store::StoreError;
use crate::timeline::{self, ItemKind, TimelineKey};

/// Quote and reblog references resolved this many levels deep at most.
const MAX_VIEW_DEPTH: usize = 8;

/// A status composed for reading: the flat row plus its author, reactions and
/// resolved reblog and quote targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusView {
    pub record: StatusRecord,
    pub account: Account,
    pub reactions: Vec<Reaction>,
    pub reblog: Option<Box<StatusView>>,
    pub quote: Option<Box<StatusView>>,
}

impl StatusView {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// What the UI shows: a plain reblog shows its target, a quote shows
    /// itself with the target embedded.
    pub fn display(&self) -> &StatusView {
        match (&self.reblog, &self.record.quote_id) {
            (Some(reblog), None) => reblog,
            _ => self,
        }
    }
}

pub fn load_status_view(conn: &Connection, id: &str) -> Result<Option<StatusView>, StoreError> {
    let mut visiting = HashSet::new();
    load_view_at_depth(conn, id, 0, &mut visiting)
}

fn load_view_at_depth(
    conn: &Connection,
    id: &str,
    depth: usize,
    visiting: &mut HashSet<String>,
) -> Result<Option<StatusView>, StoreError> {
    if depth > MAX_VIEW_DEPTH || !visiting.insert(id.to_string()) {
        return Ok(None);
    }
    let Some(record) = db::get_status(conn, id)? else {
        visiting.remove(id);
        return Ok(None);
    };
    let account = db::get_account(conn, &record.account_id)?.ok_or_else(|| StoreError::NotFound {
        kind: "account",
        id: record.account_id.clone(),
    })?;
    let reactions = db::list_reactions(conn, id)?;
    let reblog = match &record.reblog_id {
        Some(reblog_id) => load_view_at_depth(conn, reblog_id, depth + 1, visiting)?.map(Box::new),
        None => None,
    };
    let quote = match &record.quote_id {
        Some(quote_id) => load_view_at_depth(conn, quote_id, depth + 1, visiting)?.map(Box::new),
        None => None,
    };
    visiting.remove(id);
    Ok(Some(StatusView {
        record,
        account,
        reactions,
        reblog,
        quote,
    }))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterWarning {
    pub phrases: Vec<String>,
    pub shown_anyway: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusConfiguration {
    #[serde(flatten)]
    pub flags: ContextFlags,
    pub filtered: Option<FilterWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadMore {
    pub timeline: String,
    pub above_id: String,
    pub below_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationView {
    pub id: String,
    pub kind: NotificationType,
    pub created_at: String,
    pub account: Account,
    pub status: Option<StatusView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationView {
    pub id: String,
    pub unread: bool,
    pub accounts: Vec<Account>,
    pub last_status: Option<StatusView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    Accounts,
    Statuses,
    Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollectionItem {
    Status {
        status: StatusView,
        configuration: StatusConfiguration,
    },
    Account {
        account: Account,
    },
    Notification {
        notification: NotificationView,
    },
    MultiNotification {
        kind: NotificationType,
        notifications: Vec<NotificationView>,
    },
    LoadMore(LoadMore),
    Tag {
        tag: Tag,
    },
    Link {
        card: Card,
    },
    Announcement {
        announcement: Announcement,
    },
    Conversation {
        conversation: ConversationView,
    },
    MoreResults {
        scope: SearchScope,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionSection {
    pub id: Option<String>,
    pub title: Option<String>,
    pub items: Vec<CollectionItem>,
}

impl CollectionSection {
    pub fn untitled(items: Vec<CollectionItem>) -> Self {
        Self {
            id: None,
            title: None,
            items,
        }
    }

    pub fn titled(title: &str, items: Vec<CollectionItem>) -> Self {
        Self {
            id: Some(title.to_string()),
            title: Some(title.to_string()),
            items,
        }
    }
}

/// Filter state needed while assembling one query's items.
pub struct ReadScope<'a> {
    pub filters: &'a FilterSet,
    pub context: FilterContext,
    pub now: OffsetDateTime,
}

impl ReadScope<'_> {
    /// `None` when a hide rule applies; otherwise the warning, if any.
    fn screen(
        &self,
        conn: &Connection,
        view: &StatusView,
    ) -> Result<Option<Option<FilterWarning>>, StoreError> {
        if self.filters.is_empty() {
            return Ok(Some(None));
        }
        let shown = view.display();
        let mut server_matches = db::list_server_filter_matches(conn, view.id(), &self.context)?;
        if shown.id() != view.id() {
            server_matches.extend(db::list_server_filter_matches(conn, shown.id(), &self.context)?);
        }
        let text = SearchableText::from_record(&shown.record);
        let rules = self
            .filters
            .matching(&text, &server_matches, &self.context, self.now);
        match verdict_of(&rules) {
            Verdict::None => Ok(Some(None)),
            Verdict::Hide => Ok(None),
            Verdict::Warn => {
                let mut phrases: Vec<String> = rules
                    .iter()
                    .filter(|rule| !rule.phrase.is_empty())
                    .map(|rule| rule.phrase.clone())
                    .collect();
                phrases.dedup();
                Ok(Some(Some(FilterWarning {
                    phrases,
                    shown_anyway: db::is_shown_anyway(conn, view.id(), &self.context)?,
                })))
            }
        }
    }

    fn status_item(
        &self,
        conn: &Connection,
        view: StatusView,
    ) -> Result<Option<CollectionItem>, StoreError> {
        Ok(self.screen(conn, &view)?.map(|filtered| CollectionItem::Status {
            status: view,
            configuration: StatusConfiguration {
                flags: ContextFlags::default(),
                filtered,
            },
        }))
    }
}

/// Builds the ordered items for a timeline: each cached run in order, with
/// one load-more item per stretch of gaps between visible items. A run whose
/// items are all hidden folds its gaps into its neighbours' placeholder.
pub fn timeline_section(
    conn: &Connection,
    key: &TimelineKey,
    scope: &ReadScope<'_>,
    group_notifications: bool,
) -> Result<CollectionSection, StoreError> {
    let sequence = timeline::load_sequence(conn, key)?;
    let mut items = Vec::new();
    let mut open_gap: Option<LoadMore> = None;
    for (index, run) in sequence.runs().iter().enumerate() {
        if index > 0 {
            let above = &sequence.runs()[index - 1];
            if let (Some(above_id), Some(below_id)) = (above.last(), run.first()) {
                if let Some(gap) = open_gap.as_mut() {
                    gap.below_id = below_id.clone();
                } else {
                    open_gap = Some(LoadMore {
                        timeline: key.id(),
                        above_id: above_id.clone(),
                        below_id: below_id.clone(),
                    });
                }
            }
        }
        let visible = run_items(conn, key, run, scope, group_notifications)?;
        if visible.is_empty() {
            continue;
        }
        if let Some(gap) = open_gap.take() {
            items.push(CollectionItem::LoadMore(gap));
        }
        items.extend(visible);
    }
    if let Some(gap) = open_gap {
        if !items.is_empty() {
            items.push(CollectionItem::LoadMore(gap));
        }
    }
    Ok(CollectionSection::untitled(items))
}

fn run_items(
    conn: &Connection,
    key: &TimelineKey,
    run: &[String],
    scope: &ReadScope<'_>,
    group_notifications: bool,
) -> Result<Vec<CollectionItem>, StoreError> {
    let mut items = Vec::new();
    match key.item_kind() {
        ItemKind::Status => {
            for id in run {
                if let Some(view) = load_status_view(conn, id)? {
                    items.extend(scope.status_item(conn, view)?);
                }
            }
        }
        ItemKind::Notification => {
            items.extend(notification_items(conn, run, scope, group_notifications)?);
        }
        ItemKind::Conversation => {
            for id in run {
                if let Some(conversation) = load_conversation_view(conn, id)? {
                    items.push(CollectionItem::Conversation { conversation });
                }
            }
        }
    }
    Ok(items)
}

fn notification_items(
    conn: &Connection,
    ids: &[String],
    scope: &ReadScope<'_>,
    group: bool,
) -> Result<Vec<CollectionItem>, StoreError> {
    let mut records = Vec::new();
    for id in ids {
        let Some(record) = db::get_notification(conn, id)? else {
            continue;
        };
        if let Some(status_id) = &record.status_id {
            if let Some(view) = load_status_view(conn, status_id)? {
                if scope.screen(conn, &view)?.is_none() {
                    continue;
                }
            }
        }
        records.push(record);
    }

    let buckets = if group {
        notifications::group(records)
    } else {
        records.into_iter().map(|record| vec![record]).collect()
    };

    let mut items = Vec::new();
    for bucket in buckets {
        let kind = bucket[0].kind.clone();
        let mut views = Vec::new();
        for record in bucket {
            let account = db::get_account(conn, &record.account_id)?.ok_or_else(|| {
                StoreError::NotFound {
                    kind: "account",
                    id: record.account_id.clone(),
                }
            })?;
            let status = match &record.status_id {
                Some(status_id) => load_status_view(conn, status_id)?,
                None => None,
            };
            views.push(NotificationView {
                id: record.id,
                kind: record.kind,
                created_at: record.created_at,
                account,
                status,
            });
        }
        if views.len() == 1 {
            if let Some(notification) = views.pop() {
                items.push(CollectionItem::Notification { notification });
            }
        } else {
            items.push(CollectionItem::MultiNotification {
                kind,
                notifications: views,
            });
        }
    }
    Ok(items)
}

pub fn load_conversation_view(
    conn: &Connection,
    id: &str,
) -> Result<Option<ConversationView>, StoreError> {
    let Some(record) = db::get_conversation(conn, id)? else {
        return Ok(None);
    };
    let mut accounts = Vec::new();
    for account_id in &record.account_ids {
        accounts.extend(db::get_account(conn, account_id)?);
    }
    let last_status = match &record.last_status_id {
        Some(status_id) => load_status_view(conn, status_id)?,
        None => None,
    };
    Ok(Some(ConversationView {
        id: record.id,
        unread: record.unread,
        accounts,
        last_status,
    }))
}

/// Three sections: ancestors, the parent, descendants. Hidden statuses drop
/// out of every section, the parent included; adjacency flags are then
/// computed over what remains. An empty result means the parent is gone.
pub fn context_sections(
    conn: &Connection,
    parent_id: &str,
    scope: &ReadScope<'_>,
) -> Result<Vec<CollectionSection>, StoreError> {
    let Some(thread) = context::load_thread(conn, parent_id)? else {
        return Ok(Vec::new());
    };

    let groups: [&[StatusRecord]; 3] = [
        &thread.ancestors,
        std::slice::from_ref(&thread.parent),
        &thread.descendants,
    ];
    let mut screened: Vec<Vec<(StatusView, Option<FilterWarning>)>> = Vec::new();
    for records in groups {
        let mut kept = Vec::new();
        for record in records {
            let Some(view) = load_status_view(conn, &record.id)? else {
                continue;
            };
            if let Some(filtered) = scope.screen(conn, &view)? {
                kept.push((view, filtered));
            }
        }
        screened.push(kept);
    }

    let links: [Vec<context::Link<'_>>; 3] = std::array::from_fn(|index| {
        screened[index]
            .iter()
            .map(|(view, _)| (view.id(), view.record.in_reply_to_id.as_deref()))
            .collect()
    });
    let flags = context::adjacency_flags(&links, parent_id);

    let mut sections = Vec::new();
    for (section, section_flags) in screened.into_iter().zip(flags) {
        let items = section
            .into_iter()
            .zip(section_flags)
            .map(|((status, filtered), flags)| CollectionItem::Status {
                status,
                configuration: StatusConfiguration { flags, filtered },
            })
            .collect();
        sections.push(CollectionSection::untitled(items));
    }
    Ok(sections)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub statuses: Vec<Status>,
    #[serde(default)]
    pub hashtags: Vec<Tag>,
}

/// Search sections, each cut to `limit` and followed by a more-results item
/// when cut. Statuses must already be saved. Empty sections are omitted.
pub fn search_sections(
    conn: &Connection,
    results: &SearchResults,
    limit: usize,
    scope: &ReadScope<'_>,
) -> Result<Vec<CollectionSection>, StoreError> {
    let mut sections = Vec::new();

    let accounts = results
        .accounts
        .iter()
        .take(limit)
        .map(|account| CollectionItem::Account {
            account: account.clone(),
        })
        .collect();
    push_truncated(&mut sections, "accounts", accounts, results.accounts.len() > limit, SearchScope::Accounts);

    let mut statuses = Vec::new();
    for status in results.statuses.iter().take(limit) {
        if let Some(view) = load_status_view(conn, &status.id)? {
            statuses.extend(scope.status_item(conn, view)?);
        }
    }
    push_truncated(&mut sections, "statuses", statuses, results.statuses.len() > limit, SearchScope::Statuses);

    let tags = results
        .hashtags
        .iter()
        .take(limit)
        .map(|tag| CollectionItem::Tag { tag: tag.clone() })
        .collect();
    push_truncated(&mut sections, "hashtags", tags, results.hashtags.len() > limit, SearchScope::Tags);

    Ok(sections)
}

fn push_truncated(
    sections: &mut Vec<CollectionSection>,
    title: &str,
    mut items: Vec<CollectionItem>,
    truncated: bool,
    scope: SearchScope,
) {
    if items.is_empty() {
        return;
    }
    if truncated {
        items.push(CollectionItem::MoreResults { scope });
    }
    sections.push(CollectionSection::titled(title, items));
}

/// Explore tab: active announcements, trending tags, trending links.
pub fn explore_sections(
    announcements: &[Announcement],
    tags: &[Tag],
    links: &[Card],
    now: OffsetDateTime,
) -> Vec<CollectionSection> {
    let active: Vec<CollectionItem> = announcements
        .iter()
        .filter(|announcement| {
            announcement
                .ends_at
                .as_deref()
                .and_then(crate::entities::parse_datetime)
                .map_or(true, |ends| now < ends)
        })
        .map(|announcement| CollectionItem::Announcement {
            announcement: announcement.clone(),
        })
        .collect();

    let mut sections = Vec::new();
    for (title, items) in [
        ("announcements", active),
        ("tags", tags.iter().map(|tag| CollectionItem::Tag { tag: tag.clone() }).collect()),
        ("links", links.iter().map(|card| CollectionItem::Link { card: card.clone() }).collect()),
    ] {
        if !items.is_empty() {
            sections.push(CollectionSection::titled(title, items));
        }
    }
    sections
}
