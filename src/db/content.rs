use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use serde::{Deserialize, Serialize};

use super::{from_json, now_utc_rfc3339, to_json};
use crate::entities::{
    Account, Attachment, Card, Emoji, Mention, NotificationType, Poll, Reaction, Status, Tag,
    Visibility,
};

/// `moved` accounts chain through `moved_id`; deeper chains are cut here.
const MAX_MOVED_DEPTH: usize = 4;

pub fn upsert_account(conn: &Connection, account: &Account) -> Result<()> {
    let mut flat = account.clone();
    let moved_id = flat.moved.take().map(|moved| moved.id);
    conn.execute(
        r#"
INSERT INTO account (id, username, acct, display_name, moved_id, payload, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(id) DO UPDATE SET
    username = excluded.username,
    acct = excluded.acct,
    display_name = excluded.display_name,
    moved_id = excluded.moved_id,
    payload = excluded.payload,
    updated_at = excluded.updated_at
"#,
        params![
            flat.id,
            flat.username,
            flat.acct,
            flat.display_name,
            moved_id,
            to_json(&flat)?,
            now_utc_rfc3339()
        ],
    )?;
    Ok(())
}

fn get_flat_account(conn: &Connection, id: &str) -> Result<Option<(Account, Option<String>)>> {
    conn.query_row(
        "SELECT payload, moved_id FROM account WHERE id = ?1",
        params![id],
        |row| {
            let payload: String = row.get(0)?;
            Ok((from_json::<Account>(0, &payload)?, row.get(1)?))
        },
    )
    .optional()
}

/// Loads an account and re-attaches its `moved` chain.
pub fn get_account(conn: &Connection, id: &str) -> Result<Option<Account>> {
    let Some((root, mut next)) = get_flat_account(conn, id)? else {
        return Ok(None);
    };
    let mut seen = HashSet::from([root.id.clone()]);
    let mut chain = vec![root];
    while let Some(moved_id) = next.take() {
        if chain.len() > MAX_MOVED_DEPTH || !seen.insert(moved_id.clone()) {
            break;
        }
        if let Some((moved, moved_next)) = get_flat_account(conn, &moved_id)? {
            chain.push(moved);
            next = moved_next;
        }
    }
    let mut account = chain.pop().expect("chain holds at least the root account");
    while let Some(mut parent) = chain.pop() {
        parent.moved = Some(Box::new(account));
        account = parent;
    }
    Ok(Some(account))
}

pub fn delete_account(conn: &Connection, id: &str) -> Result<usize> {
    let owned = status_ids_where(conn, "account_id = ?1", id)?;
    for status_id in owned {
        delete_status(conn, &status_id)?;
    }
    conn.execute("DELETE FROM notification WHERE account_id = ?1", params![id])?;
    conn.execute("DELETE FROM account WHERE id = ?1", params![id])
}

/// Everything about a status that is not a reference, a mutable flag or a
/// count. Stored as one JSON column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBody {
    pub uri: String,
    pub edited_at: Option<String>,
    pub content: String,
    pub spoiler_text: String,
    pub sensitive: bool,
    pub media_attachments: Vec<Attachment>,
    pub mentions: Vec<Mention>,
    pub tags: Vec<Tag>,
    pub emojis: Vec<Emoji>,
    pub url: Option<String>,
    pub in_reply_to_account_id: Option<String>,
    pub card: Option<Card>,
    pub language: Option<String>,
    pub text: Option<String>,
}

/// A status flattened to one row: the author, reblog target and quote target
/// are ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRecord {
    pub id: String,
    pub created_at: String,
    pub account_id: String,
    pub in_reply_to_id: Option<String>,
    pub reblog_id: Option<String>,
    pub quote_id: Option<String>,
    pub visibility: Visibility,
    pub favourited: bool,
    pub reblogged: bool,
    pub muted: bool,
    pub bookmarked: bool,
    pub pinned: Option<bool>,
    pub reblogs_count: i64,
    pub favourites_count: i64,
    pub replies_count: i64,
    pub poll: Option<Poll>,
    pub body: StatusBody,
}

impl StatusRecord {
    pub fn from_status(status: &Status) -> Self {
        Self {
            id: status.id.clone(),
            created_at: crate::entities::normalize_datetime(Some(&status.created_at))
                .unwrap_or_else(|| status.created_at.clone()),
            account_id: status.account.id.clone(),
            in_reply_to_id: status.in_reply_to_id.clone(),
            reblog_id: status.reblog.as_ref().map(|reblog| reblog.id.clone()),
            quote_id: status.quote.as_ref().map(|quote| quote.id.clone()),
            visibility: status.visibility.clone(),
            favourited: status.favourited,
            reblogged: status.reblogged,
            muted: status.muted,
            bookmarked: status.bookmarked,
            pinned: status.pinned,
            reblogs_count: status.reblogs_count,
            favourites_count: status.favourites_count,
            replies_count: status.replies_count,
            poll: status.poll.clone(),
            body: StatusBody {
                uri: status.uri.clone(),
                edited_at: status.edited_at.clone(),
                content: status.content.clone(),
                spoiler_text: status.spoiler_text.clone(),
                sensitive: status.sensitive,
                media_attachments: status.media_attachments.clone(),
                mentions: status.mentions.clone(),
                tags: status.tags.clone(),
                emojis: status.emojis.clone(),
                url: status.url.clone(),
                in_reply_to_account_id: status.in_reply_to_account_id.clone(),
                card: status.card.clone(),
                language: status.language.clone(),
                text: status.text.clone(),
            },
        }
    }
}

const STATUS_COLUMNS: &str = "id, created_at, account_id, in_reply_to_id, reblog_id, quote_id, \
     visibility, favourited, reblogged, muted, bookmarked, pinned, reblogs_count, \
     favourites_count, replies_count, poll, body";

fn status_from_row(row: &Row<'_>) -> Result<StatusRecord> {
    let visibility: String = row.get(6)?;
    let poll: Option<String> = row.get(15)?;
    let body: String = row.get(16)?;
    Ok(StatusRecord {
        id: row.get(0)?,
        created_at: row.get(1)?,
        account_id: row.get(2)?,
        in_reply_to_id: row.get(3)?,
        reblog_id: row.get(4)?,
        quote_id: row.get(5)?,
        visibility: Visibility::from(visibility),
        favourited: row.get(7)?,
        reblogged: row.get(8)?,
        muted: row.get(9)?,
        bookmarked: row.get(10)?,
        pinned: row.get(11)?,
        reblogs_count: row.get(12)?,
        favourites_count: row.get(13)?,
        replies_count: row.get(14)?,
        poll: poll.map(|raw| from_json(15, &raw)).transpose()?,
        body: from_json(16, &body)?,
    })
}

pub fn upsert_status(conn: &Connection, record: &StatusRecord) -> Result<()> {
    let poll = record.poll.as_ref().map(to_json).transpose()?;
    conn.execute(
        r#"
INSERT INTO status (
    id, created_at, account_id, in_reply_to_id, reblog_id, quote_id, visibility,
    favourited, reblogged, muted, bookmarked, pinned,
    reblogs_count, favourites_count, replies_count, poll, body
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
ON CONFLICT(id) DO UPDATE SET
    created_at = excluded.created_at,
    account_id = excluded.account_id,
    in_reply_to_id = excluded.in_reply_to_id,
    reblog_id = excluded.reblog_id,
    quote_id = excluded.quote_id,
    visibility = excluded.visibility,
    favourited = excluded.favourited,
    reblogged = excluded.reblogged,
    muted = excluded.muted,
    bookmarked = excluded.bookmarked,
    pinned = COALESCE(excluded.pinned, status.pinned),
    reblogs_count = excluded.reblogs_count,
    favourites_count = excluded.favourites_count,
    replies_count = excluded.replies_count,
    poll = excluded.poll,
    body = excluded.body
"#,
        params![
            record.id,
            record.created_at,
            record.account_id,
            record.in_reply_to_id,
            record.reblog_id,
            record.quote_id,
            record.visibility.as_str(),
            record.favourited,
            record.reblogged,
            record.muted,
            record.bookmarked,
            record.pinned,
            record.reblogs_count,
            record.favourites_count,
            record.replies_count,
            poll,
            to_json(&record.body)?
        ],
    )?;
    Ok(())
}

pub fn get_status(conn: &Connection, id: &str) -> Result<Option<StatusRecord>> {
    conn.query_row(
        &format!("SELECT {STATUS_COLUMNS} FROM status WHERE id = ?1"),
        params![id],
        status_from_row,
    )
    .optional()
}

pub fn status_exists(conn: &Connection, id: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM status WHERE id = ?1)",
        params![id],
        |row| row.get(0),
    )
}

/// Direct replies to `id`, oldest first.
pub fn list_replies(conn: &Connection, id: &str) -> Result<Vec<StatusRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STATUS_COLUMNS} FROM status WHERE in_reply_to_id = ?1 ORDER BY created_at, id"
    ))?;
    let rows = stmt.query_map(params![id], status_from_row)?;
    rows.collect()
}

fn status_ids_where(conn: &Connection, predicate: &str, value: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("SELECT id FROM status WHERE {predicate}"))?;
    let rows = stmt.query_map(params![value], |row| row.get(0))?;
    rows.collect()
}

/// Deletes a status together with every reblog of it. Rows go leaf first so
/// each delete fires its own timeline cleanup trigger.
pub fn delete_status(conn: &Connection, id: &str) -> Result<usize> {
    let mut order = Vec::new();
    let mut pending = vec![id.to_string()];
    let mut seen = HashSet::new();
    while let Some(current) = pending.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        pending.extend(status_ids_where(conn, "reblog_id = ?1", &current)?);
        order.push(current);
    }

    let mut deleted = 0;
    for status_id in order.iter().rev() {
        conn.execute(
            "DELETE FROM notification WHERE status_id = ?1",
            params![status_id],
        )?;
        deleted += conn.execute("DELETE FROM status WHERE id = ?1", params![status_id])?;
    }
    Ok(deleted)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFlag {
    Favourited,
    Reblogged,
    Bookmarked,
    Muted,
    Pinned,
}

impl std::str::FromStr for StatusFlag {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "favourited" | "favorited" => Ok(StatusFlag::Favourited),
            "reblogged" => Ok(StatusFlag::Reblogged),
            "bookmarked" => Ok(StatusFlag::Bookmarked),
            "muted" => Ok(StatusFlag::Muted),
            "pinned" => Ok(StatusFlag::Pinned),
            other => Err(format!("unknown status flag '{}'", other)),
        }
    }
}

impl StatusFlag {
    fn column(self) -> &'static str {
        match self {
            StatusFlag::Favourited => "favourited",
            StatusFlag::Reblogged => "reblogged",
            StatusFlag::Bookmarked => "bookmarked",
            StatusFlag::Muted => "muted",
            StatusFlag::Pinned => "pinned",
        }
    }
}

/// Returns the number of rows changed; zero means the status is not cached.
pub fn set_status_flag(conn: &Connection, id: &str, flag: StatusFlag, value: bool) -> Result<usize> {
    conn.execute(
        &format!("UPDATE status SET {} = ?2 WHERE id = ?1", flag.column()),
        params![id, value],
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngagementCounts {
    pub reblogs: i64,
    pub favourites: i64,
    pub replies: i64,
}

pub fn set_status_counts(conn: &Connection, id: &str, counts: EngagementCounts) -> Result<usize> {
    conn.execute(
        r#"
UPDATE status
SET reblogs_count = ?2, favourites_count = ?3, replies_count = ?4
WHERE id = ?1
"#,
        params![id, counts.reblogs, counts.favourites, counts.replies],
    )
}

pub fn set_status_poll(conn: &Connection, id: &str, poll: &Poll) -> Result<usize> {
    conn.execute(
        "UPDATE status SET poll = ?2 WHERE id = ?1",
        params![id, to_json(poll)?],
    )
}

pub fn replace_reactions(conn: &Connection, status_id: &str, reactions: &[Reaction]) -> Result<()> {
    conn.execute(
        "DELETE FROM status_reaction WHERE status_id = ?1",
        params![status_id],
    )?;
    let mut stmt = conn.prepare(
        r#"
INSERT INTO status_reaction (status_id, name, position, count, me, url, static_url)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#,
    )?;
    for (position, reaction) in reactions.iter().enumerate() {
        stmt.execute(params![
            status_id,
            reaction.name,
            position as i64,
            reaction.count,
            reaction.me,
            reaction.url,
            reaction.static_url
        ])?;
    }
    Ok(())
}

pub fn list_reactions(conn: &Connection, status_id: &str) -> Result<Vec<Reaction>> {
    let mut stmt = conn.prepare(
        r#"
SELECT name, count, me, url, static_url
FROM status_reaction
WHERE status_id = ?1
ORDER BY position
"#,
    )?;
    let rows = stmt.query_map(params![status_id], |row| {
        Ok(Reaction {
            name: row.get(0)?,
            count: row.get(1)?,
            me: row.get(2)?,
            url: row.get(3)?,
            static_url: row.get(4)?,
        })
    })?;
    rows.collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationRecord {
    pub id: String,
    pub kind: NotificationType,
    pub created_at: String,
    pub account_id: String,
    pub status_id: Option<String>,
}

pub fn upsert_notification(conn: &Connection, record: &NotificationRecord) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO notification (id, kind, created_at, account_id, status_id)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(id) DO UPDATE SET
    kind = excluded.kind,
    created_at = excluded.created_at,
    account_id = excluded.account_id,
    status_id = excluded.status_id
"#,
        params![
            record.id,
            record.kind.as_str(),
            record.created_at,
            record.account_id,
            record.status_id
        ],
    )?;
    Ok(())
}

pub fn get_notification(conn: &Connection, id: &str) -> Result<Option<NotificationRecord>> {
    conn.query_row(
        "SELECT id, kind, created_at, account_id, status_id FROM notification WHERE id = ?1",
        params![id],
        |row| {
            let kind: String = row.get(1)?;
            Ok(NotificationRecord {
                id: row.get(0)?,
                kind: NotificationType::from(kind),
                created_at: row.get(2)?,
                account_id: row.get(3)?,
                status_id: row.get(4)?,
            })
        },
    )
    .optional()
}

pub fn delete_notification(conn: &Connection, id: &str) -> Result<usize> {
    conn.execute("DELETE FROM notification WHERE id = ?1", params![id])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationRecord {
    pub id: String,
    pub unread: bool,
    pub last_status_id: Option<String>,
    pub account_ids: Vec<String>,
}

pub fn upsert_conversation(conn: &Connection, record: &ConversationRecord) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO conversation (id, unread, last_status_id)
VALUES (?1, ?2, ?3)
ON CONFLICT(id) DO UPDATE SET
    unread = excluded.unread,
    last_status_id = excluded.last_status_id
"#,
        params![record.id, record.unread, record.last_status_id],
    )?;
    conn.execute(
        "DELETE FROM conversation_account WHERE conversation_id = ?1",
        params![record.id],
    )?;
    for (position, account_id) in record.account_ids.iter().enumerate() {
        conn.execute(
            r#"
INSERT OR IGNORE INTO conversation_account (conversation_id, account_id, position)
VALUES (?1, ?2, ?3)
"#,
            params![record.id, account_id, position as i64],
        )?;
    }
    Ok(())
}

pub fn get_conversation(conn: &Connection, id: &str) -> Result<Option<ConversationRecord>> {
    let head: Option<(bool, Option<String>)> = conn
        .query_row(
            "SELECT unread, last_status_id FROM conversation WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((unread, last_status_id)) = head else {
        return Ok(None);
    };
    let mut stmt = conn.prepare(
        "SELECT account_id FROM conversation_account WHERE conversation_id = ?1 ORDER BY position",
    )?;
    let account_ids = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<Result<Vec<String>>>()?;
    Ok(Some(ConversationRecord {
        id: id.to_string(),
        unread,
        last_status_id,
        account_ids,
    }))
}

pub fn replace_pinned(conn: &Connection, account_id: &str, status_ids: &[String]) -> Result<()> {
    conn.execute(
        "DELETE FROM pinned_status WHERE account_id = ?1",
        params![account_id],
    )?;
    for (position, status_id) in status_ids.iter().enumerate() {
        conn.execute(
            "INSERT OR IGNORE INTO pinned_status (account_id, status_id, position) VALUES (?1, ?2, ?3)",
            params![account_id, status_id, position as i64],
        )?;
    }
    Ok(())
}

pub fn list_pinned(conn: &Connection, account_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT status_id FROM pinned_status WHERE account_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![account_id], |row| row.get(0))?;
    rows.collect()
}
