use std::collections::{HashMap, HashSet};

use rusqlite::Connection;
use serde::Serialize;

use crate::db::{self, StatusRecord};
use crate::entities::{Context, FilterContext, Status};
use crate::normalize::{NormalizeStats, Normalizer};
use crate::store::{StoreError, WriteTx};
use crate::timeline::{self, TimelineKey};

/// Per-item flags for a rendered thread, derived from neighbours only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContextFlags {
    pub is_context_parent: bool,
    pub is_reply_in_context: bool,
    pub has_reply_following: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRecords {
    pub ancestors: Vec<StatusRecord>,
    pub parent: StatusRecord,
    pub descendants: Vec<StatusRecord>,
}

impl ThreadRecords {
    pub fn ids(&self) -> Vec<String> {
        self.ancestors
            .iter()
            .chain(std::iter::once(&self.parent))
            .chain(&self.descendants)
            .map(|record| record.id.clone())
            .collect()
    }
}

/// A status as the flags see it: its id and the id it replies to.
pub type Link<'a> = (&'a str, Option<&'a str>);

/// Flags for the three thread sections: ancestors, parent, descendants.
/// Neighbours are looked up inside a section. Across sections the parent
/// pairs with the last ancestor, and a first descendant answering the parent
/// marks the parent as having a reply following.
pub fn adjacency_flags(sections: &[Vec<Link<'_>>; 3], parent_id: &str) -> [Vec<ContextFlags>; 3] {
    let mut flags: [Vec<ContextFlags>; 3] =
        std::array::from_fn(|index| section_flags(&sections[index], parent_id));

    let [ancestors, parent, descendants] = sections;
    if let (Some((last_id, _)), Some((_, reply_to))) = (ancestors.last(), parent.first()) {
        if *reply_to == Some(*last_id) {
            if let Some(flag) = flags[1].first_mut() {
                flag.is_reply_in_context = true;
            }
            if let Some(flag) = flags[0].last_mut() {
                flag.has_reply_following = true;
            }
        }
    }
    if let (Some((id, _)), Some((_, reply_to))) = (parent.last(), descendants.first()) {
        if *reply_to == Some(*id) {
            if let Some(flag) = flags[1].last_mut() {
                flag.has_reply_following = true;
            }
        }
    }
    flags
}

fn section_flags(section: &[Link<'_>], parent_id: &str) -> Vec<ContextFlags> {
    section
        .iter()
        .enumerate()
        .map(|(index, (id, in_reply_to))| {
            let previous = index.checked_sub(1).map(|prev| section[prev].0);
            let next_reply_to = section.get(index + 1).and_then(|(_, reply_to)| *reply_to);
            ContextFlags {
                is_context_parent: *id == parent_id,
                is_reply_in_context: previous.is_some() && *in_reply_to == previous,
                has_reply_following: next_reply_to == Some(*id),
            }
        })
        .collect()
}

/// Walks the reply chain up from `parent_id` and the reply tree down from it.
/// Siblings follow the server's context order when one was saved, then
/// creation time.
pub fn load_thread(conn: &Connection, parent_id: &str) -> Result<Option<ThreadRecords>, StoreError> {
    let Some(parent) = db::get_status(conn, parent_id)? else {
        return Ok(None);
    };

    let mut seen = HashSet::from([parent.id.clone()]);
    let mut ancestors = Vec::new();
    let mut next = parent.in_reply_to_id.clone();
    while let Some(id) = next.take() {
        if !seen.insert(id.clone()) {
            tracing::warn!(status_id = %id, "reply chain loops back on itself");
            break;
        }
        let Some(record) = db::get_status(conn, &id)? else {
            break;
        };
        next = record.in_reply_to_id.clone();
        ancestors.push(record);
    }
    ancestors.reverse();

    let server_order: HashMap<String, usize> =
        timeline::load_sequence(conn, &TimelineKey::ThreadContext(parent.id.clone()))?
            .ids()
            .enumerate()
            .map(|(position, id)| (id.to_string(), position))
            .collect();

    let mut descendants = Vec::new();
    let mut stack = vec![sorted_replies(conn, &parent.id, &server_order)?];
    while let Some(siblings) = stack.last_mut() {
        let Some(record) = siblings.pop() else {
            stack.pop();
            continue;
        };
        if !seen.insert(record.id.clone()) {
            continue;
        }
        let children = sorted_replies(conn, &record.id, &server_order)?;
        descendants.push(record);
        stack.push(children);
    }

    Ok(Some(ThreadRecords {
        ancestors,
        parent,
        descendants,
    }))
}

/// Replies in reverse display order, ready to be popped.
fn sorted_replies(
    conn: &Connection,
    id: &str,
    server_order: &HashMap<String, usize>,
) -> Result<Vec<StatusRecord>, StoreError> {
    let mut replies = db::list_replies(conn, id)?;
    replies.sort_by(|a, b| {
        let rank = |record: &StatusRecord| server_order.get(&record.id).copied().unwrap_or(usize::MAX);
        rank(a)
            .cmp(&rank(b))
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| timeline::compare_ids(&a.id, &b.id))
    });
    replies.reverse();
    Ok(replies)
}

/// Persists a fetched context and records the server's thread order.
pub fn save_context(
    tx: &mut WriteTx<'_>,
    parent: &Status,
    context: &Context,
) -> Result<NormalizeStats, StoreError> {
    let stats = {
        let mut normalizer = Normalizer::new(tx, Some(FilterContext::Thread));
        normalizer.save_statuses(&context.ancestors)?;
        normalizer.save_status(parent)?;
        normalizer.save_statuses(&context.descendants)?;
        normalizer.stats()
    };
    let order = context
        .ancestors
        .iter()
        .chain(std::iter::once(parent))
        .chain(&context.descendants)
        .map(|status| status.id.clone())
        .collect();
    timeline::replace_sequence(tx, &TimelineKey::ThreadContext(parent.id.clone()), order)?;
    Ok(stats)
}
