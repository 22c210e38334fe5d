use std::collections::HashSet;

use crate::db::{self, ConversationRecord, NotificationRecord, StatusRecord};
use crate::entities::{
    normalize_datetime, Account, Conversation, FilterContext, Notification, Status,
};
use crate::store::{StoreError, Table, WriteTx};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub accounts: usize,
    pub statuses: usize,
    pub notifications: usize,
    pub conversations: usize,
    pub duplicate_reactions: usize,
}

/// Work items for the explicit stack. An entity is expanded into "save my
/// dependencies, then write my row" so nesting depth never grows the call
/// stack.
enum Frame<'e> {
    Account(&'e Account),
    AccountRow(&'e Account),
    Status(&'e Status),
    StatusRow(&'e Status),
    NotificationRow(&'e Notification),
    ConversationRow(&'e Conversation),
}

/// Flattens decoded entity graphs into rows inside one write transaction.
/// Every referenced entity is written before the row that references it:
/// moved-to account, account, quoted status, reblogged status, then the
/// entity itself. An entity id seen twice in one batch is written once.
pub struct Normalizer<'w, 'tx> {
    tx: &'w mut WriteTx<'tx>,
    context: Option<FilterContext>,
    accounts: HashSet<String>,
    statuses: HashSet<String>,
    stats: NormalizeStats,
}

impl<'w, 'tx> Normalizer<'w, 'tx> {
    pub fn new(tx: &'w mut WriteTx<'tx>, context: Option<FilterContext>) -> Self {
        Self {
            tx,
            context,
            accounts: HashSet::new(),
            statuses: HashSet::new(),
            stats: NormalizeStats::default(),
        }
    }

    pub fn stats(&self) -> NormalizeStats {
        self.stats
    }

    pub fn save_account(&mut self, account: &Account) -> Result<(), StoreError> {
        self.drain(vec![Frame::Account(account)])
    }

    pub fn save_status(&mut self, status: &Status) -> Result<(), StoreError> {
        self.drain(vec![Frame::Status(status)])
    }

    pub fn save_statuses(&mut self, statuses: &[Status]) -> Result<(), StoreError> {
        for status in statuses {
            self.save_status(status)?;
        }
        Ok(())
    }

    pub fn save_notification(&mut self, notification: &Notification) -> Result<(), StoreError> {
        let mut stack = vec![Frame::NotificationRow(notification)];
        if let Some(status) = &notification.status {
            stack.push(Frame::Status(status));
        }
        stack.push(Frame::Account(&notification.account));
        // Notification statuses are filtered in the notifications context.
        let previous = self.context.replace(FilterContext::Notifications);
        let result = self.drain(stack);
        self.context = previous;
        result
    }

    pub fn save_conversation(&mut self, conversation: &Conversation) -> Result<(), StoreError> {
        let mut stack = vec![Frame::ConversationRow(conversation)];
        if let Some(status) = &conversation.last_status {
            stack.push(Frame::Status(status));
        }
        stack.extend(conversation.accounts.iter().rev().map(Frame::Account));
        self.drain(stack)
    }

    fn drain<'e>(&mut self, mut stack: Vec<Frame<'e>>) -> Result<(), StoreError> {
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Account(account) => {
                    if !self.accounts.insert(account.id.clone()) {
                        continue;
                    }
                    stack.push(Frame::AccountRow(account));
                    if let Some(moved) = account.moved.as_deref() {
                        stack.push(Frame::Account(moved));
                    }
                }
                Frame::AccountRow(account) => self.write_account(account)?,
                Frame::Status(status) => {
                    if !self.statuses.insert(status.id.clone()) {
                        continue;
                    }
                    // Popped in reverse: account, quote, reblog, own row.
                    stack.push(Frame::StatusRow(status));
                    if let Some(reblog) = status.reblog.as_deref() {
                        stack.push(Frame::Status(reblog));
                    }
                    if let Some(quote) = status.quote.as_deref() {
                        stack.push(Frame::Status(quote));
                    }
                    stack.push(Frame::Account(&status.account));
                }
                Frame::StatusRow(status) => self.write_status(status)?,
                Frame::NotificationRow(notification) => self.write_notification(notification)?,
                Frame::ConversationRow(conversation) => self.write_conversation(conversation)?,
            }
        }
        Ok(())
    }

    fn write_account(&mut self, account: &Account) -> Result<(), StoreError> {
        db::upsert_account(self.tx.conn(), account)?;
        self.tx.touch(Table::Account);
        self.stats.accounts += 1;
        Ok(())
    }

    fn write_status(&mut self, status: &Status) -> Result<(), StoreError> {
        let conn = self.tx.conn();
        db::upsert_status(conn, &StatusRecord::from_status(status))?;

        let reactions = status.deduplicated_reactions();
        self.stats.duplicate_reactions += status.unified_reactions().len() - reactions.len();
        db::replace_reactions(conn, &status.id, &reactions)?;

        if let Some(context) = &self.context {
            let matched: Vec<String> = status
                .filtered
                .iter()
                .map(|result| result.filter.id.clone())
                .collect();
            db::replace_server_filter_matches(conn, &status.id, context, &matched)?;
        }
        tracing::debug!(status_id = %status.id, "saved status");
        self.tx.touch(Table::Status);
        self.stats.statuses += 1;
        Ok(())
    }

    fn write_notification(&mut self, notification: &Notification) -> Result<(), StoreError> {
        let record = NotificationRecord {
            id: notification.id.clone(),
            kind: notification.kind.clone(),
            created_at: normalize_datetime(Some(&notification.created_at))
                .unwrap_or_else(|| notification.created_at.clone()),
            account_id: notification.account.id.clone(),
            status_id: notification.status.as_ref().map(|status| status.id.clone()),
        };
        db::upsert_notification(self.tx.conn(), &record)?;
        self.tx.touch(Table::Notification);
        self.stats.notifications += 1;
        Ok(())
    }

    fn write_conversation(&mut self, conversation: &Conversation) -> Result<(), StoreError> {
        let record = ConversationRecord {
            id: conversation.id.clone(),
            unread: conversation.unread,
            last_status_id: conversation.last_status.as_ref().map(|status| status.id.clone()),
            account_ids: conversation
                .accounts
                .iter()
                .map(|account| account.id.clone())
                .collect(),
        };
        db::upsert_conversation(self.tx.conn(), &record)?;
        self.tx.touch(Table::Conversation);
        self.stats.conversations += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
