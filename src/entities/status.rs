use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::account::{Account, Emoji};
use super::decode::null_default;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
    Private,
    /// GotoSocial only, and only when authoring.
    MutualsOnly,
    Direct,
    Unknown(String),
}

impl Visibility {
    pub fn as_str(&self) -> &str {
        match self {
            Visibility::Public => "public",
            Visibility::Unlisted => "unlisted",
            Visibility::Private => "private",
            Visibility::MutualsOnly => "mutuals_only",
            Visibility::Direct => "direct",
            Visibility::Unknown(raw) => raw,
        }
    }
}

impl From<String> for Visibility {
    fn from(value: String) -> Self {
        match value.as_str() {
            "public" => Visibility::Public,
            "unlisted" => Visibility::Unlisted,
            "private" => Visibility::Private,
            "mutuals_only" => Visibility::MutualsOnly,
            "direct" => Visibility::Direct,
            _ => {
                tracing::warn!(visibility = %value, "unrecognized status visibility");
                Visibility::Unknown(value)
            }
        }
    }
}

impl From<Visibility> for String {
    fn from(value: Visibility) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AttachmentType {
    Image,
    Video,
    Gifv,
    Audio,
    Unknown(String),
}

impl From<String> for AttachmentType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "image" => AttachmentType::Image,
            "video" => AttachmentType::Video,
            "gifv" => AttachmentType::Gifv,
            "audio" => AttachmentType::Audio,
            _ => AttachmentType::Unknown(value),
        }
    }
}

impl From<AttachmentType> for String {
    fn from(value: AttachmentType) -> Self {
        match value {
            AttachmentType::Image => "image".to_string(),
            AttachmentType::Video => "video".to_string(),
            AttachmentType::Gifv => "gifv".to_string(),
            AttachmentType::Audio => "audio".to_string(),
            AttachmentType::Unknown(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AttachmentType,
    #[serde(default, deserialize_with = "null_default")]
    pub url: String,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub blurhash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub id: String,
    pub username: String,
    pub acct: String,
    #[serde(default, deserialize_with = "null_default")]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub url: String,
    #[serde(default)]
    pub following: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub url: String,
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_default")]
    pub description: String,
    #[serde(rename = "type", default, deserialize_with = "null_default")]
    pub kind: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub provider_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub title: String,
    #[serde(default, deserialize_with = "null_default")]
    pub votes_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub expired: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub multiple: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub votes_count: i64,
    #[serde(default)]
    pub voters_count: Option<i64>,
    #[serde(default, deserialize_with = "null_default")]
    pub voted: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub own_votes: Vec<i64>,
    pub options: Vec<PollOption>,
    #[serde(default, deserialize_with = "null_default")]
    pub emojis: Vec<Emoji>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reaction {
    pub name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub count: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub me: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub static_url: Option<String>,
}

/// Server-side filter match attached to a status (`filtered` on Mastodon 4+).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFilterResult {
    pub filter: ServerFilterRef,
    #[serde(default, deserialize_with = "null_default")]
    pub keyword_matches: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFilterRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub id: String,
    #[serde(default, deserialize_with = "null_default")]
    pub uri: String,
    pub created_at: String,
    #[serde(default)]
    pub edited_at: Option<String>,
    pub account: Account,
    #[serde(default, deserialize_with = "null_default")]
    pub content: String,
    #[serde(default, deserialize_with = "null_default")]
    pub visibility: Visibility,
    #[serde(default, deserialize_with = "null_default")]
    pub sensitive: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub spoiler_text: String,
    #[serde(default, deserialize_with = "null_default")]
    pub media_attachments: Vec<Attachment>,
    #[serde(default, deserialize_with = "null_default")]
    pub mentions: Vec<Mention>,
    #[serde(default, deserialize_with = "null_default")]
    pub tags: Vec<Tag>,
    #[serde(default, deserialize_with = "null_default")]
    pub emojis: Vec<Emoji>,
    #[serde(default, deserialize_with = "null_default")]
    pub reblogs_count: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub favourites_count: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub replies_count: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub in_reply_to_id: Option<String>,
    #[serde(default)]
    pub in_reply_to_account_id: Option<String>,
    /// Treehouse, Fedibird and Firefish embed quoted posts.
    #[serde(default)]
    pub quote: Option<Box<Status>>,
    #[serde(default)]
    pub reblog: Option<Box<Status>>,
    #[serde(default)]
    pub poll: Option<Poll>,
    #[serde(default)]
    pub card: Option<Card>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub favourited: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub reblogged: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub muted: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub bookmarked: bool,
    #[serde(default)]
    pub pinned: Option<bool>,
    #[serde(default, deserialize_with = "null_default")]
    pub reactions: Vec<Reaction>,
    /// Firefish and Akkoma spell it this way; Sharkey sends both.
    #[serde(default, deserialize_with = "null_default")]
    pub emoji_reactions: Vec<Reaction>,
    #[serde(default, deserialize_with = "null_default")]
    pub filtered: Vec<ServerFilterResult>,
}

impl Status {
    pub fn unified_reactions(&self) -> &[Reaction] {
        if self.reactions.is_empty() {
            &self.emoji_reactions
        } else {
            &self.reactions
        }
    }

    /// Reactions reduced to one entry per name, first occurrence wins.
    pub fn deduplicated_reactions(&self) -> Vec<Reaction> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for reaction in self.unified_reactions() {
            if seen.insert(reaction.name.as_str()) {
                result.push(reaction.clone());
            }
        }
        if result.len() != self.unified_reactions().len() {
            tracing::warn!(
                status_id = %self.id,
                raw = self.unified_reactions().len(),
                kept = result.len(),
                "dropped duplicate reactions from upstream payload"
            );
        }
        result
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, deserialize_with = "null_default")]
    pub ancestors: Vec<Status>,
    #[serde(default, deserialize_with = "null_default")]
    pub descendants: Vec<Status>,
}
