use serde::{Deserialize, Serialize};

use super::account::Account;
use super::decode::null_default;
use super::status::Status;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationType {
    Follow,
    FollowRequest,
    Mention,
    Reblog,
    Favourite,
    Poll,
    Status,
    Update,
    Reaction,
    AdminSignUp,
    AdminReport,
    Unknown(String),
}

impl NotificationType {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationType::Follow => "follow",
            NotificationType::FollowRequest => "follow_request",
            NotificationType::Mention => "mention",
            NotificationType::Reblog => "reblog",
            NotificationType::Favourite => "favourite",
            NotificationType::Poll => "poll",
            NotificationType::Status => "status",
            NotificationType::Update => "update",
            NotificationType::Reaction => "reaction",
            NotificationType::AdminSignUp => "admin.sign_up",
            NotificationType::AdminReport => "admin.report",
            NotificationType::Unknown(raw) => raw,
        }
    }
}

impl From<String> for NotificationType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "follow" => NotificationType::Follow,
            "follow_request" => NotificationType::FollowRequest,
            "mention" => NotificationType::Mention,
            "reblog" => NotificationType::Reblog,
            "favourite" => NotificationType::Favourite,
            "poll" => NotificationType::Poll,
            "status" => NotificationType::Status,
            "update" => NotificationType::Update,
            // Akkoma and Pleroma send `pleroma:emoji_reaction`.
            "reaction" | "pleroma:emoji_reaction" | "emoji_reaction" => NotificationType::Reaction,
            "admin.sign_up" => NotificationType::AdminSignUp,
            "admin.report" => NotificationType::AdminReport,
            _ => {
                tracing::warn!(notification_type = %value, "unrecognized notification type");
                NotificationType::Unknown(value)
            }
        }
    }
}

impl From<NotificationType> for String {
    fn from(value: NotificationType) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub created_at: String,
    pub account: Account,
    #[serde(default)]
    pub status: Option<Status>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default, deserialize_with = "null_default")]
    pub unread: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub last_status: Option<Status>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: String,
    #[serde(default, deserialize_with = "null_default")]
    pub content: String,
    #[serde(default)]
    pub starts_at: Option<String>,
    #[serde(default)]
    pub ends_at: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub read: bool,
}
