use serde::{Deserialize, Serialize};

use super::decode::null_default;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Emoji {
    pub shortcode: String,
    pub url: String,
    #[serde(default, deserialize_with = "null_default")]
    pub static_url: String,
    #[serde(default = "default_true")]
    pub visible_in_picker: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub verified_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub acct: String,
    #[serde(default, deserialize_with = "null_default")]
    pub display_name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub locked: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub created_at: String,
    #[serde(default, deserialize_with = "null_default")]
    pub followers_count: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub following_count: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub statuses_count: i64,
    #[serde(default)]
    pub last_status_at: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub note: String,
    #[serde(default, deserialize_with = "null_default")]
    pub url: String,
    #[serde(default, deserialize_with = "null_default")]
    pub avatar: String,
    #[serde(default, deserialize_with = "null_default")]
    pub avatar_static: String,
    #[serde(default, deserialize_with = "null_default")]
    pub header: String,
    #[serde(default, deserialize_with = "null_default")]
    pub header_static: String,
    #[serde(default, deserialize_with = "null_default")]
    pub fields: Vec<AccountField>,
    #[serde(default, deserialize_with = "null_default")]
    pub emojis: Vec<Emoji>,
    #[serde(default, deserialize_with = "null_default")]
    pub bot: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub group: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub suspended: bool,
    #[serde(default, deserialize_with = "null_default")]
    pub limited: bool,
    #[serde(default)]
    pub moved: Option<Box<Account>>,
}

impl Account {
    /// Some servers omit the static variants; fall back to the animated URL.
    pub fn unified_avatar_static(&self) -> &str {
        if self.avatar_static.is_empty() {
            &self.avatar
        } else {
            &self.avatar_static
        }
    }

    pub fn unified_header_static(&self) -> &str {
        if self.header_static.is_empty() {
            &self.header
        } else {
            &self.header_static
        }
    }
}
