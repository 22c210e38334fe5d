use std::fmt;

use serde::{Deserialize, Serialize};

use super::decode::null_default;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FilterContext {
    Home,
    Notifications,
    Public,
    Thread,
    Account,
    Unknown(String),
}

impl FilterContext {
    pub fn as_str(&self) -> &str {
        match self {
            FilterContext::Home => "home",
            FilterContext::Notifications => "notifications",
            FilterContext::Public => "public",
            FilterContext::Thread => "thread",
            FilterContext::Account => "account",
            FilterContext::Unknown(raw) => raw,
        }
    }
}

impl From<String> for FilterContext {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "home" => FilterContext::Home,
            "notifications" => FilterContext::Notifications,
            "public" => FilterContext::Public,
            "thread" => FilterContext::Thread,
            "account" => FilterContext::Account,
            _ => FilterContext::Unknown(value),
        }
    }
}

impl From<FilterContext> for String {
    fn from(value: FilterContext) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for FilterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FilterAction {
    Warn,
    Hide,
    /// Evaluated as `Warn`: an unknown action never hides content outright.
    Unknown(String),
}

impl FilterAction {
    pub fn as_str(&self) -> &str {
        match self {
            FilterAction::Warn => "warn",
            FilterAction::Hide => "hide",
            FilterAction::Unknown(raw) => raw,
        }
    }

    pub fn hides(&self) -> bool {
        matches!(self, FilterAction::Hide)
    }
}

impl From<String> for FilterAction {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "warn" => FilterAction::Warn,
            "hide" => FilterAction::Hide,
            _ => FilterAction::Unknown(value),
        }
    }
}

impl From<FilterAction> for String {
    fn from(value: FilterAction) -> Self {
        value.as_str().to_string()
    }
}

/// One matchable pattern. A v2 filter with several keywords expands to one
/// rule per keyword, all sharing `filter_id`. A v2 filter without keywords
/// becomes one rule with an empty phrase, which applies only where the server
/// reported a match for the filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    pub id: String,
    pub filter_id: String,
    pub phrase: String,
    pub whole_word: bool,
    pub contexts: Vec<FilterContext>,
    pub expires_at: Option<String>,
    pub action: FilterAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterKeyword {
    #[serde(default)]
    pub id: Option<String>,
    pub keyword: String,
    #[serde(default, deserialize_with = "null_default")]
    pub whole_word: bool,
}

/// Either API generation of filters, as fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterPayload {
    V2 {
        id: String,
        #[serde(default, deserialize_with = "null_default")]
        title: String,
        context: Vec<FilterContext>,
        #[serde(default)]
        expires_at: Option<String>,
        filter_action: FilterAction,
        #[serde(default, deserialize_with = "null_default")]
        keywords: Vec<FilterKeyword>,
    },
    V1 {
        id: String,
        phrase: String,
        context: Vec<FilterContext>,
        #[serde(default)]
        expires_at: Option<String>,
        #[serde(default, deserialize_with = "null_default")]
        irreversible: bool,
        #[serde(default, deserialize_with = "null_default")]
        whole_word: bool,
    },
}

impl FilterPayload {
    pub fn id(&self) -> &str {
        match self {
            FilterPayload::V2 { id, .. } | FilterPayload::V1 { id, .. } => id,
        }
    }

    pub fn into_rules(self) -> Vec<FilterRule> {
        match self {
            FilterPayload::V2 {
                id,
                context,
                expires_at,
                filter_action,
                keywords,
                ..
            } if keywords.is_empty() => vec![FilterRule {
                id: format!("{}#server", id),
                filter_id: id,
                phrase: String::new(),
                whole_word: false,
                contexts: context,
                expires_at,
                action: filter_action,
            }],
            FilterPayload::V2 {
                id,
                context,
                expires_at,
                filter_action,
                keywords,
                ..
            } => keywords
                .into_iter()
                .enumerate()
                .map(|(index, keyword)| FilterRule {
                    id: keyword
                        .id
                        .unwrap_or_else(|| format!("{}#{}", id, index)),
                    filter_id: id.clone(),
                    phrase: keyword.keyword,
                    whole_word: keyword.whole_word,
                    contexts: context.clone(),
                    expires_at: expires_at.clone(),
                    action: filter_action.clone(),
                })
                .collect(),
            FilterPayload::V1 {
                id,
                phrase,
                context,
                expires_at,
                irreversible,
                whole_word,
            } => vec![FilterRule {
                id: id.clone(),
                filter_id: id,
                phrase,
                whole_word,
                contexts: context,
                expires_at,
                action: if irreversible {
                    FilterAction::Hide
                } else {
                    FilterAction::Warn
                },
            }],
        }
    }
}
