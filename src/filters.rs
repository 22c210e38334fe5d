use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use time::OffsetDateTime;

use crate::db::StatusRecord;
use crate::entities::{parse_datetime, FilterContext, FilterRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    None,
    Warn,
    Hide,
}

/// The text a rule is matched against: stripped body, content warning, poll
/// option titles and media descriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchableText {
    fields: Vec<String>,
}

impl SearchableText {
    pub fn from_record(record: &StatusRecord) -> Self {
        let mut fields = vec![strip_html(&record.body.content)];
        if !record.body.spoiler_text.is_empty() {
            fields.push(record.body.spoiler_text.clone());
        }
        if let Some(poll) = &record.poll {
            fields.extend(poll.options.iter().map(|option| option.title.clone()));
        }
        fields.extend(
            record
                .body
                .media_attachments
                .iter()
                .filter_map(|attachment| attachment.description.clone()),
        );
        Self { fields }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

enum Matcher {
    Substring(String),
    Pattern(Regex),
}

impl Matcher {
    fn new(phrase: &str, whole_word: bool) -> Self {
        if !whole_word || phrase.is_empty() {
            return Matcher::Substring(phrase.to_lowercase());
        }
        let escaped = regex::escape(phrase);
        // Boundaries only make sense next to word characters.
        let leading = if phrase.chars().next().is_some_and(is_word_char) { r"\b" } else { "" };
        let trailing = if phrase.chars().last().is_some_and(is_word_char) { r"\b" } else { "" };
        match RegexBuilder::new(&format!("{leading}{escaped}{trailing}"))
            .case_insensitive(true)
            .build()
        {
            Ok(regex) => Matcher::Pattern(regex),
            Err(err) => {
                tracing::warn!(phrase, error = %err, "falling back to substring filter match");
                Matcher::Substring(phrase.to_lowercase())
            }
        }
    }

    fn is_match(&self, text: &str) -> bool {
        match self {
            Matcher::Substring(needle) => !needle.is_empty() && text.to_lowercase().contains(needle),
            Matcher::Pattern(regex) => regex.is_match(text),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

struct CompiledRule {
    rule: FilterRule,
    expires_at: Option<OffsetDateTime>,
    matcher: Matcher,
}

impl CompiledRule {
    fn active(&self, context: &FilterContext, now: OffsetDateTime) -> bool {
        self.expires_at.map_or(true, |expiry| now < expiry) && self.rule.contexts.contains(context)
    }
}

/// Rules compiled once per query. Verdicts are never stored: the same status
/// can be hidden in one context and visible in another, and rules expire.
pub struct FilterSet {
    rules: Vec<CompiledRule>,
}

impl FilterSet {
    pub fn compile(rules: &[FilterRule]) -> Self {
        let rules = rules
            .iter()
            .map(|rule| {
                let expires_at = rule.expires_at.as_deref().and_then(|raw| {
                    let parsed = parse_datetime(raw);
                    if parsed.is_none() {
                        tracing::warn!(rule_id = %rule.id, expires_at = raw, "ignoring unparsable filter expiry");
                    }
                    parsed
                });
                CompiledRule {
                    matcher: Matcher::new(&rule.phrase, rule.whole_word),
                    expires_at,
                    rule: rule.clone(),
                }
            })
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules that apply to this status in `context` at `now`. A rule applies
    /// when its pattern matches or the server reported a match for its filter.
    pub fn matching<'s>(
        &'s self,
        text: &SearchableText,
        server_matches: &[String],
        context: &FilterContext,
        now: OffsetDateTime,
    ) -> Vec<&'s FilterRule> {
        self.rules
            .iter()
            .filter(|compiled| compiled.active(context, now))
            .filter(|compiled| {
                server_matches.contains(&compiled.rule.filter_id)
                    || text.fields().iter().any(|field| compiled.matcher.is_match(field))
            })
            .map(|compiled| &compiled.rule)
            .collect()
    }

    pub fn verdict(
        &self,
        text: &SearchableText,
        server_matches: &[String],
        context: &FilterContext,
        now: OffsetDateTime,
    ) -> Verdict {
        verdict_of(&self.matching(text, server_matches, context, now))
    }
}

pub fn verdict_of(rules: &[&FilterRule]) -> Verdict {
    if rules.iter().any(|rule| rule.action.hides()) {
        Verdict::Hide
    } else if rules.is_empty() {
        Verdict::None
    } else {
        Verdict::Warn
    }
}

pub fn evaluate(
    status: &StatusRecord,
    context: &FilterContext,
    now: OffsetDateTime,
    rules: &[FilterRule],
) -> Verdict {
    FilterSet::compile(rules).verdict(&SearchableText::from_record(status), &[], context, now)
}

fn tag_pattern() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid regex"))
}

/// Reduces post HTML to plain text for matching. Tags become spaces so that
/// words in adjacent paragraphs do not fuse.
pub fn strip_html(html: &str) -> String {
    let text = tag_pattern().replace_all(html, " ");
    let decoded = text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests;
