use serde_json::json;
use time::macros::datetime;
use time::OffsetDateTime;

use super::{evaluate, strip_html, verdict_of, FilterSet, SearchableText, Verdict};
use crate::db::StatusRecord;
use crate::entities::{FilterAction, FilterContext, FilterPayload, FilterRule};
use crate::test_support::status_with;

const NOW: OffsetDateTime = datetime!(2024-03-02 00:00 UTC);

fn rule(phrase: &str, whole_word: bool, action: FilterAction) -> FilterRule {
    FilterRule {
        id: format!("rule-{phrase}"),
        filter_id: format!("filter-{phrase}"),
        phrase: phrase.to_string(),
        whole_word,
        contexts: vec![FilterContext::Home, FilterContext::Public],
        expires_at: None,
        action,
    }
}

fn record(content: &str) -> StatusRecord {
    StatusRecord::from_status(&status_with("1", "a", json!({ "content": content })))
}

#[test]
fn substring_rules_match_inside_words() {
    let rules = [rule("cat", false, FilterAction::Hide)];
    assert_eq!(
        evaluate(&record("<p>Concatenate</p>"), &FilterContext::Home, NOW, &rules),
        Verdict::Hide
    );
}

#[test]
fn whole_word_rules_need_word_boundaries() {
    let rules = [rule("cat", true, FilterAction::Hide)];
    assert_eq!(
        evaluate(&record("<p>Concatenate</p>"), &FilterContext::Home, NOW, &rules),
        Verdict::None
    );
    assert_eq!(
        evaluate(&record("<p>my CAT, again</p>"), &FilterContext::Home, NOW, &rules),
        Verdict::Hide
    );
}

#[test]
fn whole_word_phrases_with_punctuation_still_match() {
    let rules = [rule("#rustlang", true, FilterAction::Warn)];
    assert_eq!(
        evaluate(&record("<p>hello #rustlang!</p>"), &FilterContext::Home, NOW, &rules),
        Verdict::Warn
    );
}

#[test]
fn expired_rules_are_ignored() {
    let mut expired = rule("cat", false, FilterAction::Hide);
    expired.expires_at = Some("2024-03-01T00:00:00Z".to_string());
    let mut live = rule("dog", false, FilterAction::Hide);
    live.expires_at = Some("2024-04-01T00:00:00Z".to_string());
    let rules = [expired, live];

    assert_eq!(
        evaluate(&record("<p>cat</p>"), &FilterContext::Home, NOW, &rules),
        Verdict::None
    );
    assert_eq!(
        evaluate(&record("<p>dog</p>"), &FilterContext::Home, NOW, &rules),
        Verdict::Hide
    );
}

#[test]
fn verdicts_depend_on_the_context() {
    let rules = [rule("cat", false, FilterAction::Hide)];
    let status = record("<p>cat</p>");
    assert_eq!(evaluate(&status, &FilterContext::Public, NOW, &rules), Verdict::Hide);
    assert_eq!(evaluate(&status, &FilterContext::Thread, NOW, &rules), Verdict::None);
    assert_eq!(
        evaluate(&status, &FilterContext::Notifications, NOW, &rules),
        Verdict::None
    );
}

#[test]
fn hide_wins_over_warn_and_unknown_actions_warn() {
    let warn = rule("cat", false, FilterAction::Warn);
    let hide = rule("cat", false, FilterAction::Hide);
    let odd = rule("cat", false, FilterAction::Unknown("blur".to_string()));
    let status = record("<p>cat</p>");

    assert_eq!(
        evaluate(&status, &FilterContext::Home, NOW, &[warn.clone(), hide]),
        Verdict::Hide
    );
    assert_eq!(evaluate(&status, &FilterContext::Home, NOW, &[warn]), Verdict::Warn);
    assert_eq!(evaluate(&status, &FilterContext::Home, NOW, &[odd]), Verdict::Warn);
    assert_eq!(verdict_of(&[]), Verdict::None);
}

#[test]
fn content_warnings_polls_and_media_descriptions_are_searched() {
    let status = StatusRecord::from_status(&status_with(
        "1",
        "a",
        json!({
            "content": "<p>nothing here</p>",
            "spoiler_text": "spoilers",
            "poll": {
                "id": "p1",
                "options": [{ "title": "pineapple" }, { "title": "ham" }]
            },
            "media_attachments": [
                { "id": "m1", "type": "image", "url": "https://img", "description": "a sunset" }
            ]
        }),
    ));
    let text = SearchableText::from_record(&status);
    assert_eq!(
        text.fields(),
        ["nothing here", "spoilers", "pineapple", "ham", "a sunset"]
    );

    for phrase in ["spoilers", "pineapple", "sunset"] {
        let rules = [rule(phrase, true, FilterAction::Warn)];
        assert_eq!(
            evaluate(&status, &FilterContext::Home, NOW, &rules),
            Verdict::Warn,
            "{phrase} should match"
        );
    }
}

#[test]
fn server_reported_matches_apply_without_a_local_match() {
    let set = FilterSet::compile(&[rule("cat", false, FilterAction::Hide)]);
    let text = SearchableText::from_record(&record("<p>no match</p>"));

    assert_eq!(set.verdict(&text, &[], &FilterContext::Home, NOW), Verdict::None);
    assert_eq!(
        set.verdict(&text, &["filter-cat".to_string()], &FilterContext::Home, NOW),
        Verdict::Hide
    );
    assert_eq!(
        set.verdict(&text, &["filter-cat".to_string()], &FilterContext::Thread, NOW),
        Verdict::None
    );
}

#[test]
fn a_keywordless_filter_applies_only_by_server_report() {
    let payload: FilterPayload = serde_json::from_value(json!({
        "id": "f9",
        "title": "hand-picked posts",
        "context": ["home"],
        "filter_action": "warn",
        "keywords": [],
    }))
    .expect("v2 filter should decode");
    let rules = payload.into_rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].filter_id, "f9");

    let set = FilterSet::compile(&rules);
    let text = SearchableText::from_record(&record("<p>anything at all</p>"));
    assert_eq!(set.verdict(&text, &[], &FilterContext::Home, NOW), Verdict::None);
    assert_eq!(
        set.verdict(&text, &["f9".to_string()], &FilterContext::Home, NOW),
        Verdict::Warn
    );

    let whole_word = FilterSet::compile(&[rule("", true, FilterAction::Hide)]);
    assert_eq!(whole_word.verdict(&text, &[], &FilterContext::Home, NOW), Verdict::None);
}

#[test]
fn strip_html_keeps_words_apart_and_decodes_entities() {
    assert_eq!(
        strip_html("<p>one</p><p>two &amp; three</p><br/>&lt;four&gt;"),
        "one two & three <four>"
    );
    assert_eq!(strip_html(""), "");
}
