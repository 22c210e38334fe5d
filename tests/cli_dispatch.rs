use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::{json, Value};
use uuid::Uuid;

fn unique_workspace(prefix: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("{prefix}-{}", Uuid::now_v7()));
    std::fs::create_dir_all(&path).expect("workspace should be creatable");
    path
}

fn run_fedicache(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fedicache"))
        .env_remove("FEDICACHE_CONFIG")
        .env_remove("FEDICACHE_IDENTITY")
        .env_remove("FEDICACHE_KEY")
        .env_remove("RUST_LOG")
        .arg("--root")
        .arg(root.join("stores"))
        .args(args)
        .output()
        .expect("fedicache command should run")
}

fn run_as(root: &Path, identity: &str, args: &[&str]) -> Output {
    let mut full = vec!["--identity", identity, "--key", "sekrit"];
    full.extend_from_slice(args);
    run_fedicache(root, &full)
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "expected success but failed.\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn assert_failure(output: &Output) {
    assert!(
        !output.status.success(),
        "expected failure but command succeeded.\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn parse_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

fn write_json(root: &Path, name: &str, value: &Value) -> PathBuf {
    let path = root.join(name);
    std::fs::write(&path, serde_json::to_vec(value).expect("fixture should encode"))
        .expect("fixture should be writable");
    path
}

fn status(id: &str, account_id: &str, reply_to: Option<&str>) -> Value {
    json!({
        "id": id,
        "created_at": "2024-03-01T12:00:00Z",
        "in_reply_to_id": reply_to,
        "content": format!("<p>post {id}</p>"),
        "account": {
            "id": account_id,
            "username": account_id,
            "acct": format!("{account_id}@example.social"),
            "display_name": account_id,
        },
    })
}

fn section_status_ids(section: &Value) -> Vec<String> {
    section["items"]
        .as_array()
        .expect("items should be an array")
        .iter()
        .filter(|item| item["type"] == "status")
        .map(|item| {
            item["status"]["record"]["id"]
                .as_str()
                .expect("status id should be a string")
                .to_string()
        })
        .collect()
}

#[test]
fn ingested_pages_show_up_in_the_timeline_with_a_cursor() {
    let root = unique_workspace("fedicache-cli-timeline");
    let page = write_json(
        &root,
        "page.json",
        &json!([status("30", "a", None), status("20", "b", None)]),
    );
    let page_arg = page.to_str().expect("utf8 path");

    let ingest = run_as(&root, "me@example.social", &["ingest", "timeline", "home", page_arg, "--next-max-id", "20"]);
    assert_success(&ingest);
    let merged = parse_json(&ingest);
    assert_eq!(merged["skipped"], false);
    assert_eq!(merged["merge"]["inserted"], 2);

    let shown = run_as(&root, "me@example.social", &["show", "timeline", "home"]);
    assert_success(&shown);
    assert_eq!(section_status_ids(&parse_json(&shown)), vec!["30", "20"]);

    let cursor = run_as(&root, "me@example.social", &["cursor", "home"]);
    assert_success(&cursor);
    assert_eq!(parse_json(&cursor)["max_id"], "20");

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn gated_timelines_need_a_capable_server() {
    let root = unique_workspace("fedicache-cli-gate");
    let page = write_json(&root, "page.json", &json!([status("1", "a", None)]));
    let page_arg = page.to_str().expect("utf8 path");

    let refused = run_as(&root, "me", &["ingest", "timeline", "tag:rust", page_arg]);
    assert_failure(&refused);
    assert!(String::from_utf8_lossy(&refused.stderr).contains("tag_timeline"));

    let server = run_as(&root, "me", &["server", "set", "--software", "mastodon", "--version", "4.2.0"]);
    assert_success(&server);
    let shown = run_as(&root, "me", &["server", "show"]);
    assert_success(&shown);
    assert_eq!(parse_json(&shown)["family"], "mastodon");

    assert_success(&run_as(&root, "me", &["ingest", "timeline", "tag:rust", page_arg]));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn caps_check_honours_strict_and_lenient_modes() {
    let root = unique_workspace("fedicache-cli-caps");

    let strict = run_fedicache(
        &root,
        &["caps", "check", "--family", "gotosocial", "--version", "0.9.0", "list_timeline"],
    );
    assert_failure(&strict);

    let lenient = run_fedicache(
        &root,
        &["caps", "check", "--family", "gotosocial", "--version", "0.9.0", "--lenient", "list_timeline"],
    );
    assert_success(&lenient);
    assert_eq!(parse_json(&lenient)["allowed"], false);

    let listed = run_fedicache(&root, &["caps", "ls"]);
    assert_success(&listed);
    assert!(parse_json(&listed)
        .as_array()
        .expect("operations should be an array")
        .contains(&json!("trends")));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn threads_assemble_and_deleting_the_root_removes_them() {
    let root = unique_workspace("fedicache-cli-thread");
    let thread = write_json(
        &root,
        "thread.json",
        &json!({
            "status": status("B", "y", Some("A")),
            "ancestors": [status("A", "x", None)],
            "descendants": [status("C", "z", Some("B"))],
        }),
    );

    let ingest = run_as(&root, "me", &["ingest", "context", thread.to_str().expect("utf8 path")]);
    assert_success(&ingest);
    assert_eq!(parse_json(&ingest)["statuses"], 3);

    let shown = run_as(&root, "me", &["show", "context", "B"]);
    assert_success(&shown);
    let sections = parse_json(&shown);
    let sections = sections.as_array().expect("sections should be an array");
    assert_eq!(sections.len(), 3);
    assert_eq!(section_status_ids(&sections[1]), vec!["B"]);
    assert_eq!(sections[1]["items"][0]["configuration"]["is_context_parent"], true);
    assert_eq!(sections[1]["items"][0]["configuration"]["has_reply_following"], true);

    let deleted = run_as(&root, "me", &["status", "delete", "B"]);
    assert_success(&deleted);
    assert_eq!(parse_json(&deleted)["deleted"], true);
    assert_failure(&run_as(&root, "me", &["show", "context", "B"]));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn flags_and_show_anyway_validate_their_arguments() {
    let root = unique_workspace("fedicache-cli-flags");
    let page = write_json(&root, "page.json", &json!([status("1", "a", None)]));
    assert_success(&run_as(&root, "me", &["ingest", "timeline", "home", page.to_str().expect("utf8 path")]));

    assert_success(&run_as(&root, "me", &["status", "flag", "1", "bookmarked"]));
    let shown = run_as(&root, "me", &["show", "status", "1"]);
    assert_success(&shown);
    assert_eq!(parse_json(&shown)["record"]["bookmarked"], true);

    assert_failure(&run_as(&root, "me", &["status", "flag", "1", "starred"]));
    assert_failure(&run_as(&root, "me", &["status", "flag", "404", "muted"]));
    assert_failure(&run_as(&root, "me", &["show-anyway", "1", "everywhere"]));
    assert_success(&run_as(&root, "me", &["show-anyway", "1", "home"]));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn identities_are_isolated_keyed_and_removable() {
    let root = unique_workspace("fedicache-cli-identities");

    assert_failure(&run_fedicache(&root, &["show", "filters"]));
    assert_success(&run_as(&root, "alice", &["show", "filters"]));
    assert_success(&run_as(&root, "bob", &["show", "filters"]));

    let wrong_key = run_fedicache(&root, &["--identity", "alice", "--key", "other", "show", "filters"]);
    assert_failure(&wrong_key);
    assert_failure(&run_fedicache(&root, &["--identity", "../escape", "show", "filters"]));

    let listed = run_fedicache(&root, &["identities", "ls"]);
    assert_success(&listed);
    assert_eq!(parse_json(&listed), json!(["alice", "bob"]));

    let removed = run_fedicache(&root, &["identities", "rm", "alice"]);
    assert_success(&removed);
    assert_eq!(parse_json(&removed)["deleted"], true);
    assert_eq!(
        parse_json(&run_fedicache(&root, &["identities", "ls"])),
        json!(["bob"])
    );

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn filters_ingest_and_hide_matching_statuses() {
    let root = unique_workspace("fedicache-cli-filters");
    let mut spooky = status("2", "a", None);
    spooky["content"] = json!("<p>spiders</p>");
    let page = write_json(&root, "page.json", &json!([spooky, status("1", "b", None)]));
    let filters = write_json(
        &root,
        "filters.json",
        &json!([{
            "id": "f1",
            "title": "no spiders",
            "context": ["home"],
            "filter_action": "hide",
            "keywords": [{ "keyword": "spiders", "whole_word": true }],
        }]),
    );

    assert_success(&run_as(&root, "me", &["ingest", "timeline", "home", page.to_str().expect("utf8 path")]));
    let ingested = run_as(&root, "me", &["ingest", "filters", filters.to_str().expect("utf8 path")]);
    assert_success(&ingested);
    assert_eq!(parse_json(&ingested)["rules"], 1);

    let shown = run_as(&root, "me", &["show", "timeline", "home"]);
    assert_success(&shown);
    assert_eq!(section_status_ids(&parse_json(&shown)), vec!["1"]);

    let _ = std::fs::remove_dir_all(root);
}
