use rusqlite::{params, Connection, Result};

use super::{from_json, to_json};
use crate::entities::{FilterAction, FilterContext, FilterRule};

pub fn upsert_filter_rule(conn: &Connection, rule: &FilterRule) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO filter_rule (id, filter_id, phrase, whole_word, contexts, expires_at, action)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(id) DO UPDATE SET
    filter_id = excluded.filter_id,
    phrase = excluded.phrase,
    whole_word = excluded.whole_word,
    contexts = excluded.contexts,
    expires_at = excluded.expires_at,
    action = excluded.action
"#,
        params![
            rule.id,
            rule.filter_id,
            rule.phrase,
            rule.whole_word,
            to_json(&rule.contexts)?,
            rule.expires_at,
            rule.action.as_str()
        ],
    )?;
    Ok(())
}

/// Drops every rule belonging to `filter_id`; a v2 filter owns several.
pub fn delete_filter(conn: &Connection, filter_id: &str) -> Result<usize> {
    conn.execute(
        "DELETE FROM filter_rule WHERE filter_id = ?1",
        params![filter_id],
    )
}

pub fn clear_filter_rules(conn: &Connection) -> Result<usize> {
    conn.execute("DELETE FROM filter_rule", [])
}

pub fn list_filter_rules(conn: &Connection) -> Result<Vec<FilterRule>> {
    let mut stmt = conn.prepare(
        r#"
SELECT id, filter_id, phrase, whole_word, contexts, expires_at, action
FROM filter_rule
ORDER BY filter_id, id
"#,
    )?;
    let rows = stmt.query_map([], |row| {
        let contexts: String = row.get(4)?;
        let action: String = row.get(6)?;
        Ok(FilterRule {
            id: row.get(0)?,
            filter_id: row.get(1)?,
            phrase: row.get(2)?,
            whole_word: row.get(3)?,
            contexts: from_json::<Vec<FilterContext>>(4, &contexts)?,
            expires_at: row.get(5)?,
            action: FilterAction::from(action),
        })
    })?;
    rows.collect()
}

/// Records which server-side filters matched a status when it was fetched
/// for `context`. A fresh fetch replaces the previous matches.
pub fn replace_server_filter_matches(
    conn: &Connection,
    status_id: &str,
    context: &FilterContext,
    filter_ids: &[String],
) -> Result<()> {
    conn.execute(
        "DELETE FROM status_filter_match WHERE status_id = ?1 AND context = ?2",
        params![status_id, context.as_str()],
    )?;
    for filter_id in filter_ids {
        conn.execute(
            r#"
INSERT OR IGNORE INTO status_filter_match (status_id, context, filter_id)
VALUES (?1, ?2, ?3)
"#,
            params![status_id, context.as_str(), filter_id],
        )?;
    }
    Ok(())
}

pub fn list_server_filter_matches(
    conn: &Connection,
    status_id: &str,
    context: &FilterContext,
) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        r#"
SELECT filter_id FROM status_filter_match
WHERE status_id = ?1 AND context = ?2
ORDER BY filter_id
"#,
    )?;
    let rows = stmt.query_map(params![status_id, context.as_str()], |row| row.get(0))?;
    rows.collect()
}

pub fn set_show_anyway(
    conn: &Connection,
    status_id: &str,
    context: &FilterContext,
    shown: bool,
) -> Result<usize> {
    if shown {
        conn.execute(
            "INSERT OR IGNORE INTO show_anyway (status_id, context) VALUES (?1, ?2)",
            params![status_id, context.as_str()],
        )
    } else {
        conn.execute(
            "DELETE FROM show_anyway WHERE status_id = ?1 AND context = ?2",
            params![status_id, context.as_str()],
        )
    }
}

pub fn is_shown_anyway(conn: &Connection, status_id: &str, context: &FilterContext) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM show_anyway WHERE status_id = ?1 AND context = ?2)",
        params![status_id, context.as_str()],
        |row| row.get(0),
    )
}
