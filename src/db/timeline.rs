use rusqlite::{params, Connection, OptionalExtension, Result};

/// Contiguous runs of item ids, newest run first. Consecutive runs are
/// separated by a gap.
pub fn load_runs(conn: &Connection, timeline_id: &str) -> Result<Vec<Vec<String>>> {
    let mut stmt = conn.prepare(
        r#"
SELECT run, item_id FROM timeline_entry
WHERE timeline_id = ?1
ORDER BY run, position
"#,
    )?;
    let mut rows = stmt.query(params![timeline_id])?;
    let mut runs: Vec<Vec<String>> = Vec::new();
    let mut current_run: Option<i64> = None;
    while let Some(row) = rows.next()? {
        let run: i64 = row.get(0)?;
        let item_id: String = row.get(1)?;
        if current_run != Some(run) {
            runs.push(Vec::new());
            current_run = Some(run);
        }
        if let Some(last) = runs.last_mut() {
            last.push(item_id);
        }
    }
    Ok(runs)
}

pub fn replace_runs(
    conn: &Connection,
    timeline_id: &str,
    item_kind: &str,
    runs: &[Vec<String>],
) -> Result<()> {
    conn.execute(
        "DELETE FROM timeline_entry WHERE timeline_id = ?1",
        params![timeline_id],
    )?;
    let mut stmt = conn.prepare(
        r#"
INSERT INTO timeline_entry (timeline_id, run, position, item_kind, item_id)
VALUES (?1, ?2, ?3, ?4, ?5)
"#,
    )?;
    for (run, ids) in runs.iter().filter(|ids| !ids.is_empty()).enumerate() {
        for (position, item_id) in ids.iter().enumerate() {
            stmt.execute(params![
                timeline_id,
                run as i64,
                position as i64,
                item_kind,
                item_id
            ])?;
        }
    }
    Ok(())
}

pub fn clear_timeline(conn: &Connection, timeline_id: &str) -> Result<usize> {
    conn.execute(
        "DELETE FROM timeline_cursor WHERE timeline_id = ?1",
        params![timeline_id],
    )?;
    conn.execute(
        "DELETE FROM timeline_entry WHERE timeline_id = ?1",
        params![timeline_id],
    )
}

/// Removes one account's statuses from a status timeline without deleting
/// the statuses themselves.
pub fn purge_account_from_timeline(
    conn: &Connection,
    timeline_id: &str,
    account_id: &str,
) -> Result<usize> {
    conn.execute(
        r#"
DELETE FROM timeline_entry
WHERE timeline_id = ?1
  AND item_kind = 'status'
  AND item_id IN (SELECT id FROM status WHERE account_id = ?2)
"#,
        params![timeline_id, account_id],
    )
}

pub fn get_next_max_id(conn: &Connection, timeline_id: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT next_max_id FROM timeline_cursor WHERE timeline_id = ?1",
        params![timeline_id],
        |row| row.get(0),
    )
    .optional()
    .map(Option::flatten)
}

pub fn set_next_max_id(conn: &Connection, timeline_id: &str, max_id: Option<&str>) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO timeline_cursor (timeline_id, next_max_id)
VALUES (?1, ?2)
ON CONFLICT(timeline_id) DO UPDATE SET next_max_id = excluded.next_max_id
"#,
        params![timeline_id, max_id],
    )?;
    Ok(())
}
