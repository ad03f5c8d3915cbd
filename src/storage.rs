//! SQLite storage layer.
//!
//! Single source of truth for batches, tasks, items, assignments,
//! annotations, trust and agendas. WAL mode for concurrent readers; writers
//! serialise on `IMMEDIATE` transactions with a busy timeout, so several
//! engines can share one database file.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::model::*;

/// How long a connection waits for another writer to release the lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const TASK_COLUMNS: &str = "id, batch_id, batch_number, kind, campaign, source_language,
    target_language, required_annotations, random_seed,
    activated, activated_by, activated_at,
    completed, completed_by, completed_at,
    retired, retired_by, retired_at, created_at";

const ITEM_COLUMNS: &str = "id, task_id, position, block_index, item_index, segment_id,
    item_type, source_id, source_text, target_id, target_text";

/// Storage backend. Owns the SQLite connection.
pub struct Storage {
    conn: Connection,
}

/// Handle for performing storage operations within a transaction.
///
/// All methods delegate to the same SQL logic as `Storage`, but execute
/// against the transaction's connection, so either all operations commit
/// together or none do.
pub(crate) struct TxContext<'a> {
    tx: &'a Connection,
}

impl TxContext<'_> {
    pub fn insert_batch(&self, batch: &Batch) -> Result<()> {
        insert_batch_on(self.tx, batch)
    }

    pub fn get_batch(&self, id: BatchId) -> Result<Batch> {
        get_batch_on(self.tx, id)
    }

    pub fn set_batch_valid(&self, id: BatchId, valid: bool) -> Result<()> {
        set_batch_flag_on(self.tx, id, "valid", valid)
    }

    pub fn set_batch_ready(&self, id: BatchId, ready: bool) -> Result<()> {
        set_batch_flag_on(self.tx, id, "ready", ready)
    }

    pub fn insert_task(&self, task: &Task) -> Result<()> {
        insert_task_on(self.tx, task)
    }

    pub fn insert_item(&self, item: &Item) -> Result<()> {
        insert_item_on(self.tx, item)
    }

    pub fn get_task(&self, id: TaskId) -> Result<Task> {
        get_task_on(self.tx, id)
    }

    pub fn tasks_in_batch(&self, batch: BatchId) -> Result<Vec<Task>> {
        tasks_in_batch_on(self.tx, batch)
    }

    pub fn candidate_tasks(&self, language: &str, campaign: &str) -> Result<Vec<Task>> {
        candidate_tasks_on(self.tx, language, campaign)
    }

    pub fn set_activated(&self, id: TaskId, by: &str) -> Result<bool> {
        set_activated_on(self.tx, id, by)
    }

    pub fn set_completed(&self, id: TaskId, by: &str) -> Result<bool> {
        set_completed_on(self.tx, id, by)
    }

    pub fn set_retired(&self, id: TaskId, by: &str) -> Result<bool> {
        set_retired_on(self.tx, id, by)
    }

    pub fn assignees(&self, task: TaskId) -> Result<Vec<String>> {
        assignees_on(self.tx, task)
    }

    pub fn try_assign(&self, task: TaskId, user: &str) -> Result<bool> {
        try_assign_on(self.tx, task, user)
    }

    pub fn in_group(&self, user: &str, group: &str) -> Result<bool> {
        in_group_on(self.tx, user, group)
    }

    pub fn fully_annotated_tasks(&self, user: &str, campaign: &str) -> Result<u32> {
        fully_annotated_tasks_on(self.tx, user, campaign)
    }

    pub fn insert_annotation(&self, annotation: &Annotation) -> Result<bool> {
        insert_annotation_on(self.tx, annotation)
    }

    pub fn completed_count_in_campaign(&self, user: &str, campaign: &str) -> Result<u32> {
        completed_count_in_campaign_on(self.tx, user, campaign)
    }

    pub fn is_trusted(&self, user: &str, campaign: &str) -> Result<bool> {
        is_trusted_on(self.tx, user, campaign)
    }

    pub fn grant_trust(&self, user: &str, campaign: &str) -> Result<bool> {
        grant_trust_on(self.tx, user, campaign)
    }

    pub fn next_agenda_position(&self, user: &str, campaign: &str) -> Result<u32> {
        next_agenda_position_on(self.tx, user, campaign)
    }

    pub fn insert_agenda_entry(&self, entry: &AgendaEntry) -> Result<bool> {
        insert_agenda_entry_on(self.tx, entry)
    }

    pub fn record_event(&mut self, kind: EventKind) -> Result<Event> {
        record_event_on(self.tx, kind)
    }
}

impl Storage {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut storage = Self { conn };
        storage.init()?;
        Ok(storage)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut storage = Self { conn };
        storage.init()?;
        Ok(storage)
    }

    fn init(&mut self) -> Result<()> {
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL mode for concurrent readers
        self.conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        self.conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS batches (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                campaign        TEXT NOT NULL,
                valid           INTEGER NOT NULL DEFAULT 0,
                ready           INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id                      TEXT PRIMARY KEY,
                batch_id                TEXT NOT NULL REFERENCES batches(id),
                batch_number            INTEGER NOT NULL,
                kind                    TEXT NOT NULL,
                campaign                TEXT NOT NULL,
                source_language         TEXT NOT NULL,
                target_language         TEXT NOT NULL,
                required_annotations    INTEGER NOT NULL,
                random_seed             INTEGER NOT NULL,
                activated               INTEGER NOT NULL DEFAULT 0,
                activated_by            TEXT,
                activated_at            TEXT,
                completed               INTEGER NOT NULL DEFAULT 0,
                completed_by            TEXT,
                completed_at            TEXT,
                retired                 INTEGER NOT NULL DEFAULT 0,
                retired_by              TEXT,
                retired_at              TEXT,
                created_at              TEXT NOT NULL,
                CHECK (NOT (activated = 1 AND completed = 1))
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_open ON tasks(target_language, campaign, created_at)
                WHERE activated = 1 AND completed = 0 AND retired = 0;
            CREATE INDEX IF NOT EXISTS idx_tasks_batch ON tasks(batch_id);

            CREATE TABLE IF NOT EXISTS items (
                id              TEXT PRIMARY KEY,
                task_id         TEXT NOT NULL REFERENCES tasks(id),
                position        INTEGER NOT NULL,
                block_index     INTEGER NOT NULL,
                item_index      INTEGER NOT NULL,
                segment_id      INTEGER NOT NULL,
                item_type       TEXT NOT NULL,
                source_id       TEXT NOT NULL,
                source_text     TEXT NOT NULL,
                target_id       TEXT NOT NULL,
                target_text     TEXT NOT NULL,
                UNIQUE (task_id, position)
            );

            CREATE TABLE IF NOT EXISTS task_assignees (
                task_id         TEXT NOT NULL REFERENCES tasks(id),
                user_id         TEXT NOT NULL,
                assigned_at     TEXT NOT NULL,
                PRIMARY KEY (task_id, user_id)
            );

            CREATE INDEX IF NOT EXISTS idx_assignees_user ON task_assignees(user_id);

            CREATE TABLE IF NOT EXISTS annotations (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id         TEXT NOT NULL REFERENCES tasks(id),
                item_id         TEXT NOT NULL REFERENCES items(id),
                created_by      TEXT NOT NULL,
                score           INTEGER NOT NULL,
                start_time      TEXT NOT NULL,
                end_time        TEXT NOT NULL,
                completed       INTEGER NOT NULL DEFAULT 1,
                created_at      TEXT NOT NULL,
                UNIQUE (item_id, created_by)
            );

            CREATE INDEX IF NOT EXISTS idx_annotations_task ON annotations(task_id, created_by);
            CREATE INDEX IF NOT EXISTS idx_annotations_user ON annotations(created_by);

            CREATE TABLE IF NOT EXISTS trusted_users (
                user_id         TEXT NOT NULL,
                campaign        TEXT NOT NULL,
                granted_at      TEXT NOT NULL,
                PRIMARY KEY (user_id, campaign)
            );

            CREATE TABLE IF NOT EXISTS user_groups (
                user_id         TEXT NOT NULL,
                group_name      TEXT NOT NULL,
                PRIMARY KEY (user_id, group_name)
            );

            CREATE TABLE IF NOT EXISTS agenda_entries (
                user_id         TEXT NOT NULL,
                campaign        TEXT NOT NULL,
                task_kind       TEXT NOT NULL,
                task_id         TEXT NOT NULL REFERENCES tasks(id),
                position        INTEGER NOT NULL,
                status          TEXT NOT NULL DEFAULT 'open',
                PRIMARY KEY (user_id, campaign, task_id)
            );

            CREATE TABLE IF NOT EXISTS events (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp   TEXT NOT NULL,
                kind        TEXT NOT NULL
            );
            ",
        )?;

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Execute a closure within an `IMMEDIATE` SQLite transaction.
    ///
    /// The write lock is taken up front, so reads inside the closure cannot
    /// go stale before the writes land. Commits if the closure returns Ok,
    /// rolls back on Err.
    pub(crate) fn with_transaction<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TxContext) -> Result<T>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut ctx = TxContext { tx: &tx };
        let result = f(&mut ctx)?;
        tx.commit()?;
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Batches + tasks
    // -----------------------------------------------------------------------

    pub fn get_batch(&self, id: BatchId) -> Result<Batch> {
        get_batch_on(&self.conn, id)
    }

    pub fn get_task(&self, id: TaskId) -> Result<Task> {
        get_task_on(&self.conn, id)
    }

    /// List tasks in creation order, optionally for one campaign.
    pub fn list_tasks(&self, campaign: Option<&str>) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE ?1 IS NULL OR campaign = ?1
             ORDER BY created_at ASC, rowid ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(params![campaign], row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Active tasks listing `user` as an assignee, newest first.
    pub fn active_tasks_assigned_to(&self, user: &str) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE activated = 1 AND completed = 0 AND retired = 0
             AND id IN (SELECT task_id FROM task_assignees WHERE user_id = ?1)
             ORDER BY created_at DESC, rowid DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(params![user], row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn candidate_tasks(&self, language: &str, campaign: &str) -> Result<Vec<Task>> {
        candidate_tasks_on(&self.conn, language, campaign)
    }

    /// Items of a task in stored order.
    pub fn task_items(&self, task: TaskId) -> Result<Vec<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE task_id = ?1 ORDER BY position ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![task.0.to_string()], row_to_item)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn assignees(&self, task: TaskId) -> Result<Vec<String>> {
        assignees_on(&self.conn, task)
    }

    // -----------------------------------------------------------------------
    // Annotations + trust
    // -----------------------------------------------------------------------

    /// Items of `task` that `user` has a completed annotation for.
    pub fn completed_items_by(&self, task: TaskId, user: &str) -> Result<HashSet<ItemId>> {
        let mut stmt = self.conn.prepare(
            "SELECT item_id FROM annotations WHERE task_id = ?1 AND created_by = ?2 AND completed = 1",
        )?;
        let ids = stmt
            .query_map(params![task.0.to_string(), user], |row| parse_column(row, 0))?
            .collect::<std::result::Result<HashSet<ItemId>, _>>()?;
        Ok(ids)
    }

    /// Distinct items of `task` with a completed annotation from anyone.
    pub fn distinct_annotated_items(&self, task: TaskId) -> Result<u32> {
        Ok(self.conn.query_row(
            "SELECT COUNT(DISTINCT item_id) FROM annotations WHERE task_id = ?1 AND completed = 1",
            params![task.0.to_string()],
            |row| row.get(0),
        )?)
    }

    /// Completed annotations of `task`, oldest first.
    pub fn annotations(&self, task: TaskId) -> Result<Vec<Annotation>> {
        let mut stmt = self.conn.prepare(
            "SELECT task_id, item_id, created_by, score, start_time, end_time, completed, created_at
             FROM annotations WHERE task_id = ?1 ORDER BY id ASC",
        )?;
        let annotations = stmt
            .query_map(params![task.0.to_string()], |row| {
                Ok(Annotation {
                    task_id: parse_column(row, 0)?,
                    item_id: parse_column(row, 1)?,
                    created_by: row.get(2)?,
                    score: row.get(3)?,
                    start_time: parse_column(row, 4)?,
                    end_time: parse_column(row, 5)?,
                    completed: row.get(6)?,
                    created_at: parse_column(row, 7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(annotations)
    }

    pub fn is_trusted(&self, user: &str, campaign: &str) -> Result<bool> {
        is_trusted_on(&self.conn, user, campaign)
    }

    pub fn in_group(&self, user: &str, group: &str) -> Result<bool> {
        in_group_on(&self.conn, user, group)
    }

    pub fn fully_annotated_tasks(&self, user: &str, campaign: &str) -> Result<u32> {
        fully_annotated_tasks_on(&self.conn, user, campaign)
    }

    /// Add `user` to `group`. Idempotent.
    pub fn add_to_group(&mut self, user: &str, group: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO user_groups (user_id, group_name) VALUES (?1, ?2)",
            params![user, group],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Agenda
    // -----------------------------------------------------------------------

    /// Open agenda entries for (user, campaign) in agenda order.
    pub fn open_agenda(&self, user: &str, campaign: &str) -> Result<Vec<AgendaEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, campaign, task_kind, task_id, position, status
             FROM agenda_entries
             WHERE user_id = ?1 AND campaign = ?2 AND status = 'open'
             ORDER BY position ASC",
        )?;
        let entries = stmt
            .query_map(params![user, campaign], |row| {
                Ok(AgendaEntry {
                    user: row.get(0)?,
                    campaign: row.get(1)?,
                    task: TaskRef {
                        kind: parse_column(row, 2)?,
                        id: parse_column(row, 3)?,
                    },
                    position: row.get(4)?,
                    status: parse_column(row, 5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Move an agenda entry from open to completed. Returns whether it moved.
    pub fn complete_agenda_entry(&mut self, user: &str, campaign: &str, task: TaskId) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE agenda_entries SET status = 'completed'
             WHERE user_id = ?1 AND campaign = ?2 AND task_id = ?3 AND status = 'open'",
            params![user, campaign, task.0.to_string()],
        )?;
        Ok(changed > 0)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Record an event outside any transaction.
    pub fn record_event(&mut self, kind: EventKind) -> Result<Event> {
        record_event_on(&self.conn, kind)
    }

    /// Get events since a sequence number.
    pub fn get_events_since(&self, since_seq: u64) -> Result<Vec<Event>> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, timestamp, kind FROM events WHERE seq > ?1 ORDER BY seq ASC")?;

        let events = stmt
            .query_map(params![since_seq as i64], |row| {
                let kind_str: String = row.get(2)?;
                Ok(Event {
                    seq: row.get::<_, i64>(0)? as u64,
                    timestamp: row
                        .get::<_, String>(1)?
                        .parse()
                        .unwrap_or_else(|_| Utc::now()),
                    kind: serde_json::from_str(&kind_str)
                        .unwrap_or(EventKind::Unknown { raw: kind_str }),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// Inner functions: take &Connection so they work with both
// Connection (auto-commit) and Transaction (deref to Connection).
// ---------------------------------------------------------------------------

fn insert_batch_on(conn: &Connection, batch: &Batch) -> Result<()> {
    conn.execute(
        "INSERT INTO batches (id, name, campaign, valid, ready, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            batch.id.0.to_string(),
            batch.name,
            batch.campaign,
            batch.valid,
            batch.ready,
            batch.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn get_batch_on(conn: &Connection, id: BatchId) -> Result<Batch> {
    conn.query_row(
        "SELECT id, name, campaign, valid, ready, created_at FROM batches WHERE id = ?1",
        params![id.0.to_string()],
        |row| {
            Ok(Batch {
                id: parse_column(row, 0)?,
                name: row.get(1)?,
                campaign: row.get(2)?,
                valid: row.get(3)?,
                ready: row.get(4)?,
                created_at: parse_column(row, 5)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("batch {id}")))
}

fn set_batch_flag_on(conn: &Connection, id: BatchId, column: &str, value: bool) -> Result<()> {
    // `column` is one of two literals chosen by the caller.
    let sql = format!("UPDATE batches SET {column} = ?1 WHERE id = ?2");
    let changed = conn.execute(&sql, params![value, id.0.to_string()])?;
    if changed == 0 {
        return Err(Error::NotFound(format!("batch {id}")));
    }
    Ok(())
}

fn insert_task_on(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        "INSERT INTO tasks (
            id, batch_id, batch_number, kind, campaign, source_language, target_language,
            required_annotations, random_seed,
            activated, activated_by, activated_at,
            completed, completed_by, completed_at,
            retired, retired_by, retired_at, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            task.id.0.to_string(),
            task.batch_id.0.to_string(),
            task.batch_number,
            task.kind.to_string(),
            task.campaign,
            task.source_language,
            task.target_language,
            task.required_annotations,
            task.random_seed as i64,
            task.activated.set,
            task.activated.by,
            task.activated.at.map(|t| t.to_rfc3339()),
            task.completed.set,
            task.completed.by,
            task.completed.at.map(|t| t.to_rfc3339()),
            task.retired.set,
            task.retired.by,
            task.retired.at.map(|t| t.to_rfc3339()),
            task.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn get_task_on(conn: &Connection, id: TaskId) -> Result<Task> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
    conn.query_row(&sql, params![id.0.to_string()], row_to_task)
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("task {id}")))
}

fn tasks_in_batch_on(conn: &Connection, batch: BatchId) -> Result<Vec<Task>> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE batch_id = ?1 ORDER BY batch_number ASC, rowid ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let tasks = stmt
        .query_map(params![batch.0.to_string()], row_to_task)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tasks)
}

/// Active tasks for a target language and campaign, oldest first.
fn candidate_tasks_on(conn: &Connection, language: &str, campaign: &str) -> Result<Vec<Task>> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM tasks
         WHERE activated = 1 AND completed = 0 AND retired = 0
         AND target_language = ?1 AND campaign = ?2
         ORDER BY created_at ASC, rowid ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let tasks = stmt
        .query_map(params![language, campaign], row_to_task)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tasks)
}

/// Pending → Active. Returns false if the task was not pending.
fn set_activated_on(conn: &Connection, id: TaskId, by: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE tasks SET activated = 1, activated_by = ?1, activated_at = ?2
         WHERE id = ?3 AND activated = 0 AND completed = 0 AND retired = 0",
        params![by, Utc::now().to_rfc3339(), id.0.to_string()],
    )?;
    Ok(changed > 0)
}

/// Active → Completed, clearing `activated`. Returns false if another
/// evaluator got there first or the task is not active.
fn set_completed_on(conn: &Connection, id: TaskId, by: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE tasks SET activated = 0, completed = 1, completed_by = ?1, completed_at = ?2
         WHERE id = ?3 AND activated = 1 AND completed = 0 AND retired = 0",
        params![by, Utc::now().to_rfc3339(), id.0.to_string()],
    )?;
    Ok(changed > 0)
}

/// Pending|Active → Retired. Returns false for terminal tasks.
fn set_retired_on(conn: &Connection, id: TaskId, by: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE tasks SET activated = 0, retired = 1, retired_by = ?1, retired_at = ?2
         WHERE id = ?3 AND completed = 0 AND retired = 0",
        params![by, Utc::now().to_rfc3339(), id.0.to_string()],
    )?;
    Ok(changed > 0)
}

fn insert_item_on(conn: &Connection, item: &Item) -> Result<()> {
    conn.execute(
        "INSERT INTO items (
            id, task_id, position, block_index, item_index, segment_id,
            item_type, source_id, source_text, target_id, target_text
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            item.id.0.to_string(),
            item.task_id.0.to_string(),
            item.position,
            item.block_index,
            item.item_index,
            item.segment_id,
            item.item_type.code(),
            item.source_id,
            item.source_text,
            item.target_id,
            item.target_text,
        ],
    )?;
    Ok(())
}

fn assignees_on(conn: &Connection, task: TaskId) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM task_assignees WHERE task_id = ?1 ORDER BY assigned_at ASC, rowid ASC",
    )?;
    let users = stmt
        .query_map(params![task.0.to_string()], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(users)
}

/// Compare-and-increment on the assignee set.
///
/// One statement: the user is added only while the task is active, the
/// user is not yet assigned, and the assignee count is below
/// `required_annotations`. Returns whether a row was inserted.
fn try_assign_on(conn: &Connection, task: TaskId, user: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO task_assignees (task_id, user_id, assigned_at)
         SELECT t.id, ?2, ?3 FROM tasks t
         WHERE t.id = ?1
         AND t.activated = 1 AND t.completed = 0 AND t.retired = 0
         AND NOT EXISTS (SELECT 1 FROM task_assignees WHERE task_id = ?1 AND user_id = ?2)
         AND (SELECT COUNT(*) FROM task_assignees WHERE task_id = ?1) < t.required_annotations",
        params![task.0.to_string(), user, Utc::now().to_rfc3339()],
    )?;
    Ok(inserted > 0)
}

fn insert_annotation_on(conn: &Connection, annotation: &Annotation) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO annotations (
            task_id, item_id, created_by, score, start_time, end_time, completed, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            annotation.task_id.0.to_string(),
            annotation.item_id.0.to_string(),
            annotation.created_by,
            annotation.score,
            annotation.start_time.to_rfc3339(),
            annotation.end_time.to_rfc3339(),
            annotation.completed,
            annotation.created_at.to_rfc3339(),
        ],
    )?;
    Ok(inserted > 0)
}

fn completed_count_in_campaign_on(conn: &Connection, user: &str, campaign: &str) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM annotations a JOIN tasks t ON t.id = a.task_id
         WHERE a.created_by = ?1 AND t.campaign = ?2 AND a.completed = 1",
        params![user, campaign],
        |row| row.get(0),
    )?)
}

/// Tasks of `campaign` in which `user` annotated every item.
fn fully_annotated_tasks_on(conn: &Connection, user: &str, campaign: &str) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM (
            SELECT a.task_id FROM annotations a JOIN tasks t ON t.id = a.task_id
            WHERE a.created_by = ?1 AND t.campaign = ?2 AND a.completed = 1
            GROUP BY a.task_id
            HAVING COUNT(DISTINCT a.item_id) >= ?3
         )",
        params![user, campaign, ITEMS_PER_TASK as u32],
        |row| row.get(0),
    )?)
}

fn is_trusted_on(conn: &Connection, user: &str, campaign: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM trusted_users WHERE user_id = ?1 AND campaign = ?2",
            params![user, campaign],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn grant_trust_on(conn: &Connection, user: &str, campaign: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO trusted_users (user_id, campaign, granted_at) VALUES (?1, ?2, ?3)",
        params![user, campaign, Utc::now().to_rfc3339()],
    )?;
    Ok(inserted > 0)
}

fn in_group_on(conn: &Connection, user: &str, group: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM user_groups WHERE user_id = ?1 AND group_name = ?2",
            params![user, group],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn next_agenda_position_on(conn: &Connection, user: &str, campaign: &str) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM agenda_entries WHERE user_id = ?1 AND campaign = ?2",
        params![user, campaign],
        |row| row.get(0),
    )?)
}

fn insert_agenda_entry_on(conn: &Connection, entry: &AgendaEntry) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO agenda_entries (user_id, campaign, task_kind, task_id, position, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.user,
            entry.campaign,
            entry.task.kind.to_string(),
            entry.task.id.0.to_string(),
            entry.position,
            entry.status.to_string(),
        ],
    )?;
    Ok(inserted > 0)
}

fn record_event_on(conn: &Connection, kind: EventKind) -> Result<Event> {
    let now = Utc::now();

    conn.execute(
        "INSERT INTO events (timestamp, kind) VALUES (?1, ?2)",
        params![now.to_rfc3339(), serde_json::to_string(&kind)?],
    )?;

    let seq = conn.last_insert_rowid();

    Ok(Event {
        seq: seq as u64,
        timestamp: now,
        kind,
    })
}

// ---------------------------------------------------------------------------
// Row parsing helpers
// ---------------------------------------------------------------------------

/// Read a TEXT column and parse it, surfacing failures as conversion errors.
fn parse_column<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_optional_time(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse().map_err(|e: chrono::ParseError| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

fn stamp(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Stamp> {
    Ok(Stamp {
        set: row.get(idx)?,
        by: row.get(idx + 1)?,
        at: parse_optional_time(row, idx + 2)?,
    })
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: parse_column(row, 0)?,
        batch_id: parse_column(row, 1)?,
        batch_number: row.get(2)?,
        kind: parse_column(row, 3)?,
        campaign: row.get(4)?,
        source_language: row.get(5)?,
        target_language: row.get(6)?,
        required_annotations: row.get(7)?,
        random_seed: row.get::<_, i64>(8)? as u64,
        activated: stamp(row, 9)?,
        completed: stamp(row, 12)?,
        retired: stamp(row, 15)?,
        created_at: parse_column(row, 18)?,
    })
}

fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<Item> {
    Ok(Item {
        id: parse_column(row, 0)?,
        task_id: parse_column(row, 1)?,
        position: row.get(2)?,
        block_index: row.get(3)?,
        item_index: row.get(4)?,
        segment_id: row.get(5)?,
        item_type: parse_column(row, 6)?,
        source_id: row.get(7)?,
        source_text: row.get(8)?,
        target_id: row.get(9)?,
        target_text: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_task(storage: &mut Storage, required: u32, active: bool) -> TaskId {
        let batch = Batch {
            id: BatchId::new(),
            name: "b".to_string(),
            campaign: "c".to_string(),
            valid: true,
            ready: true,
            created_at: Utc::now(),
        };
        let task = Task {
            id: TaskId::new(),
            batch_id: batch.id,
            batch_number: 0,
            kind: TaskKind::SourceBased,
            campaign: "c".to_string(),
            source_language: "eng".to_string(),
            target_language: "deu".to_string(),
            required_annotations: required,
            random_seed: u64::MAX,
            activated: Stamp {
                set: active,
                by: Some("admin".to_string()),
                at: Some(Utc::now()),
            },
            completed: Stamp::default(),
            retired: Stamp::default(),
            created_at: Utc::now(),
        };
        storage
            .with_transaction(|ctx| {
                ctx.insert_batch(&batch)?;
                ctx.insert_task(&task)
            })
            .unwrap();
        task.id
    }

    #[test]
    fn task_round_trips_including_large_seed() {
        let mut storage = Storage::in_memory().unwrap();
        let id = seed_task(&mut storage, 2, true);
        let task = storage.get_task(id).unwrap();
        assert_eq!(task.random_seed, u64::MAX);
        assert_eq!(task.state(), State::Active);
        assert_eq!(task.activated.by.as_deref(), Some("admin"));
    }

    #[test]
    fn guarded_assign_stops_at_capacity() {
        let mut storage = Storage::in_memory().unwrap();
        let id = seed_task(&mut storage, 2, true);

        let results: Vec<bool> = ["ann", "bob", "cat"]
            .iter()
            .map(|user| storage.with_transaction(|ctx| ctx.try_assign(id, user)).unwrap())
            .collect();
        assert_eq!(results, vec![true, true, false]);
        assert_eq!(storage.assignees(id).unwrap(), vec!["ann", "bob"]);
    }

    #[test]
    fn guarded_assign_rejects_repeat_and_inactive() {
        let mut storage = Storage::in_memory().unwrap();
        let active = seed_task(&mut storage, 3, true);
        let pending = seed_task(&mut storage, 3, false);

        assert!(storage.with_transaction(|ctx| ctx.try_assign(active, "ann")).unwrap());
        assert!(!storage.with_transaction(|ctx| ctx.try_assign(active, "ann")).unwrap());
        assert!(!storage.with_transaction(|ctx| ctx.try_assign(pending, "ann")).unwrap());
    }

    #[test]
    fn completion_is_idempotent() {
        let mut storage = Storage::in_memory().unwrap();
        let id = seed_task(&mut storage, 1, true);

        assert!(storage.with_transaction(|ctx| ctx.set_completed(id, "ann")).unwrap());
        assert!(!storage.with_transaction(|ctx| ctx.set_completed(id, "bob")).unwrap());

        let task = storage.get_task(id).unwrap();
        assert_eq!(task.state(), State::Completed);
        assert!(!task.activated.set);
        assert_eq!(task.completed.by.as_deref(), Some("ann"));
    }

    #[test]
    fn malformed_event_json_returns_unknown_variant() {
        let storage = Storage::in_memory().unwrap();

        storage
            .conn
            .execute(
                "INSERT INTO events (timestamp, kind) VALUES (?1, ?2)",
                params![Utc::now().to_rfc3339(), "this is not valid json {{{"],
            )
            .unwrap();

        let events = storage.get_events_since(0).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0].kind {
            EventKind::Unknown { raw } => {
                assert_eq!(raw, "this is not valid json {{{");
            }
            other => panic!("expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn unrecognized_event_type_returns_unknown_variant() {
        let storage = Storage::in_memory().unwrap();

        let future_event = r#"{"type":"task_teleported","task_id":"q42"}"#;
        storage
            .conn
            .execute(
                "INSERT INTO events (timestamp, kind) VALUES (?1, ?2)",
                params![Utc::now().to_rfc3339(), future_event],
            )
            .unwrap();

        let events = storage.get_events_since(0).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0].kind {
            EventKind::Unknown { raw } => {
                assert_eq!(raw, future_event);
            }
            other => panic!("expected Unknown, got {:?}", other),
        }
    }
}
