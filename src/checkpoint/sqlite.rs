use super::{check_sequence, Checkpoint, CheckpointError, CheckpointReason, CheckpointStore};
use crate::shared::ThreadId;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};

/// SQLite-backed store. Insert of the new snapshot and removal of the
/// older ones share one transaction.
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    db_path: PathBuf,
}

impl SqliteCheckpointStore {
    pub fn open(db_path: &Path) -> Result<Self, CheckpointError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| CheckpointError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn ensure_schema(&self) -> Result<(), CheckpointError> {
        self.connect()?
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS checkpoints (
                    thread_id TEXT NOT NULL,
                    run_seq INTEGER NOT NULL,
                    created_at INTEGER NOT NULL,
                    reason TEXT NOT NULL,
                    state_json TEXT NOT NULL,
                    PRIMARY KEY (thread_id, run_seq)
                );
                ",
            )
            .map_err(|source| CheckpointError::Sql { source })
    }

    fn connect(&self) -> Result<Connection, CheckpointError> {
        let connection =
            Connection::open(&self.db_path).map_err(|source| CheckpointError::Open {
                path: self.db_path.display().to_string(),
                source,
            })?;
        connection
            .execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA busy_timeout=5000;")
            .map_err(|source| CheckpointError::Sql { source })?;
        Ok(connection)
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn put(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let state_json = serde_json::to_string(&checkpoint.state).map_err(|source| {
            CheckpointError::Json {
                path: self.db_path.display().to_string(),
                source,
            }
        })?;
        let run_seq = to_sql_seq(checkpoint)?;

        let mut connection = self.connect()?;
        let tx = connection
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(|source| CheckpointError::Sql { source })?;

        let stored: Option<i64> = tx
            .query_row(
                "SELECT MAX(run_seq) FROM checkpoints WHERE thread_id = ?1",
                params![checkpoint.thread_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|source| CheckpointError::Sql { source })?;
        check_sequence(
            &checkpoint.thread_id,
            stored.map(|seq| seq.max(0) as u64),
            checkpoint.run_seq,
        )?;

        tx.execute(
            "
            INSERT INTO checkpoints (thread_id, run_seq, created_at, reason, state_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                checkpoint.thread_id.as_str(),
                run_seq,
                checkpoint.created_at,
                checkpoint.reason.as_str(),
                state_json
            ],
        )
        .map_err(|source| CheckpointError::Sql { source })?;
        tx.execute(
            "DELETE FROM checkpoints WHERE thread_id = ?1 AND run_seq < ?2",
            params![checkpoint.thread_id.as_str(), run_seq],
        )
        .map_err(|source| CheckpointError::Sql { source })?;

        tx.commit().map_err(|source| CheckpointError::Sql { source })
    }

    fn get(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, CheckpointError> {
        let connection = self.connect()?;
        let row = connection
            .query_row(
                "
                SELECT run_seq, created_at, reason, state_json
                FROM checkpoints
                WHERE thread_id = ?1
                ORDER BY run_seq DESC
                LIMIT 1
                ",
                params![thread_id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(|source| CheckpointError::Sql { source })?;

        let Some((run_seq, created_at, reason, state_json)) = row else {
            return Ok(None);
        };
        let reason = CheckpointReason::parse(&reason).ok_or_else(|| CheckpointError::Corrupt {
            thread_id: thread_id.to_string(),
            reason: format!("unknown checkpoint reason `{reason}`"),
        })?;
        let state = serde_json::from_str(&state_json).map_err(|source| CheckpointError::Json {
            path: self.db_path.display().to_string(),
            source,
        })?;
        Ok(Some(Checkpoint {
            thread_id: thread_id.clone(),
            run_seq: run_seq.max(0) as u64,
            created_at,
            reason,
            state,
        }))
    }

    fn retained(&self, thread_id: &ThreadId) -> Result<usize, CheckpointError> {
        let count: i64 = self
            .connect()?
            .query_row(
                "SELECT COUNT(*) FROM checkpoints WHERE thread_id = ?1",
                params![thread_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|source| CheckpointError::Sql { source })?;
        Ok(count.max(0) as usize)
    }

    fn threads(&self) -> Result<Vec<ThreadId>, CheckpointError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare("SELECT DISTINCT thread_id FROM checkpoints ORDER BY thread_id")
            .map_err(|source| CheckpointError::Sql { source })?;
        let rows = statement
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|source| CheckpointError::Sql { source })?;
        let mut threads = Vec::new();
        for raw in rows {
            let raw = raw.map_err(|source| CheckpointError::Sql { source })?;
            let thread_id = ThreadId::parse(&raw).map_err(|reason| CheckpointError::Corrupt {
                thread_id: raw.clone(),
                reason,
            })?;
            threads.push(thread_id);
        }
        Ok(threads)
    }
}

fn to_sql_seq(checkpoint: &Checkpoint) -> Result<i64, CheckpointError> {
    i64::try_from(checkpoint.run_seq).map_err(|_| CheckpointError::Corrupt {
        thread_id: checkpoint.thread_id.to_string(),
        reason: format!("run_seq {} exceeds sqlite integer range", checkpoint.run_seq),
    })
}
