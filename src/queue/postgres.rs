//! PostgreSQL task queue implementation

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::types::PgInterval;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::dequeuers::Dequeuers;
use super::listener;
use super::models::{NewTask, TaskInfo, TaskStatus};
use super::NOTIFY_TASKS_SQL;
use crate::config::QueueConfig;
use crate::{Error, Result};

const SELECT_TASK_SQL: &str = "
    SELECT id, type, payload, status, error, org_id, repository_uuid,
           token, request_id, queued_at, started_at, finished_at
    FROM tasks
    WHERE id = $1";

// The claim: one ready task of an accepted type moves to running under the
// caller's fresh token. SKIP LOCKED keeps concurrent dequeuers (here and in
// other processes) off each other's rows.
const CLAIM_TASK_SQL: &str = "
    UPDATE tasks
    SET token = $1, started_at = statement_timestamp(), status = 'running'
    WHERE id = (
        SELECT id
        FROM ready_tasks
        WHERE type = ANY($2)
        LIMIT 1
        FOR UPDATE SKIP LOCKED
    )
    RETURNING id, type, payload, status, error, org_id, repository_uuid,
              token, request_id, queued_at, started_at, finished_at";

/// A task queue backed by PostgreSQL.
///
/// All coordination state lives in the database; instances in different
/// processes over the same database form one queue. Construction arms a
/// background `LISTEN tasks` session that wakes local dequeuers whenever
/// queue state changes anywhere.
pub struct PgQueue {
    pool: PgPool,
    dequeuers: Arc<Dequeuers>,
    shutdown: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl PgQueue {
    /// Create a queue over the given pool with default settings.
    ///
    /// Returns once the notification listener is subscribed, so an enqueue
    /// issued immediately after cannot be missed.
    pub async fn connect(pool: PgPool) -> Result<Self> {
        Self::connect_with(pool, &QueueConfig::default()).await
    }

    /// Create a queue with explicit queue settings.
    pub async fn connect_with(pool: PgPool, config: &QueueConfig) -> Result<Self> {
        let dequeuers = Arc::new(Dequeuers::default());
        let shutdown = CancellationToken::new();

        let handle = listener::start(
            &pool,
            Arc::clone(&dequeuers),
            shutdown.clone(),
            Duration::from_millis(config.listener_retry_millis),
        )
        .await?;

        Ok(Self {
            pool,
            dequeuers,
            shutdown,
            listener: Mutex::new(Some(handle)),
        })
    }

    /// The underlying pool, for callers that run their own queries against
    /// the same database.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Stop the notification listener and wait for its session to unlisten
    /// and return to the pool. The pool itself is left open; the caller
    /// owns it.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let handle = self.listener.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Tasks listener terminated abnormally");
            }
        }
    }

    /// Insert a pending task and its dependency edges atomically, then wake
    /// dequeuers. Returns the new task id.
    pub async fn enqueue(&self, task: &NewTask) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO tasks (id, type, payload, status, org_id, repository_uuid,
                                request_id, queued_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, statement_timestamp())",
        )
        .bind(id)
        .bind(&task.task_type)
        .bind(&task.payload)
        .bind(TaskStatus::Pending.as_str())
        .bind(&task.org_id)
        .bind(task.repository_uuid)
        .bind(&task.request_id)
        .execute(&mut *tx)
        .await?;

        for dependency in &task.dependencies {
            sqlx::query("INSERT INTO task_dependencies (task_id, dependency_id) VALUES ($1, $2)")
                .bind(id)
                .bind(dependency)
                .execute(&mut *tx)
                .await?;
        }

        // delivered to listeners when the transaction commits
        sqlx::query(NOTIFY_TASKS_SQL).execute(&mut *tx).await?;

        tx.commit().await?;

        tracing::debug!(task_id = %id, task_type = %task.task_type, "Task enqueued");
        Ok(id)
    }

    /// Claim the next ready task whose type is in `task_types`, blocking
    /// until one is available or `cancel` fires.
    ///
    /// The returned task is running under a freshly issued token with a
    /// heartbeat row inserted; the caller must eventually call [`finish`],
    /// [`cancel`], or [`requeue`] for it.
    ///
    /// [`finish`]: PgQueue::finish
    /// [`cancel`]: PgQueue::cancel
    /// [`requeue`]: PgQueue::requeue
    pub async fn dequeue(
        &self,
        task_types: &[String],
        cancel: &CancellationToken,
    ) -> Result<TaskInfo> {
        // register for wake-ups before the first claim attempt so an enqueue
        // landing in between cannot be missed; the slot unregisters on drop
        let mut slot = self.dequeuers.register();
        let token = Uuid::new_v4();

        loop {
            if cancel.is_cancelled() {
                return Err(Error::DequeueCanceled);
            }

            if let Some(info) = self.try_dequeue(token, task_types).await? {
                tracing::debug!(task_id = %info.id, token = %token, "Task dequeued");
                return Ok(info);
            }

            // no claimable task; wait for the next queue update
            tokio::select! {
                _ = slot.notified() => {}
                _ = cancel.cancelled() => return Err(Error::DequeueCanceled),
            }
        }
    }

    /// One claim attempt: claim a row, insert its heartbeat, and load its
    /// dependency list in a single transaction.
    async fn try_dequeue(&self, token: Uuid, task_types: &[String]) -> Result<Option<TaskInfo>> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query_as::<_, TaskInfo>(CLAIM_TASK_SQL)
            .bind(token)
            .bind(task_types)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(mut info) = claimed else {
            // nothing ready; dropping the transaction rolls it back
            return Ok(None);
        };

        sqlx::query(
            "INSERT INTO task_heartbeats (token, id, heartbeat)
             VALUES ($1, $2, statement_timestamp())",
        )
        .bind(token)
        .bind(info.id)
        .execute(&mut *tx)
        .await?;

        info.dependencies = task_dependencies(&mut *tx, info.id).await?;

        tx.commit().await?;
        Ok(Some(info))
    }

    /// Record a task's outcome: `completed` when `task_error` is `None`,
    /// otherwise `failed` with the message as the task's error. Deletes the
    /// heartbeat and wakes dequeuers so dependents get picked up.
    ///
    /// Returns [`Error::TaskCanceled`] without mutating anything if the task
    /// was canceled in the meantime, and [`Error::NotRunning`] if it is not
    /// currently running.
    pub async fn finish(&self, id: Uuid, task_error: Option<String>) -> Result<()> {
        let (status, error) = match task_error {
            Some(message) => (TaskStatus::Failed, Some(message)),
            None => (TaskStatus::Completed, None),
        };

        let mut tx = self.pool.begin().await?;

        let info = sqlx::query_as::<_, TaskInfo>(SELECT_TASK_SQL)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(Error::NotExist)?;
        if info.status == TaskStatus::Canceled {
            return Err(Error::TaskCanceled);
        }
        if !info.is_running() {
            return Err(Error::NotRunning);
        }

        let deleted = sqlx::query("DELETE FROM task_heartbeats WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted != 1 {
            return Err(Error::NotExist);
        }

        let finished = sqlx::query(
            "UPDATE tasks
             SET finished_at = statement_timestamp(), status = $1, error = $2
             WHERE id = $3 AND finished_at IS NULL",
        )
        .bind(status.as_str())
        .bind(&error)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if finished != 1 {
            return Err(Error::NotExist);
        }

        sqlx::query(NOTIFY_TASKS_SQL).execute(&mut *tx).await?;

        tx.commit().await?;

        tracing::info!(task_id = %id, status = %status, "Task finished");
        Ok(())
    }

    /// Mark a task canceled.
    ///
    /// The heartbeat row stays in place and no notification is emitted: the
    /// worker still holds the token and is expected to observe the
    /// cancellation (via [`status`] or [`refresh_heartbeat`] polling), stop
    /// its side effects, and follow up with [`finish`] or [`requeue`].
    ///
    /// [`status`]: PgQueue::status
    /// [`refresh_heartbeat`]: PgQueue::refresh_heartbeat
    /// [`finish`]: PgQueue::finish
    /// [`requeue`]: PgQueue::requeue
    pub async fn cancel(&self, id: Uuid) -> Result<()> {
        let row = sqlx::query_as::<_, (String, Option<DateTime<Utc>>)>(
            "UPDATE tasks
             SET status = 'canceled'
             WHERE id = $1 AND finished_at IS NULL
             RETURNING type, started_at",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((task_type, _started_at)) = row else {
            return Err(Error::NotRunning);
        };

        tracing::info!(task_id = %id, task_type = %task_type, "Task canceled");
        Ok(())
    }

    /// Return a running task to `pending`: clear its token and start time,
    /// delete its heartbeat, and wake dequeuers. Dependencies are preserved.
    pub async fn requeue(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let info = sqlx::query_as::<_, TaskInfo>(SELECT_TASK_SQL)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(Error::NotExist)?;
        if !info.is_running() {
            return Err(Error::NotRunning);
        }

        let deleted = sqlx::query("DELETE FROM task_heartbeats WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted != 1 {
            return Err(Error::NotExist);
        }

        // conditional on still being mid-run so a race with finish cannot
        // resurrect a completed task
        let requeued = sqlx::query(
            "UPDATE tasks
             SET started_at = NULL, token = NULL, status = 'pending'
             WHERE id = $1 AND started_at IS NOT NULL AND finished_at IS NULL",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if requeued != 1 {
            return Err(Error::NotExist);
        }

        sqlx::query(NOTIFY_TASKS_SQL).execute(&mut *tx).await?;

        tx.commit().await?;

        tracing::info!(task_id = %id, "Task requeued");
        Ok(())
    }

    /// Look up a task and its dependency list.
    pub async fn status(&self, id: Uuid) -> Result<TaskInfo> {
        let mut info = sqlx::query_as::<_, TaskInfo>(SELECT_TASK_SQL)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::NotExist)?;

        info.dependencies = task_dependencies(&self.pool, id).await?;
        Ok(info)
    }

    /// Resolve a claim token to its task id, and whether that task is still
    /// running.
    pub async fn id_from_token(&self, token: Uuid) -> Result<(Uuid, bool)> {
        let (id, status) =
            sqlx::query_as::<_, (Uuid, String)>("SELECT id, status FROM tasks WHERE token = $1")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(Error::NotExist)?;

        Ok((id, status == TaskStatus::Running.as_str()))
    }

    /// Overwrite a task's payload unconditionally. Long-running tasks use
    /// this to checkpoint progress.
    pub async fn update_payload(&self, task: &TaskInfo, payload: JsonValue) -> Result<TaskInfo> {
        sqlx::query("UPDATE tasks SET payload = $1 WHERE id = $2")
            .bind(&payload)
            .bind(task.id)
            .execute(&self.pool)
            .await?;

        let mut updated = task.clone();
        updated.payload = Some(payload);
        Ok(updated)
    }

    /// Tokens of heartbeats older than `older_than`, i.e. running tasks
    /// whose worker has stopped refreshing. Purely observational: takes no
    /// locks and never fails; errors are logged and an empty list returned.
    /// The caller decides what to do with each token (typically resolve it
    /// with [`id_from_token`] and [`requeue`] the task).
    ///
    /// [`id_from_token`]: PgQueue::id_from_token
    /// [`requeue`]: PgQueue::requeue
    pub async fn heartbeats(&self, older_than: Duration) -> Vec<Uuid> {
        let interval = match PgInterval::try_from(older_than) {
            Ok(interval) => interval,
            Err(e) => {
                tracing::error!(error = %e, "Invalid heartbeat age threshold");
                return Vec::new();
            }
        };

        let tokens = sqlx::query_scalar::<_, Uuid>(
            "SELECT token
             FROM task_heartbeats
             WHERE age(statement_timestamp(), heartbeat) > $1",
        )
        .bind(interval)
        .fetch_all(&self.pool)
        .await;

        match tokens {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::error!(error = %e, "Unable to read tokens from heartbeats");
                Vec::new()
            }
        }
    }

    /// Reset the heartbeat under `token` to now, proving the worker alive.
    ///
    /// A nil token is a no-op. If the row is missing, the token is resolved
    /// through [`id_from_token`]: a still-running task means the dequeue
    /// commit raced this refresh, so the update is retried once; a terminal
    /// (or unknown) task means the heartbeat was legitimately removed and
    /// the refresh succeeds silently.
    ///
    /// [`id_from_token`]: PgQueue::id_from_token
    pub async fn refresh_heartbeat(&self, token: Uuid) -> Result<()> {
        if token.is_nil() {
            return Ok(());
        }

        if self.try_refresh_heartbeat(token).await? {
            return Ok(());
        }

        match self.id_from_token(token).await {
            Ok((_, true)) => {
                if self.try_refresh_heartbeat(token).await? {
                    Ok(())
                } else {
                    Err(Error::RowsNotAffected)
                }
            }
            Ok((_, false)) | Err(Error::NotExist) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn try_refresh_heartbeat(&self, token: Uuid) -> Result<bool> {
        let affected = sqlx::query(
            "UPDATE task_heartbeats
             SET heartbeat = statement_timestamp()
             WHERE token = $1",
        )
        .bind(token)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected == 1)
    }

    /// Truncate all queue state. Test harness use only.
    pub async fn remove_all_tasks(&self) -> Result<()> {
        sqlx::query("TRUNCATE tasks, task_heartbeats, task_dependencies")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl Drop for PgQueue {
    fn drop(&mut self) {
        // stops the listener loop if the owner never called close()
        self.shutdown.cancel();
    }
}

async fn task_dependencies<'e, E>(executor: E, id: Uuid) -> Result<Vec<Uuid>>
where
    E: sqlx::PgExecutor<'e>,
{
    let dependencies = sqlx::query_scalar::<_, Uuid>(
        "SELECT dependency_id FROM task_dependencies WHERE task_id = $1",
    )
    .bind(id)
    .fetch_all(executor)
    .await?;

    Ok(dependencies)
}
