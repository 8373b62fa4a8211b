//! Shared harness for queue integration tests
//!
//! Each test gets its own schema in the database named by
//! `WINDLASS_TEST_DATABASE_URL` (or `DATABASE_URL`), so tests can run in
//! parallel. When neither variable is set, tests skip rather than fail.

use std::sync::OnceLock;

use anyhow::Context as _;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection as _, PgConnection, PgPool};
use url::Url;
use uuid::Uuid;
use windlass::{db, NewTask, PgQueue};

pub struct TestQueue {
    pub queue: PgQueue,
    pub pool: PgPool,
    schema: String,
    admin_database_url: String,
}

impl TestQueue {
    /// Set up a queue over a fresh schema, or `None` when no test database
    /// is configured.
    pub async fn new() -> anyhow::Result<Option<Self>> {
        let Some(admin_database_url) = test_database_url() else {
            skip_note();
            return Ok(None);
        };
        init_tracing();

        let schema = format!("test_{}", Uuid::new_v4().simple());
        let mut admin_conn = PgConnection::connect(&admin_database_url)
            .await
            .context("connect admin db for schema create")?;
        sqlx::query(&format!(r#"CREATE SCHEMA "{}""#, schema))
            .execute(&mut admin_conn)
            .await
            .context("create test schema")?;

        // Keep per-test pools small to avoid exhausting Postgres connections
        // when tests run in parallel. One connection is pinned by the
        // queue's notification listener.
        let url = with_search_path(&admin_database_url, &schema)?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .context("connect test pool")?;

        db::run_migrations(&pool).await.context("run migrations")?;

        let queue = PgQueue::connect(pool.clone())
            .await
            .context("construct queue")?;

        Ok(Some(Self {
            queue,
            pool,
            schema,
            admin_database_url,
        }))
    }

    pub async fn cleanup(self) -> anyhow::Result<()> {
        self.queue.close().await;
        self.pool.close().await;

        let mut admin_conn = PgConnection::connect(&self.admin_database_url)
            .await
            .context("connect admin db for schema drop")?;
        sqlx::query(&format!(r#"DROP SCHEMA "{}" CASCADE"#, self.schema))
            .execute(&mut admin_conn)
            .await
            .context("drop test schema")?;

        Ok(())
    }
}

pub fn new_task(task_type: &str) -> NewTask {
    NewTask {
        task_type: task_type.to_string(),
        ..Default::default()
    }
}

pub fn types(task_types: &[&str]) -> Vec<String> {
    task_types.iter().map(|t| t.to_string()).collect()
}

fn test_database_url() -> Option<String> {
    std::env::var("WINDLASS_TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
}

fn skip_note() {
    static NOTE: OnceLock<()> = OnceLock::new();
    NOTE.get_or_init(|| {
        eprintln!(
            "set WINDLASS_TEST_DATABASE_URL to run the queue integration tests; skipping"
        );
    });
}

fn init_tracing() {
    windlass::logging::init_simple_logging();
}

fn with_search_path(database_url: &str, schema: &str) -> anyhow::Result<String> {
    let mut url = Url::parse(database_url).context("parse database URL")?;
    url.query_pairs_mut()
        .append_pair("options", &format!("-c search_path={}", schema));
    Ok(url.to_string())
}
