//! windlass - durable PostgreSQL-backed task queue
//!
//! State of record is a set of PostgreSQL tables; coordination uses
//! `FOR UPDATE SKIP LOCKED` claims and `LISTEN/NOTIFY` wake-ups so many
//! worker processes can dequeue fairly without polling. Running tasks are
//! owned via opaque lease tokens and heartbeat rows; tasks can declare
//! dependencies that gate their readiness; crashed workers surface as stale
//! heartbeats for an external reaper to requeue.
//!
//! # Example
//!
//! ```rust,no_run
//! use tokio_util::sync::CancellationToken;
//! use windlass::{Config, NewTask, PgQueue};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! config.validate()?;
//!
//! let pool = windlass::db::connect_pool(&config.database).await?;
//! windlass::db::run_migrations(&pool).await?;
//!
//! let queue = PgQueue::connect(pool).await?;
//!
//! let id = queue
//!     .enqueue(&NewTask {
//!         task_type: "snapshot".to_string(),
//!         ..Default::default()
//!     })
//!     .await?;
//!
//! let cancel = CancellationToken::new();
//! let task = queue.dequeue(&["snapshot".to_string()], &cancel).await?;
//! assert_eq!(task.id, id);
//!
//! queue.finish(task.id, None).await?;
//! queue.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod queue;

pub use config::Config;
pub use error::{Error, Result};
pub use queue::{NewTask, PgQueue, TaskInfo, TaskStatus};
