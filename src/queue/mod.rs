//! Durable task queue backed by PostgreSQL
//!
//! Tasks live in the `tasks` table; many worker processes dequeue them
//! concurrently through `FOR UPDATE SKIP LOCKED` claims and are woken by
//! `LISTEN/NOTIFY` instead of polling. Ownership of a running task is held
//! via an opaque token and a heartbeat row that the worker refreshes; stale
//! heartbeats surface crashed workers for an external reaper to requeue.

mod dequeuers;
mod listener;
mod models;
mod postgres;

pub use models::{NewTask, TaskInfo, TaskStatus};
pub use postgres::PgQueue;

/// Channel carrying the payload-less wake-up hints. Producers `NOTIFY` it
/// inside the transaction that changes queue state; consumers treat receipt
/// as a request to re-run their claim query.
pub(crate) const TASKS_CHANNEL: &str = "tasks";

/// Wake-up hint emitted inside every state-changing transaction.
pub(crate) const NOTIFY_TASKS_SQL: &str = "NOTIFY tasks";
