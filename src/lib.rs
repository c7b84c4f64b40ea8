//! Tempo - a persistent task scheduler exposed as a remote tool server.
//!
//! External agents register one-shot or recurring tasks over a JSON tool
//! API; when a task comes due, a scheduler worker leases it from the
//! durable store and invokes its callback (signed webhook, chat message,
//! email, or stored notification). The key components are:
//!
//! ## Scheduling Engine
//!
//! - [`worker`]: poll loop with per-task DB leases and the stale-lease reaper
//! - [`store`]: typed repositories over PostgreSQL (or in-memory for tests)
//! - [`schedule`]: cron and relative-time evaluation in IANA timezones
//!
//! ## Perimeter
//!
//! - [`safety`]: SSRF URL validation, pinned outbound HTTP, cron admission,
//!   payload sanitization, HMAC envelope signing
//! - [`ratelimit`]: per-source fixed-window request limiting
//!
//! ## Surface
//!
//! - [`tools`]: the seven named operations agents call
//! - [`server`]: axum facade (tool execution, JSON-RPC, notification pull)

pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod ratelimit;
pub mod safety;
pub mod schedule;
pub mod server;
pub mod store;
pub mod tools;
pub mod worker;

// Configuration
pub use config::{Config, Environment};

// Model
pub use model::{
    CallbackConfig, CallbackKind, Execution, ExecutionId, ExecutionStatus, StoredNotification,
    Task, TaskId, TaskKind, TaskStatus,
};

// Store
pub use store::{
    ExecutionOutcome, ExecutionStore, MemoryStore, NotificationStore, PostgresStore, Store,
    StoreError, TaskFilter, TaskStore,
};

// Engine
pub use dispatch::{CallbackRouter, DispatchResult};
pub use worker::{SchedulerWorker, WorkerConfig, WorkerCore, spawn_worker};

// Surface
pub use error::ToolError;
pub use ratelimit::{RateLimitConfig, RateLimiter};
pub use server::ApiServer;
pub use tools::Tools;
