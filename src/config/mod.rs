//! # Run configuration.
//!
//! A single YAML document describes a run:
//!
//! ```text
//! name, connection{..}, execution{..}, replay{..} | batch{..}, dates{..}, env{..}
//! ```
//!
//! Loading is strict: unknown keys, missing required keys, out-of-range values
//! and unresolved `${VAR}` references all fail with a [`ConfigError`](crate::ConfigError)
//! before a single session is created. The result, [`RunConfig`], is immutable.
//!
//! ```rust,no_run
//! use pqvisor::RunConfig;
//!
//! let cfg = RunConfig::load("runs/backtest.yaml")?;
//! println!("{} x {} partitions", cfg.name, cfg.execution.num_partitions);
//! # Ok::<(), pqvisor::ConfigError>(())
//! ```

mod document;
mod load;
mod model;

pub use model::{
    Auth, BatchConfig, ConnectionConfig, DateRange, ExecutionConfig, ModeConfig, ReplayConfig,
    RunConfig, ScriptLanguage, TimestampColumn,
};
