//! # xec-core
//!
//! A universal command-execution engine: one API for running commands on
//! the local host, over SSH, inside containers, or in Kubernetes pods.
//!
//! ## Core concepts
//!
//! - **Engine** ([`engine::Engine`]): entry point. Builds Command Objects,
//!   applies layered defaults, routes to an adapter, emits lifecycle
//!   events.
//! - **Command Object** ([`command_object::CommandObject`]): a lazy,
//!   awaitable handle to a single execution. No process starts until the
//!   first await or result projection; concurrent awaiters share one run.
//! - **Adapters** ([`adapter`]): pluggable backends — `local`, `ssh`,
//!   `container`, `cluster-pod` — behind one `execute`/`dispose` contract.
//! - **Cache** ([`cache`]): bounded LRU result cache with in-flight
//!   execution dedup, so identical concurrent commands share one run.
//! - **Pipe engine** ([`pipe`]) and **parallel/batch** ([`parallel`]):
//!   composition primitives built on top of Command Objects.
//!
//! ## Example
//!
//! ```no_run
//! use xec_core::engine::Engine;
//! use xec_core::config::EngineConfig;
//!
//! # async fn run() -> Result<(), xec_core::error::XecError> {
//! let engine = Engine::new(EngineConfig::default())?;
//! let result = engine.run(&["echo ", ""], &["hello".to_string()]).output().await?;
//! println!("{}", result.text());
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod cache;
pub mod command;
pub mod command_object;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod escape;
pub mod events;
pub mod fileops;
pub mod logging;
pub mod parallel;
pub mod pipe;
pub mod result;
pub mod retry;
pub mod tempfs;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use command::{Command, CommandBuilder};
pub use command_object::CommandObject;
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::XecError;
pub use result::ExecResult;
