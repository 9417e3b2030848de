#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Arbor Engine
//!
//! Walks a plan tree and records what happened as a report tree.
//!
//! - [`Engine`] and [`Run`]: run lifecycle, abort and the run result
//! - [`Dispatcher`]: the per-node protocol shared by every handler
//! - [`HandlerRegistry`] and [`NodeHandler`]: node kind to handler lookup,
//!   open to custom kinds
//! - [`handlers`]: built-in control flow (sequences, branches, loops,
//!   thread groups, retries, polls, calls)
//! - [`ExecutionContext`]: run-wide collaborators plus the scope view of
//!   the current unit
//! - [`HookChain`] and [`PluginHook`]: lifecycle observers, including the
//!   [`TelemetryHook`] every engine installs first
//! - [`EngineConfig`]: tunables, with environment overrides

pub mod config;
pub mod context;
pub(crate) mod convert;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod hooks;
pub mod registry;
pub mod runner;

pub use config::EngineConfig;
pub use context::{ExecutionContext, Services};
pub use dispatcher::Dispatcher;
pub use error::EngineError;
pub use handler::NodeHandler;
pub use hooks::{HookChain, PluginHook, TelemetryHook};
pub use registry::HandlerRegistry;
pub use runner::{AbortHandle, Engine, EngineBuilder, PlanSource, Run, RunResult};
