// SPDX-License-Identifier: MIT

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod loader;
pub mod reconciler;
pub mod repository;
pub mod server;
pub mod workdir;

pub use config::EngineConfig;
pub use engine::{OrchestrationEngine, WorkflowSnapshot};
pub use error::EngineError;
