// SPDX-License-Identifier: MIT

//! Orchestration engine
//!
//! Composes the repository, task ledger, graph engine and execution backend.
//! Every mutating operation runs under one process-wide lock, held across the
//! repository round-trip.

mod orchestrator;
mod status;

pub use orchestrator::{OrchestrationEngine, WorkflowSnapshot};
pub use status::{derive_status, status_of};
