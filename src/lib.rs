// SPDX-License-Identifier: MIT

//! dagflow-rs: orchestration of rule-driven DAG workflows
//!
//! - `graph` - graph engine seam and the built-in staged-template adapter
//! - `dagflow` - orchestration engine, persistence, execution and HTTP surface

pub mod dagflow;
pub mod graph;
