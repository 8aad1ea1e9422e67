// SPDX-License-Identifier: MIT

//! Optional periodic reconciliation of ledger-tracked workflows

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::dagflow::OrchestrationEngine;

/// Run `reconcile_all` every `interval` until `stop` is notified
pub fn spawn_reconciler(
    engine: Arc<OrchestrationEngine>,
    interval: Duration,
    stop: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        log::info!("Background reconciler every {:?}", interval);
        loop {
            tokio::select! {
                _ = stop.notified() => {
                    log::info!("Background reconciler stop notified");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
            match engine.reconcile_all().await {
                Ok(0) => {}
                Ok(count) => log::debug!("Reconciled {} workflows", count),
                Err(e) => log::warn!("Background reconciliation failed: {}", e),
            }
        }
        log::info!("Background reconciler exiting");
    })
}
