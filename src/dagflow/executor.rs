// SPDX-License-Identifier: MIT

//! Local execution backend
//!
//! Runs node commands with `sh -c` as tokio tasks. Statuses live in memory
//! only; after a restart every handle is unknown and nodes keep their
//! persisted state.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::process::Command;
use tokio::runtime::Handle;
use uuid::Uuid;

use crate::graph::{ExecutionBackend, NodeTask, TaskStatus};

#[derive(Clone, Default)]
pub struct LocalBackend {
    tasks: Arc<Mutex<HashMap<String, TaskStatus>>>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, handle: &str, status: TaskStatus) {
        set_status(&self.tasks, handle, status);
    }
}

fn set_status(tasks: &Mutex<HashMap<String, TaskStatus>>, handle: &str, status: TaskStatus) {
    let mut tasks = tasks.lock().unwrap_or_else(PoisonError::into_inner);
    tasks.insert(handle.to_string(), status);
}

async fn run(task: &NodeTask) -> Result<bool, std::io::Error> {
    let Some(command) = task.command.as_deref() else {
        return Ok(true);
    };

    tokio::fs::create_dir_all(&task.work_dir).await?;
    let stdout = std::fs::File::create(task.work_dir.join("stdout.log"))?;
    let stderr = std::fs::File::create(task.work_dir.join("stderr.log"))?;

    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(Path::new(&task.work_dir))
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .status()
        .await?;

    Ok(status.success())
}

impl ExecutionBackend for LocalBackend {
    fn submit(&self, task: NodeTask) -> String {
        let handle = Uuid::new_v4().to_string();
        self.set(&handle, TaskStatus::Pending);

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                log::error!("Cannot dispatch node {}: {}", task.node_id, e);
                self.set(&handle, TaskStatus::Failed);
                return handle;
            }
        };

        let tasks = Arc::clone(&self.tasks);
        let task_handle = handle.clone();
        runtime.spawn(async move {
            set_status(&tasks, &task_handle, TaskStatus::Running);
            log::info!("Running node {} ({})", task.node_id, task_handle);

            let status = match run(&task).await {
                Ok(true) => TaskStatus::Succeeded,
                Ok(false) => {
                    log::warn!("Node {} exited with failure", task.node_id);
                    TaskStatus::Failed
                }
                Err(e) => {
                    log::error!("Node {} could not run: {}", task.node_id, e);
                    TaskStatus::Failed
                }
            };
            set_status(&tasks, &task_handle, status);
        });

        handle
    }

    fn status(&self, handle: &str) -> Option<TaskStatus> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.get(handle).copied()
    }
}
