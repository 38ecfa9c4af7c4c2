//! Background VM cleanup

use futures::future::join_all;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::provider::VmHandle;

/// Deletion requests running in the background
#[derive(Default)]
pub struct CleanupQueue {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CleanupQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a delete for `vm` without waiting for it
    pub fn request_delete(&self, vm: Arc<dyn VmHandle>) {
        info!("Requesting deletion of VM {}", vm.name());

        let handle = tokio::spawn(async move {
            match vm.delete(false).await {
                Ok(()) => debug!("Deletion of VM {} submitted", vm.name()),
                Err(e) => warn!("Failed to delete VM {}: {:#}", vm.name(), e),
            }
        });

        self.lock_tasks().push(handle);
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of requests not yet drained
    pub fn pending(&self) -> usize {
        self.lock_tasks().len()
    }

    /// Wait for every submitted request to finish
    pub async fn drain(&self) {
        let tasks: Vec<_> = self.lock_tasks().drain(..).collect();
        if tasks.is_empty() {
            return;
        }

        debug!("Waiting for {} cleanup task(s)", tasks.len());
        for result in join_all(tasks).await {
            if let Err(e) = result {
                warn!("Cleanup task failed: {}", e);
            }
        }
    }
}
