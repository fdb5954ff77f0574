use crate::infrastructure::error::InfraError;
use crate::infrastructure::save_endpoint::{SaveEndpoint, SaveReceipt, SaveTimesRequest};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug)]
pub struct RecordingSaveEndpoint {
    status: u16,
    requests: Mutex<Vec<SaveTimesRequest>>,
}

impl Default for RecordingSaveEndpoint {
    fn default() -> Self {
        Self::with_status(200)
    }
}

impl RecordingSaveEndpoint {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SaveTimesRequest> {
        self.requests.lock().expect("requests mutex poisoned").clone()
    }
}

#[async_trait]
impl SaveEndpoint for RecordingSaveEndpoint {
    async fn save_times(&self, request: &SaveTimesRequest) -> Result<SaveReceipt, InfraError> {
        self.requests
            .lock()
            .expect("requests mutex poisoned")
            .push(request.clone());
        Ok(SaveReceipt {
            status: self.status,
        })
    }
}

/// Polls `predicate` until it holds, failing the test after two seconds.
pub async fn wait_until<F>(predicate: F)
where
    F: Fn() -> bool,
{
    let polled = tokio::time::timeout(Duration::from_secs(2), async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not reached within two seconds");
}

static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

/// Scratch directory removed on drop.
pub struct TempWorkspace {
    path: PathBuf,
}

impl TempWorkspace {
    pub fn new(label: &str) -> Self {
        let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "slot-autofill-{label}-tests-{}-{}",
            std::process::id(),
            sequence
        ));
        fs::create_dir_all(&path).expect("create temp workspace");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}
