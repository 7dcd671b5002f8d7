//! Latest-wins request cancellation.

use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::{AbortHandle, Abortable};
use tracing::debug;

use super::ApiError;

/// A slot holding the abort handle of the current in-flight request.
///
/// Running a new future through the slot aborts the one it supersedes.
/// Clones share the slot.
#[derive(Clone, Default)]
pub struct LatestWins {
    current: Arc<Mutex<Option<AbortHandle>>>,
}

impl LatestWins {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<F, T>(&self, fut: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        let (handle, registration) = AbortHandle::new_pair();
        {
            let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = current.replace(handle) {
                debug!("Aborting superseded request");
                previous.abort();
            }
        }

        match Abortable::new(fut, registration).await {
            Ok(result) => result,
            Err(_aborted) => Err(ApiError::Cancelled),
        }
    }
}
