use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use filegate::FileGate;
use filegate_core::policy::GatePolicy;

use super::ApiError;
use super::backend::{BackendStore, CancelHandle};

pub(super) fn io_timeout(policy: &GatePolicy) -> Duration {
    Duration::from_millis(policy.limits.max_io_ms.saturating_add(250))
}

struct CancelState {
    requested: AtomicBool,
    handle: Mutex<Option<CancelHandle>>,
}

impl CancelState {
    fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    fn request_cancel(&self) {
        self.requested.store(true, Ordering::Release);
        if let Ok(guard) = self.handle.try_lock()
            && let Some(handle) = guard.as_ref()
        {
            handle.cancel();
        }
    }

    fn set_handle(&self, handle: CancelHandle) {
        if let Ok(mut guard) = self.handle.lock() {
            let should_cancel = self.requested.load(Ordering::Acquire);
            *guard = Some(handle);
            if should_cancel && let Some(handle) = guard.as_ref() {
                handle.cancel();
            }
        }
    }
}

async fn run_blocking<T>(
    timeout: Duration,
    cancel: Arc<CancelState>,
    f: impl FnOnce() -> filegate::Result<T> + Send + 'static,
) -> Result<T, ApiError>
where
    T: Send + 'static,
{
    let mut handle = tokio::task::spawn_blocking(f);
    let sleep = tokio::time::sleep(timeout);
    tokio::pin!(sleep);
    let join = tokio::select! {
        res = &mut handle => res,
        _ = &mut sleep => {
            cancel.request_cancel();
            handle.abort();
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "filegate request timed out");
            return Err(super::map_err(filegate::Error::Timeout("request timed out".to_string())));
        }
    };

    let result = join.map_err(|err| super::map_err(filegate::Error::Storage(err.to_string())))?;
    result.map_err(super::map_err)
}

/// Runs `op` on a blocking thread against a pooled store, inside the io budget.
pub(super) async fn run_gate<T>(
    state: super::AppState,
    op: impl FnOnce(&mut FileGate<BackendStore>) -> filegate::Result<T> + Send + 'static,
) -> Result<T, ApiError>
where
    T: Send + 'static,
{
    let _permit = state
        .inner
        .io_concurrency
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| {
            super::err(
                axum::http::StatusCode::SERVICE_UNAVAILABLE,
                "busy",
                "server is busy",
            )
        })?;

    let backend = state.inner.backend.clone();
    let policy = state.inner.policy.clone();
    let registry = state.inner.registry.clone();
    let timeout = io_timeout(&policy);

    let cancel = Arc::new(CancelState::new());
    let cancel_for_worker = cancel.clone();

    run_blocking(timeout, cancel, move || -> filegate::Result<T> {
        let (store, cancel_handle) = backend.open()?;
        cancel_for_worker.set_handle(cancel_handle);
        let mut gate = FileGate::with_registry(store, policy, registry)?;
        op(&mut gate)
    })
    .await
}
