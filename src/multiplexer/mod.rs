//! Request-Response Multiplexer — correlates outgoing request ids to
//! pending completions (§4.4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tracing::warn;

use crate::domain::RequestId;
use crate::error::CoreError;

/// Default per-request timeout and retry policy (§4.4, §5).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

struct Pending {
    completion: oneshot::Sender<Result<serde_json::Value, CoreError>>,
}

/// Correlates request identifiers to pending completions (§4.4).
///
/// A per-session monotonic counter supplies identifiers, matching the
/// teacher's `AtomicI64` request counter in `poloniex::client::Client`.
pub struct Multiplexer {
    next_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, Pending>>,
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_request_id(&self) -> RequestId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        RequestId::new(id.to_string())
    }

    /// Registers a pending request and waits up to `timeout` for its
    /// completion. `send` is invoked with the allocated id once registered,
    /// so the caller can transmit the wire frame without a race against the
    /// reply arriving before registration completes.
    pub async fn send_request<F, Fut>(
        &self,
        timeout: Duration,
        send: F,
    ) -> Result<serde_json::Value, CoreError>
    where
        F: FnOnce(RequestId) -> Fut,
        Fut: std::future::Future<Output = Result<(), CoreError>>,
    {
        let request_id = self.next_request_id();
        let (tx, rx) = oneshot::channel();

        self.pending.lock().await.insert(
            request_id.clone(),
            Pending { completion: tx },
        );

        if let Err(e) = send(request_id.clone()).await {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                // Sender dropped without completing — session torn down
                // underneath us.
                Err(CoreError::Transport("connection closed".into()))
            }
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(CoreError::Timeout {
                    operation: "send_request".into(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Completes a pending request with a successful payload.
    pub async fn complete(&self, request_id: &RequestId, payload: serde_json::Value) {
        if let Some(pending) = self.pending.lock().await.remove(request_id) {
            let _ = pending.completion.send(Ok(payload));
        }
    }

    /// Completes a pending request with a venue-reported error (§7: "Venue
    /// errors carrying a req_id fail exactly that operation").
    pub async fn fail(&self, request_id: &RequestId, error: CoreError) {
        if let Some(pending) = self.pending.lock().await.remove(request_id) {
            let _ = pending.completion.send(Err(error));
        }
    }

    /// Fails every pending request with "connection closed" (§3, §4.4: on
    /// session drop, every pending request is failed).
    pub async fn fail_all_on_disconnect(&self) {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return;
        }
        warn!(count = pending.len(), "failing all pending requests on disconnect");
        for (_, entry) in pending.drain() {
            let _ = entry
                .completion
                .send(Err(CoreError::Transport("connection closed".into())));
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Runs `send_request` with a bounded retry policy: re-issues with a fresh
/// id up to `retries` times on timeout (§4.4 "optional retry policy").
pub async fn send_request_with_retry<F>(
    multiplexer: &Arc<Multiplexer>,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
    mut send: F,
) -> Result<serde_json::Value, CoreError>
where
    F: FnMut(RequestId) -> futures_util::future::BoxFuture<'static, Result<(), CoreError>>,
{
    let mut attempt = 0;
    loop {
        let result = multiplexer.send_request(timeout, |id| send(id)).await;
        match result {
            Ok(value) => return Ok(value),
            Err(CoreError::Timeout { .. }) if attempt < retries => {
                attempt += 1;
                tokio::time::sleep(retry_delay).await;
                continue;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_pending_request_with_matching_id() {
        let mux = Arc::new(Multiplexer::new());
        let mux2 = Arc::clone(&mux);
        let handle = tokio::spawn(async move {
            mux2.send_request(Duration::from_secs(5), |id| {
                let mux3 = Arc::clone(&mux2);
                async move {
                    tokio::spawn(async move {
                        mux3.complete(&id, serde_json::json!({"ok": true})).await;
                    });
                    Ok(())
                }
            })
            .await
        });
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn times_out_when_never_completed() {
        let mux = Multiplexer::new();
        let result = mux
            .send_request(Duration::from_millis(20), |_id| async { Ok(()) })
            .await;
        assert!(matches!(result, Err(CoreError::Timeout { .. })));
        assert_eq!(mux.pending_count().await, 0);
    }

    #[tokio::test]
    async fn disconnect_fails_all_pending_with_transport_error() {
        let mux = Arc::new(Multiplexer::new());
        let mux2 = Arc::clone(&mux);
        let handle = tokio::spawn(async move {
            mux2.send_request(Duration::from_secs(5), |_id| async { Ok(()) })
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        mux.fail_all_on_disconnect().await;
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(CoreError::Transport(_))));
    }
}
