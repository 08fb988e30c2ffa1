use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::correlation::CorrelationTable;
use super::signature::{SignatureValue, SigningError};
use crate::host::{EventSink, HostEvent};
use crate::network::AccountSigner;

pub type SigningResult = Result<SignatureValue, SigningError>;

/// Asks the host to sign and suspends until the answer comes back through
/// [`ExternalSigner::resolve`].
///
/// Requests are correlated by a fresh UUID per call. There is no timeout
/// unless one is configured; dropping an `initiate` future removes its entry
/// so abandoned calls never leak.
pub struct ExternalSigner {
    requests: CorrelationTable<SigningResult>,
    events: Arc<dyn EventSink>,
    timeout: Option<Duration>,
    closed: CancellationToken,
}

impl ExternalSigner {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            requests: CorrelationTable::new(),
            events,
            timeout: None,
            closed: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn initiate(&self, account: &str, message: &str) -> SigningResult {
        let id = Uuid::new_v4().to_string();
        if self.closed.is_cancelled() {
            tracing::debug!(request_id = %id, account, "signer closed, not asking host");
            return Err(SigningError::Abandoned { id });
        }

        let receiver = self.requests.insert(id.clone());
        let _guard = PendingGuard {
            requests: &self.requests,
            id: &id,
        };

        tracing::debug!(request_id = %id, account, "requesting signature from host");
        self.events.emit(HostEvent::SignRequested {
            id: id.clone(),
            message: message.to_string(),
        });

        let answered = async {
            let received = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, receiver).await {
                    Ok(received) => received,
                    Err(_) => {
                        tracing::warn!(
                            request_id = %id,
                            account,
                            ?limit,
                            "signing request timed out"
                        );
                        return Err(SigningError::TimedOut { id: id.clone() });
                    }
                },
                None => receiver.await,
            };
            received.unwrap_or_else(|_| Err(SigningError::Abandoned { id: id.clone() }))
        };

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(SigningError::Abandoned { id: id.clone() }),
            result = answered => result,
        }
    }

    /// Delivers the host's base64 `payload` to request `id`. Unknown ids are
    /// ignored so late or duplicate answers are harmless. Returns whether a
    /// waiting request received the result.
    pub fn resolve(&self, id: &str, payload: &str) -> bool {
        if !self.requests.contains(id) {
            tracing::debug!(request_id = %id, "ignoring signature for unknown request");
            return false;
        }

        let result = SignatureValue::from_base64(payload);
        if let Err(e) = &result {
            tracing::warn!(request_id = %id, error = %e, "host supplied an unusable signature");
        }
        self.requests.resolve(id, result)
    }

    /// Fails every outstanding request and refuses new ones, including any
    /// `initiate` that had not reached the table yet. Used when the host goes
    /// away.
    pub fn close(&self) -> usize {
        self.closed.cancel();
        self.abandon_all()
    }

    /// Fails every outstanding request.
    pub fn abandon_all(&self) -> usize {
        self.requests
            .drain_with(|id| Err(SigningError::Abandoned { id: id.to_string() }))
    }

    pub fn pending(&self) -> usize {
        self.requests.len()
    }
}

struct PendingGuard<'a> {
    requests: &'a CorrelationTable<SigningResult>,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.requests.remove(self.id);
    }
}

/// [`AccountSigner`] for one address, backed by the shared host signer.
pub struct HostSigner {
    address: String,
    signer: Arc<ExternalSigner>,
}

impl HostSigner {
    pub fn new(address: impl Into<String>, signer: Arc<ExternalSigner>) -> Self {
        Self {
            address: address.into(),
            signer,
        }
    }
}

#[async_trait]
impl AccountSigner for HostSigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign(&self, message: &str) -> Result<SignatureValue, SigningError> {
        self.signer.initiate(&self.address, message).await
    }
}
