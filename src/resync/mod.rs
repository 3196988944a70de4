//! Resync Client — HTTP client for the external repository sync service
//!
//! The resync-repos strategy triggers a full repository resync on an external
//! service. The trait keeps strategies testable with a recording fake; the
//! HTTP implementation posts to the configured endpoint and treats any
//! non-success status as a failed remediation.

use async_trait::async_trait;
use tracing::{info, warn};

/// Resync client errors
#[derive(Debug, thiserror::Error)]
pub enum ResyncError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server returned status {0}")]
    ServerError(reqwest::StatusCode),
    #[error("resync service not configured")]
    NotConfigured,
}

/// Trigger surface of the external repository sync service
#[async_trait]
pub trait ResyncService: Send + Sync {
    /// Request a full resync of all tracked repositories.
    ///
    /// `reason` is forwarded for the sync service's own audit log.
    async fn trigger_resync(&self, reason: &str) -> Result<(), ResyncError>;
}

/// HTTP client for the sync service
pub struct HttpResyncClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpResyncClient {
    /// Create a client for the given resync endpoint.
    ///
    /// Returns `None` when the reqwest client cannot be built, which is
    /// logged and treated as an unconfigured service.
    pub fn new(endpoint: &str) -> Option<Self> {
        let http = match reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to build resync HTTP client");
                return None;
            }
        };

        Some(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ResyncService for HttpResyncClient {
    async fn trigger_resync(&self, reason: &str) -> Result<(), ResyncError> {
        let body = serde_json::json!({
            "full": true,
            "reason": reason,
        });

        let resp = self
            .http
            .post(format!("{}/api/sync/trigger", self.endpoint))
            .json(&body)
            .send()
            .await?;

        if resp.status().is_success() {
            info!(endpoint = %self.endpoint, "Repository resync triggered");
            Ok(())
        } else {
            Err(ResyncError::ServerError(resp.status()))
        }
    }
}

/// Disabled service used when no resync endpoint is configured.
///
/// Always errors so the resync-repos strategy falls through instead of
/// claiming a remediation it never performed.
pub struct DisabledResync;

#[async_trait]
impl ResyncService for DisabledResync {
    async fn trigger_resync(&self, _reason: &str) -> Result<(), ResyncError> {
        Err(ResyncError::NotConfigured)
    }
}

#[cfg(test)]
pub mod testing {
    //! Recording fake for strategy tests

    use super::*;
    use std::sync::Mutex;

    /// Records every trigger call; fails on demand
    #[derive(Default)]
    pub struct RecordingResync {
        pub calls: Mutex<Vec<String>>,
        pub fail: bool,
    }

    #[async_trait]
    impl ResyncService for RecordingResync {
        async fn trigger_resync(&self, reason: &str) -> Result<(), ResyncError> {
            if self.fail {
                return Err(ResyncError::NotConfigured);
            }
            self.calls
                .lock()
                .map_err(|_| ResyncError::NotConfigured)?
                .push(reason.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_service_errors() {
        let svc = DisabledResync;
        assert!(matches!(
            svc.trigger_resync("test").await,
            Err(ResyncError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_recording_fake_captures_reason() {
        let svc = testing::RecordingResync::default();
        svc.trigger_resync("cohesion drift").await.unwrap();
        assert_eq!(svc.calls.lock().unwrap().as_slice(), ["cohesion drift"]);
    }
}
