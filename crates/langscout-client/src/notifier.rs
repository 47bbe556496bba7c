use std::time::Duration;

use langscout_core::error::AppError;
use langscout_core::traits::{CallbackNotifier, CallbackPayload};
use reqwest::Client;

/// Posts batch results to the submitter's callback URL as JSON.
#[derive(Clone)]
pub struct ReqwestNotifier {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestNotifier {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(15))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent("langscout/0.1 (callback)")
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl CallbackNotifier for ReqwestNotifier {
    async fn notify(&self, callback: &str, payload: &CallbackPayload) -> Result<(), AppError> {
        let response = self
            .client
            .post(callback)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} from callback {}",
                status.as_u16(),
                callback
            )));
        }

        tracing::debug!(%callback, code = %payload.code, "Callback delivered");
        Ok(())
    }
}
