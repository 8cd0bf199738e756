// Path: crates/client/src/backend.rs
//! HTTP client for the report backend.

use async_trait::async_trait;
use auditchain_api::store::BackendStore;
use auditchain_types::config::BackendConfig;
use auditchain_types::error::StoreError;
use auditchain_types::report::{Report, ReportId};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

const MAX_ERROR_BODY: usize = 512;

/// A [`BackendStore`] backed by the report service's REST API.
#[derive(Debug, Clone)]
pub struct HttpBackendStore {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBackendStore {
    pub fn new(config: &BackendConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn report_url(&self, id: &ReportId) -> String {
        format!("{}/reports/{}", self.base_url, id)
    }

    async fn check(id: Option<&ReportId>, response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if let (StatusCode::NOT_FOUND, Some(id)) = (status, id) {
            return Err(StoreError::NotFound(id.clone()));
        }
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|i| body.is_char_boundary(*i))
                .unwrap_or(0);
            body.truncate(cut);
        }
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
        response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::Transport(e.to_string())
}

#[async_trait]
impl BackendStore for HttpBackendStore {
    async fn update_certification_flag(&self, id: &ReportId) -> Result<(), StoreError> {
        let url = format!("{}/certify", self.report_url(id));
        let response = self.http.post(url).send().await.map_err(transport)?;
        Self::check(Some(id), response).await?;
        tracing::info!(target: "backend", report = %id, "certified flag persisted");
        Ok(())
    }

    async fn get_report(&self, id: &ReportId) -> Result<Report, StoreError> {
        let response = self
            .http
            .get(self.report_url(id))
            .send()
            .await
            .map_err(transport)?;
        Self::decode(Self::check(Some(id), response).await?).await
    }

    async fn list_reports(&self) -> Result<Vec<Report>, StoreError> {
        let url = format!("{}/reports", self.base_url);
        let response = self.http.get(url).send().await.map_err(transport)?;
        Self::decode(Self::check(None, response).await?).await
    }

    async fn delete_report(&self, id: &ReportId) -> Result<(), StoreError> {
        let response = self
            .http
            .delete(self.report_url(id))
            .send()
            .await
            .map_err(transport)?;
        Self::check(Some(id), response).await?;
        tracing::info!(target: "backend", report = %id, "report deleted");
        Ok(())
    }
}
