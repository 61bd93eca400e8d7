//! REST client for the hosted feedback store (PostgREST-style endpoints).

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{info, warn};

use atrio_core::{parse_uid, uid_string, FeedbackRecord, FeedbackStatus, NewFeedback, Uid};

use crate::{feed, BackendError, CancelHandle, FeedSubscription, FeedbackBackend, Hotel};

/// Connection settings for one hosted project.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base HTTP URL, e.g. `https://abc.example.co`.
    pub base_url: String,
    /// Project API key, sent as `apikey` and bearer token.
    pub anon_key: String,
    /// Realtime websocket endpoint; derived from `base_url` when unset.
    pub ws_url: Option<String>,
}

impl RestConfig {
    /// Read settings from `ATRIO_BASE_URL` / `ATRIO_ANON_KEY` / `ATRIO_WS_URL`.
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var("ATRIO_BASE_URL")
            .map_err(|_| anyhow::anyhow!("ATRIO_BASE_URL is not set"))?;
        let anon_key = std::env::var("ATRIO_ANON_KEY").unwrap_or_default();
        if anon_key.is_empty() {
            warn!("ATRIO_ANON_KEY is empty; requests will be unauthenticated");
        }
        Ok(Self { base_url, anon_key, ws_url: std::env::var("ATRIO_WS_URL").ok() })
    }
}

/// HTTP + websocket client for the hosted store.
pub struct RestBackend {
    client: reqwest::Client,
    cfg: RestConfig,
}

impl RestBackend {
    pub fn new(cfg: RestConfig) -> Self {
        Self { client: reqwest::Client::new(), cfg }
    }

    /// Reuse an existing client (connection pooling across components).
    pub fn with_client(client: reqwest::Client, cfg: RestConfig) -> Self {
        Self { client, cfg }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    fn ws_endpoint(&self) -> String {
        match &self.cfg.ws_url {
            Some(u) => u.clone(),
            None => {
                let base = self.cfg.base_url.trim_end_matches('/');
                let ws = base
                    .replacen("https://", "wss://", 1)
                    .replacen("http://", "ws://", 1);
                format!("{}/realtime/v1/changes?apikey={}", ws, self.cfg.anon_key)
            }
        }
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.cfg.anon_key)
            .bearer_auth(&self.cfg.anon_key)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(BackendError::Api { status: status.as_u16(), body })
    }
}

#[async_trait::async_trait]
impl FeedbackBackend for RestBackend {
    async fn list_feedback(&self) -> Result<Vec<FeedbackRecord>, BackendError> {
        let t0 = Instant::now();
        let resp = self
            .authed(self.client.get(self.url("feedback")))
            .query(&[("select", "*,hotels(name)"), ("order", "created_at.desc")])
            .send()
            .await?;
        let rows: Vec<serde_json::Value> = Self::check(resp).await?.json().await?;
        let records: Vec<FeedbackRecord> =
            rows.iter().filter_map(FeedbackRecord::from_row).collect();
        metrics::counter!("cloud_list_total", 1u64);
        metrics::histogram!("cloud_list_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(rows = records.len(), took_ms = %t0.elapsed().as_millis(), "cloud: list ok");
        Ok(records)
    }

    async fn update_status(
        &self,
        id: Uid,
        status: FeedbackStatus,
    ) -> Result<(), BackendError> {
        let t0 = Instant::now();
        let resp = self
            .authed(self.client.patch(self.url("feedback")))
            .query(&[("id", format!("eq.{}", uid_string(&id)))])
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({ "status": status.as_str() }))
            .send()
            .await?;
        Self::check(resp).await?;
        metrics::counter!("cloud_status_updates_total", 1u64);
        info!(id = %uid_string(&id), status = %status, took_ms = %t0.elapsed().as_millis(), "cloud: status updated");
        Ok(())
    }

    async fn hotel_name(&self, id: Uid) -> Result<Option<String>, BackendError> {
        let id_filter = format!("eq.{}", uid_string(&id));
        let resp = self
            .authed(self.client.get(self.url("hotels")))
            .query(&[("select", "name"), ("id", id_filter.as_str())])
            .send()
            .await?;
        let rows: Vec<serde_json::Value> = Self::check(resp).await?.json().await?;
        Ok(rows
            .first()
            .and_then(|r| r.get("name"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }

    async fn list_hotels(&self) -> Result<Vec<Hotel>, BackendError> {
        let resp = self
            .authed(self.client.get(self.url("hotels")))
            .query(&[("select", "id,name"), ("order", "name.asc")])
            .send()
            .await?;
        let rows: Vec<serde_json::Value> = Self::check(resp).await?.json().await?;
        Ok(rows
            .iter()
            .filter_map(|r| {
                Some(Hotel {
                    id: parse_uid(r.get("id")?.as_str()?)?,
                    name: r.get("name")?.as_str()?.to_string(),
                })
            })
            .collect())
    }

    async fn submit(&self, submission: NewFeedback) -> Result<Uid, BackendError> {
        let resp = self
            .authed(self.client.post(self.url("feedback")))
            .header("Prefer", "return=representation")
            .json(&submission)
            .send()
            .await?;
        let rows: Vec<serde_json::Value> = Self::check(resp).await?.json().await?;
        rows.first()
            .and_then(|r| r.get("id"))
            .and_then(|v| v.as_str())
            .and_then(parse_uid)
            .ok_or(BackendError::MissingId)
    }

    async fn subscribe(&self) -> Result<FeedSubscription, BackendError> {
        let cap = std::env::var("ATRIO_QUEUE_CAP")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(1024);
        let (tx, rx) = mpsc::channel(cap);
        let endpoint = self.ws_endpoint();
        let task = tokio::spawn(feed::run_socket(endpoint, tx));
        Ok(FeedSubscription { rx, cancel: CancelHandle::for_task(task) })
    }
}
