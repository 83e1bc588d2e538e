//! HTTP client for one vendor site
//!
//! All calls are form-encoded POSTs carrying the site's `appkey`. A client
//! stops making calls once it saw a transport failure or a 5xx response, or
//! once it used up its call budget; a new client is created every cycle.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cycle_common::types::{GroupId, SourceEndpoint};
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::types::{GroupBoxes, NetprintGroup};
use super::{ApiError, ClientFactory, VendorApi};
use crate::config::ApiConfig;

const API_PATH: &str = "api/";
const GROUP_PATH: &str = "api.php/";

const ACTION_GROUP_BOXES: &str = "fk:get_group_boxes";
const ACTION_GROUPS_BY_STATUS: &str = "fk:get_groups_by_status_and_period";

/// Longest response excerpt kept in decode errors
const BODY_EXCERPT_LEN: usize = 256;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorEnvelope {
    code: i64,
    error: String,
    exception: String,
}

pub struct VendorClient {
    client: Client,
    base_url: Url,
    app_key: String,
    calls: AtomicU32,
    calls_limit: u32,
    broken: AtomicBool,
}

impl VendorClient {
    pub fn new(
        client: Client,
        base_url: &str,
        app_key: impl Into<String>,
        calls_limit: u32,
    ) -> Result<Self, ApiError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized).map_err(|e| ApiError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            client,
            base_url,
            app_key: app_key.into(),
            calls: AtomicU32::new(0),
            calls_limit,
            broken: AtomicBool::new(false),
        })
    }

    /// Not broken and still within the call budget
    pub fn is_active(&self) -> bool {
        !self.broken.load(Ordering::Relaxed)
            && (self.calls_limit == 0 || self.calls.load(Ordering::Relaxed) < self.calls_limit)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        mut form: Vec<(&'static str, String)>,
    ) -> Result<T, ApiError> {
        if !self.is_active() {
            return Err(ApiError::Inactive);
        }
        self.calls.fetch_add(1, Ordering::Relaxed);

        let url = self
            .base_url
            .join(path)
            .map_err(|e| ApiError::InvalidUrl {
                url: format!("{}{}", self.base_url, path),
                reason: e.to_string(),
            })?;
        form.push(("appkey", self.app_key.clone()));

        let response = match self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.mark_broken();
                return Err(e.into());
            },
        };

        let status = response.status();
        if status.is_server_error() {
            self.mark_broken();
        }
        let body = response.text().await?;

        if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
            if envelope.code != 0 || !envelope.error.is_empty() {
                return Err(ApiError::Vendor {
                    code: envelope.code,
                    error: envelope.error,
                    exception: envelope.exception,
                });
            }
        }

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| ApiError::Decode(format!("{}; response: {}", e, excerpt(&body))))
    }

    fn mark_broken(&self) {
        if !self.broken.swap(true, Ordering::Relaxed) {
            warn!(url = %self.base_url, "Vendor API client disabled for this cycle");
        }
    }
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[async_trait]
impl VendorApi for VendorClient {
    async fn fetch_group_detail(&self, group_id: GroupId) -> Result<Map<String, Value>, ApiError> {
        let mut raw: Value = self
            .call(
                GROUP_PATH,
                vec![("cmd", "group".to_string()), ("args[number]", group_id.to_string())],
            )
            .await?;

        match raw.get_mut("result").map(Value::take) {
            Some(Value::Object(group)) => Ok(group),
            _ => Err(ApiError::Decode(format!(
                "group {} response has no result object",
                group_id
            ))),
        }
    }

    async fn fetch_group_boxes(&self, group_id: GroupId) -> Result<GroupBoxes, ApiError> {
        let boxes: GroupBoxes = self
            .call(
                API_PATH,
                vec![
                    ("action", ACTION_GROUP_BOXES.to_string()),
                    ("id", group_id.to_string()),
                ],
            )
            .await?;
        debug!(group_id, boxes = boxes.boxes.len(), "Group boxes fetched");
        Ok(boxes)
    }

    async fn fetch_groups_since(
        &self,
        statuses: &[i32],
        since: i64,
    ) -> Result<Vec<NetprintGroup>, ApiError> {
        let mut form = vec![
            ("action", ACTION_GROUPS_BY_STATUS.to_string()),
            ("start", since.to_string()),
        ];
        form.extend(statuses.iter().map(|s| ("status[]", s.to_string())));
        self.call(API_PATH, form).await
    }
}

/// Builds [`VendorClient`]s sharing one connection pool.
#[derive(Clone)]
pub struct HttpClientFactory {
    client: Client,
    calls_limit: u32,
}

impl HttpClientFactory {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            calls_limit: config.calls_limit,
        })
    }
}

impl ClientFactory for HttpClientFactory {
    fn create(&self, endpoint: &SourceEndpoint) -> Result<Arc<dyn VendorApi>, ApiError> {
        let client = VendorClient::new(
            self.client.clone(),
            &endpoint.url,
            endpoint.app_key.clone(),
            self.calls_limit,
        )?;
        Ok(Arc::new(client))
    }
}
