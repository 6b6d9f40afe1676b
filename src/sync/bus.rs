//! Event-bus message shapes proxied between this service and the client-side
//! Discogs API proxy (§6). The bus itself is out of scope here (it is a
//! websocket relay the gateway owns); this module only defines the wire
//! shapes and a thin [`EventBus`] publish trait so the coordinator can be
//! tested against a recording fake instead of a real socket.

use chrono::{DateTime, Utc};
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

pub use crate::models::ApiRequestType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequestPayload {
    pub request_id: Uuid,
    pub request_type: ApiRequestType,
    pub folder_id: Option<i64>,
    pub page: Option<u32>,
    pub url: String,
    pub method: &'static str,
    pub headers: ApiRequestHeaders,
    pub callback_service: &'static str,
    pub callback_event: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequestHeaders {
    pub authorization: String,
}

/// Full outbound envelope published on the `websocket` topic, addressed to
/// the proxy running in one user's client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequestEvent {
    pub id: Uuid,
    pub service: &'static str,
    pub event: &'static str,
    pub user_id: Uuid,
    pub payload: ApiRequestPayload,
    pub timestamp: DateTime<Utc>,
}

impl ApiRequestEvent {
    pub fn new(user_id: Uuid, token: &str, payload: ApiRequestPayload) -> Self {
        let _ = token;
        Self {
            id: Uuid::new_v4(),
            service: "api",
            event: "api_request",
            user_id,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Pagination metadata accompanying a folder-releases response, when present.
#[derive(Debug, Clone, Deserialize)]
pub struct PaginationInfo {
    pub page: u32,
    pub pages: u32,
    #[serde(default)]
    pub urls: PaginationUrls,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaginationUrls {
    pub next: Option<String>,
}

/// Inbound proxy response, routed to the coordinator's T1/T3 handlers.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponseEvent {
    pub request_id: Uuid,
    pub status: u16,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub pagination: Option<PaginationInfo>,
}

impl ApiResponseEvent {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }
}

/// Lifecycle events published once a sync finishes, successfully or not.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    SyncComplete { total_releases: usize },
    SyncError { error: String, message: String },
}

/// Publishes outbound events to the bus. Tests substitute [`RecordingBus`].
#[async_trait::async_trait]
pub trait EventBus: Send + Sync {
    async fn publish_request(&self, event: ApiRequestEvent) -> Result<(), crate::error::AppError>;
    async fn publish_lifecycle(
        &self,
        user_id: Uuid,
        event: LifecycleEvent,
    ) -> Result<(), crate::error::AppError>;
}

/// Production bus: `PUBLISH`es onto the Redis channel the gateway's websocket
/// relay subscribes to. Same pool discipline as [`crate::cache::Cache`] — a
/// short-lived connection per call, no dedicated pub/sub connection held open.
pub struct RedisEventBus {
    pool: Pool,
    channel: String,
}

impl RedisEventBus {
    pub fn new(pool: Pool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    async fn publish(&self, payload: &impl Serialize) -> Result<(), AppError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::Internal(format!("redis pool error: {e}")))?;
        let raw = serde_json::to_string(payload)
            .map_err(|e| AppError::Internal(format!("failed to serialize bus event: {e}")))?;
        let _: i64 = conn.publish(&self.channel, raw).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventBus for RedisEventBus {
    async fn publish_request(&self, event: ApiRequestEvent) -> Result<(), AppError> {
        self.publish(&event).await
    }

    async fn publish_lifecycle(&self, user_id: Uuid, event: LifecycleEvent) -> Result<(), AppError> {
        #[derive(Serialize)]
        struct Envelope {
            user_id: Uuid,
            #[serde(flatten)]
            event: LifecycleEvent,
        }
        self.publish(&Envelope { user_id, event }).await
    }
}

#[cfg(any(test, feature = "legacy-integration-tests"))]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Captures every published event in order, for asserting on what the
    /// coordinator tried to send without a real websocket relay.
    #[derive(Default)]
    pub struct RecordingBus {
        pub requests: Mutex<Vec<ApiRequestEvent>>,
        pub lifecycle: Mutex<Vec<(Uuid, LifecycleEvent)>>,
    }

    #[async_trait::async_trait]
    impl EventBus for RecordingBus {
        async fn publish_request(&self, event: ApiRequestEvent) -> Result<(), crate::error::AppError> {
            self.requests.lock().unwrap().push(event);
            Ok(())
        }

        async fn publish_lifecycle(
            &self,
            user_id: Uuid,
            event: LifecycleEvent,
        ) -> Result<(), crate::error::AppError> {
            self.lifecycle.lock().unwrap().push((user_id, event));
            Ok(())
        }
    }
}
