//! Service events pushed to WebSocket listeners alongside the frame feed.

use serde::Serialize;

use crate::utils::now_ts;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServiceEvent {
    /// Something happened that the UI should react to (photo taken,
    /// replay saved, records cleared, ...)
    Event {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        thumb: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        count: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration: Option<u64>,
        ts: i64,
    },
    Notification {
        message: String,
        severity: String,
        ts: i64,
    },
    Error { message: String, ts: i64 },
}

impl ServiceEvent {
    pub fn named(name: &str) -> Self {
        Self::Event {
            name: name.to_string(),
            id: None,
            path: None,
            thumb: None,
            count: None,
            duration: None,
            ts: now_ts(),
        }
    }

    pub fn with_id(mut self, v: i64) -> Self {
        if let Self::Event { id, .. } = &mut self {
            *id = Some(v);
        }
        self
    }

    pub fn with_path(mut self, v: String) -> Self {
        if let Self::Event { path, .. } = &mut self {
            *path = Some(v);
        }
        self
    }

    pub fn with_thumb(mut self, v: Option<String>) -> Self {
        if let Self::Event { thumb, .. } = &mut self {
            *thumb = v;
        }
        self
    }

    pub fn with_count(mut self, v: usize) -> Self {
        if let Self::Event { count, .. } = &mut self {
            *count = Some(v);
        }
        self
    }

    pub fn with_duration(mut self, v: u64) -> Self {
        if let Self::Event { duration, .. } = &mut self {
            *duration = Some(v);
        }
        self
    }

    pub fn notification(message: impl Into<String>) -> Self {
        Self::Notification {
            message: message.into(),
            severity: "info".into(),
            ts: now_ts(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            ts: now_ts(),
        }
    }
}
