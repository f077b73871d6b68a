use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::models::{channel::ChannelType, event::EventType, status::DeliveryStatus};

/// Where one rendered notification goes, as configured by the tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTarget {
    /// Email address, or chat/channel id for bot channels.
    pub recipient: String,
    #[serde(default)]
    pub bot_token: Option<String>,
    pub first_name: String,
    pub message_template: String,
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryLog {
    pub id: i64,
    pub tenant_config_id: String,
    pub account_id: String,
    pub event_type: EventType,
    pub channel: ChannelType,
    pub status: DeliveryStatus,
    pub error_message: Option<String>,
    pub request_meta: JsonValue,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateDeliveryLog {
    pub tenant_config_id: String,
    pub account_id: String,
    pub event_type: EventType,
    pub channel: ChannelType,
    pub status: DeliveryStatus,
    pub error_message: Option<String>,
    pub request_meta: JsonValue,
}

impl CreateDeliveryLog {
    pub fn new(
        tenant_config_id: String,
        account_id: String,
        event_type: EventType,
        channel: ChannelType,
        status: DeliveryStatus,
    ) -> Self {
        Self {
            tenant_config_id,
            account_id,
            event_type,
            channel,
            status,
            error_message: None,
            request_meta: serde_json::json!({}),
        }
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error_message = Some(error);
        self
    }

    pub fn with_request_meta(mut self, meta: JsonValue) -> Self {
        self.request_meta = meta;
        self
    }
}
