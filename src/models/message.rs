use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::event::{Event, EventType};

/// Body of `POST /api/v1/notifications`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    #[serde(default)]
    pub tenant_id: String,

    #[serde(default)]
    pub account_id: Option<String>,

    pub event_type: String,

    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl NotificationRequest {
    pub fn into_event(self) -> Result<Event, String> {
        let event_type: EventType = self
            .event_type
            .parse()
            .map_err(|_| format!("Unknown event type '{}'", self.event_type))?;

        let event = Event::new(self.tenant_id, self.account_id, event_type, self.data);

        if event.account().is_none() && !event.is_tenant_wide() {
            return Err(
                "account_id is required unless ACCOUNT_DELETED is sent with a tenant_id"
                    .to_string(),
            );
        }

        Ok(event)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationAccepted {
    pub task_id: String,
}
