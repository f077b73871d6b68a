use std::{
    collections::HashMap,
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::TaskDecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    AccountAdded,
    AccountEnabled,
    AccountDisabled,
    AccountDeleted,
    AccountConnected,
    AccountConnectionError,
    CopierCreated,
    CopierEnabled,
    CopierDisabled,
    CopierModified,
    CopierDeleted,
    TradeCopiedSuccessfully,
    TradeModifiedSuccessfully,
    TradeCopyFailure,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AccountAdded => "ACCOUNT_ADDED",
            EventType::AccountEnabled => "ACCOUNT_ENABLED",
            EventType::AccountDisabled => "ACCOUNT_DISABLED",
            EventType::AccountDeleted => "ACCOUNT_DELETED",
            EventType::AccountConnected => "ACCOUNT_CONNECTED",
            EventType::AccountConnectionError => "ACCOUNT_CONNECTION_ERROR",
            EventType::CopierCreated => "COPIER_CREATED",
            EventType::CopierEnabled => "COPIER_ENABLED",
            EventType::CopierDisabled => "COPIER_DISABLED",
            EventType::CopierModified => "COPIER_MODIFIED",
            EventType::CopierDeleted => "COPIER_DELETED",
            EventType::TradeCopiedSuccessfully => "TRADE_COPIED_SUCCESSFULLY",
            EventType::TradeModifiedSuccessfully => "TRADE_MODIFIED_SUCCESSFULLY",
            EventType::TradeCopyFailure => "TRADE_COPY_FAILURE",
        }
    }

    /// Template placeholders (`%KEY%`) that event data may fill for this event.
    pub fn placeholders(&self) -> &'static [&'static str] {
        match self {
            EventType::AccountAdded
            | EventType::AccountEnabled
            | EventType::AccountDisabled
            | EventType::AccountDeleted => &["ACCOUNT_NUMBER", "ACCOUNT_NAME"],
            EventType::AccountConnected => &["ACCOUNT_NUMBER", "CONNECTION_STATUS"],
            EventType::AccountConnectionError => {
                &["ACCOUNT_NUMBER", "CONNECTION_STATUS", "CONNECTION_ERROR"]
            }
            EventType::CopierCreated => &[
                "COPIER_MASTER",
                "COPIER_SLAVE",
                "COPIER_TYPE",
                "COPIER_RISK",
            ],
            EventType::CopierEnabled
            | EventType::CopierDisabled
            | EventType::CopierModified
            | EventType::CopierDeleted
            | EventType::TradeModifiedSuccessfully => &["COPIER_MASTER", "COPIER_SLAVE"],
            EventType::TradeCopiedSuccessfully => &[
                "COPIER_MASTER",
                "COPIER_SLAVE",
                "COPIER_MASTER_TICKET",
                "COPIER_SLAVE_TICKET",
                "COPIER_MASTER_SYMBOL",
                "COPIER_SLAVE_SYMBOL",
            ],
            EventType::TradeCopyFailure => &["COPIER_MASTER", "COPIER_SLAVE", "COPIER_ERROR"],
        }
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = TaskDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| TaskDecodeError::UnknownEventType(s.to_string()))
    }
}

/// A business event as received at the ingestion boundary. Never mutated after receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub account_id: Option<String>,
    pub event_type: EventType,
    #[serde(default)]
    pub payload: HashMap<String, String>,
}

impl Event {
    pub fn new(
        tenant_id: impl Into<String>,
        account_id: Option<String>,
        event_type: EventType,
        payload: HashMap<String, String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            account_id: account_id.filter(|id| !id.is_empty()),
            event_type,
            payload,
        }
    }

    pub fn account(&self) -> Option<&str> {
        self.account_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Account deletion addressed to a tenant with no account left to check.
    pub fn is_tenant_wide(&self) -> bool {
        !self.tenant_id.is_empty()
            && self.event_type == EventType::AccountDeleted
            && self.account().is_none()
    }
}
