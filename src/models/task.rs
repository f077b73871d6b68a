//! Task envelope exchanged between the ingestion server, the master and channel workers.
//!
//! The JSON layout matches machinery signatures so already-deployed workers can consume
//! what this crate publishes. Arguments are positional: consumers decode by index and
//! ignore the names.

use std::collections::HashMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{
    error::TaskDecodeError,
    models::{channel::ChannelType, event::EventType},
};

pub const ROUTE_TASK_NAME: &str = "task_route_notification";
pub const DEFAULT_RETRY_COUNT: u32 = 1;
pub const DEFAULT_RETRY_TIMEOUT_SECONDS: u32 = 100;

const STRING_ARG: &str = "string";
const BYTES_ARG: &str = "[]byte";

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Str(String),
    Bytes(Vec<u8>),
}

impl ArgValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ArgValue::Str(_) => STRING_ARG,
            ArgValue::Bytes(_) => BYTES_ARG,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskArg {
    pub name: String,
    pub value: ArgValue,
}

impl TaskArg {
    fn string(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: ArgValue::Str(value.into()),
        }
    }

    fn bytes(name: &str, value: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            value: ArgValue::Bytes(value),
        }
    }
}

/// One unit of work addressed to exactly one worker queue.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchTask {
    pub uuid: String,
    pub task_name: String,
    pub routing_key: String,
    pub args: Vec<TaskArg>,
    pub retry_count: u32,
    pub retry_timeout_seconds: u32,
}

impl DispatchTask {
    fn new(task_name: String, routing_key: &str, args: Vec<TaskArg>) -> Self {
        Self {
            uuid: format!("task_{}", Uuid::new_v4()),
            task_name,
            routing_key: routing_key.to_string(),
            args,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_timeout_seconds: DEFAULT_RETRY_TIMEOUT_SECONDS,
        }
    }

    /// Inbound task for the master queue.
    pub fn route_notification(
        routing_key: &str,
        tenant_id: &str,
        account_id: &str,
        event_type: EventType,
        data: Vec<u8>,
    ) -> Self {
        Self::new(
            ROUTE_TASK_NAME.to_string(),
            routing_key,
            vec![
                TaskArg::string("userId", tenant_id),
                TaskArg::string("accId", account_id),
                TaskArg::string("eventType", event_type.as_str()),
                TaskArg::bytes("dataBytes", data),
            ],
        )
    }

    /// Delivery task for one channel worker.
    pub fn send_notification(
        channel: ChannelType,
        routing_key: &str,
        tenant_config_id: &str,
        account_id: &str,
        event_type: EventType,
        data: Vec<u8>,
    ) -> Self {
        Self::new(
            channel.task_name(),
            routing_key,
            vec![
                TaskArg::string("userConfig", tenant_config_id),
                TaskArg::string("accountId", account_id),
                TaskArg::string("eventType", event_type.as_str()),
                TaskArg::bytes("dataBytes", data),
            ],
        )
    }

    /// Copy to republish after a failed attempt, or `None` once the budget is spent.
    pub fn next_attempt(&self) -> Option<DispatchTask> {
        if self.retry_count == 0 {
            return None;
        }

        let mut next = self.clone();
        next.retry_count -= 1;
        Some(next)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&Signature::from(self))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, TaskDecodeError> {
        let signature: Signature = serde_json::from_slice(payload)?;
        signature.try_into()
    }
}

/// The four positional arguments every notification task carries.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationArgs {
    /// Tenant id on the master queue, tenant config id on channel queues.
    pub subject: String,
    pub account_id: String,
    pub event_type: EventType,
    pub data: Vec<u8>,
}

impl NotificationArgs {
    pub fn from_task(task: &DispatchTask) -> Result<Self, TaskDecodeError> {
        if task.args.len() != 4 {
            return Err(TaskDecodeError::Arity {
                expected: 4,
                actual: task.args.len(),
            });
        }

        let subject = string_at(&task.args, 0)?;
        let account_id = string_at(&task.args, 1)?;
        let event_type = string_at(&task.args, 2)?.parse()?;
        let data = match &task.args[3].value {
            ArgValue::Bytes(bytes) => bytes.clone(),
            other => {
                return Err(TaskDecodeError::ArgType {
                    position: 3,
                    name: task.args[3].name.clone(),
                    expected: BYTES_ARG,
                    actual: other.type_name().to_string(),
                });
            }
        };

        Ok(Self {
            subject,
            account_id,
            event_type,
            data,
        })
    }

    pub fn account(&self) -> Option<&str> {
        Some(self.account_id.as_str()).filter(|id| !id.is_empty())
    }

    /// Event data is a flat string map serialized as JSON.
    pub fn data_map(&self) -> Result<HashMap<String, String>, TaskDecodeError> {
        if self.data.is_empty() {
            return Ok(HashMap::new());
        }

        serde_json::from_slice(&self.data).map_err(|e| TaskDecodeError::Data(e.to_string()))
    }
}

fn string_at(args: &[TaskArg], position: usize) -> Result<String, TaskDecodeError> {
    match &args[position].value {
        ArgValue::Str(value) => Ok(value.clone()),
        other => Err(TaskDecodeError::ArgType {
            position,
            name: args[position].name.clone(),
            expected: STRING_ARG,
            actual: other.type_name().to_string(),
        }),
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Signature {
    #[serde(rename = "UUID")]
    uuid: String,
    name: String,
    routing_key: String,
    #[serde(rename = "ETA", default)]
    eta: Option<String>,
    #[serde(rename = "GroupUUID", default)]
    group_uuid: String,
    #[serde(default)]
    group_task_count: u32,
    #[serde(default)]
    args: Vec<SignatureArg>,
    #[serde(default)]
    headers: HashMap<String, JsonValue>,
    #[serde(default)]
    priority: u8,
    #[serde(default)]
    immutable: bool,
    #[serde(default)]
    retry_count: u32,
    #[serde(default)]
    retry_timeout: u32,
    #[serde(default)]
    on_success: Option<JsonValue>,
    #[serde(default)]
    on_error: Option<JsonValue>,
    #[serde(default)]
    chord_callback: Option<JsonValue>,
    #[serde(default)]
    broker_message_group_id: String,
    #[serde(default)]
    ignore_when_task_not_registered: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SignatureArg {
    #[serde(default)]
    name: String,
    #[serde(rename = "Type")]
    kind: String,
    value: JsonValue,
}

impl From<&DispatchTask> for Signature {
    fn from(task: &DispatchTask) -> Self {
        let args = task
            .args
            .iter()
            .map(|arg| SignatureArg {
                name: arg.name.clone(),
                kind: arg.value.type_name().to_string(),
                value: match &arg.value {
                    ArgValue::Str(s) => JsonValue::String(s.clone()),
                    ArgValue::Bytes(b) => JsonValue::String(STANDARD.encode(b)),
                },
            })
            .collect();

        Self {
            uuid: task.uuid.clone(),
            name: task.task_name.clone(),
            routing_key: task.routing_key.clone(),
            eta: None,
            group_uuid: String::new(),
            group_task_count: 0,
            args,
            headers: HashMap::new(),
            priority: 0,
            immutable: false,
            retry_count: task.retry_count,
            retry_timeout: task.retry_timeout_seconds,
            on_success: None,
            on_error: None,
            chord_callback: None,
            broker_message_group_id: String::new(),
            ignore_when_task_not_registered: false,
        }
    }
}

impl TryFrom<Signature> for DispatchTask {
    type Error = TaskDecodeError;

    fn try_from(signature: Signature) -> Result<Self, Self::Error> {
        let args = signature
            .args
            .into_iter()
            .enumerate()
            .map(|(position, arg)| decode_arg(position, arg))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            uuid: signature.uuid,
            task_name: signature.name,
            routing_key: signature.routing_key,
            args,
            retry_count: signature.retry_count,
            retry_timeout_seconds: signature.retry_timeout,
        })
    }
}

fn decode_arg(position: usize, arg: SignatureArg) -> Result<TaskArg, TaskDecodeError> {
    let value = match (arg.kind.as_str(), arg.value) {
        (STRING_ARG, JsonValue::String(s)) => ArgValue::Str(s),
        (BYTES_ARG, JsonValue::String(s)) => {
            ArgValue::Bytes(STANDARD.decode(s).map_err(|e| TaskDecodeError::Bytes {
                position,
                reason: e.to_string(),
            })?)
        }
        (BYTES_ARG, JsonValue::Null) => ArgValue::Bytes(Vec::new()),
        (kind, _) => {
            return Err(TaskDecodeError::ArgType {
                position,
                name: arg.name,
                expected: if kind == BYTES_ARG { BYTES_ARG } else { STRING_ARG },
                actual: kind.to_string(),
            });
        }
    };

    Ok(TaskArg {
        name: arg.name,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_task_carries_wire_constants_and_arg_order() {
        let task = DispatchTask::send_notification(
            ChannelType::Telegram,
            "nt-telegram",
            "7",
            "A1",
            EventType::TradeCopyFailure,
            br#"{"COPIER_ERROR":"timeout"}"#.to_vec(),
        );

        assert_eq!(task.task_name, "task_send_telegram");
        assert_eq!(task.routing_key, "nt-telegram");
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.retry_timeout_seconds, 100);
        assert!(task.uuid.starts_with("task_"));

        let names: Vec<_> = task.args.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["userConfig", "accountId", "eventType", "dataBytes"]);
    }

    #[test]
    fn encoded_envelope_uses_machinery_field_names() {
        let task = DispatchTask::route_notification(
            "nt-master",
            "42",
            "A1",
            EventType::AccountAdded,
            b"{}".to_vec(),
        );

        let json: JsonValue = serde_json::from_slice(&task.encode().unwrap()).unwrap();

        assert_eq!(json["Name"], "task_route_notification");
        assert_eq!(json["RoutingKey"], "nt-master");
        assert_eq!(json["RetryCount"], 1);
        assert_eq!(json["RetryTimeout"], 100);
        assert_eq!(json["Args"][0]["Name"], "userId");
        assert_eq!(json["Args"][3]["Type"], "[]byte");
        assert_eq!(json["Args"][3]["Value"], STANDARD.encode(b"{}"));
    }

    #[test]
    fn decodes_positional_args_from_foreign_envelope() {
        let payload = serde_json::json!({
            "UUID": "task_abc",
            "Name": "task_send_email",
            "RoutingKey": "nt-email",
            "Args": [
                {"Name": "a", "Type": "string", "Value": "7"},
                {"Name": "b", "Type": "string", "Value": ""},
                {"Name": "c", "Type": "string", "Value": "ACCOUNT_DELETED"},
                {"Name": "d", "Type": "[]byte", "Value": STANDARD.encode(br#"{"ACCOUNT_NAME":"main"}"#)}
            ],
            "RetryCount": 0,
            "RetryTimeout": 100
        });

        let task = DispatchTask::decode(payload.to_string().as_bytes()).unwrap();
        let args = NotificationArgs::from_task(&task).unwrap();

        assert_eq!(args.subject, "7");
        assert_eq!(args.account(), None);
        assert_eq!(args.event_type, EventType::AccountDeleted);
        assert_eq!(args.data_map().unwrap()["ACCOUNT_NAME"], "main");
    }

    #[test]
    fn rejects_wrong_arity_and_types() {
        let mut task = DispatchTask::send_notification(
            ChannelType::Email,
            "nt-email",
            "7",
            "A1",
            EventType::AccountAdded,
            Vec::new(),
        );
        task.args.swap(0, 3);
        assert!(matches!(
            NotificationArgs::from_task(&task),
            Err(TaskDecodeError::ArgType { position: 0, .. })
        ));

        task.args.truncate(2);
        assert!(matches!(
            NotificationArgs::from_task(&task),
            Err(TaskDecodeError::Arity { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn retry_budget_counts_down_to_none() {
        let task = DispatchTask::send_notification(
            ChannelType::Email,
            "nt-email",
            "7",
            "A1",
            EventType::AccountAdded,
            Vec::new(),
        );

        let retry = task.next_attempt().unwrap();
        assert_eq!(retry.retry_count, 0);
        assert_eq!(retry.uuid, task.uuid);
        assert!(retry.next_attempt().is_none());
    }
}
