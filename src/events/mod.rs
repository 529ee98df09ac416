//! Events raised after something changed, and where they are delivered.

mod scheduled_task;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use filegate_core::access::ContextLevel;
use filegate_core::{Error, Result};

pub use scheduled_task::ScheduledTaskUpdated;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Crud {
    #[serde(rename = "c")]
    Create,
    #[serde(rename = "r")]
    Read,
    #[serde(rename = "u")]
    Update,
    #[serde(rename = "d")]
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EduLevel {
    Other,
    Participating,
    Teaching,
}

/// Serializable form of an event, as handed to an [`EventSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_name: String,
    pub component: String,
    pub crud: Crud,
    pub edu_level: EduLevel,
    pub object_table: String,
    pub object_id: i64,
    pub context_level: ContextLevel,
    pub other: serde_json::Map<String, serde_json::Value>,
    pub time_created: i64,
}

impl EventRecord {
    pub fn other_str(&self, key: &str) -> Option<&str> {
        self.other.get(key).and_then(serde_json::Value::as_str)
    }
}

pub trait EventSink {
    fn dispatch(&self, event: &EventRecord) -> Result<()>;
}

/// Writes each event as one structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn dispatch(&self, event: &EventRecord) -> Result<()> {
        let payload = serde_json::to_string(event)
            .map_err(|err| Error::Storage(format!("failed to encode event: {err}")))?;
        tracing::info!(
            event_name = %event.event_name,
            object_id = event.object_id,
            payload = %payload,
            "event dispatched"
        );
        Ok(())
    }
}

pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().min(i64::MAX as u64) as i64)
        .unwrap_or(0)
}
