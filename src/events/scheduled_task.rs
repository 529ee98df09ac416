use serde_json::{Map, Value, json};

use filegate_core::access::ContextLevel;
use filegate_core::{Error, Result};

use super::{Crud, EduLevel, EventRecord, EventSink, now_secs};
use crate::store::{ScheduledTaskRecord, Store};

const EVENT_NAME: &str = "\\core\\event\\scheduled_task_updated";
const OBJECT_TABLE: &str = "task_scheduled";
const REQUIRED_OTHER: [&str; 2] = ["classname", "component"];

/// Raised after an administrator changes a scheduled task.
#[derive(Debug, Clone)]
pub struct ScheduledTaskUpdated {
    record: EventRecord,
    task: Option<ScheduledTaskRecord>,
    restored: bool,
}

impl ScheduledTaskUpdated {
    pub fn from_task_record(task: &ScheduledTaskRecord) -> Result<Self> {
        let other = match json!({
            "classname": task.classname,
            "component": task.component,
            "blocking": task.blocking,
            "customised": task.customised,
            "lastruntime": task.lastruntime,
            "nextruntime": task.nextruntime,
            "faildelay": task.faildelay,
            "hour": task.hour,
            "minute": task.minute,
            "day": task.day,
            "dayofweek": task.dayofweek,
            "month": task.month,
            "disabled": task.disabled,
        }) {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let record = EventRecord {
            event_name: EVENT_NAME.to_string(),
            component: "core".to_string(),
            crud: Crud::Update,
            edu_level: EduLevel::Other,
            object_table: OBJECT_TABLE.to_string(),
            object_id: task.id,
            context_level: ContextLevel::System,
            other,
            time_created: now_secs(),
        };
        validate(&record)?;

        Ok(Self {
            record,
            task: Some(task.clone()),
            restored: false,
        })
    }

    /// Rebuilds an event read back from a log. Restored events carry no task snapshot.
    pub fn restore(record: EventRecord) -> Result<Self> {
        if record.event_name != EVENT_NAME {
            return Err(Error::Configuration(format!(
                "cannot restore {} as {EVENT_NAME}",
                record.event_name
            )));
        }
        validate(&record)?;
        Ok(Self {
            record,
            task: None,
            restored: true,
        })
    }

    pub fn name() -> &'static str {
        "Scheduled task updated"
    }

    pub fn description(&self) -> String {
        format!(
            "The scheduled task '{}' was updated.",
            self.record.other_str("classname").unwrap_or_default()
        )
    }

    pub fn url(&self) -> String {
        let classname = self.record.other_str("classname").unwrap_or_default();
        format!(
            "/admin/tool/task/scheduledtasks.php?action=edit&task={}",
            urlencoding::encode(classname)
        )
    }

    pub fn record(&self) -> &EventRecord {
        &self.record
    }

    pub fn is_restored(&self) -> bool {
        self.restored
    }

    /// The task as it was saved. Only observers of a live event may ask.
    pub fn scheduled_task(&mut self, store: &mut dyn Store) -> Result<&ScheduledTaskRecord> {
        if self.restored {
            return Err(Error::Configuration(
                "scheduled_task() is intended for event observers only".to_string(),
            ));
        }
        if self.task.is_none() {
            let task = store.get_scheduled_task(self.record.object_id)?.ok_or_else(|| {
                Error::NotFound(format!(
                    "scheduled task {} not found",
                    self.record.object_id
                ))
            })?;
            self.task = Some(task);
        }
        self.task
            .as_ref()
            .ok_or_else(|| Error::NotFound("scheduled task not found".to_string()))
    }

    pub fn trigger(&self, sink: &dyn EventSink) -> Result<()> {
        if self.restored {
            return Err(Error::Configuration(
                "restored events cannot be triggered".to_string(),
            ));
        }
        sink.dispatch(&self.record)
    }
}

fn validate(record: &EventRecord) -> Result<()> {
    for key in REQUIRED_OTHER {
        if record.other_str(key).is_none_or(str::is_empty) {
            return Err(Error::Configuration(format!(
                "The '{key}' value must be set in other."
            )));
        }
    }
    Ok(())
}
