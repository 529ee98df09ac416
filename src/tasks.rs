use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use filegate_core::{Error, Result};

use crate::events::{EventSink, ScheduledTaskUpdated};
use crate::store::{ScheduledTaskRecord, Store};

static CRON_FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9*,/\-]{1,64}$").expect("cron field regex is valid"));

/// Admin edit of a scheduled task. Unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduledTaskUpdate {
    #[serde(default)]
    pub minute: Option<String>,
    #[serde(default)]
    pub hour: Option<String>,
    #[serde(default)]
    pub day: Option<String>,
    #[serde(default)]
    pub month: Option<String>,
    #[serde(default)]
    pub dayofweek: Option<String>,
    #[serde(default)]
    pub disabled: Option<bool>,
}

impl ScheduledTaskUpdate {
    fn apply(&self, task: &mut ScheduledTaskRecord) -> Result<()> {
        let fields = [
            ("minute", &self.minute, &mut task.minute),
            ("hour", &self.hour, &mut task.hour),
            ("day", &self.day, &mut task.day),
            ("month", &self.month, &mut task.month),
            ("dayofweek", &self.dayofweek, &mut task.dayofweek),
        ];
        for (label, value, slot) in fields {
            if let Some(value) = value {
                let value = value.trim();
                if !CRON_FIELD_RE.is_match(value) {
                    return Err(Error::InvalidInput(format!(
                        "invalid {label} schedule: {value:?}"
                    )));
                }
                *slot = value.to_string();
            }
        }
        if let Some(disabled) = self.disabled {
            task.disabled = disabled;
        }
        task.customised = true;
        Ok(())
    }
}

/// Saves the edit and raises [`ScheduledTaskUpdated`].
///
/// The saved row is returned even when the event sink fails; that failure is
/// only logged.
pub fn update_scheduled_task(
    store: &mut dyn Store,
    sink: &dyn EventSink,
    task_id: i64,
    update: &ScheduledTaskUpdate,
) -> Result<ScheduledTaskRecord> {
    let mut task = store
        .get_scheduled_task(task_id)?
        .ok_or_else(|| Error::NotFound(format!("scheduled task {task_id} not found")))?;
    update.apply(&mut task)?;
    let event = ScheduledTaskUpdated::from_task_record(&task)?;
    store.update_scheduled_task(&task)?;

    if let Err(err) = event.trigger(sink) {
        tracing::warn!(
            task_id,
            code = err.code(),
            error = %err,
            "scheduled task saved but update event was not delivered"
        );
    }
    Ok(task)
}
