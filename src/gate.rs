use std::sync::Arc;

use serde::{Deserialize, Serialize};

use filegate_core::access::AccessDecision;
use filegate_core::path::validate_component;
use filegate_core::policy::GatePolicy;
use filegate_core::session::Session;
use filegate_core::{Error, Result};

use crate::events::EventSink;
use crate::filters::{CourseRoleFilter, CourseRoleFilterData, SqlFilter};
use crate::search::AllCoursesArea;
use crate::serving::{
    DefaultServing, ResponseSink, SendFileOptions, ServeContext, ServeOutcome, ServingRegistry,
    ServingStrategy,
};
use crate::store::{ScheduledTaskRecord, Store};
use crate::tasks::{ScheduledTaskUpdate, update_scheduled_task};

/// A request for `/<context_id>/<component>/<area>/<args...>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginFileRequest {
    pub context_id: i64,
    pub component: String,
    pub area: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub force_download: bool,
    #[serde(default)]
    pub options: SendFileOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFilterResult {
    pub filter: SqlFilter,
    pub label: String,
}

#[derive(Debug)]
pub struct FileGate<S> {
    policy: GatePolicy,
    registry: Arc<ServingRegistry>,
    store: S,
}

impl<S: Store> FileGate<S> {
    pub fn new(store: S, policy: GatePolicy) -> Result<Self> {
        let registry = ServingRegistry::with_builtin()?;
        Self::with_registry(store, policy, Arc::new(registry))
    }

    pub fn with_registry(
        store: S,
        policy: GatePolicy,
        registry: Arc<ServingRegistry>,
    ) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            registry,
            store,
        })
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    pub fn registry(&self) -> &ServingRegistry {
        &self.registry
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Search visibility of a course document.
    pub fn check_course_access(&mut self, course_id: i64) -> Result<AccessDecision> {
        AllCoursesArea.check_access(&mut self.store, course_id)
    }

    pub fn resolve(&self, component: &str) -> Option<Box<dyn ServingStrategy>> {
        self.registry.resolve(component)
    }

    pub fn serve_plugin_file(
        &mut self,
        request: &PluginFileRequest,
        session: &dyn Session,
        sink: &mut dyn ResponseSink,
    ) -> Result<ServeOutcome> {
        validate_component(&request.component)?;
        let strategy = self
            .registry
            .resolve(&request.component)
            .unwrap_or_else(|| Box::new(DefaultServing::new(request.component.clone())));

        let Some(file) = strategy.get_stored_file(
            &mut self.store,
            request.context_id,
            &request.area,
            &request.args,
        )?
        else {
            return Err(Error::NotFound("file not found".to_string()));
        };

        let mut ctx = ServeContext {
            store: &mut self.store,
            session,
            sink,
            rules: &self.policy.serving,
        };
        let refused = |err: &Error| {
            if err.is_access_failure() {
                tracing::debug!(
                    file_id = file.id,
                    code = err.code(),
                    "plugin file access refused"
                );
            }
        };
        let mut outcome = strategy
            .serve(&mut ctx, &file, request.force_download, &request.options)
            .inspect_err(refused)?;
        // A component strategy may leave some of its areas to the generic path.
        if outcome == ServeOutcome::Unhandled {
            outcome = DefaultServing::new(request.component.clone())
                .serve(&mut ctx, &file, request.force_download, &request.options)
                .inspect_err(refused)?;
        }
        tracing::debug!(
            file_id = file.id,
            component = %request.component,
            ?outcome,
            "plugin file request handled"
        );
        Ok(outcome)
    }

    pub fn user_filter_sql(
        &mut self,
        filter: &CourseRoleFilter,
        data: &CourseRoleFilterData,
        prefix: &str,
    ) -> Result<UserFilterResult> {
        let sql = filter.get_sql_filter(&mut self.store, data, prefix)?;
        let label = filter.get_label(&mut self.store, data)?;
        Ok(UserFilterResult { filter: sql, label })
    }

    pub fn update_scheduled_task(
        &mut self,
        task_id: i64,
        update: &ScheduledTaskUpdate,
        sink: &dyn EventSink,
    ) -> Result<ScheduledTaskRecord> {
        update_scheduled_task(&mut self.store, sink, task_id, update)
    }
}
