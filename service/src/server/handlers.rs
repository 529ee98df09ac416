use std::collections::BTreeMap;

use axum::Json;
use axum::body::Body;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use serde::{Deserialize, Serialize};

use filegate::PluginFileRequest;
use filegate::events::TracingEventSink;
use filegate::filters::{CourseRoleFilter, CourseRoleFilterData};
use filegate::serving::{BufferedResponse, SendFileOptions, ServeOutcome, Transmission};
use filegate::store::ScheduledTaskRecord;
use filegate::tasks::ScheduledTaskUpdate;
use filegate_core::access::AccessDecision;
use filegate_core::session::{require_admin, require_login};

use super::ApiError;
use super::audit::AuditEvent;
use super::auth::AuthContext;
use super::layers::{PeerIp, RequestId};

#[derive(Debug, Serialize)]
pub(super) struct CourseAccessResponse {
    course_id: i64,
    decision: AccessDecision,
}

pub(super) async fn course_access(
    State(state): State<super::AppState>,
    Extension(auth): Extension<AuthContext>,
    Extension(request_id): Extension<RequestId>,
    Extension(peer): Extension<PeerIp>,
    Path(course_id): Path<i64>,
) -> Result<Json<CourseAccessResponse>, ApiError> {
    let audit = state.inner.audit.clone();
    let mut event = AuditEvent::new(request_id.0, peer.0, "course_access", auth.actor.user_id);
    event.course_id = Some(course_id);

    let result = super::runner::run_gate(state, move |gate| gate.check_course_access(course_id))
        .await;
    match &result {
        Ok(decision) => event.decision = Some(*decision),
        Err((status, Json(body))) => {
            event.status = status.as_u16();
            event.error_code = Some(body.code.to_string());
        }
    }
    if let Some(audit) = audit {
        audit.log(event);
    }

    let decision = result?;
    Ok(Json(CourseAccessResponse {
        course_id,
        decision,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct PluginFileQuery {
    #[serde(default)]
    forcedownload: Option<String>,
}

impl PluginFileQuery {
    fn force_download(&self) -> bool {
        self.forcedownload
            .as_deref()
            .is_some_and(|value| matches!(value.trim(), "1" | "true" | "yes"))
    }
}

pub(super) async fn plugin_file(
    State(state): State<super::AppState>,
    Extension(auth): Extension<AuthContext>,
    Extension(request_id): Extension<RequestId>,
    Extension(peer): Extension<PeerIp>,
    Path((context_id, component, area, args)): Path<(i64, String, String, String)>,
    Query(query): Query<PluginFileQuery>,
) -> Result<Response, ApiError> {
    let req = PluginFileRequest {
        context_id,
        component,
        area,
        args: args.split('/').map(ToString::to_string).collect(),
        force_download: query.force_download(),
        options: SendFileOptions::default(),
    };

    let audit = state.inner.audit.clone();
    let mut event = AuditEvent::new(request_id.0, peer.0, "plugin_file", auth.actor.user_id);
    event.context_id = Some(req.context_id);
    event.component = Some(req.component.clone());
    event.area = Some(req.area.clone());

    let actor = auth.actor.clone();
    let result = super::runner::run_gate(state, move |gate| {
        let mut sink = BufferedResponse::new();
        match gate.serve_plugin_file(&req, &*actor, &mut sink)? {
            ServeOutcome::Sent => Ok(sink.into_transmission()),
            ServeOutcome::Unhandled => Ok(None),
        }
    })
    .await
    .and_then(|sent| {
        sent.ok_or_else(|| super::map_err(filegate::Error::NotFound("not served".to_string())))
    });

    match &result {
        Ok(sent) => {
            event.file_id = Some(sent.file_id);
            event.bytes_sent = Some(sent.body.len() as u64);
            event.force_download = Some(
                sent.header("Content-Disposition")
                    .is_some_and(|value| value.starts_with("attachment")),
            );
        }
        Err((status, Json(body))) => {
            event.status = status.as_u16();
            event.error_code = Some(body.code.to_string());
        }
    }
    if let Some(audit) = audit {
        audit.log(event);
    }

    into_response(result?)
}

fn into_response(sent: Transmission) -> Result<Response, ApiError> {
    let mut response = Response::new(Body::from(sent.body));
    for (name, value) in sent.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
            super::map_err(filegate::Error::Storage(format!("invalid header name: {err}")))
        })?;
        let value = HeaderValue::from_str(&value).map_err(|err| {
            super::map_err(filegate::Error::Storage(format!("invalid header value: {err}")))
        })?;
        response.headers_mut().insert(name, value);
    }
    *response.status_mut() = StatusCode::OK;
    Ok(response)
}

fn default_filter_name() -> String {
    "courserole".to_string()
}

fn default_filter_label() -> String {
    "Course role".to_string()
}

fn default_prefix() -> String {
    "ex_".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct CourseRoleFilterRequest {
    #[serde(default = "default_filter_name")]
    name: String,
    #[serde(default = "default_filter_label")]
    label: String,
    #[serde(default = "default_prefix")]
    prefix: String,
    #[serde(default)]
    data: CourseRoleFilterData,
}

#[derive(Debug, Serialize)]
pub(super) struct CourseRoleFilterResponse {
    sql: String,
    params: BTreeMap<String, i64>,
    label: String,
}

pub(super) async fn course_role_filter(
    State(state): State<super::AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CourseRoleFilterRequest>,
) -> Result<Json<CourseRoleFilterResponse>, ApiError> {
    require_login(&*auth.actor).map_err(super::map_err)?;

    let result = super::runner::run_gate(state, move |gate| {
        let filter = CourseRoleFilter::new(req.name, req.label, false);
        gate.user_filter_sql(&filter, &req.data, &req.prefix)
    })
    .await?;

    Ok(Json(CourseRoleFilterResponse {
        sql: result.filter.sql,
        params: result.filter.params,
        label: result.label,
    }))
}

pub(super) async fn update_task(
    State(state): State<super::AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(task_id): Path<i64>,
    Json(update): Json<ScheduledTaskUpdate>,
) -> Result<Json<ScheduledTaskRecord>, ApiError> {
    require_admin(&*auth.actor).map_err(super::map_err)?;

    let task = super::runner::run_gate(state, move |gate| {
        gate.update_scheduled_task(task_id, &update, &TracingEventSink)
    })
    .await?;
    tracing::info!(task_id, classname = %task.classname, "scheduled task updated");

    Ok(Json(task))
}
