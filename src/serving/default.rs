use filegate_core::access::{AccessLevel, ContextInfo};
use filegate_core::path::{parse_file_args, validate_area};
use filegate_core::session::{Session, require_admin, require_course_login, require_login};
use filegate_core::{Error, Result};

use super::{SendFileOptions, SendParams, ServeContext, ServeOutcome, ServingStrategy};
use crate::store::{FileKey, Store, StoredFile};

/// Serving used by every component that does not register its own.
#[derive(Debug, Clone)]
pub struct DefaultServing {
    component: String,
}

impl DefaultServing {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }
}

impl ServingStrategy for DefaultServing {
    fn component(&self) -> &str {
        &self.component
    }

    fn get_stored_file(
        &self,
        store: &mut dyn Store,
        context_id: i64,
        area: &str,
        args: &[String],
    ) -> Result<Option<StoredFile>> {
        validate_area(area)?;
        let args = parse_file_args(args)?;
        store.get_file(&FileKey {
            context_id,
            component: self.component.clone(),
            area: area.to_string(),
            item_id: args.item_id,
            filepath: args.filepath,
            filename: args.filename,
        })
    }

    fn check_access(&self, ctx: &mut ServeContext<'_>, file: &StoredFile) -> Result<ContextInfo> {
        check_file_access(&mut *ctx.store, ctx.session, file)
    }

    fn serve(
        &self,
        ctx: &mut ServeContext<'_>,
        file: &StoredFile,
        force_download: bool,
        options: &SendFileOptions,
    ) -> Result<ServeOutcome> {
        self.check_access(ctx, file)?;
        super::send_stored_file(
            ctx,
            file,
            &SendParams {
                lifetime_secs: None,
                force_download,
                options: options.clone(),
            },
        )?;
        Ok(ServeOutcome::Sent)
    }
}

/// The base access check shared by all strategies. Stops at the first failure.
pub fn check_file_access(
    store: &mut dyn Store,
    session: &dyn Session,
    file: &StoredFile,
) -> Result<ContextInfo> {
    if !file.can_access {
        return Err(not_found(file, "storage denied access"));
    }
    if file.is_directory {
        return Err(not_found(file, "directory placeholder"));
    }

    let Some(context) = store.get_context(file.context_id())? else {
        return Err(not_found(file, "missing context"));
    };

    match &file.access_level {
        AccessLevel::Login => require_login(session)?,
        AccessLevel::Course => {
            let Some(course_id) = context.course_id else {
                return Err(not_found(file, "course-level file outside a course"));
            };
            require_course_login(session, course_id, None)?;
        }
        AccessLevel::Module => {
            let Some(course_id) = context.course_id else {
                return Err(not_found(file, "module-level file outside a course"));
            };
            require_course_login(session, course_id, context.cm_id)?;
        }
        AccessLevel::Admin => require_admin(session)?,
        AccessLevel::None | AccessLevel::Unrecognized(_) => {
            tracing::warn!(
                file_id = file.id,
                access_level = %file.access_level,
                "file has no servable access level"
            );
            return Err(not_found(file, "no servable access level"));
        }
    }

    Ok(context)
}

fn not_found(file: &StoredFile, reason: &'static str) -> Error {
    tracing::debug!(file_id = file.id, reason, "refusing to serve file");
    Error::NotFound("file not found".to_string())
}
