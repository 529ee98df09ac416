use filegate_core::Result;
use filegate_core::access::{ContextInfo, ContextLevel};

use super::{
    DefaultServing, SendFileOptions, SendParams, ServeContext, ServeOutcome, ServingStrategy,
};
use crate::store::{Store, StoredFile};

/// Folder activity files: only the `content` area of a module context, and
/// always as a download.
#[derive(Debug, Clone)]
pub struct FolderServing {
    base: DefaultServing,
}

impl FolderServing {
    pub const COMPONENT: &'static str = "mod_folder";
    pub const CONTENT_AREA: &'static str = "content";

    pub fn new() -> Self {
        Self {
            base: DefaultServing::new(Self::COMPONENT),
        }
    }
}

impl Default for FolderServing {
    fn default() -> Self {
        Self::new()
    }
}

impl ServingStrategy for FolderServing {
    fn component(&self) -> &str {
        self.base.component()
    }

    fn get_stored_file(
        &self,
        store: &mut dyn Store,
        context_id: i64,
        area: &str,
        args: &[String],
    ) -> Result<Option<StoredFile>> {
        self.base.get_stored_file(store, context_id, area, args)
    }

    fn check_access(&self, ctx: &mut ServeContext<'_>, file: &StoredFile) -> Result<ContextInfo> {
        self.base.check_access(ctx, file)
    }

    fn serve(
        &self,
        ctx: &mut ServeContext<'_>,
        file: &StoredFile,
        _force_download: bool,
        options: &SendFileOptions,
    ) -> Result<ServeOutcome> {
        let context = self.check_access(ctx, file)?;

        if context.level != ContextLevel::Module {
            return Ok(ServeOutcome::Unhandled);
        }
        // Other areas, such as intro, go through the default strategy.
        if file.area() != Self::CONTENT_AREA {
            return Ok(ServeOutcome::Unhandled);
        }

        super::send_stored_file(
            ctx,
            file,
            &SendParams {
                lifetime_secs: Some(0),
                force_download: true,
                options: options.clone(),
            },
        )?;
        Ok(ServeOutcome::Sent)
    }
}
