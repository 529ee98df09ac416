use filegate_core::access::{AccessLevel, ContextInfo};
use filegate_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::filters::SqlFilter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub id: i64,
    pub category: i64,
    pub fullname: String,
    pub shortname: String,
    pub summary: String,
    pub modified: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: i64,
    pub name: String,
    pub parent: i64,
    /// Ancestor chain including the category itself, e.g. `/1/4/9`.
    pub path: String,
    pub sortorder: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub id: i64,
    pub shortname: String,
    pub name: String,
}

impl RoleRecord {
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.shortname
        } else {
            &self.name
        }
    }
}

/// Unique address of a stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileKey {
    pub context_id: i64,
    pub component: String,
    pub area: String,
    pub item_id: i64,
    pub filepath: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub id: i64,
    pub key: FileKey,
    pub access_level: AccessLevel,
    /// Storage-layer authorization for this particular file.
    pub can_access: bool,
    pub is_directory: bool,
    pub mimetype: String,
    pub size_bytes: u64,
    pub content_hash: String,
    pub modified: i64,
}

impl StoredFile {
    pub fn context_id(&self) -> i64 {
        self.key.context_id
    }

    pub fn component(&self) -> &str {
        &self.key.component
    }

    pub fn area(&self) -> &str {
        &self.key.area
    }

    pub fn filename(&self) -> &str {
        &self.key.filename
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTaskRecord {
    pub id: i64,
    pub component: String,
    pub classname: String,
    pub blocking: bool,
    pub customised: bool,
    pub disabled: bool,
    pub lastruntime: i64,
    pub nextruntime: i64,
    pub faildelay: i64,
    pub minute: String,
    pub hour: String,
    pub day: String,
    pub month: String,
    pub dayofweek: String,
}

pub trait Store {
    fn get_course(&mut self, id: i64) -> Result<Option<CourseRecord>>;

    /// Missing settings read as `false`.
    fn get_config_flag(&mut self, name: &str) -> Result<bool>;

    fn get_context(&mut self, context_id: i64) -> Result<Option<ContextInfo>>;

    fn get_file(&mut self, key: &FileKey) -> Result<Option<StoredFile>>;

    fn get_file_content(&mut self, file_id: i64) -> Result<Option<Vec<u8>>>;

    fn get_category(&mut self, id: i64) -> Result<Option<CategoryRecord>>;

    fn list_categories(&mut self) -> Result<Vec<CategoryRecord>>;

    /// Every category below `id` at any depth, not including `id` itself.
    fn list_category_descendant_ids(&mut self, id: i64) -> Result<Vec<i64>>;

    fn get_role(&mut self, id: i64) -> Result<Option<RoleRecord>>;

    fn list_roles(&mut self) -> Result<Vec<RoleRecord>>;

    /// Runs a user filter fragment against the user table.
    fn select_user_ids(&mut self, filter: &SqlFilter) -> Result<Vec<i64>>;

    fn get_scheduled_task(&mut self, id: i64) -> Result<Option<ScheduledTaskRecord>>;

    fn update_scheduled_task(&mut self, record: &ScheduledTaskRecord) -> Result<()>;
}

fn db_err(err: impl std::fmt::Display) -> Error {
    Error::Storage(err.to_string())
}

#[cfg(feature = "sqlite")]
pub mod sqlite;
