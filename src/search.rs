//! The "all courses" search area: document shaping and per-document access.

use serde::{Deserialize, Serialize};

use filegate_core::Result;
use filegate_core::access::{AccessDecision, ContextLevel};

use crate::store::{CourseRecord, Store};

/// Site setting that exposes every course in search, enrolled or not.
pub const INCLUDE_ALL_COURSES_SETTING: &str = "searchincludeallcourses";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub id: String,
    pub item_id: i64,
    pub component: String,
    pub area: String,
    pub title: String,
    pub content: String,
    pub description1: String,
    pub context_id: i64,
    pub course_id: i64,
    pub modified: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllCoursesArea;

impl AllCoursesArea {
    pub const COMPONENT: &'static str = "course";
    pub const AREA: &'static str = "allcourses";
    pub const LEVELS: &'static [ContextLevel] = &[ContextLevel::Course];

    pub fn component_name(&self) -> &'static str {
        Self::COMPONENT
    }

    pub fn area_name(&self) -> &'static str {
        Self::AREA
    }

    /// Indexes the course summary as a description rather than body content.
    pub fn get_document(&self, course: &CourseRecord, context_id: i64) -> SearchDocument {
        SearchDocument {
            id: format!("{}-{}-{}", Self::COMPONENT, Self::AREA, course.id),
            item_id: course.id,
            component: Self::COMPONENT.to_string(),
            area: Self::AREA.to_string(),
            title: course.fullname.clone(),
            content: String::new(),
            description1: course.summary.clone(),
            context_id,
            course_id: course.id,
            modified: course.modified,
        }
    }

    /// Existence is checked before the setting; both are read fresh on every call.
    pub fn check_access(&self, store: &mut dyn Store, course_id: i64) -> Result<AccessDecision> {
        if store.get_course(course_id)?.is_none() {
            tracing::debug!(course_id, "search document refers to a deleted course");
            return Ok(AccessDecision::Deleted);
        }

        if store.get_config_flag(INCLUDE_ALL_COURSES_SETTING)? {
            return Ok(AccessDecision::Granted);
        }

        Ok(AccessDecision::Denied)
    }
}
