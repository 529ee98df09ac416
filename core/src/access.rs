use std::fmt;

use serde::{Deserialize, Serialize};

/// Visibility of an indexed document for the requesting actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    Granted,
    Denied,
    /// The backing entity no longer exists; the document should be dropped from results.
    Deleted,
}

/// Which predicate gates a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessLevel {
    None,
    Login,
    Course,
    Module,
    Admin,
    /// Tag read from storage that this build does not know. Always fails closed.
    Unrecognized(String),
}

impl AccessLevel {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "none" => AccessLevel::None,
            "login" => AccessLevel::Login,
            "course" => AccessLevel::Course,
            "module" => AccessLevel::Module,
            "admin" => AccessLevel::Admin,
            other => AccessLevel::Unrecognized(other.to_string()),
        }
    }

    pub fn as_tag(&self) -> &str {
        match self {
            AccessLevel::None => "none",
            AccessLevel::Login => "login",
            AccessLevel::Course => "course",
            AccessLevel::Module => "module",
            AccessLevel::Admin => "admin",
            AccessLevel::Unrecognized(tag) => tag,
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextLevel {
    System,
    User,
    CourseCategory,
    Course,
    Module,
    Block,
}

impl ContextLevel {
    pub const fn code(self) -> i64 {
        match self {
            ContextLevel::System => 10,
            ContextLevel::User => 30,
            ContextLevel::CourseCategory => 40,
            ContextLevel::Course => 50,
            ContextLevel::Module => 70,
            ContextLevel::Block => 80,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            10 => Some(ContextLevel::System),
            30 => Some(ContextLevel::User),
            40 => Some(ContextLevel::CourseCategory),
            50 => Some(ContextLevel::Course),
            70 => Some(ContextLevel::Module),
            80 => Some(ContextLevel::Block),
            _ => None,
        }
    }
}

/// Where a context sits: its level plus the course and course module that own it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInfo {
    pub id: i64,
    pub level: ContextLevel,
    pub instance_id: i64,
    pub course_id: Option<i64>,
    pub cm_id: Option<i64>,
}
