//! Who is asking, and the `require_*` gates built on top of it.
//!
//! Each gate either returns `Ok(())` or an error that must end the request:
//! [`Error::AuthRequired`] when nobody is logged in, [`Error::Forbidden`] when
//! the logged-in actor lacks the needed enrolment or role.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub trait Session {
    /// `None` for an anonymous request.
    fn user_id(&self) -> Option<i64>;

    fn is_site_admin(&self) -> bool;

    fn is_enrolled(&self, course_id: i64) -> bool;

    fn can_view_module(&self, course_id: i64, cm_id: i64) -> bool;
}

/// Static description of an actor, as configured per auth token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Actor {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub site_admin: bool,
    /// Courses the actor is actively enrolled in.
    #[serde(default)]
    pub courses: Vec<i64>,
    /// Course modules hidden from the actor even inside enrolled courses.
    #[serde(default)]
    pub hidden_modules: Vec<i64>,
}

impl Actor {
    pub fn guest() -> Self {
        Self::default()
    }

    pub fn user(user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn admin(user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            site_admin: true,
            ..Self::default()
        }
    }

    pub fn enrolled_in(mut self, course_id: i64) -> Self {
        self.courses.push(course_id);
        self
    }

    pub fn without_module(mut self, cm_id: i64) -> Self {
        self.hidden_modules.push(cm_id);
        self
    }
}

impl Session for Actor {
    fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    fn is_site_admin(&self) -> bool {
        self.user_id.is_some() && self.site_admin
    }

    fn is_enrolled(&self, course_id: i64) -> bool {
        self.user_id.is_some() && self.courses.contains(&course_id)
    }

    fn can_view_module(&self, course_id: i64, cm_id: i64) -> bool {
        self.is_enrolled(course_id) && !self.hidden_modules.contains(&cm_id)
    }
}

pub fn require_login(session: &dyn Session) -> Result<()> {
    if session.user_id().is_none() {
        return Err(Error::AuthRequired("login is required".to_string()));
    }
    Ok(())
}

/// Login plus enrolment in `course_id`; with `cm_id`, also access to that module.
/// Site admins pass without enrolment.
pub fn require_course_login(
    session: &dyn Session,
    course_id: i64,
    cm_id: Option<i64>,
) -> Result<()> {
    require_login(session)?;
    if session.is_site_admin() {
        return Ok(());
    }
    if !session.is_enrolled(course_id) {
        return Err(Error::Forbidden(format!(
            "not enrolled in course {course_id}"
        )));
    }
    if let Some(cm_id) = cm_id
        && !session.can_view_module(course_id, cm_id)
    {
        return Err(Error::Forbidden(format!(
            "course module {cm_id} is not available"
        )));
    }
    Ok(())
}

pub fn require_admin(session: &dyn Session) -> Result<()> {
    require_login(session)?;
    if !session.is_site_admin() {
        return Err(Error::Forbidden(
            "site administrator access is required".to_string(),
        ));
    }
    Ok(())
}
