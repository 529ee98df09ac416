//! User filters that narrow a user listing with a SQL fragment.
//!
//! A filter renders to a [`SqlFilter`]: a `WHERE` fragment over the user table
//! with `:name` placeholders and `{table}` table references, plus the bound
//! values. Parameter names are derived from a prefix the caller supplies, so
//! several filters can be combined in one query without colliding.

mod course_role;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use filegate_core::{Error, Result};

pub use course_role::{CourseRoleFilter, CourseRoleFilterData};

static PARAM_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,40}$").expect("param prefix regex is valid"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlFilter {
    /// Empty when the filter does not restrict anything.
    pub sql: String,
    pub params: BTreeMap<String, i64>,
}

impl SqlFilter {
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

/// Hands out parameter names under one prefix. Indexed names count from zero
/// per namer; nothing is shared between namers.
#[derive(Debug)]
pub struct ParamNamer<'a> {
    prefix: &'a str,
    next: usize,
}

impl<'a> ParamNamer<'a> {
    pub fn new(prefix: &'a str) -> Result<Self> {
        if !PARAM_PREFIX_RE.is_match(prefix) {
            return Err(Error::Configuration(format!(
                "invalid sql parameter prefix: {prefix:?}"
            )));
        }
        Ok(Self { prefix, next: 0 })
    }

    pub fn named(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    pub fn next_indexed(&mut self, stem: &str) -> String {
        let name = format!("{}{stem}{}", self.prefix, self.next);
        self.next += 1;
        name
    }
}

/// `= :p` for one value, `IN (:p0, :p1, ...)` for several, `None` for none.
pub fn in_or_equal(
    values: &[i64],
    namer: &mut ParamNamer<'_>,
    stem: &str,
) -> Option<(String, BTreeMap<String, i64>)> {
    let mut params = BTreeMap::new();
    match values {
        [] => None,
        [single] => {
            let name = namer.next_indexed(stem);
            let sql = format!("= :{name}");
            params.insert(name, *single);
            Some((sql, params))
        }
        many => {
            let mut placeholders = Vec::with_capacity(many.len());
            for value in many {
                let name = namer.next_indexed(stem);
                placeholders.push(format!(":{name}"));
                params.insert(name, *value);
            }
            Some((format!("IN ({})", placeholders.join(", ")), params))
        }
    }
}
