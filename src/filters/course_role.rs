use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use filegate_core::access::ContextLevel;
use filegate_core::{Error, Result};

use super::{ParamNamer, SqlFilter, in_or_equal};
use crate::store::{CategoryRecord, Store};

const ANY_ROLE: &str = "Any role";
const ANY_CATEGORY: &str = "Any category";

/// Selected values of a [`CourseRoleFilter`]. Zero means "any".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRoleFilterData {
    #[serde(default)]
    pub include_subcats: bool,
    #[serde(default)]
    pub role_id: i64,
    #[serde(default)]
    pub category_id: i64,
}

/// Users holding a role in any course of a category, optionally including
/// its subcategories.
#[derive(Debug, Clone)]
pub struct CourseRoleFilter {
    name: String,
    label: String,
    advanced: bool,
}

impl CourseRoleFilter {
    pub fn new(name: impl Into<String>, label: impl Into<String>, advanced: bool) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            advanced,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_advanced(&self) -> bool {
        self.advanced
    }

    pub fn role_field(&self) -> String {
        format!("{}_rl", self.name)
    }

    pub fn category_field(&self) -> String {
        format!("{}_ct", self.name)
    }

    pub fn include_subcats_field(&self) -> String {
        format!("{}_sct", self.name)
    }

    /// Role choices, `0` meaning any role.
    pub fn get_roles(&self, store: &mut dyn Store) -> Result<Vec<(i64, String)>> {
        let mut out = vec![(0, ANY_ROLE.to_string())];
        for role in store.list_roles()? {
            let name = role.display_name().to_string();
            out.push((role.id, name));
        }
        Ok(out)
    }

    /// Category choices as `Parent / Child` names in tree order, `0` meaning any.
    pub fn get_course_categories(&self, store: &mut dyn Store) -> Result<Vec<(i64, String)>> {
        let categories = store.list_categories()?;
        let by_id: HashMap<i64, &CategoryRecord> =
            categories.iter().map(|cat| (cat.id, cat)).collect();

        let mut entries = Vec::with_capacity(categories.len());
        for cat in &categories {
            let mut sort_key = Vec::new();
            let mut names = Vec::new();
            for ancestor in cat.path.split('/').filter(|seg| !seg.is_empty()) {
                let Some(ancestor) = ancestor
                    .parse::<i64>()
                    .ok()
                    .and_then(|id| by_id.get(&id))
                else {
                    continue;
                };
                sort_key.push((ancestor.sortorder, ancestor.id));
                names.push(ancestor.name.as_str());
            }
            entries.push((sort_key, cat.id, names.join(" / ")));
        }
        entries.sort();

        let mut out = vec![(0, ANY_CATEGORY.to_string())];
        out.extend(entries.into_iter().map(|(_, id, name)| (id, name)));
        Ok(out)
    }

    /// Reads the submitted form; `None` when neither a role nor a category is picked.
    pub fn check_data(&self, form: &HashMap<String, String>) -> Option<CourseRoleFilterData> {
        let role_id = form_int(form.get(&self.role_field()));
        let category_id = form_int(form.get(&self.category_field()));
        if role_id == 0 && category_id == 0 {
            return None;
        }
        let include_subcats = form
            .get(&self.include_subcats_field())
            .is_some_and(|value| form_truthy(value));

        Some(CourseRoleFilterData {
            include_subcats,
            role_id,
            category_id,
        })
    }

    pub fn get_sql_filter(
        &self,
        store: &mut dyn Store,
        data: &CourseRoleFilterData,
        prefix: &str,
    ) -> Result<SqlFilter> {
        let mut namer = ParamNamer::new(prefix)?;
        if data.role_id == 0 && data.category_id == 0 {
            return Ok(SqlFilter::default());
        }

        let mut params = BTreeMap::new();
        let mut conditions = vec![format!("b.contextlevel = {}", ContextLevel::Course.code())];

        if data.role_id != 0 {
            let name = namer.named("roleid");
            conditions.push(format!("a.roleid = :{name}"));
            params.insert(name, data.role_id);
        }

        if data.category_id != 0 {
            if data.include_subcats {
                let mut categories = store.list_category_descendant_ids(data.category_id)?;
                categories.push(data.category_id);
                let (cat_sql, cat_params) = in_or_equal(&categories, &mut namer, "cat")
                    .ok_or_else(|| Error::NotFound("no categories to filter by".to_string()))?;
                conditions.push(format!("c.category {cat_sql}"));
                params.extend(cat_params);
            } else {
                let name = namer.named("categoryid");
                conditions.push(format!("c.category = :{name}"));
                params.insert(name, data.category_id);
            }
        }

        let sql = format!(
            "id IN (SELECT a.userid FROM {{role_assignments}} a \
             INNER JOIN {{context}} b ON a.contextid = b.id \
             INNER JOIN {{course}} c ON b.instanceid = c.id \
             WHERE {})",
            conditions.join(" AND ")
        );
        tracing::debug!(filter = %self.name, params = params.len(), "built course role filter");
        Ok(SqlFilter { sql, params })
    }

    /// Human readable summary of the active filter.
    pub fn get_label(&self, store: &mut dyn Store, data: &CourseRoleFilterData) -> Result<String> {
        let role_name = if data.role_id != 0 {
            let role = store
                .get_role(data.role_id)?
                .ok_or_else(|| Error::NotFound(format!("role {} not found", data.role_id)))?;
            format!("\"{}\"", role.display_name())
        } else {
            ANY_ROLE.to_string()
        };

        let category_name = if data.category_id != 0 {
            let category = store.get_category(data.category_id)?.ok_or_else(|| {
                Error::NotFound(format!("course category {} not found", data.category_id))
            })?;
            let mut name = format!("\"{}\"", category.name);
            if data.include_subcats {
                name.push_str(" (including subcategories)");
            }
            name
        } else {
            ANY_CATEGORY.to_string()
        };

        Ok(format!(
            "{} is {role_name} in All courses from {category_name}",
            self.label
        ))
    }
}

fn form_int(value: Option<&String>) -> i64 {
    value
        .and_then(|value| value.trim().parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(0)
}

fn form_truthy(value: &str) -> bool {
    !matches!(value.trim(), "" | "0")
}
