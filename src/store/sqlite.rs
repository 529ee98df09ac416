use std::ops::Deref;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use rusqlite::OptionalExtension;
use rusqlite::types::ToSql;
use sha2::{Digest, Sha256};

use filegate_core::access::{AccessLevel, ContextInfo, ContextLevel};
use filegate_core::{Error, Result};

use super::{
    CategoryRecord, CourseRecord, FileKey, RoleRecord, ScheduledTaskRecord, Store, StoredFile,
    db_err,
};
use crate::filters::SqlFilter;

static TABLE_PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("table placeholder regex is valid"));

pub struct SqliteStoreWithConn<C> {
    conn: C,
}

pub type SqliteStore<C = Box<rusqlite::Connection>> = SqliteStoreWithConn<C>;

impl SqliteStoreWithConn<Box<rusqlite::Connection>> {
    pub fn new(conn: rusqlite::Connection) -> Result<Self> {
        let _ = conn.busy_timeout(Duration::from_secs(5));
        crate::migrations::migrate_sqlite(&conn).map_err(db_err)?;
        Ok(Self {
            conn: Box::new(conn),
        })
    }

    pub fn new_no_migrate(conn: rusqlite::Connection) -> Result<Self> {
        let _ = conn.busy_timeout(Duration::from_secs(5));
        Ok(Self {
            conn: Box::new(conn),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = rusqlite::Connection::open(path).map_err(db_err)?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(db_err)?;
        Self::new(conn)
    }
}

impl<C> SqliteStoreWithConn<C> {
    pub fn from_connection(conn: C) -> Self {
        Self { conn }
    }
}

/// Content and flags for a file written through [`SqliteStoreWithConn::insert_file`].
#[derive(Debug, Clone)]
pub struct NewFile<'a> {
    pub key: FileKey,
    pub access_level: AccessLevel,
    pub can_access: bool,
    pub is_directory: bool,
    pub mimetype: &'a str,
    pub content: &'a [u8],
    pub modified: i64,
}

/// Writers used to seed a store. The serving path itself only reads.
impl<C> SqliteStoreWithConn<C>
where
    C: Deref<Target = rusqlite::Connection>,
{
    pub fn set_config(&mut self, name: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO config(name, value) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value",
                rusqlite::params![name, value],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn insert_category(&mut self, name: &str, parent: i64, sortorder: i64) -> Result<i64> {
        let parent_path = if parent == 0 {
            String::new()
        } else {
            self.get_category(parent)?
                .ok_or_else(|| Error::NotFound(format!("course category {parent} not found")))?
                .path
        };
        self.conn
            .execute(
                "INSERT INTO course_categories(name, parent, path, sortorder) VALUES (?1, ?2, '', ?3)",
                rusqlite::params![name, parent, sortorder],
            )
            .map_err(db_err)?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .execute(
                "UPDATE course_categories SET path = ?1 WHERE id = ?2",
                rusqlite::params![format!("{parent_path}/{id}"), id],
            )
            .map_err(db_err)?;
        Ok(id)
    }

    /// Inserts a course and its course context; returns `(course_id, context_id)`.
    pub fn insert_course(
        &mut self,
        category: i64,
        fullname: &str,
        shortname: &str,
        summary: &str,
        modified: i64,
    ) -> Result<(i64, i64)> {
        self.conn
            .execute(
                "INSERT INTO course(category, fullname, shortname, summary, timemodified)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![category, fullname, shortname, summary, modified],
            )
            .map_err(db_err)?;
        let course_id = self.conn.last_insert_rowid();
        let context_id = self.insert_context(ContextLevel::Course, course_id)?;
        Ok((course_id, context_id))
    }

    pub fn delete_course(&mut self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM course WHERE id = ?1", rusqlite::params![id])
            .map_err(db_err)?;
        Ok(())
    }

    /// Inserts a course module and its module context; returns `(cm_id, context_id)`.
    pub fn insert_course_module(
        &mut self,
        course_id: i64,
        modname: &str,
        instance: i64,
    ) -> Result<(i64, i64)> {
        self.conn
            .execute(
                "INSERT INTO course_modules(course, modname, instance) VALUES (?1, ?2, ?3)",
                rusqlite::params![course_id, modname, instance],
            )
            .map_err(db_err)?;
        let cm_id = self.conn.last_insert_rowid();
        let context_id = self.insert_context(ContextLevel::Module, cm_id)?;
        Ok((cm_id, context_id))
    }

    pub fn insert_context(&mut self, level: ContextLevel, instance_id: i64) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO context(contextlevel, instanceid) VALUES (?1, ?2)",
                rusqlite::params![level.code(), instance_id],
            )
            .map_err(|err| {
                if is_unique_constraint_violation(&err) {
                    return Error::Conflict("context exists".to_string());
                }
                db_err(err)
            })?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_user(&mut self, username: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO user(username) VALUES (?1)",
                rusqlite::params![username],
            )
            .map_err(db_err)?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_role(&mut self, shortname: &str, name: &str, sortorder: i64) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO role(shortname, name, sortorder) VALUES (?1, ?2, ?3)",
                rusqlite::params![shortname, name, sortorder],
            )
            .map_err(db_err)?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn assign_role(&mut self, role_id: i64, context_id: i64, user_id: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO role_assignments(roleid, contextid, userid) VALUES (?1, ?2, ?3)",
                rusqlite::params![role_id, context_id, user_id],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn insert_file(&mut self, file: &NewFile<'_>) -> Result<i64> {
        let size_bytes = u64_to_i64(file.content.len() as u64, "filesize")?;
        let content_hash = hex::encode(Sha256::digest(file.content));
        let res = self.conn.execute(
            "INSERT INTO files(
                contextid, component, filearea, itemid, filepath, filename,
                access_level, can_access, is_directory, mimetype, filesize, contenthash,
                content, timemodified
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            rusqlite::params![
                file.key.context_id,
                file.key.component,
                file.key.area,
                file.key.item_id,
                file.key.filepath,
                file.key.filename,
                file.access_level.as_tag(),
                file.can_access,
                file.is_directory,
                file.mimetype,
                size_bytes,
                content_hash,
                file.content,
                file.modified,
            ],
        );
        match res {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(err) => {
                if is_unique_constraint_violation(&err) {
                    return Err(Error::Conflict("file exists".to_string()));
                }
                Err(db_err(err))
            }
        }
    }

    pub fn insert_scheduled_task(&mut self, record: &ScheduledTaskRecord) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO task_scheduled(
                    component, classname, lastruntime, nextruntime, blocking, minute, hour,
                    day, month, dayofweek, faildelay, customised, disabled
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    record.component,
                    record.classname,
                    record.lastruntime,
                    record.nextruntime,
                    record.blocking,
                    record.minute,
                    record.hour,
                    record.day,
                    record.month,
                    record.dayofweek,
                    record.faildelay,
                    record.customised,
                    record.disabled,
                ],
            )
            .map_err(|err| {
                if is_unique_constraint_violation(&err) {
                    return Error::Conflict("scheduled task exists".to_string());
                }
                db_err(err)
            })?;
        Ok(self.conn.last_insert_rowid())
    }
}

impl<C> Store for SqliteStoreWithConn<C>
where
    C: Deref<Target = rusqlite::Connection>,
{
    fn get_course(&mut self, id: i64) -> Result<Option<CourseRecord>> {
        self.conn
            .query_row(
                "SELECT id, category, fullname, shortname, summary, timemodified
                 FROM course WHERE id = ?1",
                rusqlite::params![id],
                |row| {
                    Ok(CourseRecord {
                        id: row.get(0)?,
                        category: row.get(1)?,
                        fullname: row.get(2)?,
                        shortname: row.get(3)?,
                        summary: row.get(4)?,
                        modified: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    fn get_config_flag(&mut self, name: &str) -> Result<bool> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM config WHERE name = ?1",
                rusqlite::params![name],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(value.is_some_and(|value| config_truthy(&value)))
    }

    fn get_context(&mut self, context_id: i64) -> Result<Option<ContextInfo>> {
        let row = self
            .conn
            .query_row(
                "SELECT contextlevel, instanceid FROM context WHERE id = ?1",
                rusqlite::params![context_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .map_err(db_err)?;
        let Some((code, instance_id)) = row else {
            return Ok(None);
        };
        let level = ContextLevel::from_code(code)
            .ok_or_else(|| Error::Storage(format!("invalid contextlevel value: {code}")))?;

        let (course_id, cm_id) = match level {
            ContextLevel::Course => (Some(instance_id), None),
            ContextLevel::Module => {
                let course = self
                    .conn
                    .query_row(
                        "SELECT course FROM course_modules WHERE id = ?1",
                        rusqlite::params![instance_id],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()
                    .map_err(db_err)?;
                (course, course.map(|_| instance_id))
            }
            _ => (None, None),
        };

        Ok(Some(ContextInfo {
            id: context_id,
            level,
            instance_id,
            course_id,
            cm_id,
        }))
    }

    fn get_file(&mut self, key: &FileKey) -> Result<Option<StoredFile>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, access_level, can_access, is_directory, mimetype, filesize,
                        contenthash, timemodified
                 FROM files
                 WHERE contextid = ?1 AND component = ?2 AND filearea = ?3 AND itemid = ?4
                   AND filepath = ?5 AND filename = ?6",
            )
            .map_err(db_err)?;

        stmt.query_row(
            rusqlite::params![
                key.context_id,
                key.component,
                key.area,
                key.item_id,
                key.filepath,
                key.filename,
            ],
            |row| {
                Ok(StoredFile {
                    id: row.get(0)?,
                    key: key.clone(),
                    access_level: AccessLevel::from_tag(&row.get::<_, String>(1)?),
                    can_access: row.get(2)?,
                    is_directory: row.get(3)?,
                    mimetype: row.get(4)?,
                    size_bytes: i64_to_u64_sql(row.get::<_, i64>(5)?, "filesize")?,
                    content_hash: row.get(6)?,
                    modified: row.get(7)?,
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    fn get_file_content(&mut self, file_id: i64) -> Result<Option<Vec<u8>>> {
        self.conn
            .query_row(
                "SELECT content FROM files WHERE id = ?1",
                rusqlite::params![file_id],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(db_err)
    }

    fn get_category(&mut self, id: i64) -> Result<Option<CategoryRecord>> {
        self.conn
            .query_row(
                "SELECT id, name, parent, path, sortorder FROM course_categories WHERE id = ?1",
                rusqlite::params![id],
                category_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    fn list_categories(&mut self) -> Result<Vec<CategoryRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, parent, path, sortorder
                 FROM course_categories
                 ORDER BY sortorder, id",
            )
            .map_err(db_err)?;
        let rows = stmt.query_map([], category_from_row).map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }

    fn list_category_descendant_ids(&mut self, id: i64) -> Result<Vec<i64>> {
        let category = self
            .get_category(id)?
            .ok_or_else(|| Error::NotFound(format!("course category {id} not found")))?;
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM course_categories WHERE path LIKE ?1 ORDER BY id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params![format!("{}/%", category.path)], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }

    fn get_role(&mut self, id: i64) -> Result<Option<RoleRecord>> {
        self.conn
            .query_row(
                "SELECT id, shortname, name FROM role WHERE id = ?1",
                rusqlite::params![id],
                role_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    fn list_roles(&mut self) -> Result<Vec<RoleRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, shortname, name FROM role ORDER BY sortorder, id")
            .map_err(db_err)?;
        let rows = stmt.query_map([], role_from_row).map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }

    fn select_user_ids(&mut self, filter: &SqlFilter) -> Result<Vec<i64>> {
        let sql = if filter.is_empty() {
            "SELECT id FROM user ORDER BY id".to_string()
        } else {
            format!(
                "SELECT id FROM user WHERE {} ORDER BY id",
                expand_table_placeholders(&filter.sql)
            )
        };
        let names: Vec<String> = filter.params.keys().map(|name| format!(":{name}")).collect();
        let params: Vec<(&str, &dyn ToSql)> = names
            .iter()
            .zip(filter.params.values())
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect();

        let mut stmt = self.conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params.as_slice(), |row| row.get::<_, i64>(0))
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }

    fn get_scheduled_task(&mut self, id: i64) -> Result<Option<ScheduledTaskRecord>> {
        self.conn
            .query_row(
                "SELECT id, component, classname, blocking, customised, disabled, lastruntime,
                        nextruntime, faildelay, minute, hour, day, month, dayofweek
                 FROM task_scheduled WHERE id = ?1",
                rusqlite::params![id],
                |row| {
                    Ok(ScheduledTaskRecord {
                        id: row.get(0)?,
                        component: row.get(1)?,
                        classname: row.get(2)?,
                        blocking: row.get(3)?,
                        customised: row.get(4)?,
                        disabled: row.get(5)?,
                        lastruntime: row.get(6)?,
                        nextruntime: row.get(7)?,
                        faildelay: row.get(8)?,
                        minute: row.get(9)?,
                        hour: row.get(10)?,
                        day: row.get(11)?,
                        month: row.get(12)?,
                        dayofweek: row.get(13)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    fn update_scheduled_task(&mut self, record: &ScheduledTaskRecord) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE task_scheduled
                 SET component = ?1, classname = ?2, lastruntime = ?3, nextruntime = ?4,
                     blocking = ?5, minute = ?6, hour = ?7, day = ?8, month = ?9,
                     dayofweek = ?10, faildelay = ?11, customised = ?12, disabled = ?13
                 WHERE id = ?14",
                rusqlite::params![
                    record.component,
                    record.classname,
                    record.lastruntime,
                    record.nextruntime,
                    record.blocking,
                    record.minute,
                    record.hour,
                    record.day,
                    record.month,
                    record.dayofweek,
                    record.faildelay,
                    record.customised,
                    record.disabled,
                    record.id,
                ],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(Error::NotFound(format!(
                "scheduled task {} not found",
                record.id
            )));
        }
        Ok(())
    }
}

fn category_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CategoryRecord> {
    Ok(CategoryRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        parent: row.get(2)?,
        path: row.get(3)?,
        sortorder: row.get(4)?,
    })
}

fn role_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoleRecord> {
    Ok(RoleRecord {
        id: row.get(0)?,
        shortname: row.get(1)?,
        name: row.get(2)?,
    })
}

fn config_truthy(value: &str) -> bool {
    !matches!(value.trim(), "" | "0" | "false")
}

fn expand_table_placeholders(sql: &str) -> String {
    TABLE_PLACEHOLDER_RE.replace_all(sql, "$1").into_owned()
}

fn u64_to_i64(value: u64, field: &'static str) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::Storage(format!("integer overflow converting {field}")))
}

fn i64_to_u64(value: i64, field: &'static str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| Error::Storage(format!("invalid negative {field} value: {value}")))
}

fn i64_to_u64_sql(value: i64, field: &'static str) -> rusqlite::Result<u64> {
    i64_to_u64(value, field).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                err.to_string(),
            )),
        )
    })
}

fn is_unique_constraint_violation(err: &rusqlite::Error) -> bool {
    use rusqlite::Error::SqliteFailure;
    match err {
        SqliteFailure(code, _) => {
            matches!(code.code, rusqlite::ErrorCode::ConstraintViolation)
        }
        _ => false,
    }
}
