#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;

use axum::Router;
use filegate::store::ScheduledTaskRecord;
use filegate::store::sqlite::{NewFile, SqliteStore};
use filegate::store::FileKey;
use filegate_core::access::AccessLevel;
use filegate_core::policy::{AuthPolicy, AuthToken, GatePolicy};
use filegate_core::session::Actor;

pub const DEV_TOKEN: &str = "dev-token";
pub const DEV_TOKEN_SHA256: &str =
    "sha256:c91cbbedf8c712e8e2b7517ddeca8fe4fde839ebd8339e0b2001363002b37712";
pub const ADMIN_TOKEN: &str = "admin-token";
pub const ADMIN_TOKEN_SHA256: &str =
    "sha256:10a4c7c9fc5206d6f36dc6944a81bb6f4a3cb0e25014ae3b12e6c3e52712292a";

pub struct Seeded {
    pub course_id: i64,
    pub course_ctx: i64,
    pub folder_ctx: i64,
    pub task_id: i64,
}

fn add_file(
    store: &mut SqliteStore,
    context_id: i64,
    component: &str,
    area: &str,
    filename: &str,
    access_level: AccessLevel,
) {
    store
        .insert_file(&NewFile {
            key: FileKey {
                context_id,
                component: component.to_string(),
                area: area.to_string(),
                item_id: 0,
                filepath: "/".to_string(),
                filename: filename.to_string(),
            },
            access_level,
            can_access: true,
            is_directory: false,
            mimetype: "text/plain",
            content: b"hello\n",
            modified: 1_700_000_000,
        })
        .expect("insert file");
}

pub fn seed(db: &Path) -> Seeded {
    let mut store = SqliteStore::open(db).expect("open sqlite");
    let category = store.insert_category("Science", 0, 1).expect("category");
    let (course_id, course_ctx) = store
        .insert_course(category, "Physics", "PHY", "Motion", 1_700_000_000)
        .expect("course");
    let (_, folder_ctx) = store
        .insert_course_module(course_id, "folder", 1)
        .expect("module");
    add_file(&mut store, course_ctx, "course", "summary", "outline.txt", AccessLevel::Course);
    add_file(&mut store, course_ctx, "core_admin", "logo", "logo.txt", AccessLevel::Admin);
    add_file(&mut store, folder_ctx, "mod_folder", "content", "notes.txt", AccessLevel::Module);
    add_file(&mut store, folder_ctx, "mod_folder", "intro", "intro.txt", AccessLevel::Module);

    let student = store.insert_role("student", "Student", 1).expect("role");
    let user = store.insert_user("alice").expect("user");
    store.assign_role(student, course_ctx, user).expect("assign");

    let task_id = store
        .insert_scheduled_task(&ScheduledTaskRecord {
            id: 0,
            component: "core".to_string(),
            classname: "\\core\\task\\cache_cleanup_task".to_string(),
            blocking: false,
            customised: false,
            disabled: false,
            lastruntime: 0,
            nextruntime: 0,
            faildelay: 0,
            minute: "*".to_string(),
            hour: "*".to_string(),
            day: "*".to_string(),
            month: "*".to_string(),
            dayofweek: "*".to_string(),
        })
        .expect("task");

    Seeded {
        course_id,
        course_ctx,
        folder_ctx,
        task_id,
    }
}

/// `dev-token` is a student enrolled in the seeded course; `admin-token` is a site admin.
pub fn policy_for(seeded: &Seeded) -> GatePolicy {
    GatePolicy {
        auth: AuthPolicy {
            tokens: vec![
                AuthToken {
                    token: Some(DEV_TOKEN_SHA256.to_string()),
                    token_env_var: None,
                    actor: Actor::user(2).enrolled_in(seeded.course_id),
                },
                AuthToken {
                    token: Some(ADMIN_TOKEN_SHA256.to_string()),
                    token_env_var: None,
                    actor: Actor::admin(1),
                },
            ],
        },
        ..GatePolicy::default()
    }
}

pub async fn serve(app: Router) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    let handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("serve");
    });
    (addr, handle)
}
