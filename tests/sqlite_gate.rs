#![cfg(feature = "sqlite")]

use std::cell::RefCell;
use std::collections::HashMap;

use filegate::events::{Crud, EventRecord, EventSink};
use filegate::filters::{CourseRoleFilter, CourseRoleFilterData};
use filegate::serving::{BufferedResponse, SendFileOptions, ServeContext, ServeOutcome};
use filegate::store::sqlite::{NewFile, SqliteStore, SqliteStoreWithConn};
use filegate::store::{FileKey, Store};
use filegate::tasks::ScheduledTaskUpdate;
use filegate::{Error, FileGate, PluginFileRequest};
use filegate_core::access::{AccessDecision, AccessLevel};
use filegate_core::policy::{GatePolicy, ServingRules};
use filegate_core::session::Actor;

struct Fixture {
    gate: FileGate<SqliteStore>,
    course_id: i64,
    course_ctx: i64,
    folder_cm: i64,
    folder_ctx: i64,
}

fn open_gate() -> FileGate<SqliteStore> {
    let store = SqliteStore::open_in_memory().expect("open sqlite");
    FileGate::new(store, GatePolicy::default()).expect("create gate")
}

fn add_file(
    gate: &mut FileGate<SqliteStore>,
    context_id: i64,
    component: &str,
    area: &str,
    filename: &str,
    access_level: AccessLevel,
) {
    gate.store_mut()
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

fn fixture() -> Fixture {
    let mut gate = open_gate();
    let store = gate.store_mut();
    let category = store.insert_category("Science", 0, 1).expect("category");
    let (course_id, course_ctx) = store
        .insert_course(category, "Physics", "PHY", "Motion and forces", 1_700_000_000)
        .expect("course");
    let (folder_cm, folder_ctx) = store
        .insert_course_module(course_id, "folder", 1)
        .expect("module");

    add_file(&mut gate, course_ctx, "course", "summary", "outline.txt", AccessLevel::Course);
    add_file(&mut gate, folder_ctx, "mod_folder", "content", "notes.txt", AccessLevel::Module);
    add_file(&mut gate, folder_ctx, "mod_folder", "intro", "intro.txt", AccessLevel::Module);
    add_file(&mut gate, course_ctx, "user", "public", "open.txt", AccessLevel::Login);
    add_file(&mut gate, course_ctx, "core_admin", "logo", "logo.txt", AccessLevel::Admin);
    add_file(
        &mut gate,
        course_ctx,
        "user",
        "legacy",
        "odd.txt",
        AccessLevel::from_tag("guestonly"),
    );
    add_file(&mut gate, course_ctx, "user", "hidden", "none.txt", AccessLevel::None);

    Fixture {
        gate,
        course_id,
        course_ctx,
        folder_cm,
        folder_ctx,
    }
}

fn request(context_id: i64, component: &str, area: &str, filename: &str) -> PluginFileRequest {
    PluginFileRequest {
        context_id,
        component: component.to_string(),
        area: area.to_string(),
        args: vec!["0".to_string(), filename.to_string()],
        force_download: false,
        options: SendFileOptions::default(),
    }
}

fn serve(
    fx: &mut Fixture,
    req: &PluginFileRequest,
    actor: &Actor,
) -> (filegate::Result<ServeOutcome>, BufferedResponse) {
    let mut sink = BufferedResponse::new();
    let outcome = fx.gate.serve_plugin_file(req, actor, &mut sink);
    (outcome, sink)
}

#[test]
fn existing_course_follows_the_include_all_setting() {
    let mut fx = fixture();
    let course_id = fx.course_id;
    assert_eq!(
        fx.gate.check_course_access(course_id).unwrap(),
        AccessDecision::Denied
    );

    fx.gate
        .store_mut()
        .set_config("searchincludeallcourses", "1")
        .unwrap();
    assert_eq!(
        fx.gate.check_course_access(course_id).unwrap(),
        AccessDecision::Granted
    );

    fx.gate
        .store_mut()
        .set_config("searchincludeallcourses", "0")
        .unwrap();
    assert_eq!(
        fx.gate.check_course_access(course_id).unwrap(),
        AccessDecision::Denied
    );
}

#[test]
fn missing_course_is_deleted_regardless_of_setting() {
    let mut fx = fixture();
    assert_eq!(
        fx.gate.check_course_access(999).unwrap(),
        AccessDecision::Deleted
    );
    fx.gate
        .store_mut()
        .set_config("searchincludeallcourses", "1")
        .unwrap();
    assert_eq!(
        fx.gate.check_course_access(999).unwrap(),
        AccessDecision::Deleted
    );

    let course_id = fx.course_id;
    fx.gate.store_mut().delete_course(course_id).unwrap();
    assert_eq!(
        fx.gate.check_course_access(course_id).unwrap(),
        AccessDecision::Deleted
    );
}

#[test]
fn only_folder_is_registered() {
    let gate = open_gate();
    assert!(gate.resolve("mod_folder").is_some());
    assert!(gate.resolve("mod_page").is_none());
    assert!(gate.resolve("course").is_none());
    assert_eq!(gate.registry().components(), vec!["mod_folder"]);
}

#[test]
fn enrolled_user_gets_course_file() {
    let mut fx = fixture();
    let req = request(fx.course_ctx, "course", "summary", "outline.txt");
    let actor = Actor::user(7).enrolled_in(fx.course_id);
    let (outcome, sink) = serve(&mut fx, &req, &actor);
    assert_eq!(outcome.unwrap(), ServeOutcome::Sent);

    let sent = sink.into_transmission().expect("transmission");
    assert_eq!(sent.body, b"hello\n");
    assert_eq!(sent.header("Content-Type"), Some("text/plain"));
    assert_eq!(sent.header("Content-Length"), Some("6"));
    assert!(
        sent.header("Content-Disposition")
            .unwrap()
            .starts_with("inline;")
    );
    assert_eq!(
        sent.header("Cache-Control"),
        Some("private, max-age=86400, no-transform")
    );
}

#[test]
fn course_file_requires_enrolment() {
    let mut fx = fixture();
    let req = request(fx.course_ctx, "course", "summary", "outline.txt");

    let (outcome, sink) = serve(&mut fx, &req, &Actor::guest());
    assert!(matches!(outcome, Err(Error::AuthRequired(_))));
    assert!(!sink.is_sent());

    let (outcome, sink) = serve(&mut fx, &req, &Actor::user(7));
    assert!(matches!(outcome, Err(Error::Forbidden(_))));
    assert!(!sink.is_sent());

    let (outcome, _) = serve(&mut fx, &req, &Actor::admin(2));
    assert_eq!(outcome.unwrap(), ServeOutcome::Sent);
}

#[test]
fn login_and_admin_levels() {
    let mut fx = fixture();
    let open = request(fx.course_ctx, "user", "public", "open.txt");
    let (outcome, _) = serve(&mut fx, &open, &Actor::guest());
    assert!(matches!(outcome, Err(Error::AuthRequired(_))));
    let (outcome, _) = serve(&mut fx, &open, &Actor::user(9));
    assert_eq!(outcome.unwrap(), ServeOutcome::Sent);

    let logo = request(fx.course_ctx, "core_admin", "logo", "logo.txt");
    let (outcome, _) = serve(&mut fx, &logo, &Actor::user(9));
    assert!(matches!(outcome, Err(Error::Forbidden(_))));
    let (outcome, _) = serve(&mut fx, &logo, &Actor::admin(1));
    assert_eq!(outcome.unwrap(), ServeOutcome::Sent);
}

#[test]
fn unservable_access_levels_are_not_found() {
    let mut fx = fixture();
    for (area, filename) in [("legacy", "odd.txt"), ("hidden", "none.txt")] {
        let req = request(fx.course_ctx, "user", area, filename);
        let (outcome, sink) = serve(&mut fx, &req, &Actor::admin(1));
        assert!(matches!(outcome, Err(Error::NotFound(_))), "{area}");
        assert!(!sink.is_sent());
    }
}

#[test]
fn storage_denial_and_directories_never_transmit() {
    let mut fx = fixture();
    let course_ctx = fx.course_ctx;
    for (filename, can_access, is_directory) in [("locked.txt", false, false), (".", true, true)] {
        fx.gate
            .store_mut()
            .insert_file(&NewFile {
                key: FileKey {
                    context_id: course_ctx,
                    component: "user".to_string(),
                    area: "public".to_string(),
                    item_id: 0,
                    filepath: "/".to_string(),
                    filename: filename.to_string(),
                },
                access_level: AccessLevel::Login,
                can_access,
                is_directory,
                mimetype: "text/plain",
                content: b"",
                modified: 0,
            })
            .unwrap();

        let req = request(course_ctx, "user", "public", filename);
        let (outcome, sink) = serve(&mut fx, &req, &Actor::admin(1));
        assert!(matches!(outcome, Err(Error::NotFound(_))), "{filename}");
        assert!(!sink.is_sent());
    }
}

#[test]
fn folder_content_is_always_a_download() {
    let mut fx = fixture();
    let req = request(fx.folder_ctx, "mod_folder", "content", "notes.txt");
    assert!(!req.force_download);
    let actor = Actor::user(7).enrolled_in(fx.course_id);
    let (outcome, sink) = serve(&mut fx, &req, &actor);
    assert_eq!(outcome.unwrap(), ServeOutcome::Sent);

    let sent = sink.into_transmission().expect("transmission");
    assert_eq!(sent.header("Content-Type"), Some("application/x-forcedownload"));
    assert!(
        sent.header("Content-Disposition")
            .unwrap()
            .starts_with("attachment;")
    );
    assert!(sent.header("Cache-Control").unwrap().contains("max-age=0"));
}

#[test]
fn folder_intro_falls_back_to_default_serving() {
    let mut fx = fixture();
    let req = request(fx.folder_ctx, "mod_folder", "intro", "intro.txt");
    let actor = Actor::user(7).enrolled_in(fx.course_id);

    let folder = fx.gate.resolve("mod_folder").expect("folder registered");
    let file = folder
        .get_stored_file(fx.gate.store_mut(), req.context_id, &req.area, &req.args)
        .unwrap()
        .expect("intro file");
    let rules = ServingRules::default();
    let mut sink = BufferedResponse::new();
    let mut ctx = ServeContext {
        store: fx.gate.store_mut(),
        session: &actor,
        sink: &mut sink,
        rules: &rules,
    };
    let outcome = folder.serve(&mut ctx, &file, false, &req.options).unwrap();
    assert_eq!(outcome, ServeOutcome::Unhandled);
    assert!(!sink.is_sent());

    for actor in [actor, Actor::admin(1)] {
        let (outcome, sink) = serve(&mut fx, &req, &actor);
        assert_eq!(outcome.unwrap(), ServeOutcome::Sent);
        let sent = sink.into_transmission().expect("transmission");
        assert_eq!(sent.body, b"hello\n");
        assert!(
            sent.header("Content-Disposition")
                .unwrap()
                .starts_with("inline;")
        );
    }
}

#[test]
fn folder_access_check_runs_before_area_dispatch() {
    let mut fx = fixture();
    let intro = request(fx.folder_ctx, "mod_folder", "intro", "intro.txt");
    let (outcome, _) = serve(&mut fx, &intro, &Actor::user(7));
    assert!(matches!(outcome, Err(Error::Forbidden(_))));

    let content = request(fx.folder_ctx, "mod_folder", "content", "notes.txt");
    let actor = Actor::user(7)
        .enrolled_in(fx.course_id)
        .without_module(fx.folder_cm);
    let (outcome, sink) = serve(&mut fx, &content, &actor);
    assert!(matches!(outcome, Err(Error::Forbidden(_))));
    assert!(!sink.is_sent());
}

#[test]
fn unmigrated_store_reports_storage_errors() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    let store = SqliteStore::new_no_migrate(conn).unwrap();
    let mut gate = FileGate::new(store, GatePolicy::default()).unwrap();

    let err = gate.check_course_access(5).unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
    assert!(!err.is_access_failure());
}

#[test]
fn failed_context_lookup_is_a_storage_error() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    filegate::migrations::migrate_sqlite(&conn).unwrap();
    let mut store = SqliteStoreWithConn::from_connection(&conn);
    store
        .insert_file(&NewFile {
            key: FileKey {
                context_id: 40,
                component: "user".to_string(),
                area: "public".to_string(),
                item_id: 0,
                filepath: "/".to_string(),
                filename: "open.txt".to_string(),
            },
            access_level: AccessLevel::Login,
            can_access: true,
            is_directory: false,
            mimetype: "text/plain",
            content: b"hello\n",
            modified: 1_700_000_000,
        })
        .unwrap();
    conn.execute_batch("DROP TABLE context").unwrap();

    let mut gate = FileGate::new(store, GatePolicy::default()).unwrap();
    let req = request(40, "user", "public", "open.txt");
    let mut sink = BufferedResponse::new();
    let outcome = gate.serve_plugin_file(&req, &Actor::admin(1), &mut sink);
    assert!(matches!(outcome, Err(Error::Storage(_))));
    assert!(!sink.is_sent());
}

#[test]
fn missing_file_and_bad_arguments() {
    let mut fx = fixture();
    let req = request(fx.course_ctx, "course", "summary", "nope.txt");
    let (outcome, _) = serve(&mut fx, &req, &Actor::admin(1));
    assert!(matches!(outcome, Err(Error::NotFound(_))));

    let mut req = request(fx.course_ctx, "course", "summary", "outline.txt");
    req.args = vec!["zero".to_string(), "outline.txt".to_string()];
    let (outcome, _) = serve(&mut fx, &req, &Actor::admin(1));
    assert!(matches!(outcome, Err(Error::InvalidPath(_))));

    let req = request(fx.course_ctx, "Not-A-Component", "summary", "outline.txt");
    let (outcome, _) = serve(&mut fx, &req, &Actor::admin(1));
    assert!(matches!(outcome, Err(Error::InvalidPath(_))));
}

#[test]
fn oversized_files_are_refused() {
    let store = SqliteStore::open_in_memory().unwrap();
    let mut policy = GatePolicy::default();
    policy.serving.max_send_bytes = 3;
    let mut gate = FileGate::new(store, policy).unwrap();
    let (_, course_ctx) = gate
        .store_mut()
        .insert_course(0, "C", "C", "", 0)
        .unwrap();
    add_file(&mut gate, course_ctx, "user", "public", "big.txt", AccessLevel::Login);

    let mut sink = BufferedResponse::new();
    let err = gate
        .serve_plugin_file(
            &request(course_ctx, "user", "public", "big.txt"),
            &Actor::user(1),
            &mut sink,
        )
        .unwrap_err();
    assert_eq!(err.code(), "file_too_large");
    assert!(!sink.is_sent());
}

#[test]
fn course_role_filter_selects_matching_users() {
    let mut gate = open_gate();
    let store = gate.store_mut();
    let science = store.insert_category("Science", 0, 1).unwrap();
    let physics = store.insert_category("Physics", science, 1).unwrap();
    let arts = store.insert_category("Arts", 0, 2).unwrap();
    let (_, science_ctx) = store.insert_course(science, "Sci 101", "S1", "", 0).unwrap();
    let (_, physics_ctx) = store.insert_course(physics, "Phy 101", "P1", "", 0).unwrap();
    let (_, arts_ctx) = store.insert_course(arts, "Art 101", "A1", "", 0).unwrap();
    let student = store.insert_role("student", "Student", 1).unwrap();
    let teacher = store.insert_role("editingteacher", "", 2).unwrap();

    let alice = store.insert_user("alice").unwrap();
    let bob = store.insert_user("bob").unwrap();
    let carol = store.insert_user("carol").unwrap();
    store.assign_role(student, science_ctx, alice).unwrap();
    store.assign_role(student, physics_ctx, bob).unwrap();
    store.assign_role(teacher, arts_ctx, carol).unwrap();

    let filter = CourseRoleFilter::new("courserole", "Course role", false);

    let roles = filter.get_roles(gate.store_mut()).unwrap();
    assert_eq!(roles[0], (0, "Any role".to_string()));
    assert!(roles.contains(&(teacher, "editingteacher".to_string())));

    let categories = filter.get_course_categories(gate.store_mut()).unwrap();
    assert_eq!(
        categories,
        vec![
            (0, "Any category".to_string()),
            (science, "Science".to_string()),
            (physics, "Science / Physics".to_string()),
            (arts, "Arts".to_string()),
        ]
    );

    let data = CourseRoleFilterData {
        include_subcats: false,
        role_id: student,
        category_id: science,
    };
    let result = gate.user_filter_sql(&filter, &data, "ex_").unwrap();
    assert!(result.filter.sql.starts_with("id IN (SELECT a.userid"));
    assert_eq!(result.filter.params.get("ex_roleid"), Some(&student));
    assert_eq!(result.filter.params.get("ex_categoryid"), Some(&science));
    assert_eq!(
        result.label,
        "Course role is \"Student\" in All courses from \"Science\""
    );
    assert_eq!(
        gate.store_mut().select_user_ids(&result.filter).unwrap(),
        vec![alice]
    );

    let data = CourseRoleFilterData {
        include_subcats: true,
        ..data
    };
    let result = gate.user_filter_sql(&filter, &data, "ex_").unwrap();
    assert!(result.label.ends_with("(including subcategories)"));
    assert_eq!(
        gate.store_mut().select_user_ids(&result.filter).unwrap(),
        vec![alice, bob]
    );

    let data = CourseRoleFilterData {
        include_subcats: false,
        role_id: teacher,
        category_id: 0,
    };
    let result = gate.user_filter_sql(&filter, &data, "ex_").unwrap();
    assert_eq!(
        result.label,
        "Course role is \"editingteacher\" in All courses from Any category"
    );
    assert_eq!(
        gate.store_mut().select_user_ids(&result.filter).unwrap(),
        vec![carol]
    );
}

#[test]
fn filter_check_data_round_trips_form_fields() {
    let filter = CourseRoleFilter::new("courserole", "Course role", false);
    let form: HashMap<String, String> = [("courserole_ct", "4")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let data = filter.check_data(&form).unwrap();
    assert_eq!(data.category_id, 4);
    assert_eq!(data.role_id, 0);
    assert!(!data.include_subcats);
}

#[test]
fn filter_rejects_bad_prefix() {
    let mut gate = open_gate();
    let filter = CourseRoleFilter::new("courserole", "Course role", false);
    let data = CourseRoleFilterData {
        include_subcats: false,
        role_id: 1,
        category_id: 0,
    };
    let err = gate.user_filter_sql(&filter, &data, "1; DROP").unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[derive(Default)]
struct Collect(RefCell<Vec<EventRecord>>);

impl EventSink for Collect {
    fn dispatch(&self, event: &EventRecord) -> filegate::Result<()> {
        self.0.borrow_mut().push(event.clone());
        Ok(())
    }
}

fn seed_task(gate: &mut FileGate<SqliteStore>) -> i64 {
    gate.store_mut()
        .insert_scheduled_task(&filegate::store::ScheduledTaskRecord {
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
        .unwrap()
}

#[test]
fn task_update_is_saved_and_announced() {
    let mut gate = open_gate();
    let task_id = seed_task(&mut gate);
    let sink = Collect::default();

    let update = ScheduledTaskUpdate {
        minute: Some("*/5".to_string()),
        disabled: Some(true),
        ..ScheduledTaskUpdate::default()
    };
    let saved = gate.update_scheduled_task(task_id, &update, &sink).unwrap();
    assert_eq!(saved.minute, "*/5");
    assert!(saved.disabled);
    assert!(saved.customised);

    let stored = gate
        .store_mut()
        .get_scheduled_task(task_id)
        .unwrap()
        .unwrap();
    assert_eq!(stored, saved);

    let events = sink.0.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].object_id, task_id);
    assert_eq!(events[0].crud, Crud::Update);
    assert_eq!(
        events[0].other_str("classname"),
        Some("\\core\\task\\cache_cleanup_task")
    );
}

struct Unreachable;

impl EventSink for Unreachable {
    fn dispatch(&self, _event: &EventRecord) -> filegate::Result<()> {
        Err(Error::Storage("event log unavailable".to_string()))
    }
}

#[test]
fn task_update_survives_a_failing_event_sink() {
    let mut gate = open_gate();
    let task_id = seed_task(&mut gate);

    let update = ScheduledTaskUpdate {
        hour: Some("3".to_string()),
        ..ScheduledTaskUpdate::default()
    };
    let saved = gate
        .update_scheduled_task(task_id, &update, &Unreachable)
        .expect("saved despite sink failure");
    assert_eq!(saved.hour, "3");

    let stored = gate
        .store_mut()
        .get_scheduled_task(task_id)
        .unwrap()
        .unwrap();
    assert_eq!(stored, saved);
}

#[test]
fn task_update_rejects_bad_schedule_and_unknown_task() {
    let mut gate = open_gate();
    let task_id = seed_task(&mut gate);
    let sink = Collect::default();

    let update = ScheduledTaskUpdate {
        hour: Some("noon".to_string()),
        ..ScheduledTaskUpdate::default()
    };
    assert!(matches!(
        gate.update_scheduled_task(task_id, &update, &sink),
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        gate.update_scheduled_task(task_id + 100, &ScheduledTaskUpdate::default(), &sink),
        Err(Error::NotFound(_))
    ));
    assert!(sink.0.borrow().is_empty());
}
