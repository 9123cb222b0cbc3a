use crate::error::{ExamError, FieldErrors};
use crate::ipc::error::{err, exam_err, ok};
use crate::ipc::helpers::{db_conn, parse_params, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::{Student, SubjectSelector, ALL_SUBJECTS};
use crate::registry::{self, StaffForm, StudentForm, StudentPatch};
use crate::roster::{current_form, resolve_roster, CurrentYear};
use crate::store::{SchoolStore, SqliteStore};
use serde::Deserialize;
use serde_json::json;

fn student_json(s: &Student, year: i32, subjects: Option<Vec<String>>) -> serde_json::Value {
    let mut v = json!(s);
    v["currentForm"] = json!(current_form(s, year));
    v["fullName"] = json!(s.full_name());
    if let Some(subjects) = subjects {
        v["subjects"] = json!(subjects);
    }
    v
}

fn reference_year(state: &AppState, req: &Request) -> i32 {
    req.params
        .get("referenceYear")
        .and_then(|v| v.as_i64())
        .and_then(|y| i32::try_from(y).ok())
        .unwrap_or_else(|| state.clock.current_year())
}

fn handle_students_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let form: StudentForm = match parse_params(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    let year = state.clock.current_year();
    match registry::register_student(conn, form) {
        Ok(s) => {
            let subjects = SqliteStore::new(conn).enrolled_subject_names(&s.reg_no).ok();
            ok(&req.id, json!({ "student": student_json(&s, year, subjects) }))
        }
        Err(e) => exam_err(&req.id, e),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let reg_no = match required_str(req, "regNo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch: StudentPatch = match parse_params(req) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let year = state.clock.current_year();
    match registry::update_student(conn, &reg_no, patch) {
        Ok(s) => ok(&req.id, json!({ "student": student_json(&s, year, None) })),
        Err(e) => exam_err(&req.id, e),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let reg_no = match required_str(req, "regNo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let store = SqliteStore::new(conn);
    let year = reference_year(state, req);
    let found = store.student(&reg_no).and_then(|s| match s {
        Some(s) => Ok(Some((store.enrolled_subject_names(&s.reg_no)?, s))),
        None => Ok(None),
    });
    match found {
        Ok(Some((subjects, s))) => ok(&req.id, json!({ "student": student_json(&s, year, Some(subjects)) })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => exam_err(&req.id, e),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let reg_no = match required_str(req, "regNo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match registry::delete_student(conn, &reg_no) {
        Ok(()) => ok(&req.id, json!({ "deleted": reg_no })),
        Err(e) => exam_err(&req.id, e),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListFilter {
    form: Option<i64>,
    stream: Option<String>,
    subject: Option<String>,
    reference_year: Option<i32>,
}

fn list_students(
    store: &SqliteStore<'_>,
    filter: &ListFilter,
    year: i32,
    clock: &dyn CurrentYear,
) -> Result<Vec<Student>, ExamError> {
    let mut errs = FieldErrors::new();
    let stream = match filter.stream.as_deref() {
        Some(name) => {
            let s = store.stream_by_name(name)?;
            if s.is_none() {
                errs.add_not_found("stream_name", "This stream is not found.");
            }
            s
        }
        None => None,
    };
    let selector = match filter.subject.as_deref() {
        None => SubjectSelector::All,
        Some(name) if name.trim().eq_ignore_ascii_case(ALL_SUBJECTS) => SubjectSelector::All,
        Some(name) => match store.subject_by_name(name)? {
            Some(s) => SubjectSelector::One(s),
            None => {
                errs.add_not_found("subject_name", "This subject is not found.");
                SubjectSelector::All
            }
        },
    };
    errs.into_filter_result("student filter rejected")?;

    let mut students = store.students(stream.as_ref().map(|s| s.id.as_str()))?;
    if let Some(form) = filter.form {
        students = resolve_roster(&students, form, Some(year), clock);
    }
    let reg_nos: Vec<String> = students.iter().map(|s| s.reg_no.clone()).collect();
    let index = store.enrollments(&reg_nos)?;
    Ok(index.filter_by_enrollment(students, &selector))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let filter: ListFilter = match parse_params(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    let store = SqliteStore::new(conn);
    let year = filter
        .reference_year
        .unwrap_or_else(|| state.clock.current_year());

    let result = list_students(&store, &filter, year, state.clock.as_ref());

    match result {
        Ok(students) => {
            let items: Vec<serde_json::Value> = students
                .iter()
                .map(|s| student_json(s, year, None))
                .collect();
            ok(&req.id, json!({ "referenceYear": year, "items": items }))
        }
        Err(e) => exam_err(&req.id, e),
    }
}

fn handle_staff_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let form: StaffForm = match parse_params(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    match registry::register_staff(conn, form) {
        Ok(staff) => ok(&req.id, json!({ "staff": staff })),
        Err(e) => exam_err(&req.id, e),
    }
}

fn handle_staff_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match SqliteStore::new(conn).staff() {
        Ok(items) => ok(&req.id, json!({ "items": items })),
        Err(e) => exam_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.register" => Some(handle_students_register(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "staff.register" => Some(handle_staff_register(state, req)),
        "staff.list" => Some(handle_staff_list(state, req)),
        _ => None,
    }
}
