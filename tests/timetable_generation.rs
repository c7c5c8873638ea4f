use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_timetabled");
    let mut child = Command::new(exe)
        .env_remove("TIMETABLED_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn timetabled");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing string field {} in {}", key, v))
        .to_string()
}

const OWNER: &str = "school-timetable";

fn open(prefix: &str) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "open",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    (child, stdin, reader)
}

fn create(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: serde_json::Value,
    id_field: &str,
) -> String {
    let res = request_ok(stdin, reader, method, method, params);
    str_field(&res, id_field)
}

fn assert_conflict_free(slots: &[serde_json::Value]) {
    let mut teacher_cells = std::collections::BTreeSet::new();
    let mut class_cells = std::collections::BTreeSet::new();
    for s in slots {
        let cell = (s["day"].as_u64(), s["period"].as_u64());
        assert!(
            teacher_cells.insert((cell, str_field(s, "teacherId"))),
            "teacher double booked: {}",
            s
        );
        assert!(
            class_cells.insert((cell, str_field(s, "classId"))),
            "class double booked: {}",
            s
        );
    }
}

#[test]
fn generation_is_deterministic_and_conflict_free() {
    let (mut child, mut stdin, mut reader) = open("timetabled-tt-determinism");
    let g = create(
        &mut stdin,
        &mut reader,
        "grades.create",
        json!({ "ownerId": OWNER, "name": "8th" }),
        "gradeId",
    );
    let mut subjects = Vec::new();
    for (name, hours) in [("Math", 5), ("Portuguese", 4), ("Science", 3), ("Arts", 2)] {
        subjects.push(create(
            &mut stdin,
            &mut reader,
            "subjects.create",
            json!({ "ownerId": OWNER, "name": name, "weeklyHours": hours }),
            "subjectId",
        ));
    }
    for (name, teaches) in [
        ("Ana", vec![0, 2]),
        ("Bruno", vec![1, 3]),
        ("Carla", vec![0, 1]),
        ("Davi", vec![2, 3]),
    ] {
        let ids: Vec<&String> = teaches.iter().map(|i| &subjects[*i]).collect();
        create(
            &mut stdin,
            &mut reader,
            "teachers.create",
            json!({ "ownerId": OWNER, "name": name, "subjectIds": ids, "maxWeeklyLessons": 20 }),
            "teacherId",
        );
    }
    for name in ["8A", "8B", "8C"] {
        let curriculum: Vec<serde_json::Value> =
            subjects.iter().map(|s| json!({ "subjectId": s })).collect();
        create(
            &mut stdin,
            &mut reader,
            "classes.create",
            json!({ "ownerId": OWNER, "gradeId": g, "name": name, "subjects": curriculum }),
            "classId",
        );
    }

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "gen-1",
        "timetable.generate",
        json!({ "ownerId": OWNER }),
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "gen-2",
        "timetable.generate",
        json!({ "ownerId": OWNER }),
    );
    assert_eq!(first["slots"], second["slots"]);
    assert_eq!(first["fingerprint"], second["fingerprint"]);

    let slots = first["slots"].as_array().expect("slots");
    assert_conflict_free(slots);
    let total_shortfall = first["totalShortfall"].as_u64().expect("totalShortfall");
    assert_eq!(slots.len() as u64 + total_shortfall, 3 * 14);

    let stored = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "timetable.get",
        json!({ "ownerId": OWNER }),
    );
    assert_eq!(stored["fingerprint"], first["fingerprint"]);
    assert!(stored["conflicts"].as_array().expect("conflicts").is_empty());
    assert_eq!(stored["slots"].as_array().expect("stored").len(), slots.len());

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn unqualified_subject_is_reported_as_full_shortfall() {
    let (mut child, mut stdin, mut reader) = open("timetabled-tt-shortfall");
    let g = create(
        &mut stdin,
        &mut reader,
        "grades.create",
        json!({ "ownerId": OWNER, "name": "9th" }),
        "gradeId",
    );
    let music = create(
        &mut stdin,
        &mut reader,
        "subjects.create",
        json!({ "ownerId": OWNER, "name": "Music", "weeklyHours": 2 }),
        "subjectId",
    );
    let class_id = create(
        &mut stdin,
        &mut reader,
        "classes.create",
        json!({ "ownerId": OWNER, "gradeId": g, "name": "9A", "subjects": [{ "subjectId": music, "weeklyHours": 3 }] }),
        "classId",
    );
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "gen",
        "timetable.generate",
        json!({ "ownerId": OWNER, "persist": false }),
    );
    assert!(res["slots"].as_array().expect("slots").is_empty());
    let shortfall = &res["shortfalls"][0];
    assert_eq!(shortfall["classId"], class_id.as_str());
    assert_eq!(shortfall["required"], 3);
    assert_eq!(shortfall["assigned"], 0);
    assert_eq!(shortfall["shortfall"], 3);
    assert_eq!(res["persisted"], false);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn availability_notes_and_grid_settings_shape_the_timetable() {
    let (mut child, mut stdin, mut reader) = open("timetabled-tt-availability");
    let parsed = request_ok(
        &mut stdin,
        &mut reader,
        "notes",
        "availability.parseNotes",
        json!({ "ownerId": OWNER, "notes": "Não pode às segundas. Prefere sexta de manhã" }),
    );
    assert_eq!(parsed["availability"]["blocked"].as_array().expect("blocked").len(), 6);
    assert_eq!(parsed["availability"]["preferred"].as_array().expect("preferred").len(), 3);

    request_ok(
        &mut stdin,
        &mut reader,
        "cfg",
        "setup.update",
        json!({ "ownerId": OWNER, "section": "timetable", "patch": { "daysPerWeek": 6, "periodsPerDay": 2 } }),
    );
    let g = create(
        &mut stdin,
        &mut reader,
        "grades.create",
        json!({ "ownerId": OWNER, "name": "1st" }),
        "gradeId",
    );
    let pe = create(
        &mut stdin,
        &mut reader,
        "subjects.create",
        json!({ "ownerId": OWNER, "name": "PE", "weeklyHours": 10 }),
        "subjectId",
    );
    let teacher_id = create(
        &mut stdin,
        &mut reader,
        "teachers.create",
        json!({
            "ownerId": OWNER,
            "name": "Eva",
            "subjectIds": [pe],
            "availability": { "blocked": [{ "day": 0, "period": 1 }, { "day": 0, "period": 2 }] }
        }),
        "teacherId",
    );
    create(
        &mut stdin,
        &mut reader,
        "classes.create",
        json!({ "ownerId": OWNER, "gradeId": g, "name": "1A", "subjects": [{ "subjectId": pe }] }),
        "classId",
    );

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "gen",
        "timetable.generate",
        json!({ "ownerId": OWNER }),
    );
    assert_eq!(res["grid"]["daysPerWeek"], 6);
    let slots = res["slots"].as_array().expect("slots");
    assert_eq!(slots.len(), 10);
    assert!(slots.iter().all(|s| s["day"] != 0 && s["teacherId"] == teacher_id.as_str()));
    assert!(slots.iter().any(|s| s["day"] == 5));
    assert_eq!(res["totalShortfall"], 0);

    // a weekly cap below the requirement leaves the rest short
    request_ok(
        &mut stdin,
        &mut reader,
        "cap",
        "teachers.update",
        json!({ "ownerId": OWNER, "teacherId": teacher_id, "maxWeeklyLessons": 4 }),
    );
    let capped = request_ok(
        &mut stdin,
        &mut reader,
        "gen-2",
        "timetable.generate",
        json!({ "ownerId": OWNER }),
    );
    assert_eq!(capped["slots"].as_array().expect("slots").len(), 4);
    assert_eq!(capped["totalShortfall"], 6);

    // deactivated teachers are not scheduled at all
    request_ok(
        &mut stdin,
        &mut reader,
        "off",
        "teachers.deactivate",
        json!({ "ownerId": OWNER, "teacherId": teacher_id }),
    );
    let none = request_ok(
        &mut stdin,
        &mut reader,
        "gen-3",
        "timetable.generate",
        json!({ "ownerId": OWNER }),
    );
    assert!(none["slots"].as_array().expect("slots").is_empty());
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "teachers.list",
        json!({ "ownerId": OWNER, "includeInactive": true }),
    );
    assert_eq!(listed["teachers"][0]["active"], false);

    drop(stdin);
    let _ = child.wait();
}
