//! Liberal decoding of task records and states from arbitrary JSON.
//!
//! Blobs in the remote store may have been written by any schema version,
//! so nothing here fails: malformed records are dropped and malformed
//! fields fall back to their defaults.

use serde_json::{Map, Value};

use crate::state::{AppState, TaskTable, Tombstones};
use crate::task::{Task, TaskId, TaskStatus};

/// Why a task record was rejected.
///
/// Never surfaced past the normalizer; callers drop the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The record is not a JSON object.
    #[error("task record is not an object")]
    NotAnObject,
    /// `task_id` is missing, non-numeric, or not positive.
    #[error("task_id is missing or not a positive number")]
    MissingTaskId,
    /// `task` trims to the empty string.
    #[error("task text is empty")]
    EmptyText,
}

/// Coerces a JSON value to a positive millisecond count, or 0 when absent.
///
/// Numbers and numeric strings are accepted when finite and at least 1;
/// fractional values are truncated. Everything else is 0.
#[must_use]
pub fn to_millis(value: &Value) -> u64 {
    if let Some(n) = value.as_u64() {
        return n;
    }
    let float = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match float {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(f) if f.is_finite() && f >= 1.0 => f as u64,
        _ => 0,
    }
}

/// Renders a scalar JSON value as text; `null` and containers become empty.
fn to_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Parses one task record.
///
/// `state_updated_at` is the owning state's timestamp, used when the record
/// carries no usable `task_updated_at`.
///
/// # Errors
///
/// Returns a [`ValidationError`] describing the first rule the record breaks.
pub fn parse_task(value: &Value, state_updated_at: u64) -> Result<Task, ValidationError> {
    let Value::Object(obj) = value else {
        return Err(ValidationError::NotAnObject);
    };

    let task_id = obj
        .get("task_id")
        .map(to_millis)
        .and_then(TaskId::new)
        .ok_or(ValidationError::MissingTaskId)?;

    let text = to_text(obj.get("task")).trim().to_string();
    if text.is_empty() {
        return Err(ValidationError::EmptyText);
    }

    let explicit = obj.get("task_updated_at").map_or(0, to_millis);
    let task_updated_at = [explicit, state_updated_at, task_id.get()]
        .into_iter()
        .find(|v| *v > 0)
        .unwrap_or_default();

    Ok(Task {
        task_id,
        text,
        group: to_text(obj.get("group")).trim().to_string(),
        status: TaskStatus::from_wire(obj.get("status").and_then(Value::as_str)),
        task_updated_at,
    })
}

/// Parses one task record, dropping it on any validation failure.
#[must_use]
pub fn normalize_task(value: &Value, state_updated_at: u64) -> Option<Task> {
    parse_task(value, state_updated_at).ok()
}

/// Normalizes a tombstone collection.
///
/// Accepts a map of id to deletion time, or a bare list of ids which are
/// all treated as deleted at `now`. Entries whose id or deletion time does
/// not coerce to a positive number are dropped; duplicate ids keep the
/// latest deletion time.
#[must_use]
pub fn normalize_tombstones(value: &Value, now: u64) -> Tombstones {
    let mut out = Tombstones::new();
    let mut record = |id: u64, deleted_at: u64| {
        if let Some(id) = TaskId::new(id) {
            if deleted_at > 0 {
                let slot = out.entry(id).or_insert(0);
                *slot = (*slot).max(deleted_at);
            }
        }
    };

    match value {
        Value::Array(ids) => {
            for id in ids {
                record(to_millis(id), now);
            }
        }
        Value::Object(entries) => {
            for (key, deleted_at) in entries {
                record(to_millis(&Value::String(key.clone())), to_millis(deleted_at));
            }
        }
        _ => {}
    }
    out
}

/// Builds a state from a data object plus its owning timestamp.
///
/// Duplicate task ids inside one document are resolved by score, and tasks
/// already covered by one of the document's own tombstones are dropped.
#[must_use]
pub fn normalize_data(data: &Value, updated_at: u64, now: u64) -> AppState {
    let empty = Map::new();
    let obj = data.as_object().unwrap_or(&empty);

    let mut table = TaskTable::new();
    if let Some(Value::Array(todos)) = obj.get("todos") {
        for task in todos.iter().filter_map(|t| normalize_task(t, updated_at)) {
            table.offer(task, updated_at);
        }
    }

    let tombstones = obj
        .get("deleted_task_ids")
        .map(|v| normalize_tombstones(v, now))
        .unwrap_or_default();
    table.suppress(&tombstones);

    AppState {
        tasks: table.into_tasks(),
        tombstones,
        selected_group: to_text(obj.get("selected_group")),
        user_name: to_text(obj.get("user_name")),
        updated_at,
    }
}

/// Normalizes a wire blob `{ "updatedAt": .., "data": { .. } }`.
///
/// A missing or non-object `data` yields an empty state carrying whatever
/// `updatedAt` could be read.
#[must_use]
pub fn state_from_blob(blob: &Value, now: u64) -> AppState {
    let updated_at = blob.get("updatedAt").map_or(0, to_millis);
    let data = blob.get("data").unwrap_or(&Value::Null);
    normalize_data(data, updated_at, now)
}

/// Normalizes a flat local record `{ "todos": .., "updatedAt": .., .. }`.
#[must_use]
pub fn state_from_record(record: &Value, now: u64) -> AppState {
    let updated_at = record.get("updatedAt").map_or(0, to_millis);
    normalize_data(record, updated_at, now)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn id(raw: u64) -> TaskId {
        TaskId::new(raw).unwrap()
    }

    #[test]
    fn to_millis_accepts_numbers_and_numeric_strings() {
        assert_eq!(to_millis(&json!(1_765_000_000_000_u64)), 1_765_000_000_000);
        assert_eq!(to_millis(&json!("42")), 42);
        assert_eq!(to_millis(&json!(" 42 ")), 42);
        assert_eq!(to_millis(&json!(12.9)), 12);
    }

    #[test]
    fn to_millis_rejects_everything_else() {
        assert_eq!(to_millis(&json!(0)), 0);
        assert_eq!(to_millis(&json!(-5)), 0);
        assert_eq!(to_millis(&json!(0.5)), 0);
        assert_eq!(to_millis(&json!("")), 0);
        assert_eq!(to_millis(&json!("abc")), 0);
        assert_eq!(to_millis(&json!("inf")), 0);
        assert_eq!(to_millis(&json!(null)), 0);
        assert_eq!(to_millis(&json!(true)), 0);
        assert_eq!(to_millis(&json!([1])), 0);
    }

    #[test]
    fn parse_task_full_record() {
        let raw = json!({
            "task_id": 100,
            "task": "  buy milk  ",
            "group": " home ",
            "status": "completed",
            "task_updated_at": 150
        });
        let task = parse_task(&raw, 999).unwrap();
        assert_eq!(task.task_id, id(100));
        assert_eq!(task.text, "buy milk");
        assert_eq!(task.group, "home");
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.task_updated_at, 150);
    }

    #[test]
    fn parse_task_rejects_bad_records() {
        assert_eq!(parse_task(&json!("x"), 0), Err(ValidationError::NotAnObject));
        assert_eq!(
            parse_task(&json!({"task": "x"}), 0),
            Err(ValidationError::MissingTaskId)
        );
        assert_eq!(
            parse_task(&json!({"task_id": -1, "task": "x"}), 0),
            Err(ValidationError::MissingTaskId)
        );
        assert_eq!(
            parse_task(&json!({"task_id": 1, "task": "   "}), 0),
            Err(ValidationError::EmptyText)
        );
        assert_eq!(
            parse_task(&json!({"task_id": 1}), 0),
            Err(ValidationError::EmptyText)
        );
    }

    #[test]
    fn parse_task_updated_at_fallbacks() {
        let raw = json!({"task_id": 100, "task": "x"});
        assert_eq!(parse_task(&raw, 500).unwrap().task_updated_at, 500);
        assert_eq!(parse_task(&raw, 0).unwrap().task_updated_at, 100);

        let bogus = json!({"task_id": 100, "task": "x", "task_updated_at": "soon"});
        assert_eq!(parse_task(&bogus, 500).unwrap().task_updated_at, 500);
    }

    #[test]
    fn parse_task_status_defaults_to_pending() {
        let raw = json!({"task_id": 1, "task": "x", "status": "done"});
        assert_eq!(parse_task(&raw, 0).unwrap().status, TaskStatus::Pending);
        let raw = json!({"task_id": 1, "task": "x", "status": 1});
        assert_eq!(parse_task(&raw, 0).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn numeric_text_is_stringified() {
        let raw = json!({"task_id": "7", "task": 12, "group": null});
        let task = parse_task(&raw, 0).unwrap();
        assert_eq!(task.task_id, id(7));
        assert_eq!(task.text, "12");
        assert_eq!(task.group, "");
    }

    #[test]
    fn tombstones_from_map() {
        let raw = json!({"100": 150, "abc": 1, "200": 0, "300": "400", "0": 5});
        let tombstones = normalize_tombstones(&raw, 9_999);
        assert_eq!(tombstones.len(), 2);
        assert_eq!(tombstones[&id(100)], 150);
        assert_eq!(tombstones[&id(300)], 400);
    }

    #[test]
    fn tombstones_from_list_use_now() {
        let raw = json!([100, "200", -3, null, 100]);
        let tombstones = normalize_tombstones(&raw, 9_999);
        assert_eq!(tombstones.len(), 2);
        assert_eq!(tombstones[&id(100)], 9_999);
        assert_eq!(tombstones[&id(200)], 9_999);
    }

    #[test]
    fn tombstones_from_garbage_are_empty() {
        assert!(normalize_tombstones(&json!("x"), 1).is_empty());
        assert!(normalize_tombstones(&json!(null), 1).is_empty());
    }

    #[test]
    fn blob_without_data_is_empty_state() {
        let state = state_from_blob(&json!({"updatedAt": 77}), 1_000);
        assert!(state.tasks.is_empty());
        assert_eq!(state.updated_at, 77);

        let state = state_from_blob(&json!({"updatedAt": 77, "data": [1, 2]}), 1_000);
        assert!(state.tasks.is_empty());
        assert_eq!(state.selected_group, "");
    }

    #[test]
    fn blob_drops_bad_tasks_and_dedupes() {
        let blob = json!({
            "updatedAt": 500,
            "data": {
                "todos": [
                    {"task_id": 2, "task": "b"},
                    {"task_id": 1, "task": "a-old", "task_updated_at": 10},
                    {"task_id": 1, "task": "a-new", "task_updated_at": 20},
                    {"task_id": 3, "task": ""},
                    "junk"
                ],
                "deleted_task_ids": {},
                "selected_group": "work",
                "user_name": "sam"
            }
        });
        let state = state_from_blob(&blob, 1_000);
        let texts: Vec<&str> = state.tasks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["a-new", "b"]);
        assert_eq!(state.tasks[1].task_updated_at, 500);
        assert_eq!(state.selected_group, "work");
        assert_eq!(state.user_name, "sam");
    }

    #[test]
    fn record_layout_is_flat() {
        let record = json!({
            "todos": [{"task_id": 1, "task": "a"}],
            "deleted_task_ids": [9],
            "updatedAt": 40
        });
        let state = state_from_record(&record, 1_000);
        assert_eq!(state.tasks.len(), 1);
        assert_eq!(state.tombstones[&id(9)], 1_000);
        assert_eq!(state.updated_at, 40);
    }
}
