//! Property-based tests for the merge engine.
//!
//! Uses proptest to verify:
//! 1. Merging a state with itself changes nothing but the clock.
//! 2. Disjoint additions on two devices are both kept.
//! 3. A deletion at or after a task's score always removes it.
//! 4. An edit scored after a deletion always survives it.
//! 5. Merged output is sorted, unique, and free of suppressed tasks.
//! 6. Surviving ids do not depend on argument order.
//! 7. Arbitrary JSON never panics the normalizer.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeSet;

use proptest::prelude::*;
use scribble_proto::clock::DAY_MS;
use scribble_proto::{AppState, Task, TaskId, TaskStatus, merge, merge_values, normalize};
use serde_json::Value;

/// A fixed "now" well past every generated stamp, inside the retention window.
const NOW: u64 = 1_000 * DAY_MS;

/// Stamps stay within the last 30 days before `NOW` so nothing is pruned.
fn arb_stamp() -> impl Strategy<Value = u64> {
    (NOW - 30 * DAY_MS)..NOW
}

fn arb_task(ids: std::ops::Range<u64>) -> impl Strategy<Value = Task> {
    (ids, "[a-z ]{1,12}[a-z]", "[a-z]{0,5}", any::<bool>(), arb_stamp()).prop_map(
        |(id, text, group, done, stamp)| Task {
            task_id: TaskId::new(id).unwrap(),
            text,
            group,
            status: if done {
                TaskStatus::Completed
            } else {
                TaskStatus::Pending
            },
            task_updated_at: stamp,
        },
    )
}

/// A well-formed state: unique ids, no task suppressed by its own tombstones.
fn arb_state(ids: std::ops::Range<u64>) -> impl Strategy<Value = AppState> {
    (
        prop::collection::vec(arb_task(ids.clone()), 0..12),
        prop::collection::btree_map(ids, arb_stamp(), 0..6),
        "[a-z]{0,6}",
        "[a-z]{0,6}",
        arb_stamp(),
    )
        .prop_map(|(tasks, raw_tombstones, selected_group, user_name, updated_at)| {
            let mut state = AppState {
                selected_group,
                user_name,
                updated_at,
                ..AppState::default()
            };
            for task in tasks {
                state.upsert(task);
            }
            for (id, deleted_at) in raw_tombstones {
                if let Some(id) = TaskId::new(id) {
                    state.tombstones.insert(id, deleted_at);
                }
            }
            state.suppress_tombstoned();
            state
        })
}

fn ids_of(state: &AppState) -> BTreeSet<u64> {
    state.tasks.iter().map(|t| t.task_id.get()).collect()
}

/// Strategy for arbitrary JSON values a few levels deep.
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        any::<f64>().prop_map(Value::from),
        "[ -~]{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map(
                prop_oneof![
                    Just("updatedAt".to_string()),
                    Just("data".to_string()),
                    Just("todos".to_string()),
                    Just("deleted_task_ids".to_string()),
                    Just("task_id".to_string()),
                    Just("task".to_string()),
                    "[a-z0-9]{1,6}",
                ],
                inner,
                0..6
            )
            .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn merge_with_self_is_idempotent(state in arb_state(1..40)) {
        let merged = merge(&state, &state, NOW);
        prop_assert_eq!(&merged.tasks, &state.tasks);
        prop_assert_eq!(&merged.tombstones, &state.tombstones);
        prop_assert_eq!(&merged.selected_group, &state.selected_group);
        prop_assert_eq!(&merged.user_name, &state.user_name);
        prop_assert!(merged.updated_at >= state.updated_at);
    }

    #[test]
    fn disjoint_additions_converge(
        ancestor in arb_state(1..20),
        from_a in prop::collection::vec(arb_task(100..200), 0..8),
        from_b in prop::collection::vec(arb_task(200..300), 0..8),
    ) {
        let mut a = ancestor.clone();
        for task in &from_a {
            a.upsert(task.clone());
        }
        let mut b = ancestor.clone();
        for task in &from_b {
            b.upsert(task.clone());
        }

        let merged = merge(&a, &b, NOW);
        let ids = ids_of(&merged);
        for task in from_a.iter().chain(from_b.iter()) {
            prop_assert!(ids.contains(&task.task_id.get()));
        }
        for id in ids_of(&ancestor) {
            prop_assert!(ids.contains(&id));
        }
    }

    #[test]
    fn deletion_at_or_after_score_wins(
        task in arb_task(1..2),
        delay in 0u64..1_000,
        deleter_first in any::<bool>(),
    ) {
        let keeper = AppState {
            tasks: vec![task.clone()],
            updated_at: task.task_updated_at,
            ..AppState::default()
        };
        let mut deleter = AppState {
            updated_at: task.task_updated_at + delay,
            ..AppState::default()
        };
        deleter.tombstones.insert(task.task_id, task.task_updated_at + delay);

        let merged = if deleter_first {
            merge(&deleter, &keeper, NOW)
        } else {
            merge(&keeper, &deleter, NOW)
        };
        prop_assert!(merged.tasks.is_empty());
    }

    #[test]
    fn edit_after_deletion_survives(
        task in arb_task(1..2),
        gap in 1u64..1_000,
        editor_first in any::<bool>(),
    ) {
        let deleted_at = task.task_updated_at - gap;
        let editor = AppState {
            tasks: vec![task.clone()],
            updated_at: task.task_updated_at,
            ..AppState::default()
        };
        let mut deleter = AppState {
            updated_at: deleted_at,
            ..AppState::default()
        };
        deleter.tombstones.insert(task.task_id, deleted_at);

        let merged = if editor_first {
            merge(&editor, &deleter, NOW)
        } else {
            merge(&deleter, &editor, NOW)
        };
        prop_assert_eq!(merged.tasks, vec![task]);
    }

    #[test]
    fn merged_output_is_well_formed(a in arb_state(1..30), b in arb_state(1..30)) {
        let merged = merge(&a, &b, NOW);
        let ids: Vec<u64> = merged.tasks.iter().map(|t| t.task_id.get()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        prop_assert_eq!(ids, sorted);

        for task in &merged.tasks {
            if let Some(deleted_at) = merged.tombstones.get(&task.task_id) {
                prop_assert!(*deleted_at < task.score(merged.updated_at));
            }
        }
        prop_assert!(merged.updated_at >= a.updated_at.max(b.updated_at));
    }

    #[test]
    fn surviving_ids_are_order_independent(a in arb_state(1..30), b in arb_state(1..30)) {
        prop_assert_eq!(ids_of(&merge(&a, &b, NOW)), ids_of(&merge(&b, &a, NOW)));
        prop_assert_eq!(merge(&a, &b, NOW).tombstones, merge(&b, &a, NOW).tombstones);
    }

    #[test]
    fn normalizer_never_panics(stored in arb_json(), incoming in arb_json()) {
        let merged = merge_values(Some(&stored), &incoming, NOW);
        prop_assert!(merged.updated_at >= NOW);
        let _ = normalize::state_from_record(&incoming, NOW);
    }
}
