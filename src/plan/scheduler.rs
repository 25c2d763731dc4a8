//! Manifest validation and deterministic topological ordering.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::errors::PlanError;
use crate::plan::item::WorkItem;

/// Whether backlog ids must form the contiguous `T-001..T-00N` sequence.
///
/// The authored backlog is written in chronological order and a gap or
/// reorder means the planner and the manifest disagree; that is surfaced,
/// never silently corrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceRule {
    Chronological,
    Free,
}

/// Load work items from the manifest at `path`.
///
/// A missing manifest is an empty schedule, not an error: the planner stage
/// may simply not have run yet.
pub fn collect_items(path: &Path, rule: SequenceRule) -> Result<Vec<WorkItem>, PlanError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path).map_err(|source| PlanError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let payload: Value = serde_json::from_str(&text).map_err(|source| PlanError::Manifest {
        path: path.to_path_buf(),
        source,
    })?;

    let entries = payload
        .get("tasks")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut items: Vec<WorkItem> = Vec::with_capacity(entries.len());
    for entry in entries {
        let mut item: WorkItem =
            serde_json::from_value(entry.clone()).map_err(|source| PlanError::Manifest {
                path: path.to_path_buf(),
                source,
            })?;
        if items.iter().any(|existing| existing.id == item.id) {
            return Err(PlanError::DuplicateId { id: item.id });
        }
        item.raw = entry;
        items.push(item);
    }

    if rule == SequenceRule::Chronological && !items.is_empty() {
        let observed: Vec<&str> = items.iter().map(|item| item.id.as_str()).collect();
        let expected: Vec<String> = (1..=items.len()).map(|index| format!("T-{index:03}")).collect();
        if observed != expected.iter().map(String::as_str).collect::<Vec<_>>() {
            return Err(PlanError::OutOfSequence {
                expected: expected.join(", "),
                found: observed.join(", "),
            });
        }
    }

    Ok(items)
}

/// Topologically order `items` by their dependency edges.
///
/// Kahn's algorithm over in-degrees; among simultaneously eligible items the
/// smallest id wins, so the order is identical across runs. Retries depend
/// on that: resuming a run must land on the same next item every time.
pub fn order_items(items: Vec<WorkItem>) -> Result<Vec<WorkItem>, PlanError> {
    let mut indegree: HashMap<&str, usize> = HashMap::with_capacity(items.len());
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::with_capacity(items.len());
    for item in &items {
        indegree.insert(item.id.as_str(), 0);
        adjacency.insert(item.id.as_str(), Vec::new());
    }

    for item in &items {
        for dep in &item.deps {
            if !indegree.contains_key(dep.as_str()) {
                return Err(PlanError::UnknownDependency {
                    item: item.id.clone(),
                    dependency: dep.clone(),
                });
            }
            if let Some(degree) = indegree.get_mut(item.id.as_str()) {
                *degree += 1;
            }
            adjacency
                .entry(dep.as_str())
                .or_default()
                .push(item.id.as_str());
        }
    }

    let mut ready: BinaryHeap<Reverse<&str>> = items
        .iter()
        .filter(|item| indegree[item.id.as_str()] == 0)
        .map(|item| Reverse(item.id.as_str()))
        .collect();

    let mut ordered_ids: Vec<String> = Vec::with_capacity(items.len());
    while let Some(Reverse(current)) = ready.pop() {
        ordered_ids.push(current.to_string());
        if let Some(neighbors) = adjacency.get(current) {
            for &neighbor in neighbors {
                if let Some(degree) = indegree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(neighbor));
                    }
                }
            }
        }
    }

    if ordered_ids.len() != items.len() {
        let unresolved = items
            .iter()
            .filter(|item| indegree.get(item.id.as_str()).copied().unwrap_or(0) > 0)
            .map(|item| item.id.clone())
            .collect();
        return Err(PlanError::Cycle { unresolved });
    }

    let mut by_id: HashMap<String, WorkItem> = items
        .into_iter()
        .map(|item| (item.id.clone(), item))
        .collect();
    let mut ordered = Vec::with_capacity(ordered_ids.len());
    for id in ordered_ids {
        if let Some(item) = by_id.remove(&id) {
            ordered.push(item);
        }
    }
    Ok(ordered)
}

/// Load and order in one step.
pub fn schedule(path: &Path, rule: SequenceRule) -> Result<Vec<WorkItem>, PlanError> {
    order_items(collect_items(path, rule)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn item(id: &str, deps: &[&str]) -> WorkItem {
        serde_json::from_value(json!({"id": id, "deps": deps})).unwrap()
    }

    fn ids(items: &[WorkItem]) -> Vec<&str> {
        items.iter().map(|item| item.id.as_str()).collect()
    }

    #[test]
    fn orders_dependencies_before_dependents() {
        let items = vec![
            item("T-001", &[]),
            item("T-002", &["T-001"]),
            item("T-003", &["T-002"]),
        ];
        let ordered = order_items(items).unwrap();
        assert_eq!(ids(&ordered), vec!["T-001", "T-002", "T-003"]);
    }

    #[test]
    fn breaks_ties_by_ascending_id() {
        // All three are immediately eligible; the heap must emit them in id
        // order regardless of manifest order.
        let items = vec![item("T-003", &[]), item("T-001", &[]), item("T-002", &[])];
        let ordered = order_items(items).unwrap();
        assert_eq!(ids(&ordered), vec!["T-001", "T-002", "T-003"]);
    }

    #[test]
    fn order_is_deterministic_across_calls() {
        let build = || {
            vec![
                item("T-001", &[]),
                item("T-002", &["T-001"]),
                item("T-003", &["T-001"]),
                item("T-004", &["T-002", "T-003"]),
            ]
        };
        let first = order_items(build()).unwrap();
        let second = order_items(build()).unwrap();
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(ids(&first), vec!["T-001", "T-002", "T-003", "T-004"]);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let items = vec![item("T-001", &["T-099"])];
        let err = order_items(items).unwrap_err();
        match err {
            PlanError::UnknownDependency { item, dependency } => {
                assert_eq!(item, "T-001");
                assert_eq!(dependency, "T-099");
            }
            other => panic!("Expected UnknownDependency, got {other:?}"),
        }
    }

    #[test]
    fn cycle_is_rejected_with_unresolved_subset() {
        let items = vec![
            item("T-001", &["T-002"]),
            item("T-002", &["T-001"]),
            item("T-003", &[]),
        ];
        let err = order_items(items).unwrap_err();
        match err {
            PlanError::Cycle { unresolved } => {
                assert_eq!(unresolved, vec!["T-001".to_string(), "T-002".to_string()]);
            }
            other => panic!("Expected Cycle, got {other:?}"),
        }
    }

    #[test]
    fn missing_manifest_is_an_empty_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let items = collect_items(&dir.path().join("backlog.json"), SequenceRule::Chronological)
            .unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn invalid_json_is_a_manifest_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backlog.json");
        fs::write(&path, "{not json").unwrap();
        let err = collect_items(&path, SequenceRule::Chronological).unwrap_err();
        assert!(matches!(err, PlanError::Manifest { .. }));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backlog.json");
        let manifest = json!({"tasks": [{"id": "T-001"}, {"id": "T-001"}]});
        fs::write(&path, manifest.to_string()).unwrap();
        let err = collect_items(&path, SequenceRule::Chronological).unwrap_err();
        match err {
            PlanError::DuplicateId { id } => assert_eq!(id, "T-001"),
            other => panic!("Expected DuplicateId, got {other:?}"),
        }
    }

    #[test]
    fn sequence_gap_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backlog.json");
        let manifest = json!({"tasks": [{"id": "T-001"}, {"id": "T-003"}]});
        fs::write(&path, manifest.to_string()).unwrap();
        let err = collect_items(&path, SequenceRule::Chronological).unwrap_err();
        match err {
            PlanError::OutOfSequence { expected, found } => {
                assert_eq!(expected, "T-001, T-002");
                assert_eq!(found, "T-001, T-003");
            }
            other => panic!("Expected OutOfSequence, got {other:?}"),
        }
    }

    #[test]
    fn free_rule_accepts_arbitrary_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backlog.json");
        let manifest = json!({"tasks": [{"id": "setup"}, {"id": "deploy", "deps": ["setup"]}]});
        fs::write(&path, manifest.to_string()).unwrap();
        let ordered = schedule(&path, SequenceRule::Free).unwrap();
        assert_eq!(ids(&ordered), vec!["setup", "deploy"]);
    }

    #[test]
    fn schedule_reads_and_orders_a_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backlog.json");
        let manifest = json!({
            "version": 1,
            "tasks": [
                {"id": "T-001", "title": "scaffold", "owner": "Module Dev"},
                {"id": "T-002", "title": "api", "deps": ["T-001"]},
                {"id": "T-003", "title": "docs", "deps": ["T-001"], "owner": "doc_writer"}
            ]
        });
        fs::write(&path, serde_json::to_string_pretty(&manifest).unwrap()).unwrap();
        let ordered = schedule(&path, SequenceRule::Chronological).unwrap();
        assert_eq!(ids(&ordered), vec!["T-001", "T-002", "T-003"]);
        assert_eq!(ordered[0].raw["title"], "scaffold");
    }
}
