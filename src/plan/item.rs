//! Work item records as authored in the backlog manifest.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One schedulable unit of work from the backlog manifest.
///
/// Items are immutable once execution begins; progress lives in the
/// completed-set and the conversation ledger, never on the item itself.
/// `raw` preserves the manifest entry verbatim so the executor prompt sees
/// exactly what the author wrote, including fields this struct ignores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub area: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub deps: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dod: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tests: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub artifacts: Vec<String>,
    #[serde(default = "default_estimate_points")]
    pub estimate_points: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(skip)]
    pub raw: Value,
}

fn default_estimate_points() -> u32 {
    1
}

/// Manifest authors sometimes write `null` where a list belongs; treat it
/// the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let value = Option::<T>::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

impl WorkItem {
    /// Lowercased id used for artifact directory and label names.
    pub fn slug(&self) -> String {
        self.id.to_lowercase()
    }

    /// Manifest entry as pretty JSON, for prompt interpolation.
    pub fn raw_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.raw).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_entry_with_defaults() {
        let item: WorkItem = serde_json::from_str(r#"{"id": "T-001"}"#).unwrap();
        assert_eq!(item.id, "T-001");
        assert_eq!(item.title, "");
        assert!(item.deps.is_empty());
        assert_eq!(item.estimate_points, 1);
    }

    #[test]
    fn tolerates_null_lists() {
        let item: WorkItem =
            serde_json::from_str(r#"{"id": "T-002", "deps": null, "tags": null}"#).unwrap();
        assert!(item.deps.is_empty());
        assert!(item.tags.is_empty());
    }

    #[test]
    fn rejects_entry_without_id() {
        let result = serde_json::from_str::<WorkItem>(r#"{"title": "no id"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn slug_lowercases_the_id() {
        let item: WorkItem = serde_json::from_str(r#"{"id": "T-010"}"#).unwrap();
        assert_eq!(item.slug(), "t-010");
    }
}
