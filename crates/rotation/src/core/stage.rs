use super::VersionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stage label: a named pointer to one version of a secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    /// The credential consumers use right now
    Current,
    /// The credential an in-flight rotation is introducing
    Pending,
    /// The credential that was current before the last promotion
    Previous,
}

impl Stage {
    /// All stages in display order
    pub const ALL: [Stage; 3] = [Stage::Current, Stage::Pending, Stage::Previous];

    /// Label as written in logs and outcome records
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Current => "CURRENT",
            Stage::Pending => "PENDING",
            Stage::Previous => "PREVIOUS",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of stage → version assignments for one secret
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMap(BTreeMap<Stage, VersionId>);

impl StageMap {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Version holding `stage`, if any
    pub fn get(&self, stage: Stage) -> Option<&VersionId> {
        self.0.get(&stage)
    }

    /// Version holding CURRENT
    pub fn current(&self) -> Option<&VersionId> {
        self.get(Stage::Current)
    }

    /// Version holding PENDING
    pub fn pending(&self) -> Option<&VersionId> {
        self.get(Stage::Pending)
    }

    /// Version holding PREVIOUS
    pub fn previous(&self) -> Option<&VersionId> {
        self.get(Stage::Previous)
    }

    /// Point `stage` at `version`, returning the displaced holder
    pub fn set(&mut self, stage: Stage, version: VersionId) -> Option<VersionId> {
        self.0.insert(stage, version)
    }

    /// Remove `stage`, returning its holder
    pub fn clear(&mut self, stage: Stage) -> Option<VersionId> {
        self.0.remove(&stage)
    }

    /// Stages held by `version`
    pub fn stages_of(&self, version: &VersionId) -> Vec<Stage> {
        self.0
            .iter()
            .filter(|(_, v)| *v == version)
            .map(|(s, _)| *s)
            .collect()
    }

    /// Whether `version` holds any stage
    pub fn is_labeled(&self, version: &VersionId) -> bool {
        self.0.values().any(|v| v == version)
    }

    /// Iterate over assignments
    pub fn iter(&self) -> impl Iterator<Item = (Stage, &VersionId)> {
        self.0.iter().map(|(s, v)| (*s, v))
    }
}

impl FromIterator<(Stage, VersionId)> for StageMap {
    fn from_iter<T: IntoIterator<Item = (Stage, VersionId)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(id: &str) -> VersionId {
        VersionId::new(id).unwrap()
    }

    #[test]
    fn set_returns_displaced_version() {
        let mut map = StageMap::new();
        assert_eq!(map.set(Stage::Current, v("a")), None);
        assert_eq!(map.set(Stage::Current, v("b")), Some(v("a")));
        assert_eq!(map.current(), Some(&v("b")));
    }

    #[test]
    fn stages_of_lists_every_label() {
        let map: StageMap = [(Stage::Current, v("a")), (Stage::Pending, v("a"))]
            .into_iter()
            .collect();
        assert_eq!(map.stages_of(&v("a")), vec![Stage::Current, Stage::Pending]);
        assert!(!map.is_labeled(&v("b")));
    }

    #[test]
    fn stage_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Stage::Pending).unwrap(), "\"PENDING\"");
        assert_eq!(Stage::Previous.to_string(), "PREVIOUS");
    }
}
