use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a tracked work item (the spool tag).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Numeric identifier of a shop-floor worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A worker acting on an item: stable id plus the display label shown to
/// other workers (e.g. `"MR(93)"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub label: String,
}

impl Worker {
    #[must_use]
    pub fn new(id: u32, label: impl Into<String>) -> Self {
        Self {
            id: WorkerId(id),
            label: label.into(),
        }
    }
}

/// Sequential fabrication operations an item moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Assembly,
    Welding,
    Inspection,
}

impl OperationKind {
    /// Durable operations span multiple requests and hold an occupation lock.
    #[must_use]
    pub fn is_durable(self) -> bool {
        matches!(self, Self::Assembly | Self::Welding)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assembly => "assembly",
            Self::Welding => "welding",
            Self::Inspection => "inspection",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The subset of operations driven by the durable state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurableOperation {
    Assembly,
    Welding,
}

impl DurableOperation {
    #[must_use]
    pub fn kind(self) -> OperationKind {
        match self {
            Self::Assembly => OperationKind::Assembly,
            Self::Welding => OperationKind::Welding,
        }
    }
}

impl fmt::Display for DurableOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind().fmt(f)
    }
}

/// Worker actions that are subject to eligibility rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Take,
    Pause,
    Resume,
    Complete,
    Inspect,
}

impl ActionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Take => "take",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Complete => "complete",
            Self::Inspect => "inspect",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work-item schema generation, distinguished by the sub-record count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaVersion {
    /// No sub-records; progress is tracked per operation only.
    Legacy,
    /// Progress is additionally tracked per sub-unit.
    Extended,
}

impl SchemaVersion {
    /// `Extended` when the discriminator is positive, otherwise `Legacy`.
    #[must_use]
    pub fn from_discriminator(sub_unit_count: u32) -> Self {
        if sub_unit_count > 0 {
            Self::Extended
        } else {
            Self::Legacy
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Extended => f.write_str("extended"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_version_follows_discriminator() {
        assert_eq!(SchemaVersion::from_discriminator(0), SchemaVersion::Legacy);
        assert_eq!(SchemaVersion::from_discriminator(1), SchemaVersion::Extended);
        assert_eq!(SchemaVersion::from_discriminator(12), SchemaVersion::Extended);
    }

    #[test]
    fn only_assembly_and_welding_are_durable() {
        assert!(OperationKind::Assembly.is_durable());
        assert!(OperationKind::Welding.is_durable());
        assert!(!OperationKind::Inspection.is_durable());
        assert_eq!(DurableOperation::Welding.kind(), OperationKind::Welding);
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&ItemId::new("TEST-02")).unwrap();
        assert_eq!(json, "\"TEST-02\"");
        let json = serde_json::to_string(&WorkerId(93)).unwrap();
        assert_eq!(json, "93");
    }
}
