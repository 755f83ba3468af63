//! Work-item snapshot and the batched field updates written back to it.
//!
//! The snapshot is owned by the external repository. Lifecycle code reads it
//! once per request and writes back a single [`UpdateBatch`] per transition.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cycle::CycleState;
use crate::state_machine::{DurableState, InspectionState};
use crate::types::{DurableOperation, ItemId, SchemaVersion, Worker, WorkerId};

/// Who currently occupies an item, as recorded on the item itself.
///
/// This is the field degraded mode reads when the lock store is unreachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupant {
    pub worker_id: WorkerId,
    pub label: String,
}

impl From<&Worker> for Occupant {
    fn from(worker: &Worker) -> Self {
        Self {
            worker_id: worker.id,
            label: worker.label.clone(),
        }
    }
}

/// Progress of one durable operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub state: DurableState,
    /// First start, kept across pause/resume.
    pub started_at: Option<u64>,
    pub started_by: Option<WorkerId>,
    pub completed_at: Option<u64>,
    pub completed_by: Option<WorkerId>,
}

/// Outcome of the instant inspection plus the rejection streak.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionRecord {
    pub state: InspectionState,
    pub cycle: CycleState,
    pub inspected_at: Option<u64>,
    pub inspected_by: Option<WorkerId>,
}

/// Snapshot of a tracked item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: ItemId,
    pub assembly: OperationRecord,
    pub welding: OperationRecord,
    pub inspection: InspectionRecord,
    pub occupant: Option<Occupant>,
    /// Rendered display label. Written on every transition, never read back.
    pub status_label: String,
    /// When material for the item was received; required before assembly.
    pub materials_received_at: Option<u64>,
    /// Schema discriminator: number of sub-unit records (0 on legacy items).
    pub sub_unit_count: u32,
    pub assembled_sub_units: u32,
    pub welded_sub_units: u32,
}

impl WorkItem {
    /// A fresh legacy item with materials already received.
    #[must_use]
    pub fn new(id: impl Into<ItemId>) -> Self {
        Self {
            id: id.into(),
            materials_received_at: Some(0),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn schema_version(&self) -> SchemaVersion {
        SchemaVersion::from_discriminator(self.sub_unit_count)
    }

    #[must_use]
    pub fn operation(&self, op: DurableOperation) -> &OperationRecord {
        match op {
            DurableOperation::Assembly => &self.assembly,
            DurableOperation::Welding => &self.welding,
        }
    }

    fn operation_mut(&mut self, op: DurableOperation) -> &mut OperationRecord {
        match op {
            DurableOperation::Assembly => &mut self.assembly,
            DurableOperation::Welding => &mut self.welding,
        }
    }

    /// Applies one field update.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] when the value does not fit the field.
    pub fn apply(&mut self, update: &FieldUpdate) -> Result<(), ApplyError> {
        let mismatch = || ApplyError {
            field: update.field,
            value: update.value.kind(),
        };
        match (update.field, &update.value) {
            (ItemField::Occupant, FieldValue::Empty) => self.occupant = None,
            (ItemField::Occupant, FieldValue::Occupant(o)) => self.occupant = Some(o.clone()),
            (ItemField::StatusLabel, FieldValue::Text(t)) => self.status_label.clone_from(t),
            (ItemField::State(op), FieldValue::Durable(s)) => self.operation_mut(op).state = *s,
            (ItemField::StartedAt(op), FieldValue::Millis(ms)) => {
                self.operation_mut(op).started_at = Some(*ms);
            }
            (ItemField::StartedBy(op), FieldValue::Worker(w)) => {
                self.operation_mut(op).started_by = Some(*w);
            }
            (ItemField::CompletedAt(op), FieldValue::Millis(ms)) => {
                self.operation_mut(op).completed_at = Some(*ms);
            }
            (ItemField::CompletedBy(op), FieldValue::Worker(w)) => {
                self.operation_mut(op).completed_by = Some(*w);
            }
            (ItemField::InspectionState, FieldValue::Inspection(s)) => self.inspection.state = *s,
            (ItemField::InspectionCycle, FieldValue::Cycle(c)) => self.inspection.cycle = *c,
            (ItemField::InspectedAt, FieldValue::Millis(ms)) => {
                self.inspection.inspected_at = Some(*ms);
            }
            (ItemField::InspectedBy, FieldValue::Worker(w)) => {
                self.inspection.inspected_by = Some(*w);
            }
            _ => return Err(mismatch()),
        }
        Ok(())
    }
}

/// Fields the lifecycle is allowed to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemField {
    Occupant,
    StatusLabel,
    State(DurableOperation),
    StartedAt(DurableOperation),
    StartedBy(DurableOperation),
    CompletedAt(DurableOperation),
    CompletedBy(DurableOperation),
    InspectionState,
    InspectionCycle,
    InspectedAt,
    InspectedBy,
}

impl fmt::Display for ItemField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Occupant => f.write_str("occupant"),
            Self::StatusLabel => f.write_str("status_label"),
            Self::State(op) => write!(f, "{op}.state"),
            Self::StartedAt(op) => write!(f, "{op}.started_at"),
            Self::StartedBy(op) => write!(f, "{op}.started_by"),
            Self::CompletedAt(op) => write!(f, "{op}.completed_at"),
            Self::CompletedBy(op) => write!(f, "{op}.completed_by"),
            Self::InspectionState => f.write_str("inspection.state"),
            Self::InspectionCycle => f.write_str("inspection.cycle"),
            Self::InspectedAt => f.write_str("inspection.inspected_at"),
            Self::InspectedBy => f.write_str("inspection.inspected_by"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum FieldValue {
    /// Clears the field.
    Empty,
    Text(String),
    Millis(u64),
    Worker(WorkerId),
    Occupant(Occupant),
    Durable(DurableState),
    Inspection(InspectionState),
    Cycle(CycleState),
}

impl FieldValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Text(_) => "text",
            Self::Millis(_) => "millis",
            Self::Worker(_) => "worker",
            Self::Occupant(_) => "occupant",
            Self::Durable(_) => "durable",
            Self::Inspection(_) => "inspection",
            Self::Cycle(_) => "cycle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub field: ItemField,
    pub value: FieldValue,
}

/// The value does not fit the targeted field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot write a {value} value into {field}")]
pub struct ApplyError {
    pub field: ItemField,
    pub value: &'static str,
}

/// Ordered list of field updates sent to the repository in one round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateBatch {
    updates: Vec<FieldUpdate>,
}

impl UpdateBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, field: ItemField, value: FieldValue) -> Self {
        self.updates.push(FieldUpdate { field, value });
        self
    }

    #[must_use]
    pub fn occupant(self, occupant: Option<Occupant>) -> Self {
        let value = occupant.map_or(FieldValue::Empty, FieldValue::Occupant);
        self.set(ItemField::Occupant, value)
    }

    #[must_use]
    pub fn label(self, label: impl Into<String>) -> Self {
        self.set(ItemField::StatusLabel, FieldValue::Text(label.into()))
    }

    #[must_use]
    pub fn updates(&self) -> &[FieldUpdate] {
        &self.updates
    }

    #[must_use]
    pub fn into_updates(self) -> Vec<FieldUpdate> {
        self.updates
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Applies every update to a copy of `item`, as the repository would.
    ///
    /// Used to compute the post-write snapshot without re-reading the store.
    ///
    /// # Errors
    ///
    /// Returns the first [`ApplyError`].
    pub fn project(&self, item: &WorkItem) -> Result<WorkItem, ApplyError> {
        let mut next = item.clone();
        for update in &self.updates {
            next.apply(update)?;
        }
        Ok(next)
    }
}
