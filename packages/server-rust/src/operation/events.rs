//! Records emitted on the best-effort side channels after a committed
//! transition.

use serde::Serialize;
use serde_json::json;
use spoolflow_core::{ItemId, OperationKind, Worker, WorkerId};
use uuid::Uuid;

/// What happened to the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Taken,
    Paused,
    Resumed,
    Completed,
    Approved,
    Rejected,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Taken => "taken",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::Completed => "completed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// Change notification pushed to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationEvent {
    pub id: String,
    pub kind: EventKind,
    pub item_id: ItemId,
    pub operation: OperationKind,
    pub worker_id: WorkerId,
    pub worker_label: String,
    pub from_state: String,
    pub to_state: String,
    /// Rendered label after the transition.
    pub status_label: String,
    /// Rejection cycle after an inspection, absent for durable operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<u8>,
    pub occurred_at: u64,
}

impl OperationEvent {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: EventKind,
        item_id: &ItemId,
        operation: OperationKind,
        worker: &Worker,
        from_state: impl ToString,
        to_state: impl ToString,
        status_label: &str,
        occurred_at: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            item_id: item_id.clone(),
            operation,
            worker_id: worker.id,
            worker_label: worker.label.clone(),
            from_state: from_state.to_string(),
            to_state: to_state.to_string(),
            status_label: status_label.to_string(),
            cycle: None,
            occurred_at,
        }
    }

    #[must_use]
    pub fn with_cycle(mut self, cycle: u8) -> Self {
        self.cycle = Some(cycle);
        self
    }

    /// Audit-log entry describing the same transition.
    #[must_use]
    pub fn to_metadata(&self) -> MetadataEntry {
        let mut payload = json!({
            "from": self.from_state,
            "to": self.to_state,
            "status_label": self.status_label,
            "event_id": self.id,
        });
        if let Some(cycle) = self.cycle {
            payload["cycle"] = json!(cycle);
        }
        MetadataEntry {
            id: Uuid::new_v4().to_string(),
            item_id: self.item_id.clone(),
            event_type: format!("{}_{}", self.operation, self.kind.as_str()),
            operation: self.operation,
            worker_id: self.worker_id,
            worker_label: self.worker_label.clone(),
            timestamp: self.occurred_at,
            payload,
        }
    }
}

/// Append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataEntry {
    pub id: String,
    pub item_id: ItemId,
    /// `{operation}_{kind}`, e.g. `welding_paused`.
    pub event_type: String,
    pub operation: OperationKind,
    pub worker_id: WorkerId,
    pub worker_label: String,
    pub timestamp: u64,
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_mirrors_event() {
        let worker = Worker::new(93, "MR(93)");
        let event = OperationEvent::new(
            EventKind::Rejected,
            &ItemId::new("Y"),
            OperationKind::Inspection,
            &worker,
            "pending",
            "rejected",
            "REJECTED (cycle 1/3)",
            42,
        )
        .with_cycle(1);

        let entry = event.to_metadata();
        assert_eq!(entry.event_type, "inspection_rejected");
        assert_eq!(entry.payload["cycle"], 1);
        assert_eq!(entry.payload["event_id"], event.id.as_str());
        assert_ne!(entry.id, event.id);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "rejected");
        assert_eq!(json["worker_id"], 93);
    }

    #[test]
    fn durable_events_omit_cycle() {
        let event = OperationEvent::new(
            EventKind::Taken,
            &ItemId::new("X"),
            OperationKind::Assembly,
            &Worker::new(1, "A"),
            "pending",
            "in_progress",
            "ASSEMBLY in progress - A",
            0,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("cycle").is_none());
        assert!(event.to_metadata().payload.get("cycle").is_none());
    }
}
