//! One-way rendering of the human-readable status label.
//!
//! The label is derived from the structured records on every write and is
//! never parsed back.

use crate::cycle::{self, CycleState, BLOCKED_LABEL};
use crate::item::{OperationRecord, WorkItem};
use crate::state_machine::{DurableState, InspectionState};

/// Renders the label for `item`, most advanced stage first.
#[must_use]
pub fn render_status_label(item: &WorkItem) -> String {
    if item.inspection.cycle == CycleState::Blocked {
        return BLOCKED_LABEL.to_string();
    }
    match item.inspection.state {
        InspectionState::Approved => return cycle::reset().to_string(),
        InspectionState::Rejected => {
            return cycle::build_rejected_label(item.inspection.cycle.cycle())
        }
        InspectionState::Pending => {}
    }

    let occupant = item.occupant.as_ref().map(|o| o.label.as_str());
    if let Some(label) = durable_label("WELDING", &item.welding, occupant) {
        return label;
    }
    if let Some(label) = durable_label("ASSEMBLY", &item.assembly, occupant) {
        return label;
    }
    "PENDING".to_string()
}

fn durable_label(name: &str, record: &OperationRecord, occupant: Option<&str>) -> Option<String> {
    match record.state {
        DurableState::Pending => None,
        DurableState::InProgress => Some(match occupant {
            Some(who) => format!("{name} in progress - {who}"),
            None => format!("{name} in progress"),
        }),
        DurableState::Paused => Some(format!("{name} paused")),
        DurableState::Completed => Some(format!("{name} completed")),
    }
}
