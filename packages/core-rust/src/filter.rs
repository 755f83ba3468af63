//! Eligibility filter engine.
//!
//! A filter is a pure check over a [`WorkItem`] snapshot. The
//! [`FilterRegistry`] maps every `(operation, action)` pair to an ordered
//! chain and is the single place eligibility rules are declared. Filters that
//! behave differently on legacy and extended items branch on the schema
//! discriminator internally, so a new operation type needs one registry entry
//! and no filter changes.

use std::collections::HashMap;

use serde::Serialize;

use crate::cycle::MAX_CYCLES;
use crate::error::Error;
use crate::item::{OperationRecord, WorkItem};
use crate::state_machine::{DurableState, InspectionState};
use crate::types::{ActionType, OperationKind, SchemaVersion, WorkerId};

/// Outcome of one filter. Created per evaluation, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterResult {
    pub passed: bool,
    pub reason: String,
}

impl FilterResult {
    #[must_use]
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

/// What kind of rule a filter enforces; decides the typed error a failure
/// turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterCategory {
    /// Another worker holds the item.
    Occupancy,
    /// An upstream step is unfinished.
    Prerequisite,
    /// The item is in the wrong lifecycle state for the action.
    Lifecycle,
    /// The operation is already finished.
    Completion,
    /// The rejection limit was reached.
    Quality,
}

pub type FilterFn = fn(&WorkItem) -> FilterResult;

#[derive(Clone, Copy)]
pub struct Filter {
    pub name: &'static str,
    pub category: FilterCategory,
    check: FilterFn,
}

impl Filter {
    #[must_use]
    pub const fn new(name: &'static str, category: FilterCategory, check: FilterFn) -> Self {
        Self {
            name,
            category,
            check,
        }
    }

    #[must_use]
    pub fn evaluate(&self, item: &WorkItem) -> FilterResult {
        (self.check)(item)
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("name", &self.name)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

/// First failing filter of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterFailure {
    pub filter: &'static str,
    pub category: FilterCategory,
    pub reason: String,
}

impl FilterFailure {
    /// Converts the failure into the matching taxonomy error.
    #[must_use]
    pub fn into_error(self, item: &WorkItem, operation: OperationKind) -> Error {
        let item_id = item.id.clone();
        match self.category {
            FilterCategory::Occupancy => {
                let (owner_id, owner_label) = item.occupant.as_ref().map_or_else(
                    || (WorkerId(0), "unknown".to_string()),
                    |o| (o.worker_id, o.label.clone()),
                );
                Error::AlreadyOccupied {
                    item_id,
                    operation: Some(operation),
                    owner_id,
                    owner_label,
                }
            }
            FilterCategory::Prerequisite => Error::PrerequisitesNotSatisfied {
                item_id,
                operation,
                reason: self.reason,
            },
            FilterCategory::Lifecycle => Error::InvalidTransition {
                item_id,
                operation,
                from: self.reason,
                event: self.filter.to_string(),
            },
            FilterCategory::Completion => Error::AlreadyCompleted {
                item_id,
                operation,
                state: self.reason,
            },
            FilterCategory::Quality => Error::Blocked {
                item_id,
                cycle: item.inspection.cycle.cycle(),
            },
        }
    }
}

/// One line of a diagnostic walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterReport {
    pub filter: &'static str,
    pub category: FilterCategory,
    #[serde(flatten)]
    pub result: FilterResult,
}

/// `(operation, action) -> ordered filter chain`.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    chains: HashMap<(OperationKind, ActionType), Vec<Filter>>,
}

impl FilterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in shop-floor rules.
    #[must_use]
    pub fn standard() -> Self {
        use builtin::{
            ASSEMBLY_IN_PROGRESS, ASSEMBLY_NOT_COMPLETED, ASSEMBLY_NOT_STARTED, ASSEMBLY_PAUSED,
            ASSEMBLY_UNLOCKS_WELDING, INSPECTION_PENDING, MATERIALS_RECEIVED, NOT_BLOCKED,
            NOT_OCCUPIED, OCCUPIED, WELDING_IN_PROGRESS, WELDING_NOT_COMPLETED,
            WELDING_NOT_STARTED, WELDING_PAUSED, WELDING_READY_FOR_INSPECTION,
        };

        let mut registry = Self::new();
        registry.register(
            OperationKind::Assembly,
            ActionType::Take,
            vec![
                MATERIALS_RECEIVED,
                ASSEMBLY_NOT_COMPLETED,
                ASSEMBLY_NOT_STARTED,
                NOT_OCCUPIED,
            ],
        );
        registry.register(
            OperationKind::Assembly,
            ActionType::Resume,
            vec![ASSEMBLY_PAUSED, NOT_OCCUPIED],
        );
        registry.register(
            OperationKind::Assembly,
            ActionType::Pause,
            vec![ASSEMBLY_IN_PROGRESS, OCCUPIED],
        );
        registry.register(
            OperationKind::Assembly,
            ActionType::Complete,
            vec![ASSEMBLY_IN_PROGRESS, OCCUPIED],
        );
        registry.register(
            OperationKind::Welding,
            ActionType::Take,
            vec![
                ASSEMBLY_UNLOCKS_WELDING,
                WELDING_NOT_COMPLETED,
                WELDING_NOT_STARTED,
                NOT_OCCUPIED,
            ],
        );
        registry.register(
            OperationKind::Welding,
            ActionType::Resume,
            vec![WELDING_PAUSED, NOT_OCCUPIED],
        );
        registry.register(
            OperationKind::Welding,
            ActionType::Pause,
            vec![WELDING_IN_PROGRESS, OCCUPIED],
        );
        registry.register(
            OperationKind::Welding,
            ActionType::Complete,
            vec![WELDING_IN_PROGRESS, OCCUPIED],
        );
        registry.register(
            OperationKind::Inspection,
            ActionType::Inspect,
            vec![
                WELDING_READY_FOR_INSPECTION,
                NOT_BLOCKED,
                INSPECTION_PENDING,
                NOT_OCCUPIED,
            ],
        );
        registry
    }

    /// Sets (or replaces) the chain for `(operation, action)`.
    pub fn register(&mut self, operation: OperationKind, action: ActionType, filters: Vec<Filter>) {
        self.chains.insert((operation, action), filters);
    }

    /// The registered chain, empty when nothing is registered.
    #[must_use]
    pub fn chain(&self, operation: OperationKind, action: ActionType) -> &[Filter] {
        self.chains
            .get(&(operation, action))
            .map_or(&[], Vec::as_slice)
    }

    /// Stops at the first failing filter. An unregistered pair always fails.
    #[must_use]
    pub fn first_failure(
        &self,
        operation: OperationKind,
        action: ActionType,
        item: &WorkItem,
    ) -> Option<FilterFailure> {
        let Some(chain) = self.chains.get(&(operation, action)) else {
            return Some(FilterFailure {
                filter: "registered",
                category: FilterCategory::Prerequisite,
                reason: format!("no eligibility rules for {action} {operation}"),
            });
        };
        chain.iter().find_map(|filter| {
            let result = filter.evaluate(item);
            (!result.passed).then(|| FilterFailure {
                filter: filter.name,
                category: filter.category,
                reason: result.reason,
            })
        })
    }

    #[must_use]
    pub fn passes_all(&self, operation: OperationKind, action: ActionType, item: &WorkItem) -> bool {
        self.first_failure(operation, action, item).is_none()
    }

    /// Evaluates every filter of the chain, failing or not.
    #[must_use]
    pub fn describe(
        &self,
        operation: OperationKind,
        action: ActionType,
        item: &WorkItem,
    ) -> Vec<FilterReport> {
        self.chain(operation, action)
            .iter()
            .map(|filter| FilterReport {
                filter: filter.name,
                category: filter.category,
                result: filter.evaluate(item),
            })
            .collect()
    }

    /// Items that pass the whole chain, in input order.
    #[must_use]
    pub fn eligible<'a>(
        &self,
        operation: OperationKind,
        action: ActionType,
        items: &'a [WorkItem],
    ) -> Vec<&'a WorkItem> {
        items
            .iter()
            .filter(|item| self.passes_all(operation, action, item))
            .collect()
    }
}

/// Built-in filters.
pub mod builtin {
    use super::{
        DurableState, Filter, FilterCategory, FilterResult, InspectionState, OperationRecord,
        SchemaVersion, WorkItem, MAX_CYCLES,
    };

    pub const NOT_OCCUPIED: Filter =
        Filter::new("not_occupied", FilterCategory::Occupancy, not_occupied);
    pub const OCCUPIED: Filter = Filter::new("occupied", FilterCategory::Prerequisite, occupied);
    pub const MATERIALS_RECEIVED: Filter = Filter::new(
        "materials_received",
        FilterCategory::Prerequisite,
        materials_received,
    );

    pub const ASSEMBLY_NOT_COMPLETED: Filter = Filter::new(
        "assembly_not_completed",
        FilterCategory::Completion,
        assembly_not_completed,
    );
    pub const ASSEMBLY_NOT_STARTED: Filter = Filter::new(
        "assembly_not_started",
        FilterCategory::Lifecycle,
        assembly_not_started,
    );
    pub const ASSEMBLY_PAUSED: Filter = Filter::new(
        "assembly_paused",
        FilterCategory::Lifecycle,
        assembly_paused,
    );
    pub const ASSEMBLY_IN_PROGRESS: Filter = Filter::new(
        "assembly_in_progress",
        FilterCategory::Lifecycle,
        assembly_in_progress,
    );

    pub const WELDING_NOT_COMPLETED: Filter = Filter::new(
        "welding_not_completed",
        FilterCategory::Completion,
        welding_not_completed,
    );
    pub const WELDING_NOT_STARTED: Filter = Filter::new(
        "welding_not_started",
        FilterCategory::Lifecycle,
        welding_not_started,
    );
    pub const WELDING_PAUSED: Filter = Filter::new(
        "welding_paused",
        FilterCategory::Lifecycle,
        welding_paused,
    );
    pub const WELDING_IN_PROGRESS: Filter = Filter::new(
        "welding_in_progress",
        FilterCategory::Lifecycle,
        welding_in_progress,
    );

    pub const ASSEMBLY_UNLOCKS_WELDING: Filter = Filter::new(
        "assembly_unlocks_welding",
        FilterCategory::Prerequisite,
        assembly_unlocks_welding,
    );
    pub const WELDING_READY_FOR_INSPECTION: Filter = Filter::new(
        "welding_ready_for_inspection",
        FilterCategory::Prerequisite,
        welding_ready_for_inspection,
    );
    pub const NOT_BLOCKED: Filter = Filter::new("not_blocked", FilterCategory::Quality, not_blocked);
    pub const INSPECTION_PENDING: Filter = Filter::new(
        "inspection_pending",
        FilterCategory::Completion,
        inspection_pending,
    );

    fn not_occupied(item: &WorkItem) -> FilterResult {
        match &item.occupant {
            None => FilterResult::pass("free"),
            Some(o) => FilterResult::fail(format!("occupied by {}", o.label)),
        }
    }

    fn occupied(item: &WorkItem) -> FilterResult {
        match &item.occupant {
            Some(o) => FilterResult::pass(format!("held by {}", o.label)),
            None => FilterResult::fail("item is not occupied"),
        }
    }

    fn materials_received(item: &WorkItem) -> FilterResult {
        if item.materials_received_at.is_some() {
            FilterResult::pass("materials received")
        } else {
            FilterResult::fail("materials not received")
        }
    }

    fn assembly_not_completed(item: &WorkItem) -> FilterResult {
        not_completed(&item.assembly, "assembly")
    }

    fn assembly_not_started(item: &WorkItem) -> FilterResult {
        in_state(&item.assembly, "assembly", DurableState::Pending)
    }

    fn assembly_paused(item: &WorkItem) -> FilterResult {
        in_state(&item.assembly, "assembly", DurableState::Paused)
    }

    fn assembly_in_progress(item: &WorkItem) -> FilterResult {
        in_state(&item.assembly, "assembly", DurableState::InProgress)
    }

    fn welding_not_completed(item: &WorkItem) -> FilterResult {
        not_completed(&item.welding, "welding")
    }

    fn welding_not_started(item: &WorkItem) -> FilterResult {
        in_state(&item.welding, "welding", DurableState::Pending)
    }

    fn welding_paused(item: &WorkItem) -> FilterResult {
        in_state(&item.welding, "welding", DurableState::Paused)
    }

    fn welding_in_progress(item: &WorkItem) -> FilterResult {
        in_state(&item.welding, "welding", DurableState::InProgress)
    }

    fn not_completed(record: &OperationRecord, name: &str) -> FilterResult {
        if record.state == DurableState::Completed {
            FilterResult::fail("completed")
        } else {
            FilterResult::pass(format!("{name} is {}", record.state))
        }
    }

    fn in_state(record: &OperationRecord, name: &str, wanted: DurableState) -> FilterResult {
        if record.state == wanted {
            FilterResult::pass(format!("{name} is {wanted}"))
        } else {
            FilterResult::fail(record.state.to_string())
        }
    }

    /// Legacy items need assembly completed. Extended items unlock welding as
    /// soon as one sub-unit is assembled.
    // TODO: partial unlock differs from the full-completion rule used for
    // inspection; confirm with production planning before tightening it.
    fn assembly_unlocks_welding(item: &WorkItem) -> FilterResult {
        if item.assembly.state == DurableState::Completed {
            return FilterResult::pass("assembly completed");
        }
        match item.schema_version() {
            SchemaVersion::Legacy => FilterResult::fail("assembly not completed"),
            SchemaVersion::Extended if item.assembled_sub_units >= 1 => FilterResult::pass(format!(
                "{}/{} sub-units assembled",
                item.assembled_sub_units, item.sub_unit_count
            )),
            SchemaVersion::Extended => FilterResult::fail("no sub-unit assembled yet"),
        }
    }

    /// Inspection needs the whole item welded on both schemas.
    fn welding_ready_for_inspection(item: &WorkItem) -> FilterResult {
        if item.welding.state == DurableState::Completed {
            return FilterResult::pass("welding completed");
        }
        match item.schema_version() {
            SchemaVersion::Legacy => FilterResult::fail("welding not completed"),
            SchemaVersion::Extended if item.welded_sub_units >= item.sub_unit_count => {
                FilterResult::pass(format!(
                    "all {} sub-units welded",
                    item.sub_unit_count
                ))
            }
            SchemaVersion::Extended => FilterResult::fail(format!(
                "{}/{} sub-units welded",
                item.welded_sub_units, item.sub_unit_count
            )),
        }
    }

    fn not_blocked(item: &WorkItem) -> FilterResult {
        if item.inspection.cycle.is_blocked() {
            FilterResult::fail(format!("blocked after {MAX_CYCLES} rejections"))
        } else {
            FilterResult::pass(format!("cycle {}", item.inspection.cycle.cycle()))
        }
    }

    fn inspection_pending(item: &WorkItem) -> FilterResult {
        match item.inspection.state {
            InspectionState::Pending => FilterResult::pass("awaiting inspection"),
            state => FilterResult::fail(state.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::CycleState;
    use crate::item::Occupant;

    fn assembled_item() -> WorkItem {
        let mut item = WorkItem::new("TEST-01");
        item.assembly.state = DurableState::Completed;
        item
    }

    #[test]
    fn fresh_item_is_eligible_for_assembly_only() {
        let registry = FilterRegistry::standard();
        let item = WorkItem::new("TEST-01");

        assert!(registry.passes_all(OperationKind::Assembly, ActionType::Take, &item));
        assert!(!registry.passes_all(OperationKind::Welding, ActionType::Take, &item));
        assert!(!registry.passes_all(OperationKind::Inspection, ActionType::Inspect, &item));
    }

    #[test]
    fn first_failure_short_circuits_in_chain_order() {
        let registry = FilterRegistry::standard();
        let mut item = WorkItem::new("TEST-01");
        item.materials_received_at = None;
        item.occupant = Some(Occupant {
            worker_id: WorkerId(7),
            label: "JP(7)".into(),
        });

        let failure = registry
            .first_failure(OperationKind::Assembly, ActionType::Take, &item)
            .unwrap();
        assert_eq!(failure.filter, "materials_received");
        assert_eq!(failure.category, FilterCategory::Prerequisite);
    }

    #[test]
    fn describe_walks_every_filter() {
        let registry = FilterRegistry::standard();
        let mut item = WorkItem::new("TEST-01");
        item.materials_received_at = None;
        item.occupant = Some(Occupant {
            worker_id: WorkerId(7),
            label: "JP(7)".into(),
        });

        let report = registry.describe(OperationKind::Assembly, ActionType::Take, &item);
        assert_eq!(report.len(), 4);
        let failed: Vec<_> = report
            .iter()
            .filter(|r| !r.result.passed)
            .map(|r| r.filter)
            .collect();
        assert_eq!(failed, vec!["materials_received", "not_occupied"]);
    }

    #[test]
    fn legacy_welding_needs_full_assembly() {
        let registry = FilterRegistry::standard();
        let mut item = WorkItem::new("TEST-01");
        item.assembly.state = DurableState::Paused;
        assert!(!registry.passes_all(OperationKind::Welding, ActionType::Take, &item));

        assert!(registry.passes_all(OperationKind::Welding, ActionType::Take, &assembled_item()));
    }

    #[test]
    fn extended_welding_unlocks_after_one_sub_unit() {
        let registry = FilterRegistry::standard();
        let mut item = WorkItem::new("TEST-02");
        item.sub_unit_count = 4;
        item.assembly.state = DurableState::Paused;
        assert!(!registry.passes_all(OperationKind::Welding, ActionType::Take, &item));

        item.assembled_sub_units = 1;
        assert!(registry.passes_all(OperationKind::Welding, ActionType::Take, &item));
    }

    #[test]
    fn extended_inspection_needs_every_sub_unit_welded() {
        let registry = FilterRegistry::standard();
        let mut item = assembled_item();
        item.sub_unit_count = 3;
        item.welded_sub_units = 2;
        assert!(!registry.passes_all(OperationKind::Inspection, ActionType::Inspect, &item));

        item.welded_sub_units = 3;
        assert!(registry.passes_all(OperationKind::Inspection, ActionType::Inspect, &item));
    }

    #[test]
    fn blocked_item_fails_with_quality_category() {
        let registry = FilterRegistry::standard();
        let mut item = assembled_item();
        item.welding.state = DurableState::Completed;
        item.inspection.cycle = CycleState::Blocked;

        let failure = registry
            .first_failure(OperationKind::Inspection, ActionType::Inspect, &item)
            .unwrap();
        assert_eq!(failure.category, FilterCategory::Quality);
        assert!(matches!(
            failure.into_error(&item, OperationKind::Inspection),
            Error::Blocked { cycle: 3, .. }
        ));
    }

    #[test]
    fn occupancy_failure_names_the_owner() {
        let registry = FilterRegistry::standard();
        let mut item = WorkItem::new("TEST-01");
        item.occupant = Some(Occupant {
            worker_id: WorkerId(7),
            label: "JP(7)".into(),
        });
        let failure = registry
            .first_failure(OperationKind::Assembly, ActionType::Take, &item)
            .unwrap();
        match failure.into_error(&item, OperationKind::Assembly) {
            Error::AlreadyOccupied {
                operation,
                owner_id,
                owner_label,
                ..
            } => {
                assert_eq!(operation, Some(OperationKind::Assembly));
                assert_eq!(owner_id, WorkerId(7));
                assert_eq!(owner_label, "JP(7)");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn new_operation_needs_only_a_registry_entry() {
        let mut registry = FilterRegistry::new();
        let item = WorkItem::new("TEST-01");
        assert!(!registry.passes_all(OperationKind::Inspection, ActionType::Take, &item));

        registry.register(
            OperationKind::Inspection,
            ActionType::Take,
            vec![builtin::NOT_OCCUPIED],
        );
        assert!(registry.passes_all(OperationKind::Inspection, ActionType::Take, &item));
    }

    #[test]
    fn eligible_keeps_input_order() {
        let registry = FilterRegistry::standard();
        let mut busy = WorkItem::new("B");
        busy.occupant = Some(Occupant {
            worker_id: WorkerId(1),
            label: "A".into(),
        });
        let items = vec![WorkItem::new("A"), busy, WorkItem::new("C")];

        let ids: Vec<_> = registry
            .eligible(OperationKind::Assembly, ActionType::Take, &items)
            .into_iter()
            .map(|i| i.id.as_str())
            .collect();
        assert_eq!(ids, vec!["A", "C"]);
    }
}
