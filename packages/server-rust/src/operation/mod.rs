//! Operation lifecycle: the handlers driving the transition tables, the
//! entry guard and the side-channel records.

pub mod events;
pub mod guard;
pub mod service;


pub use events::{EventKind, MetadataEntry, OperationEvent};
pub use guard::ActionContext;
pub use service::{InspectionOutcome, OperationService, TransitionOutcome};
