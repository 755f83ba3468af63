//! Lifecycle handlers for durable operations and the instant inspection.
//!
//! Every handler runs the same pipeline:
//!
//! 1. [`guard::prepare`] loads the item, retrying transient read errors.
//! 2. The transition table decides whether the event is legal.
//! 3. The eligibility chain for `(operation, action)` is evaluated.
//! 4. The occupation lock is acquired, or the caller's hold verified.
//! 5. A freshly acquired lock is followed by a second read, and steps 2 and 3
//!    are repeated on it. A refusal at this point gives the lock back.
//! 6. One batched write carries every changed field plus the re-rendered label.
//! 7. Side channels are notified, best effort.
//!
//! A failure during step 6 leaves the lock held. The write may have committed
//! even when it reported an error, and no third party may act on the item
//! until the holder retries or the lock expires.

use std::sync::Arc;

use serde::Serialize;
use spoolflow_core::{
    render_status_label, transition, ActionType, ApplyError, ClockSource, CycleState,
    DurableEvent, DurableMachine, DurableOperation, DurableState, Error, FieldValue,
    FilterRegistry, FilterReport, InspectionEvent, InspectionMachine, InspectionState, ItemField,
    ItemId, Occupant, OperationKind, Result, UpdateBatch, WorkItem, Worker,
};
use tracing::{debug, field, info, info_span, warn, Instrument, Span};

use super::events::{EventKind, OperationEvent};
use super::guard::{self, ActionContext};
use crate::lock::{LockOwner, LockService, LockToken};
use crate::rate::{CallKind, RateLimitMonitor};
use crate::traits::{
    EventPublisher, ItemRepository, MetadataLogger, NullEventPublisher, NullMetadataLogger,
};
use crate::config::VersionDetectorConfig;
use crate::version::{VersionDetector, VersionInfo};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of a durable transition.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub item_id: ItemId,
    pub operation: DurableOperation,
    pub from: DurableState,
    pub to: DurableState,
    /// Held lock after take/resume. `None` after pause/complete.
    #[serde(skip)]
    pub token: Option<LockToken>,
    pub status_label: String,
    pub version: VersionInfo,
    /// The action had already been applied for this worker; nothing was written.
    pub replayed: bool,
}

/// Result of an inspection.
#[derive(Debug, Clone, Serialize)]
pub struct InspectionOutcome {
    pub item_id: ItemId,
    pub state: InspectionState,
    pub cycle: CycleState,
    pub status_label: String,
    pub version: VersionInfo,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct OperationService {
    items: Arc<dyn ItemRepository>,
    versions: VersionDetector,
    locks: Arc<LockService>,
    filters: FilterRegistry,
    rate: Arc<RateLimitMonitor>,
    metadata: Arc<dyn MetadataLogger>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn ClockSource>,
}

impl OperationService {
    /// Service with the standard eligibility rules and silent side channels.
    #[must_use]
    pub fn new(
        items: Arc<dyn ItemRepository>,
        locks: Arc<LockService>,
        rate: Arc<RateLimitMonitor>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            versions: VersionDetector::new(items.clone(), VersionDetectorConfig::default()),
            items,
            locks,
            filters: FilterRegistry::standard(),
            rate,
            metadata: Arc::new(NullMetadataLogger),
            events: Arc::new(NullEventPublisher),
            clock,
        }
    }

    /// Retry policy of every item read the lifecycle makes.
    #[must_use]
    pub fn with_version_config(mut self, config: VersionDetectorConfig) -> Self {
        self.versions = VersionDetector::new(self.items.clone(), config);
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: FilterRegistry) -> Self {
        self.filters = filters;
        self
    }

    #[must_use]
    pub fn with_metadata_logger(mut self, metadata: Arc<dyn MetadataLogger>) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    /// Starts `operation` on `item_id` for `worker`.
    ///
    /// Repeating a take that already succeeded for the same worker returns the
    /// held lock instead of failing.
    ///
    /// # Errors
    ///
    /// Transition, eligibility, lock and store errors of the taxonomy.
    pub async fn take(
        &self,
        item_id: &ItemId,
        operation: DurableOperation,
        worker: &Worker,
    ) -> Result<TransitionOutcome> {
        let span = action_span(item_id, operation.kind(), ActionType::Take, worker);
        traced(self.durable(item_id, operation, worker, DurableEvent::Take))
            .instrument(span)
            .await
    }

    /// Suspends `operation`, releasing the lock and keeping partial progress.
    ///
    /// # Errors
    ///
    /// `NotAuthorized` if `worker` does not hold the item, plus transition,
    /// eligibility and store errors.
    pub async fn pause(
        &self,
        item_id: &ItemId,
        operation: DurableOperation,
        worker: &Worker,
    ) -> Result<TransitionOutcome> {
        let span = action_span(item_id, operation.kind(), ActionType::Pause, worker);
        traced(self.durable(item_id, operation, worker, DurableEvent::Pause))
            .instrument(span)
            .await
    }

    /// Picks a paused operation back up, re-acquiring the lock.
    ///
    /// # Errors
    ///
    /// Same as [`take`](Self::take).
    pub async fn resume(
        &self,
        item_id: &ItemId,
        operation: DurableOperation,
        worker: &Worker,
    ) -> Result<TransitionOutcome> {
        let span = action_span(item_id, operation.kind(), ActionType::Resume, worker);
        traced(self.durable(item_id, operation, worker, DurableEvent::Resume))
            .instrument(span)
            .await
    }

    /// Finishes `operation`, stamping completion and releasing the lock.
    ///
    /// # Errors
    ///
    /// Same as [`pause`](Self::pause).
    pub async fn complete(
        &self,
        item_id: &ItemId,
        operation: DurableOperation,
        worker: &Worker,
    ) -> Result<TransitionOutcome> {
        let span = action_span(item_id, operation.kind(), ActionType::Complete, worker);
        traced(self.durable(item_id, operation, worker, DurableEvent::Complete))
            .instrument(span)
            .await
    }

    /// Records a passed inspection; ends any rejection streak.
    ///
    /// # Errors
    ///
    /// `AlreadyCompleted` if the item was already inspected, `Blocked` if it
    /// is blocked, plus eligibility, lock and store errors.
    pub async fn approve(&self, item_id: &ItemId, worker: &Worker) -> Result<InspectionOutcome> {
        let span = action_span(item_id, OperationKind::Inspection, ActionType::Inspect, worker);
        traced(self.inspect(item_id, worker, InspectionEvent::Approve))
            .instrument(span)
            .await
    }

    /// Records a failed inspection and advances the rejection cycle.
    ///
    /// # Errors
    ///
    /// `Blocked` once the cycle limit is reached, otherwise as
    /// [`approve`](Self::approve).
    pub async fn reject(&self, item_id: &ItemId, worker: &Worker) -> Result<InspectionOutcome> {
        let span = action_span(item_id, OperationKind::Inspection, ActionType::Inspect, worker);
        traced(self.inspect(item_id, worker, InspectionEvent::Reject))
            .instrument(span)
            .await
    }

    /// Evaluates every filter of the chain against the current item.
    ///
    /// # Errors
    ///
    /// Lookup errors only.
    pub async fn diagnose(
        &self,
        item_id: &ItemId,
        operation: OperationKind,
        action: ActionType,
    ) -> Result<Vec<FilterReport>> {
        let item = self
            .versions
            .fetch(item_id)
            .await
            .map_err(|e| Error::from_store(item_id, e))?;
        self.rate.record(CallKind::Read);
        Ok(self.filters.describe(operation, action, &item))
    }

    // -----------------------------------------------------------------------
    // Durable pipeline
    // -----------------------------------------------------------------------

    async fn durable(
        &self,
        item_id: &ItemId,
        operation: DurableOperation,
        worker: &Worker,
        event: DurableEvent,
    ) -> Result<TransitionOutcome> {
        let mut ctx = self.prepare(item_id, worker).await?;
        let kind = operation.kind();
        let acquires = matches!(event, DurableEvent::Take | DurableEvent::Resume);

        if acquires {
            if let Some(outcome) = self.replay(&ctx, operation).await? {
                return Ok(outcome);
            }
        }

        let (mut from, mut to) = self.check_durable(&ctx.item, operation, event)?;

        let (token, held) = if acquires {
            let token = self.acquire(item_id, kind, worker).await?;
            let rechecked = self
                .reload(&mut ctx)
                .await
                .and_then(|()| self.check_durable(&ctx.item, operation, event));
            match rechecked {
                Ok(states) => {
                    (from, to) = states;
                }
                Err(err) => {
                    self.abandon(&token).await;
                    return Err(err);
                }
            }
            (Some(token), None)
        } else {
            (None, self.authorize(&ctx.item, kind, worker).await?)
        };

        let batch = durable_batch(&ctx, operation, event, to);
        let status_label = self.commit(&ctx, batch).await?;

        if let Some(owner) = held {
            self.release_after_write(item_id, worker, &owner).await;
        }

        info!(from = %from, to = %to, "transition committed");
        self.announce(OperationEvent::new(
            event_kind(event),
            item_id,
            kind,
            worker,
            from,
            to,
            &status_label,
            ctx.now,
        ))
        .await;

        Ok(TransitionOutcome {
            item_id: item_id.clone(),
            operation,
            from,
            to,
            token,
            status_label,
            version: ctx.version,
            replayed: false,
        })
    }

    /// Transition and eligibility checks of a durable event against `item`.
    fn check_durable(
        &self,
        item: &WorkItem,
        operation: DurableOperation,
        event: DurableEvent,
    ) -> Result<(DurableState, DurableState)> {
        let kind = operation.kind();
        let from = item.operation(operation).state;
        let to = transition::<DurableMachine>(from, event).map_err(|e| e.into_error(&item.id, kind))?;
        if let Some(failure) = self.filters.first_failure(kind, action_of(event), item) {
            return Err(failure.into_error(item, kind));
        }
        Ok((from, to))
    }

    /// Detects a take/resume that already committed for this worker, e.g.
    /// when the caller retries after an unknown outcome.
    async fn replay(
        &self,
        ctx: &ActionContext,
        operation: DurableOperation,
    ) -> Result<Option<TransitionOutcome>> {
        let record = ctx.item.operation(operation);
        let occupied_by_caller = ctx
            .item
            .occupant
            .as_ref()
            .is_some_and(|o| o.worker_id == ctx.worker.id);
        if record.state != DurableState::InProgress || !occupied_by_caller {
            return Ok(None);
        }
        let Some(owner) = self.locks.get_owner(ctx.item_id()).await? else {
            return Ok(None);
        };
        if owner.worker_id != ctx.worker.id {
            return Ok(None);
        }
        info!("action already applied for this worker, reusing held lock");
        Ok(Some(TransitionOutcome {
            item_id: ctx.item_id().clone(),
            operation,
            from: DurableState::InProgress,
            to: DurableState::InProgress,
            token: Some(owner.into_token(ctx.item_id())),
            status_label: ctx.item.status_label.clone(),
            version: ctx.version.clone(),
            replayed: true,
        }))
    }

    /// Acquires the lock; a lock already held by the same worker is reused.
    async fn acquire(
        &self,
        item_id: &ItemId,
        operation: OperationKind,
        worker: &Worker,
    ) -> Result<LockToken> {
        match self.locks.acquire(item_id, worker).await {
            Err(Error::AlreadyOccupied { owner_id, .. }) if owner_id == worker.id => {
                match self.locks.get_owner(item_id).await? {
                    Some(owner) if owner.worker_id == worker.id => {
                        info!("lock already held by caller, reusing");
                        Ok(owner.into_token(item_id))
                    }
                    _ => Err(Error::TransientStoreError {
                        item_id: item_id.clone(),
                        reason: "lock changed hands during acquisition".into(),
                    }),
                }
            }
            other => other.map_err(|e| e.with_operation(operation)),
        }
    }

    /// Only the current holder may pause or complete.
    ///
    /// Returns the live lock to release afterwards, or `None` when the lock
    /// has already expired and the item occupant vouched for the caller.
    async fn authorize(
        &self,
        item: &WorkItem,
        operation: OperationKind,
        worker: &Worker,
    ) -> Result<Option<LockOwner>> {
        let denied = |holder| Error::NotAuthorized {
            item_id: item.id.clone(),
            operation,
            worker_id: worker.id,
            holder,
        };
        match self.locks.get_owner(&item.id).await? {
            Some(owner) if owner.worker_id == worker.id => Ok(Some(owner)),
            Some(owner) => Err(denied(Some(owner.worker_id))),
            None => match &item.occupant {
                Some(occupant) if occupant.worker_id == worker.id => {
                    warn!("lock expired, authorizing from item occupant");
                    Ok(None)
                }
                occupant => Err(denied(occupant.as_ref().map(|o| o.worker_id))),
            },
        }
    }

    /// The item is already updated; a failed release is logged, not surfaced.
    async fn release_after_write(&self, item_id: &ItemId, worker: &Worker, owner: &LockOwner) {
        match self.locks.release(item_id, worker.id, &owner.token).await {
            Ok(true) => {}
            Ok(false) => warn!("lock changed hands before release"),
            Err(err) => warn!(error = %err, "lock release failed after committed write"),
        }
    }

    // -----------------------------------------------------------------------
    // Inspection pipeline
    // -----------------------------------------------------------------------

    async fn inspect(
        &self,
        item_id: &ItemId,
        worker: &Worker,
        event: InspectionEvent,
    ) -> Result<InspectionOutcome> {
        let kind = OperationKind::Inspection;
        let mut ctx = self.prepare(item_id, worker).await?;
        self.check_inspection(&ctx.item, event)?;

        let ttl = self.locks.config().inspection_ttl;
        let token = self
            .locks
            .acquire_for(item_id, worker, ttl)
            .await
            .map_err(|e| e.with_operation(kind))?;
        let rechecked = self
            .reload(&mut ctx)
            .await
            .and_then(|()| self.check_inspection(&ctx.item, event));
        let (from, to, cycle) = match rechecked {
            Ok(checked) => checked,
            Err(err) => {
                self.abandon(&token).await;
                return Err(err);
            }
        };

        let batch = UpdateBatch::new()
            .set(ItemField::InspectionState, FieldValue::Inspection(to))
            .set(ItemField::InspectionCycle, FieldValue::Cycle(cycle))
            .set(ItemField::InspectedAt, FieldValue::Millis(ctx.now))
            .set(ItemField::InspectedBy, FieldValue::Worker(worker.id));
        let status_label = self.commit(&ctx, batch).await?;

        match self.locks.release(item_id, worker.id, token.as_str()).await {
            Ok(true) => {}
            Ok(false) => warn!("inspection lock expired before release"),
            Err(err) => warn!(error = %err, "inspection lock release failed"),
        }

        if cycle.is_blocked() {
            warn!(cycle = cycle.cycle(), "item blocked after repeated rejections");
        }
        info!(from = %from, to = %to, cycle = %cycle, "inspection committed");
        let kind_of_event = match event {
            InspectionEvent::Approve => EventKind::Approved,
            InspectionEvent::Reject => EventKind::Rejected,
        };
        self.announce(
            OperationEvent::new(
                kind_of_event,
                item_id,
                kind,
                worker,
                from,
                to,
                &status_label,
                ctx.now,
            )
            .with_cycle(cycle.cycle()),
        )
        .await;

        Ok(InspectionOutcome {
            item_id: item_id.clone(),
            state: to,
            cycle,
            status_label,
            version: ctx.version,
        })
    }

    /// Blocking, transition and eligibility checks of an inspection against
    /// `item`. Returns the states and the cycle the inspection would write.
    fn check_inspection(
        &self,
        item: &WorkItem,
        event: InspectionEvent,
    ) -> Result<(InspectionState, InspectionState, CycleState)> {
        let kind = OperationKind::Inspection;
        let record = &item.inspection;
        if record.cycle.is_blocked() {
            return Err(Error::Blocked {
                item_id: item.id.clone(),
                cycle: record.cycle.cycle(),
            });
        }
        let from = record.state;
        let to = transition::<InspectionMachine>(from, event)
            .map_err(|e| e.into_error(&item.id, kind))?;
        if let Some(failure) = self.filters.first_failure(kind, ActionType::Inspect, item) {
            return Err(failure.into_error(item, kind));
        }
        let cycle = match event {
            InspectionEvent::Approve => record.cycle.after_approval(),
            InspectionEvent::Reject => record.cycle.after_rejection().unwrap_or(CycleState::Blocked),
        };
        Ok((from, to, cycle))
    }

    // -----------------------------------------------------------------------
    // Shared steps
    // -----------------------------------------------------------------------

    async fn prepare(&self, item_id: &ItemId, worker: &Worker) -> Result<ActionContext> {
        let ctx = guard::prepare(&self.versions, item_id, worker, self.clock.now()).await?;
        self.rate.record(CallKind::Read);
        Ok(ctx)
    }

    /// Second read once the lock is held. Another worker may have moved the
    /// item between the first read and the acquisition.
    async fn reload(&self, ctx: &mut ActionContext) -> Result<()> {
        let item = self
            .versions
            .fetch(ctx.item_id())
            .await
            .map_err(|e| Error::from_store(ctx.item_id(), e))?;
        self.rate.record(CallKind::Read);
        ctx.refresh(item);
        Ok(())
    }

    /// Gives back a lock taken for an action refused on the second read.
    async fn abandon(&self, token: &LockToken) {
        match self
            .locks
            .release(&token.item_id, token.owner, token.as_str())
            .await
        {
            Ok(true) => debug!("lock given back after refused action"),
            Ok(false) => warn!("lock changed hands before it could be given back"),
            Err(err) => warn!(error = %err, "could not give back lock after refused action"),
        }
    }

    /// Appends the rendered label and sends the batch in one round trip.
    /// Returns the label that was written.
    async fn commit(&self, ctx: &ActionContext, batch: UpdateBatch) -> Result<String> {
        let item_id = ctx.item_id();
        let projected = batch
            .project(&ctx.item)
            .map_err(|e| rejected_write(item_id, &e))?;
        let status_label = render_status_label(&projected);
        let batch = batch.label(status_label.clone());

        self.rate.warn_if_over_target();
        let ack = self
            .items
            .batch_update_fields(item_id, batch.updates())
            .await
            .map_err(|e| {
                warn!(error = %e, "batched write failed; lock stays with the caller");
                Error::from_store(item_id, e)
            })?;
        self.rate.record(CallKind::BatchWrite);
        if self.rate.burst_detected() {
            warn!("burst of backing store writes detected");
        }
        debug!(fields = ack.fields_written, "batched write acknowledged");
        Ok(status_label)
    }

    async fn announce(&self, event: OperationEvent) {
        if let Err(err) = self.events.publish(&event).await {
            warn!(error = %err, "event publish failed");
        }
        if let Err(err) = self.metadata.append(&event.to_metadata()).await {
            warn!(error = %err, "metadata append failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn action_span(item_id: &ItemId, operation: OperationKind, action: ActionType, worker: &Worker) -> Span {
    info_span!(
        "lifecycle",
        item_id = %item_id,
        operation = %operation,
        action = %action,
        worker_id = %worker.id,
        outcome = field::Empty,
    )
}

/// Records the outcome on the current span.
async fn traced<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    let result = fut.await;
    let outcome = match &result {
        Ok(_) => "ok",
        Err(err) => err.code(),
    };
    Span::current().record("outcome", outcome);
    result
}

fn action_of(event: DurableEvent) -> ActionType {
    match event {
        DurableEvent::Take => ActionType::Take,
        DurableEvent::Pause => ActionType::Pause,
        DurableEvent::Resume => ActionType::Resume,
        DurableEvent::Complete => ActionType::Complete,
    }
}

fn event_kind(event: DurableEvent) -> EventKind {
    match event {
        DurableEvent::Take => EventKind::Taken,
        DurableEvent::Pause => EventKind::Paused,
        DurableEvent::Resume => EventKind::Resumed,
        DurableEvent::Complete => EventKind::Completed,
    }
}

/// Field changes of one durable transition, label excluded.
fn durable_batch(
    ctx: &ActionContext,
    operation: DurableOperation,
    event: DurableEvent,
    to: DurableState,
) -> UpdateBatch {
    let worker = &ctx.worker;
    let batch = UpdateBatch::new().set(ItemField::State(operation), FieldValue::Durable(to));
    match event {
        DurableEvent::Take => batch
            .set(ItemField::StartedAt(operation), FieldValue::Millis(ctx.now))
            .set(ItemField::StartedBy(operation), FieldValue::Worker(worker.id))
            .occupant(Some(Occupant::from(worker))),
        DurableEvent::Resume => batch.occupant(Some(Occupant::from(worker))),
        DurableEvent::Pause => batch.occupant(None),
        DurableEvent::Complete => batch
            .set(ItemField::CompletedAt(operation), FieldValue::Millis(ctx.now))
            .set(ItemField::CompletedBy(operation), FieldValue::Worker(worker.id))
            .occupant(None),
    }
}

/// A batch that does not fit the item is refused the way the store would.
fn rejected_write(item_id: &ItemId, err: &ApplyError) -> Error {
    Error::StoreUnavailable {
        item_id: item_id.clone(),
        reason: format!("rejected write: {err}"),
    }
}
