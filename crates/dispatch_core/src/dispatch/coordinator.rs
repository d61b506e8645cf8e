use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use super::candidates::{rank_candidates, Candidate};
use super::{AfterTrip, Assignment};
use crate::config::DispatchConfig;
use crate::domain::{
    DriverId, DriverStatus, GeoPoint, Order, OrderId, OrderStatus, PassengerId, RideRequest,
};
use crate::error::{DispatchError, GeoIndexError, NotifyError, OrderStoreError};
use crate::eta::{fetch_etas, EtaBatchClient};
use crate::geo_index::{DriverFilter, GeoIndex};
use crate::orders::{DriverBinding, OrderRepository};
use crate::profile::{DriverProfileSource, DriverProfileStore, TripOutcome};
use crate::realtime::events::{OrderCancelledPayload, ServerEvent};
use crate::realtime::{DriverNotifier, LocationBroadcastRouter, RoomId};
use crate::telemetry::DispatchTelemetry;

/// Collaborators a coordinator is wired with.
#[derive(Clone)]
pub struct DispatchDeps {
    pub geo: Arc<dyn GeoIndex>,
    pub eta: Arc<dyn EtaBatchClient>,
    pub profiles: Arc<dyn DriverProfileSource>,
    pub orders: Arc<dyn OrderRepository>,
    pub notifier: Arc<dyn DriverNotifier>,
    pub router: Arc<LocationBroadcastRouter>,
    pub telemetry: Arc<DispatchTelemetry>,
}

/// Owns the order and driver state machines for dispatch.
///
/// Driver status is only ever changed through `GeoIndex::cas_status`, and
/// order status only through `OrderRepository::transition`. Every collaborator
/// call is bounded by the matching entry in [`DispatchConfig::timeouts`].
pub struct DispatchCoordinator {
    geo: Arc<dyn GeoIndex>,
    eta: Arc<dyn EtaBatchClient>,
    profiles: DriverProfileStore,
    orders: Arc<dyn OrderRepository>,
    notifier: Arc<dyn DriverNotifier>,
    router: Arc<LocationBroadcastRouter>,
    telemetry: Arc<DispatchTelemetry>,
    config: DispatchConfig,
}

async fn within<T, E, F, G>(deadline: Duration, on_timeout: G, call: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    G: FnOnce(u64) -> E,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(deadline.as_millis() as u64)),
    }
}

impl DispatchCoordinator {
    pub fn new(deps: DispatchDeps, config: DispatchConfig) -> Self {
        Self {
            geo: deps.geo,
            eta: deps.eta,
            profiles: DriverProfileStore::new(deps.profiles, config.timeouts.profile()),
            orders: deps.orders,
            notifier: deps.notifier,
            router: deps.router,
            telemetry: deps.telemetry,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<LocationBroadcastRouter> {
        &self.router
    }

    pub fn telemetry(&self) -> &Arc<DispatchTelemetry> {
        &self.telemetry
    }

    pub fn geo(&self) -> &Arc<dyn GeoIndex> {
        &self.geo
    }

    /// Persist a new PENDING order and subscribe the passenger's room to it.
    #[instrument(skip_all, fields(passenger_id = %request.passenger_id))]
    pub async fn create_order(&self, request: RideRequest) -> Result<Order, DispatchError> {
        if !request.pickup.is_valid() || !request.dropoff.is_valid() {
            return Err(DispatchError::InvalidRequest(
                "pickup and dropoff must be valid coordinates".to_string(),
            ));
        }
        if !request.surge_multiplier.is_finite() || request.surge_multiplier < 0.0 {
            return Err(DispatchError::InvalidRequest(format!(
                "surge multiplier {} must be a nonnegative number",
                request.surge_multiplier
            )));
        }
        let passenger_id = request.passenger_id;
        let order = within(
            self.config.timeouts.order_store(),
            OrderStoreError::Timeout,
            self.orders.insert(request),
        )
        .await?;
        self.router.subscribe(order.id, RoomId::Passenger(passenger_id));
        info!(order_id = %order.id, "order created");
        Ok(order)
    }

    pub async fn order(&self, order_id: OrderId) -> Result<Order, DispatchError> {
        Ok(within(
            self.config.timeouts.order_store(),
            OrderStoreError::Timeout,
            self.orders.get(order_id),
        )
        .await?)
    }

    /// Find, rank and claim a driver for `order_id`.
    ///
    /// Accepts orders in PENDING or NO_DRIVER_FOUND. Fails with
    /// `NoCandidatesFound`/`AllClaimsFailed` (order left in NO_DRIVER_FOUND)
    /// or `InfrastructureUnavailable` (order reverted to PENDING).
    #[instrument(skip_all, fields(order_id = %order_id))]
    pub async fn dispatch(&self, order_id: OrderId) -> Result<Assignment, DispatchError> {
        self.telemetry.record_dispatch();
        let order = self.order(order_id).await?;
        match order.status {
            OrderStatus::Cancelled => return Err(DispatchError::Cancelled(order_id)),
            status if !status.is_dispatchable() => {
                return Err(DispatchError::InvalidTransition {
                    order_id,
                    from: status,
                    to: OrderStatus::Dispatching,
                })
            }
            _ => {}
        }
        let order = match self
            .transition(order_id, order.status, OrderStatus::Dispatching, DriverBinding::Clear)
            .await
        {
            Ok(order) => order,
            Err(DispatchError::InvalidTransition {
                from: OrderStatus::Cancelled,
                ..
            }) => return Err(DispatchError::Cancelled(order_id)),
            Err(err) => return Err(err),
        };
        // A retry after NO_DRIVER_FOUND starts without a subscription.
        if self.router.subscription(order_id).is_none() {
            self.router
                .subscribe(order_id, RoomId::Passenger(order.passenger_id));
        }

        // 1. candidates
        let snapshots = match within(
            self.config.timeouts.geo_query(),
            GeoIndexError::Timeout,
            self.geo.query_radius(
                order.pickup,
                self.config.search_radius_km,
                DriverFilter::available(order.vehicle_type),
            ),
        )
        .await
        {
            Ok(snapshots) => snapshots,
            Err(err) => return Err(self.abort_attempt(order_id, err.into()).await),
        };
        if snapshots.is_empty() {
            return Err(self.no_driver(order_id, DispatchError::NoCandidatesFound).await);
        }

        // 2. ETA batch and profile lookups, concurrently
        let origins: Vec<GeoPoint> = snapshots.iter().map(|s| s.position).collect();
        let (etas, profiles) = tokio::join!(
            fetch_etas(
                self.eta.as_ref(),
                &origins,
                order.pickup,
                self.config.timeouts.eta()
            ),
            join_all(
                snapshots
                    .iter()
                    .map(|s| self.profiles.get_profile(s.driver_id))
            ),
        );

        // 3. score and rank
        let ranked = rank_candidates(&order, &snapshots, &etas, &profiles, &self.config);
        for degradation in &ranked.degradations {
            warn!(?degradation, "dispatch continuing with degraded data");
        }
        if ranked.candidates.is_empty() {
            return Err(self.no_driver(order_id, DispatchError::NoCandidatesFound).await);
        }
        debug!(candidates = ranked.candidates.len(), "candidates ranked");

        // 4. claim in rank order
        let mut lost = 0usize;
        let mut winner: Option<&Candidate> = None;
        for candidate in &ranked.candidates {
            match self
                .cas_driver(candidate.driver_id, DriverStatus::Available, DriverStatus::PickingUp)
                .await
            {
                Ok(true) => {
                    winner = Some(candidate);
                    break;
                }
                Ok(false) => {
                    lost += 1;
                    debug!(driver_id = %candidate.driver_id, "claim lost, trying next candidate");
                }
                Err(err) => {
                    // A timed-out CAS may have applied; the driver is left as is.
                    self.telemetry.record_lost_claims(lost as u64);
                    return Err(self.abort_attempt(order_id, err.into()).await);
                }
            }
        }
        self.telemetry.record_lost_claims(lost as u64);
        let Some(winner) = winner else {
            let attempted = ranked.candidates.len();
            return Err(self
                .no_driver(order_id, DispatchError::AllClaimsFailed { attempted })
                .await);
        };

        // 5. assign
        if !self.router.bind_driver(order_id, winner.driver_id) {
            self.router
                .subscribe(order_id, RoomId::Passenger(order.passenger_id));
            self.router.bind_driver(order_id, winner.driver_id);
        }
        let assigned = match self
            .transition(
                order_id,
                OrderStatus::Dispatching,
                OrderStatus::Assigned,
                DriverBinding::Assign(winner.driver_id),
            )
            .await
        {
            Ok(assigned) => assigned,
            Err(err) => {
                self.release_driver(winner.driver_id, DriverStatus::PickingUp)
                    .await;
                return Err(match err {
                    DispatchError::InvalidTransition {
                        from: OrderStatus::Cancelled,
                        ..
                    } => {
                        info!(driver_id = %winner.driver_id, "order cancelled during claim, driver released");
                        self.router.unsubscribe(order_id);
                        DispatchError::Cancelled(order_id)
                    }
                    other => self.abort_attempt(order_id, other).await,
                });
            }
        };

        if let Err(err) = within(
            self.config.timeouts.notify(),
            NotifyError::Timeout,
            self.notifier.notify_assignment(winner.driver_id, &assigned),
        )
        .await
        {
            warn!(driver_id = %winner.driver_id, error = %err, "driver notification failed");
        }

        self.telemetry.record_assignment(&ranked.degradations);
        info!(
            driver_id = %winner.driver_id,
            score = winner.score,
            claims_lost = lost,
            "order assigned"
        );
        Ok(Assignment {
            order_id,
            driver_id: winner.driver_id,
            score: winner.score,
            distance_meters: winner.distance_meters,
            duration_seconds: winner.duration_seconds,
            routed: winner.routed,
            candidates_considered: ranked.candidates.len(),
            claims_lost: lost,
            degradations: ranked.degradations.clone(),
        })
    }

    /// Cancel from any non-terminal status. Cancelling a cancelled order is a
    /// no-op. A driver already holding the order is released to AVAILABLE.
    #[instrument(skip_all, fields(order_id = %order_id))]
    pub async fn cancel(&self, order_id: OrderId) -> Result<Order, DispatchError> {
        let mut current = self.order(order_id).await?;
        loop {
            if current.status == OrderStatus::Cancelled {
                return Ok(current);
            }
            if current.status.is_terminal() {
                return Err(DispatchError::InvalidTransition {
                    order_id,
                    from: current.status,
                    to: OrderStatus::Cancelled,
                });
            }
            match self
                .transition(order_id, current.status, OrderStatus::Cancelled, DriverBinding::Keep)
                .await
            {
                Ok(cancelled) => {
                    self.after_cancel(&current, None).await;
                    info!(from = %current.status, "order cancelled");
                    return Ok(cancelled);
                }
                // Lost a race with the dispatch path; re-read and try again.
                Err(DispatchError::InvalidTransition { .. }) => {
                    current = self.order(order_id).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// ASSIGNED -> IN_PROGRESS; the driver moves PICKING_UP -> ON_TRIP.
    #[instrument(skip_all, fields(order_id = %order_id))]
    pub async fn start_trip(&self, order_id: OrderId) -> Result<Order, DispatchError> {
        let order = self
            .transition(
                order_id,
                OrderStatus::Assigned,
                OrderStatus::InProgress,
                DriverBinding::Keep,
            )
            .await?;
        let Some(driver_id) = order.driver_id else {
            return Ok(order);
        };
        self.move_driver_status(driver_id, DriverStatus::PickingUp, DriverStatus::OnTrip)
            .await;
        // A cancel landing between the two moves released nothing: the
        // driver was still PICKING_UP when it looked for ON_TRIP.
        match self.order(order_id).await {
            Ok(current) if current.status == OrderStatus::Cancelled => {
                self.release_driver(driver_id, DriverStatus::OnTrip).await;
                info!(driver_id = %driver_id, "order cancelled while trip started, driver released");
                Err(DispatchError::Cancelled(order_id))
            }
            Ok(_) => Ok(order),
            Err(err) => {
                warn!(error = %err, "could not confirm order after trip start");
                Ok(order)
            }
        }
    }

    /// IN_PROGRESS -> COMPLETED; the driver becomes AVAILABLE or goes OFFLINE.
    #[instrument(skip_all, fields(order_id = %order_id))]
    pub async fn complete_trip(
        &self,
        order_id: OrderId,
        after: AfterTrip,
    ) -> Result<Order, DispatchError> {
        let order = self
            .transition(
                order_id,
                OrderStatus::InProgress,
                OrderStatus::Completed,
                DriverBinding::Keep,
            )
            .await?;
        self.router.unsubscribe(order_id);
        if let Some(driver_id) = order.driver_id {
            self.move_driver_status(driver_id, DriverStatus::OnTrip, after.driver_status())
                .await;
            self.profiles
                .record_trip_outcome(driver_id, TripOutcome::Completed)
                .await;
        }
        self.telemetry.record_completed_trip();
        Ok(order)
    }

    /// The assigned driver backs out before pickup. The order is cancelled,
    /// the driver released, and the cancellation counted against the driver.
    #[instrument(skip_all, fields(order_id = %order_id))]
    pub async fn abandon_trip(&self, order_id: OrderId) -> Result<Order, DispatchError> {
        let before = self.order(order_id).await?;
        let Some(driver_id) = before.driver_id else {
            return Err(DispatchError::InvalidTransition {
                order_id,
                from: before.status,
                to: OrderStatus::Cancelled,
            });
        };
        let cancelled = self
            .transition(
                order_id,
                OrderStatus::Assigned,
                OrderStatus::Cancelled,
                DriverBinding::Keep,
            )
            .await?;
        self.after_cancel(&before, Some(driver_id)).await;
        self.profiles
            .record_trip_outcome(driver_id, TripOutcome::CancelledByDriver)
            .await;
        warn!(driver_id = %driver_id, "driver abandoned assigned order");
        Ok(cancelled)
    }

    /// Re-point every active order of `passenger_id` at the passenger's room,
    /// keeping the driver binding. Returns how many were resubscribed.
    #[instrument(skip_all, fields(passenger_id = %passenger_id))]
    pub async fn resubscribe_passenger(
        &self,
        passenger_id: PassengerId,
    ) -> Result<usize, DispatchError> {
        let active = within(
            self.config.timeouts.order_store(),
            OrderStoreError::Timeout,
            self.orders.active_for_passenger(passenger_id),
        )
        .await?;
        for order in &active {
            self.router.subscribe(order.id, RoomId::Passenger(passenger_id));
            if let Some(driver_id) = order.driver_id {
                self.router.bind_driver(order.id, driver_id);
            }
        }
        Ok(active.len())
    }

    /// Drop the location subscriptions of a passenger who disconnected.
    /// [`Self::resubscribe_passenger`] restores them on reconnect.
    #[instrument(skip_all, fields(passenger_id = %passenger_id))]
    pub async fn unsubscribe_passenger(
        &self,
        passenger_id: PassengerId,
    ) -> Result<usize, DispatchError> {
        let active = within(
            self.config.timeouts.order_store(),
            OrderStoreError::Timeout,
            self.orders.active_for_passenger(passenger_id),
        )
        .await?;
        Ok(active
            .iter()
            .filter(|order| self.router.unsubscribe(order.id))
            .count())
    }

    async fn transition(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        target: OrderStatus,
        driver: DriverBinding,
    ) -> Result<Order, DispatchError> {
        Ok(within(
            self.config.timeouts.order_store(),
            OrderStoreError::Timeout,
            self.orders.transition(order_id, expected, target, driver),
        )
        .await?)
    }

    async fn cas_driver(
        &self,
        driver_id: DriverId,
        expected: DriverStatus,
        new: DriverStatus,
    ) -> Result<bool, GeoIndexError> {
        within(
            self.config.timeouts.cas(),
            GeoIndexError::Timeout,
            self.geo.cas_status(driver_id, expected, new),
        )
        .await
    }

    /// Best-effort status move outside the claim path; mismatches are logged.
    async fn move_driver_status(
        &self,
        driver_id: DriverId,
        from: DriverStatus,
        to: DriverStatus,
    ) -> bool {
        match self.cas_driver(driver_id, from, to).await {
            Ok(true) => {
                debug!(driver_id = %driver_id, %from, %to, "driver status moved");
                true
            }
            Ok(false) => {
                warn!(driver_id = %driver_id, %from, %to, "driver not in expected status");
                false
            }
            Err(err) => {
                warn!(driver_id = %driver_id, error = %err, "driver status update failed");
                false
            }
        }
    }

    async fn release_driver(&self, driver_id: DriverId, held: DriverStatus) {
        if self
            .move_driver_status(driver_id, held, DriverStatus::Available)
            .await
        {
            self.telemetry.record_release();
        }
    }

    /// Cleanup after `before` moved to CANCELLED. `abandoned_by` is set when
    /// the driver, not the passenger, gave the order up.
    async fn after_cancel(&self, before: &Order, abandoned_by: Option<DriverId>) {
        if let Some(driver_id) = before.driver_id {
            let held = match before.status {
                OrderStatus::Assigned => Some(DriverStatus::PickingUp),
                OrderStatus::InProgress => Some(DriverStatus::OnTrip),
                _ => None,
            };
            if let Some(held) = held {
                self.release_driver(driver_id, held).await;
                if abandoned_by != Some(driver_id) {
                    let notified = within(
                        self.config.timeouts.notify(),
                        NotifyError::Timeout,
                        self.notifier.notify_cancelled(driver_id, before.id),
                    )
                    .await;
                    if let Err(err) = notified {
                        debug!(driver_id = %driver_id, error = %err, "cancel notification not delivered");
                    }
                }
            }
        }
        self.router.publish(
            before.id,
            ServerEvent::OrderCancelled(OrderCancelledPayload {
                order_id: before.id,
            }),
        );
        self.router.unsubscribe(before.id);
        self.telemetry.record_cancellation();
    }

    /// DISPATCHING -> NO_DRIVER_FOUND, unless a cancel got there first. The
    /// subscription is dropped; a retry registers it again.
    async fn no_driver(&self, order_id: OrderId, reason: DispatchError) -> DispatchError {
        match self
            .transition(
                order_id,
                OrderStatus::Dispatching,
                OrderStatus::NoDriverFound,
                DriverBinding::Keep,
            )
            .await
        {
            Ok(_) => {
                self.router.unsubscribe(order_id);
                match reason {
                    DispatchError::AllClaimsFailed { .. } => {
                        self.telemetry.record_all_claims_failed()
                    }
                    _ => self.telemetry.record_no_candidates(),
                }
                info!(reason = %reason, "no driver found");
                reason
            }
            Err(DispatchError::InvalidTransition {
                from: OrderStatus::Cancelled,
                ..
            }) => {
                self.router.unsubscribe(order_id);
                DispatchError::Cancelled(order_id)
            }
            Err(err) => err,
        }
    }

    /// DISPATCHING -> PENDING after an infrastructure failure so the caller
    /// can retry.
    async fn abort_attempt(&self, order_id: OrderId, cause: DispatchError) -> DispatchError {
        self.telemetry.record_infrastructure_failure();
        warn!(error = %cause, "dispatch aborted");
        match self
            .transition(
                order_id,
                OrderStatus::Dispatching,
                OrderStatus::Pending,
                DriverBinding::Clear,
            )
            .await
        {
            Ok(_) => {}
            Err(DispatchError::InvalidTransition {
                from: OrderStatus::Cancelled,
                ..
            }) => {
                self.router.unsubscribe(order_id);
                return DispatchError::Cancelled(order_id);
            }
            Err(err) => warn!(error = %err, "could not revert order to PENDING"),
        }
        match cause {
            DispatchError::InfrastructureUnavailable(_) => cause,
            other => DispatchError::InfrastructureUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VehicleType;
    use crate::test_helpers::{ride_request, EngineFixture, TEST_PICKUP};

    #[tokio::test]
    async fn dispatch_claims_the_nearest_driver_and_binds_the_subscription() {
        let fixture = EngineFixture::new();
        fixture.add_driver(1, 2.0, VehicleType::Standard);
        fixture.add_driver(2, 1.0, VehicleType::Standard);

        let order = fixture
            .coordinator
            .create_order(ride_request(7, TEST_PICKUP))
            .await
            .expect("order");
        let assignment = fixture
            .coordinator
            .dispatch(order.id)
            .await
            .expect("assignment");

        assert_eq!(assignment.driver_id, DriverId(2));
        assert_eq!(fixture.driver_status(2), Some(DriverStatus::PickingUp));
        assert_eq!(fixture.driver_status(1), Some(DriverStatus::Available));
        let stored = fixture.coordinator.order(order.id).await.expect("order");
        assert_eq!(stored.status, OrderStatus::Assigned);
        assert_eq!(stored.driver_id, Some(DriverId(2)));
        assert_eq!(
            fixture.router.subscription(order.id).and_then(|s| s.driver),
            Some(DriverId(2))
        );
    }

    #[tokio::test]
    async fn vehicle_type_filter_is_honoured() {
        let fixture = EngineFixture::new();
        fixture.add_driver(1, 0.5, VehicleType::Luxury);
        let order = fixture
            .coordinator
            .create_order(ride_request(1, TEST_PICKUP))
            .await
            .expect("order");
        let err = fixture
            .coordinator
            .dispatch(order.id)
            .await
            .expect_err("no standard cars");
        assert!(matches!(err, DispatchError::NoCandidatesFound));
    }

    #[tokio::test]
    async fn assigned_order_cannot_be_dispatched_again() {
        let fixture = EngineFixture::new();
        fixture.add_driver(1, 1.0, VehicleType::Standard);
        let order = fixture
            .coordinator
            .create_order(ride_request(1, TEST_PICKUP))
            .await
            .expect("order");
        fixture.coordinator.dispatch(order.id).await.expect("first");
        let err = fixture
            .coordinator
            .dispatch(order.id)
            .await
            .expect_err("second dispatch");
        assert!(matches!(
            err,
            DispatchError::InvalidTransition {
                from: OrderStatus::Assigned,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn invalid_pickup_is_rejected_up_front() {
        let fixture = EngineFixture::new();
        let err = fixture
            .coordinator
            .create_order(ride_request(1, GeoPoint::new(123.0, 0.0)))
            .await
            .expect_err("invalid");
        assert!(matches!(err, DispatchError::InvalidRequest(_)));
    }
}
