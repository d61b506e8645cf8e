//! Order persistence collaborator.
//!
//! The coordinator never read-modify-writes an order: every status change
//! goes through [`OrderRepository::transition`], which only applies when the
//! stored status still equals the expected one. That is what lets a cancel
//! and an in-flight dispatch race without corrupting the record.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::domain::{DriverId, Order, OrderId, OrderStatus, PassengerId, RideRequest};
use crate::error::OrderStoreError;

/// Driver binding applied together with a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverBinding {
    /// Leave `driver_id` as stored.
    #[default]
    Keep,
    Assign(DriverId),
    Clear,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persist a new PENDING order and return it with its assigned id.
    async fn insert(&self, request: RideRequest) -> Result<Order, OrderStoreError>;

    async fn get(&self, id: OrderId) -> Result<Order, OrderStoreError>;

    /// Move `id` from `expected` to `target` atomically.
    ///
    /// Fails with [`OrderStoreError::Conflict`] when the stored status is not
    /// `expected`; the stored record is left untouched in that case.
    async fn transition(
        &self,
        id: OrderId,
        expected: OrderStatus,
        target: OrderStatus,
        driver: DriverBinding,
    ) -> Result<Order, OrderStoreError>;

    /// Non-terminal orders belonging to `passenger_id`, oldest first.
    async fn active_for_passenger(
        &self,
        passenger_id: PassengerId,
    ) -> Result<Vec<Order>, OrderStoreError>;
}

/// Process-local order table.
#[derive(Debug)]
pub struct InMemoryOrderRepository {
    next_id: AtomicU64,
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl Default for InMemoryOrderRepository {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository whose first inserted order gets `first_id`.
    pub fn starting_at(first_id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first_id),
            orders: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.orders.read().map(|orders| orders.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> OrderStoreError {
    OrderStoreError::Unavailable("order table lock poisoned".to_string())
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, request: RideRequest) -> Result<Order, OrderStoreError> {
        let id = OrderId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let order = Order::from_request(id, request);
        self.orders
            .write()
            .map_err(|_| poisoned())?
            .insert(id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Order, OrderStoreError> {
        self.orders
            .read()
            .map_err(|_| poisoned())?
            .get(&id)
            .cloned()
            .ok_or(OrderStoreError::NotFound(id))
    }

    async fn transition(
        &self,
        id: OrderId,
        expected: OrderStatus,
        target: OrderStatus,
        driver: DriverBinding,
    ) -> Result<Order, OrderStoreError> {
        let mut orders = self.orders.write().map_err(|_| poisoned())?;
        let order = orders.get_mut(&id).ok_or(OrderStoreError::NotFound(id))?;
        if order.status != expected {
            return Err(OrderStoreError::Conflict {
                id,
                expected,
                actual: order.status,
                target,
            });
        }
        order.status = target;
        match driver {
            DriverBinding::Keep => {}
            DriverBinding::Assign(driver_id) => order.driver_id = Some(driver_id),
            DriverBinding::Clear => order.driver_id = None,
        }
        Ok(order.clone())
    }

    async fn active_for_passenger(
        &self,
        passenger_id: PassengerId,
    ) -> Result<Vec<Order>, OrderStoreError> {
        let orders = self.orders.read().map_err(|_| poisoned())?;
        let mut active: Vec<Order> = orders
            .values()
            .filter(|order| order.passenger_id == passenger_id && !order.status.is_terminal())
            .cloned()
            .collect();
        active.sort_by_key(|order| order.id);
        Ok(active)
    }
}
