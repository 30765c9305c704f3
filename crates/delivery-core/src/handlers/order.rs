//! Order lifecycle operations.
//!
//! Creation reserves stock and captures prices in one transaction behind the
//! idempotency guard. Every later change goes through the assignment engine
//! so it runs under the order's row lock. Events are published only after
//! the write commits.

use super::{require_scope, LifecycleError};
use crate::engine::assignment::{AssignmentEngine, Committed};
use crate::engine::event_bus::EventBus;
use crate::idempotency::{IdempotencyLayer, IdempotentOutcome};
use crate::state::OrderStateMachine;
use delivery_storage::{StorageError, StorageService, Transaction};
use delivery_types::{
	current_timestamp, truncate_id, Actor, DriverStats, MarketplaceEvent, NewOrderItem, Order,
	OrderEvent, OrderItem, OrderStatus, Product, Role, Scope, StorageKey,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

pub struct OrderLifecycle {
	storage: Arc<StorageService>,
	assignment: Arc<AssignmentEngine>,
	idempotency: Arc<IdempotencyLayer>,
	event_bus: EventBus,
}

impl OrderLifecycle {
	pub fn new(
		storage: Arc<StorageService>,
		assignment: Arc<AssignmentEngine>,
		idempotency: Arc<IdempotencyLayer>,
		event_bus: EventBus,
	) -> Self {
		Self {
			storage,
			assignment,
			idempotency,
			event_bus,
		}
	}

	/// Places an order for the calling customer.
	///
	/// Retrying with the same idempotency key and items returns the first
	/// order without touching stock again.
	#[instrument(skip_all, fields(customer_id = %actor.id))]
	pub async fn create_order(
		&self,
		actor: &Actor,
		items: Vec<NewOrderItem>,
		idempotency_key: Option<&str>,
	) -> Result<IdempotentOutcome<Order>, LifecycleError> {
		require_scope(actor, Scope::OrdersCreate)?;
		let quantities = validate_items(&items)?;
		let request = serde_json::json!({ "items": &items });
		let customer_id = actor.id.clone();

		let outcome = self
			.idempotency
			.guard(idempotency_key, &actor.id, &request, |tx| {
				place_order(tx, customer_id, items, quantities)
			})
			.await?;

		if outcome.replayed {
			tracing::info!(order_id = %truncate_id(&outcome.value.id), "Replayed order creation");
		} else {
			tracing::info!(
				order_id = %truncate_id(&outcome.value.id),
				total = %outcome.value.total_price,
				"Order created"
			);
			self.event_bus
				.publish(MarketplaceEvent::Order(OrderEvent::Created {
					order: outcome.value.clone(),
				}))
				.ok();
		}
		Ok(outcome)
	}

	/// Admin approval of a pending order.
	pub async fn confirm_order(&self, actor: &Actor, order_id: &str) -> Result<Order, LifecycleError> {
		self.transition(actor, order_id, OrderStatus::Confirmed).await
	}

	/// Claims a confirmed order for the calling driver.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn attempt_accept(&self, actor: &Actor, order_id: &str) -> Result<Order, LifecycleError> {
		precheck_role(actor, OrderStatus::Assigned)?;
		let committed = self.assignment.attempt_accept(order_id, actor).await?;
		self.event_bus
			.publish(MarketplaceEvent::Order(OrderEvent::Assigned {
				order_id: order_id.to_string(),
				driver_id: actor.id.clone(),
			}))
			.ok();
		Ok(committed.after)
	}

	/// Moves an order to `target`. Accepting goes through the same path as
	/// [`OrderLifecycle::attempt_accept`].
	pub async fn advance_status(
		&self,
		actor: &Actor,
		order_id: &str,
		target: OrderStatus,
	) -> Result<Order, LifecycleError> {
		if target == OrderStatus::Assigned {
			return self.attempt_accept(actor, order_id).await;
		}
		self.transition(actor, order_id, target).await
	}

	/// Admin cancellation. Releases the driver if one held the order.
	pub async fn cancel_order(&self, actor: &Actor, order_id: &str) -> Result<Order, LifecycleError> {
		self.transition(actor, order_id, OrderStatus::Cancelled).await
	}

	#[instrument(skip_all, fields(order_id = %truncate_id(order_id), target = %target))]
	async fn transition(
		&self,
		actor: &Actor,
		order_id: &str,
		target: OrderStatus,
	) -> Result<Order, LifecycleError> {
		precheck_role(actor, target)?;
		let committed = self
			.assignment
			.run_exclusive(order_id, |order| {
				Ok(OrderStateMachine::apply(order, actor, target, current_timestamp())?)
			})
			.await?;

		tracing::info!(from = %committed.before.status, "Order status changed");
		self.publish_transition(&committed);
		Ok(committed.after)
	}

	fn publish_transition(&self, committed: &Committed) {
		let Committed { before, after } = committed;
		let event = match after.status {
			OrderStatus::Confirmed => OrderEvent::Confirmed {
				order_id: after.id.clone(),
			},
			OrderStatus::Cancelled => OrderEvent::Cancelled {
				order_id: after.id.clone(),
				customer_id: after.customer_id.clone(),
				released_driver: before.driver_id.clone(),
			},
			OrderStatus::Assigned => match &after.driver_id {
				Some(driver_id) => OrderEvent::Assigned {
					order_id: after.id.clone(),
					driver_id: driver_id.clone(),
				},
				None => return,
			},
			status => match &after.driver_id {
				Some(driver_id) => OrderEvent::StatusChanged {
					order_id: after.id.clone(),
					customer_id: after.customer_id.clone(),
					driver_id: driver_id.clone(),
					from: before.status,
					to: status,
				},
				None => return,
			},
		};
		self.event_bus.publish(MarketplaceEvent::Order(event)).ok();
	}

	/// Reads one order if the actor may see it.
	///
	/// Customers see their own orders, drivers see orders they hold and
	/// orders open for acceptance, admins see everything.
	pub async fn get_order(&self, actor: &Actor, order_id: &str) -> Result<Order, LifecycleError> {
		let order: Order = self
			.storage
			.retrieve(StorageKey::Orders.as_str(), order_id)
			.await
			.map_err(|e| match e {
				StorageError::NotFound => LifecycleError::NotFound(format!("order {}", order_id)),
				other => other.into(),
			})?;

		let visible = match actor.role {
			Role::Admin => true,
			Role::Customer => order.customer_id == actor.id,
			Role::Driver => {
				order.driver_id.as_deref() == Some(actor.id.as_str()) || is_available(&order)
			},
		};
		if !visible {
			return Err(LifecycleError::Unauthorized(format!(
				"order {} is not visible to {}",
				order_id, actor.id
			)));
		}
		Ok(order)
	}

	/// Every order, newest first, optionally filtered by wire status name.
	pub async fn list_orders(
		&self,
		actor: &Actor,
		status: Option<&str>,
	) -> Result<Vec<Order>, LifecycleError> {
		require_scope(actor, Scope::OrdersReadAll)?;
		let status = status.map(super::parse_status).transpose()?;
		let mut orders = self.all_orders().await?;
		if let Some(status) = status {
			orders.retain(|order| order.status == status);
		}
		sort_newest_first(&mut orders);
		Ok(orders)
	}

	/// The calling customer's orders, newest first.
	pub async fn customer_orders(&self, actor: &Actor) -> Result<Vec<Order>, LifecycleError> {
		require_scope(actor, Scope::OrdersReadOwn)?;
		let mut orders = self.all_orders().await?;
		orders.retain(|order| order.customer_id == actor.id);
		sort_newest_first(&mut orders);
		Ok(orders)
	}

	/// Confirmed orders nobody holds, oldest first.
	pub async fn available_orders(&self, actor: &Actor) -> Result<Vec<Order>, LifecycleError> {
		require_scope(actor, Scope::OrdersRead)?;
		let mut orders = self.all_orders().await?;
		orders.retain(is_available);
		orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
		Ok(orders)
	}

	/// Orders held by the calling driver, newest first, optionally narrowed
	/// to one status and cut to the `limit` most recent.
	pub async fn driver_deliveries(
		&self,
		actor: &Actor,
		status: Option<&str>,
		limit: Option<usize>,
	) -> Result<Vec<Order>, LifecycleError> {
		require_scope(actor, Scope::OrdersRead)?;
		let status = status.map(super::parse_status).transpose()?;
		if limit == Some(0) {
			return Err(LifecycleError::Validation("limit must be positive".into()));
		}
		let mut orders = self.all_orders().await?;
		orders.retain(|order| {
			order.driver_id.as_deref() == Some(actor.id.as_str())
				&& status.is_none_or(|status| order.status == status)
		});
		sort_newest_first(&mut orders);
		if let Some(limit) = limit {
			orders.truncate(limit);
		}
		Ok(orders)
	}

	pub async fn driver_stats(&self, actor: &Actor) -> Result<DriverStats, LifecycleError> {
		let deliveries = self.driver_deliveries(actor, None, None).await?;
		Ok(summarize(&actor.id, &deliveries))
	}

	async fn all_orders(&self) -> Result<Vec<Order>, LifecycleError> {
		Ok(self.storage.list(StorageKey::Orders.as_str()).await?)
	}
}

/// Scope a role needs to move an order into `target`.
fn transition_scope(target: OrderStatus) -> Option<Scope> {
	match target {
		OrderStatus::Pending => None,
		OrderStatus::Confirmed | OrderStatus::Cancelled => Some(Scope::OrdersModerate),
		OrderStatus::Assigned
		| OrderStatus::PickedUp
		| OrderStatus::InTransit
		| OrderStatus::Delivered => Some(Scope::OrdersUpdateStatus),
	}
}

/// Rejects a missing scope or the wrong role before any row is locked.
fn precheck_role(actor: &Actor, target: OrderStatus) -> Result<(), LifecycleError> {
	if let Some(scope) = transition_scope(target) {
		require_scope(actor, scope)?;
	}
	match OrderStateMachine::required_role(target) {
		Some(role) if role != actor.role => Err(LifecycleError::Unauthorized(format!(
			"role {} cannot move orders to {}",
			actor.role, target
		))),
		_ => Ok(()),
	}
}

fn is_available(order: &Order) -> bool {
	order.status == OrderStatus::Confirmed && order.driver_id.is_none()
}

fn sort_newest_first(orders: &mut [Order]) {
	orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// Totals requested per product, in lock order.
fn validate_items(items: &[NewOrderItem]) -> Result<BTreeMap<String, u32>, LifecycleError> {
	if items.is_empty() {
		return Err(LifecycleError::Validation(
			"Order must contain at least one item".into(),
		));
	}

	let mut quantities: BTreeMap<String, u32> = BTreeMap::new();
	for item in items {
		if item.product_id.trim().is_empty() {
			return Err(LifecycleError::Validation("Product id must not be empty".into()));
		}
		if item.quantity == 0 {
			return Err(LifecycleError::Validation(format!(
				"Quantity for product {} must be positive",
				item.product_id
			)));
		}
		let total = quantities.entry(item.product_id.clone()).or_insert(0);
		*total = total.checked_add(item.quantity).ok_or_else(|| {
			LifecycleError::Validation(format!("Quantity for product {} is too large", item.product_id))
		})?;
	}
	Ok(quantities)
}

/// Reserves stock, captures prices and queues the order insert.
async fn place_order(
	mut tx: Transaction,
	customer_id: String,
	items: Vec<NewOrderItem>,
	quantities: BTreeMap<String, u32>,
) -> Result<(Transaction, Order), LifecycleError> {
	let products = StorageKey::Products.as_str();

	let mut prices: HashMap<String, Decimal> = HashMap::new();
	for (product_id, quantity) in &quantities {
		let mut product: Product = tx
			.retrieve_for_update(products, product_id)
			.await
			.map_err(|e| match e {
				StorageError::NotFound => {
					LifecycleError::Validation(format!("Product {} not found", product_id))
				},
				other => other.into(),
			})?;
		if product.stock < *quantity {
			return Err(LifecycleError::Validation(format!(
				"Insufficient stock for {}: requested {}, available {}",
				product.name, quantity, product.stock
			)));
		}
		product.stock -= quantity;
		tx.update(products, product_id, &product)?;
		prices.insert(product_id.clone(), product.price);
	}

	let items = items
		.into_iter()
		.map(|item| {
			let unit_price_at_purchase = prices.get(&item.product_id).copied().ok_or_else(|| {
				LifecycleError::Validation(format!("Product {} not found", item.product_id))
			})?;
			Ok(OrderItem {
				product_id: item.product_id,
				quantity: item.quantity,
				unit_price_at_purchase,
			})
		})
		.collect::<Result<Vec<_>, LifecycleError>>()?;
	let total_price = items
		.iter()
		.try_fold(Decimal::ZERO, |total, item| {
			item.line_total().and_then(|line| total.checked_add(line))
		})
		.ok_or_else(|| LifecycleError::Validation("Order total is too large".into()))?;

	let now = current_timestamp();
	let order = Order {
		id: Uuid::new_v4().to_string(),
		customer_id,
		driver_id: None,
		status: OrderStateMachine::INITIAL,
		items,
		total_price,
		version: 1,
		created_at: now,
		updated_at: now,
		assigned_at: None,
	};
	tx.insert(StorageKey::Orders.as_str(), &order.id, &order, None)?;
	Ok((tx, order))
}

fn summarize(driver_id: &str, deliveries: &[Order]) -> DriverStats {
	let delivered: Vec<&Order> = deliveries
		.iter()
		.filter(|order| order.status == OrderStatus::Delivered)
		.collect();
	let total_earnings = delivered
		.iter()
		.fold(Decimal::ZERO, |total, order| total.saturating_add(order.total_price));
	let delivered_count = delivered.len() as u64;
	let active_deliveries = deliveries
		.iter()
		.filter(|order| {
			matches!(
				order.status,
				OrderStatus::Assigned | OrderStatus::PickedUp | OrderStatus::InTransit
			)
		})
		.count() as u64;
	let average_per_delivery = if delivered_count == 0 {
		Decimal::ZERO
	} else {
		(total_earnings / Decimal::from(delivered_count)).round_dp(2)
	};

	DriverStats {
		driver_id: driver_id.to_string(),
		delivered_count,
		total_earnings,
		active_deliveries,
		average_per_delivery,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::assignment::ConflictReason;
	use delivery_config::{AssignmentConfig, IdempotencyConfig};
	use delivery_storage::implementations::memory::MemoryStorage;
	use std::str::FromStr;

	struct Fixture {
		storage: Arc<StorageService>,
		lifecycle: Arc<OrderLifecycle>,
		events: tokio::sync::broadcast::Receiver<MarketplaceEvent>,
	}

	fn fixture() -> Fixture {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let event_bus = EventBus::new(64);
		let events = event_bus.subscribe();
		let assignment = Arc::new(AssignmentEngine::new(
			storage.clone(),
			&AssignmentConfig::default(),
		));
		let idempotency = Arc::new(IdempotencyLayer::new(
			storage.clone(),
			&IdempotencyConfig::default(),
		));
		let lifecycle = Arc::new(OrderLifecycle::new(
			storage.clone(),
			assignment,
			idempotency,
			event_bus,
		));
		Fixture {
			storage,
			lifecycle,
			events,
		}
	}

	async fn seed_product(storage: &StorageService, id: &str, price: &str, stock: u32) {
		let product = Product {
			id: id.into(),
			store_id: "s1".into(),
			name: format!("product {}", id),
			price: Decimal::from_str(price).unwrap(),
			stock,
		};
		storage
			.store(StorageKey::Products.as_str(), id, &product)
			.await
			.unwrap();
	}

	async fn stock(storage: &StorageService, id: &str) -> u32 {
		let product: Product = storage
			.retrieve(StorageKey::Products.as_str(), id)
			.await
			.unwrap();
		product.stock
	}

	fn items(entries: &[(&str, u32)]) -> Vec<NewOrderItem> {
		entries
			.iter()
			.map(|(product_id, quantity)| NewOrderItem {
				product_id: product_id.to_string(),
				quantity: *quantity,
			})
			.collect()
	}

	async fn confirmed_order(fx: &Fixture, key: &str) -> Order {
		let created = fx
			.lifecycle
			.create_order(&Actor::customer("c1"), items(&[("p1", 1)]), Some(key))
			.await
			.unwrap();
		fx.lifecycle
			.confirm_order(&Actor::admin("a1"), &created.value.id)
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn test_create_order_captures_prices_and_reserves_stock() {
		let mut fx = fixture();
		seed_product(&fx.storage, "p1", "12.50", 10).await;
		seed_product(&fx.storage, "p2", "3.25", 5).await;

		let outcome = fx
			.lifecycle
			.create_order(
				&Actor::customer("c1"),
				items(&[("p1", 2), ("p2", 1), ("p1", 1)]),
				Some("key-1"),
			)
			.await
			.unwrap();
		let order = outcome.value;

		assert!(!outcome.replayed);
		assert_eq!(order.status, OrderStatus::Pending);
		assert_eq!(order.version, 1);
		assert_eq!(order.items.len(), 3);
		assert_eq!(order.total_price, Decimal::from_str("40.75").unwrap());
		assert_eq!(stock(&fx.storage, "p1").await, 7);
		assert_eq!(stock(&fx.storage, "p2").await, 4);

		match fx.events.recv().await.unwrap() {
			MarketplaceEvent::Order(OrderEvent::Created { order: published }) => {
				assert_eq!(published.id, order.id)
			},
			other => panic!("unexpected event {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_retry_with_same_key_returns_first_order() {
		let fx = fixture();
		seed_product(&fx.storage, "p1", "12.50", 10).await;
		let customer = Actor::customer("c1");

		let first = fx
			.lifecycle
			.create_order(&customer, items(&[("p1", 2)]), Some("abc"))
			.await
			.unwrap();
		let second = fx
			.lifecycle
			.create_order(&customer, items(&[("p1", 2)]), Some("abc"))
			.await
			.unwrap();

		assert!(second.replayed);
		assert_eq!(first.value, second.value);
		assert_eq!(
			serde_json::to_vec(&first.value).unwrap(),
			serde_json::to_vec(&second.value).unwrap()
		);
		assert_eq!(stock(&fx.storage, "p1").await, 8);
		assert_eq!(fx.lifecycle.customer_orders(&customer).await.unwrap().len(), 1);

		let reused = fx
			.lifecycle
			.create_order(&customer, items(&[("p1", 3)]), Some("abc"))
			.await;
		assert!(matches!(reused, Err(LifecycleError::IdempotencyKeyReuse)));

		let missing = fx
			.lifecycle
			.create_order(&customer, items(&[("p1", 1)]), None)
			.await;
		assert!(matches!(missing, Err(LifecycleError::IdempotencyKeyRequired)));
	}

	#[tokio::test]
	async fn test_failed_creation_leaves_stock_and_key_untouched() {
		let fx = fixture();
		seed_product(&fx.storage, "p1", "1.00", 10).await;
		seed_product(&fx.storage, "p2", "1.00", 1).await;
		let customer = Actor::customer("c1");

		let result = fx
			.lifecycle
			.create_order(&customer, items(&[("p1", 3), ("p2", 2)]), Some("abc"))
			.await;
		assert!(matches!(result, Err(LifecycleError::Validation(_))));
		assert_eq!(stock(&fx.storage, "p1").await, 10);

		// The key was not consumed by the failure.
		let retried = fx
			.lifecycle
			.create_order(&customer, items(&[("p1", 3)]), Some("abc"))
			.await
			.unwrap();
		assert!(!retried.replayed);
		assert_eq!(stock(&fx.storage, "p1").await, 7);
	}

	#[tokio::test]
	async fn test_create_order_validation() {
		let fx = fixture();
		seed_product(&fx.storage, "p1", "1.00", 10).await;
		let customer = Actor::customer("c1");

		for bad in [items(&[]), items(&[("p1", 0)]), items(&[("missing", 1)])] {
			let result = fx.lifecycle.create_order(&customer, bad, Some("k")).await;
			assert!(matches!(result, Err(LifecycleError::Validation(_))));
		}
		let result = fx
			.lifecycle
			.create_order(&Actor::driver("d1"), items(&[("p1", 1)]), Some("k"))
			.await;
		assert!(matches!(result, Err(LifecycleError::Unauthorized(_))));
	}

	#[tokio::test]
	async fn test_price_change_does_not_reach_existing_orders() {
		let fx = fixture();
		seed_product(&fx.storage, "p1", "12.50", 10).await;
		let created = fx
			.lifecycle
			.create_order(&Actor::customer("c1"), items(&[("p1", 2)]), Some("k"))
			.await
			.unwrap();

		let mut product: Product = fx
			.storage
			.retrieve(StorageKey::Products.as_str(), "p1")
			.await
			.unwrap();
		product.price = Decimal::from_str("99.00").unwrap();
		fx.storage
			.store(StorageKey::Products.as_str(), "p1", &product)
			.await
			.unwrap();

		let order = fx
			.lifecycle
			.get_order(&Actor::admin("a1"), &created.value.id)
			.await
			.unwrap();
		assert_eq!(
			order.items[0].unit_price_at_purchase,
			Decimal::from_str("12.50").unwrap()
		);
		assert_eq!(order.total_price, Decimal::from_str("25.00").unwrap());
	}

	#[tokio::test]
	async fn test_full_delivery_and_second_driver_conflict() {
		let fx = fixture();
		seed_product(&fx.storage, "p1", "20.00", 10).await;
		let order = confirmed_order(&fx, "k").await;
		let d1 = Actor::driver("d1");
		let d2 = Actor::driver("d2");

		let assigned = fx.lifecycle.attempt_accept(&d1, &order.id).await.unwrap();
		assert_eq!(assigned.driver_id.as_deref(), Some("d1"));

		let lost = fx.lifecycle.attempt_accept(&d2, &order.id).await;
		assert!(matches!(
			lost,
			Err(LifecycleError::Conflict(ConflictReason::AlreadyAssigned))
		));
		let again = fx.lifecycle.attempt_accept(&d1, &order.id).await;
		assert!(matches!(
			again,
			Err(LifecycleError::Conflict(ConflictReason::AlreadyAssigned))
		));

		let foreign = fx
			.lifecycle
			.advance_status(&d2, &order.id, OrderStatus::PickedUp)
			.await;
		assert!(matches!(foreign, Err(LifecycleError::Unauthorized(_))));

		for target in [
			OrderStatus::PickedUp,
			OrderStatus::InTransit,
			OrderStatus::Delivered,
		] {
			let updated = fx
				.lifecycle
				.advance_status(&d1, &order.id, target)
				.await
				.unwrap();
			assert_eq!(updated.status, target);
		}

		let cancel = fx
			.lifecycle
			.cancel_order(&Actor::admin("a1"), &order.id)
			.await;
		assert!(matches!(cancel, Err(LifecycleError::InvalidTransition { .. })));

		let stats = fx.lifecycle.driver_stats(&d1).await.unwrap();
		assert_eq!(stats.delivered_count, 1);
		assert_eq!(stats.total_earnings, Decimal::from_str("20.00").unwrap());
		assert_eq!(stats.average_per_delivery, Decimal::from_str("20.00").unwrap());
		assert_eq!(stats.active_deliveries, 0);
	}

	#[tokio::test]
	async fn test_cancel_releases_driver() {
		let mut fx = fixture();
		seed_product(&fx.storage, "p1", "5.00", 10).await;
		let order = confirmed_order(&fx, "k").await;
		fx.lifecycle
			.attempt_accept(&Actor::driver("d1"), &order.id)
			.await
			.unwrap();

		let cancelled = fx
			.lifecycle
			.cancel_order(&Actor::admin("a1"), &order.id)
			.await
			.unwrap();
		assert_eq!(cancelled.status, OrderStatus::Cancelled);
		assert_eq!(cancelled.driver_id, None);
		assert!(cancelled.driver_invariant_holds());

		let mut released = None;
		while let Ok(event) = fx.events.try_recv() {
			if let MarketplaceEvent::Order(OrderEvent::Cancelled {
				released_driver, ..
			}) = event
			{
				released = released_driver;
			}
		}
		assert_eq!(released.as_deref(), Some("d1"));

		let late = fx
			.lifecycle
			.attempt_accept(&Actor::driver("d2"), &order.id)
			.await;
		assert!(matches!(
			late,
			Err(LifecycleError::Conflict(ConflictReason::Cancelled))
		));
	}

	#[tokio::test]
	async fn test_role_checks_precede_state_checks() {
		let fx = fixture();
		seed_product(&fx.storage, "p1", "5.00", 10).await;
		let created = fx
			.lifecycle
			.create_order(&Actor::customer("c1"), items(&[("p1", 1)]), Some("k"))
			.await
			.unwrap();
		let id = created.value.id;

		let by_driver = fx.lifecycle.confirm_order(&Actor::driver("d1"), &id).await;
		assert!(matches!(by_driver, Err(LifecycleError::Unauthorized(_))));

		let by_customer = fx
			.lifecycle
			.attempt_accept(&Actor::customer("c1"), &id)
			.await;
		assert!(matches!(by_customer, Err(LifecycleError::Unauthorized(_))));

		let early = fx.lifecycle.attempt_accept(&Actor::driver("d1"), &id).await;
		assert!(matches!(
			early,
			Err(LifecycleError::Conflict(ConflictReason::NotConfirmed))
		));

		let skipping = fx
			.lifecycle
			.advance_status(&Actor::driver("d1"), &id, OrderStatus::Delivered)
			.await;
		assert!(matches!(
			skipping,
			Err(LifecycleError::InvalidTransition { .. })
		));

		let missing = fx
			.lifecycle
			.confirm_order(&Actor::admin("a1"), "missing")
			.await;
		assert!(matches!(missing, Err(LifecycleError::NotFound(_))));
	}

	#[tokio::test]
	async fn test_visibility_and_listings() {
		let fx = fixture();
		seed_product(&fx.storage, "p1", "5.00", 10).await;
		let mine = fx
			.lifecycle
			.create_order(&Actor::customer("c1"), items(&[("p1", 1)]), Some("k1"))
			.await
			.unwrap()
			.value;
		let theirs = fx
			.lifecycle
			.create_order(&Actor::customer("c2"), items(&[("p1", 1)]), Some("k2"))
			.await
			.unwrap()
			.value;

		let customer = Actor::customer("c1");
		assert!(fx.lifecycle.get_order(&customer, &mine.id).await.is_ok());
		assert!(matches!(
			fx.lifecycle.get_order(&customer, &theirs.id).await,
			Err(LifecycleError::Unauthorized(_))
		));

		let driver = Actor::driver("d1");
		assert!(fx.lifecycle.get_order(&driver, &mine.id).await.is_err());
		fx.lifecycle
			.confirm_order(&Actor::admin("a1"), &mine.id)
			.await
			.unwrap();
		assert!(fx.lifecycle.get_order(&driver, &mine.id).await.is_ok());

		let available = fx.lifecycle.available_orders(&driver).await.unwrap();
		assert_eq!(available.len(), 1);
		assert_eq!(available[0].id, mine.id);

		let admin = Actor::admin("a1");
		assert_eq!(fx.lifecycle.list_orders(&admin, None).await.unwrap().len(), 2);
		let pending = fx
			.lifecycle
			.list_orders(&admin, Some("PENDING"))
			.await
			.unwrap();
		assert_eq!(pending.len(), 1);
		assert_eq!(pending[0].id, theirs.id);
		assert!(matches!(
			fx.lifecycle.list_orders(&admin, Some("LOST")).await,
			Err(LifecycleError::Validation(_))
		));
		assert!(matches!(
			fx.lifecycle.list_orders(&customer, None).await,
			Err(LifecycleError::Unauthorized(_))
		));
	}

	#[tokio::test]
	async fn test_transitions_require_scopes() {
		let fx = fixture();
		seed_product(&fx.storage, "p1", "5.00", 10).await;
		let order = confirmed_order(&fx, "k").await;

		match fx.lifecycle.cancel_order(&Actor::driver("d1"), &order.id).await {
			Err(LifecycleError::Unauthorized(reason)) => {
				assert!(reason.contains("OrdersModerate"), "{}", reason)
			},
			other => panic!("expected missing scope, got {:?}", other),
		}
		match fx
			.lifecycle
			.attempt_accept(&Actor::customer("c1"), &order.id)
			.await
		{
			Err(LifecycleError::Unauthorized(reason)) => {
				assert!(reason.contains("OrdersUpdateStatus"), "{}", reason)
			},
			other => panic!("expected missing scope, got {:?}", other),
		}
		match fx
			.lifecycle
			.advance_status(&Actor::admin("a1"), &order.id, OrderStatus::PickedUp)
			.await
		{
			Err(LifecycleError::Unauthorized(reason)) => {
				assert!(reason.contains("OrdersUpdateStatus"), "{}", reason)
			},
			other => panic!("expected missing scope, got {:?}", other),
		}
		assert_eq!(transition_scope(OrderStatus::Pending), None);
	}

	#[tokio::test]
	async fn test_driver_history_filters_and_limits() {
		let fx = fixture();
		seed_product(&fx.storage, "p1", "5.00", 10).await;
		let driver = Actor::driver("d1");
		let mut ids = Vec::new();
		for key in ["k1", "k2", "k3"] {
			let order = confirmed_order(&fx, key).await;
			fx.lifecycle.attempt_accept(&driver, &order.id).await.unwrap();
			ids.push(order.id);
		}
		for target in [
			OrderStatus::PickedUp,
			OrderStatus::InTransit,
			OrderStatus::Delivered,
		] {
			fx.lifecycle
				.advance_status(&driver, &ids[0], target)
				.await
				.unwrap();
		}

		let all = fx.lifecycle.driver_deliveries(&driver, None, None).await.unwrap();
		assert_eq!(all.len(), 3);
		let delivered = fx
			.lifecycle
			.driver_deliveries(&driver, Some("DELIVERED"), None)
			.await
			.unwrap();
		assert_eq!(delivered.len(), 1);
		assert_eq!(delivered[0].id, ids[0]);
		let assigned = fx
			.lifecycle
			.driver_deliveries(&driver, Some("assigned"), Some(1))
			.await
			.unwrap();
		assert_eq!(assigned.len(), 1);
		assert_eq!(assigned[0].status, OrderStatus::Assigned);

		assert!(matches!(
			fx.lifecycle.driver_deliveries(&driver, Some("LOST"), None).await,
			Err(LifecycleError::Validation(_))
		));
		assert!(matches!(
			fx.lifecycle.driver_deliveries(&driver, None, Some(0)).await,
			Err(LifecycleError::Validation(_))
		));
		let other = Actor::driver("d2");
		assert!(fx
			.lifecycle
			.driver_deliveries(&other, None, None)
			.await
			.unwrap()
			.is_empty());
	}

	#[tokio::test]
	async fn test_order_total_overflow_is_rejected() {
		let fx = fixture();
		seed_product(&fx.storage, "p1", "79228162514264337593543950335", 10).await;
		seed_product(&fx.storage, "p2", "1000000", 10).await;

		let customer = Actor::customer("c1");
		let line = fx
			.lifecycle
			.create_order(&customer, items(&[("p1", 2)]), Some("k1"))
			.await;
		assert!(matches!(line, Err(LifecycleError::Validation(_))));
		let sum = fx
			.lifecycle
			.create_order(&customer, items(&[("p1", 1), ("p2", 1)]), Some("k2"))
			.await;
		assert!(matches!(sum, Err(LifecycleError::Validation(_))));

		assert_eq!(stock(&fx.storage, "p1").await, 10);
		assert_eq!(stock(&fx.storage, "p2").await, 10);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_concurrent_accept_through_lifecycle() {
		let fx = fixture();
		seed_product(&fx.storage, "p1", "5.00", 10).await;
		let order = confirmed_order(&fx, "k").await;

		let mut handles = Vec::new();
		for i in 0..10 {
			let lifecycle = fx.lifecycle.clone();
			let order_id = order.id.clone();
			handles.push(tokio::spawn(async move {
				lifecycle
					.attempt_accept(&Actor::driver(format!("d{}", i)), &order_id)
					.await
			}));
		}

		let mut winners = 0;
		for handle in handles {
			match handle.await.unwrap() {
				Ok(_) => winners += 1,
				Err(LifecycleError::Conflict(ConflictReason::AlreadyAssigned)) => {},
				Err(e) => panic!("unexpected error: {}", e),
			}
		}
		assert_eq!(winners, 1);
	}

	#[test]
	fn test_summarize_counts_only_delivered_earnings() {
		let order = |id: &str, status: OrderStatus, total: &str| Order {
			id: id.into(),
			customer_id: "c1".into(),
			driver_id: Some("d1".into()),
			status,
			items: vec![],
			total_price: Decimal::from_str(total).unwrap(),
			version: 1,
			created_at: 0,
			updated_at: 0,
			assigned_at: Some(0),
		};
		let stats = summarize(
			"d1",
			&[
				order("a", OrderStatus::Delivered, "10.00"),
				order("b", OrderStatus::Delivered, "5.00"),
				order("c", OrderStatus::InTransit, "100.00"),
				order("d", OrderStatus::Assigned, "1.00"),
			],
		);
		assert_eq!(stats.delivered_count, 2);
		assert_eq!(stats.total_earnings, Decimal::from_str("15.00").unwrap());
		assert_eq!(stats.average_per_delivery, Decimal::from_str("7.50").unwrap());
		assert_eq!(stats.active_deliveries, 2);

		let empty = summarize("d2", &[]);
		assert_eq!(empty.average_per_delivery, Decimal::ZERO);

		let huge = summarize(
			"d3",
			&[
				order("e", OrderStatus::Delivered, "79228162514264337593543950335"),
				order("f", OrderStatus::Delivered, "79228162514264337593543950335"),
			],
		);
		assert_eq!(huge.total_earnings, Decimal::MAX);
		assert_eq!(huge.delivered_count, 2);
	}
}
