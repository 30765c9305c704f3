//! Notification fan-out for committed marketplace events.
//!
//! Delivery channels are outside this service; each notification is
//! emitted as a structured log line addressed to its recipient.

use delivery_types::{truncate_id, CatalogEvent, MarketplaceEvent, OrderEvent, OrderStatus};
use tokio::sync::broadcast::{self, error::RecvError};

/// A message for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
	pub recipient: String,
	pub message: String,
}

pub struct NotificationHandler {
	receiver: broadcast::Receiver<MarketplaceEvent>,
}

impl NotificationHandler {
	pub fn new(receiver: broadcast::Receiver<MarketplaceEvent>) -> Self {
		Self { receiver }
	}

	/// Consumes events until the bus closes.
	pub async fn run(mut self) {
		loop {
			match self.receiver.recv().await {
				Ok(event) => {
					for notification in Self::render(&event) {
						tracing::info!(
							recipient = %notification.recipient,
							"{}",
							notification.message
						);
					}
				},
				Err(RecvError::Lagged(skipped)) => {
					tracing::warn!(skipped, "Notification handler lagged behind the event bus");
				},
				Err(RecvError::Closed) => break,
			}
		}
	}

	/// Notifications caused by one event.
	pub fn render(event: &MarketplaceEvent) -> Vec<Notification> {
		let notify = |recipient: &str, message: String| Notification {
			recipient: recipient.to_string(),
			message,
		};

		match event {
			MarketplaceEvent::Order(OrderEvent::Created { order }) => vec![notify(
				&order.customer_id,
				format!(
					"Order {} received, total {}",
					truncate_id(&order.id),
					order.total_price
				),
			)],
			MarketplaceEvent::Order(OrderEvent::Confirmed { order_id }) => vec![notify(
				"drivers",
				format!("Order {} is available for pickup", truncate_id(order_id)),
			)],
			MarketplaceEvent::Order(OrderEvent::Assigned {
				order_id,
				driver_id,
			}) => vec![notify(
				driver_id,
				format!("You accepted order {}", truncate_id(order_id)),
			)],
			MarketplaceEvent::Order(OrderEvent::StatusChanged {
				order_id,
				customer_id,
				to,
				..
			}) => {
				let message = match to {
					OrderStatus::PickedUp => "has been picked up",
					OrderStatus::InTransit => "is on its way",
					OrderStatus::Delivered => "has been delivered",
					_ => return Vec::new(),
				};
				vec![notify(
					customer_id,
					format!("Order {} {}", truncate_id(order_id), message),
				)]
			},
			MarketplaceEvent::Order(OrderEvent::Cancelled {
				order_id,
				customer_id,
				released_driver,
			}) => {
				let mut notifications = vec![notify(
					customer_id,
					format!("Order {} was cancelled", truncate_id(order_id)),
				)];
				if let Some(driver_id) = released_driver {
					notifications.push(notify(
						driver_id,
						format!("Order {} was cancelled, you are released", truncate_id(order_id)),
					));
				}
				notifications
			},
			MarketplaceEvent::Catalog(CatalogEvent::Restocked { product_id, stock }) => vec![notify(
				"admins",
				format!("Product {} restocked to {}", truncate_id(product_id), stock),
			)],
			MarketplaceEvent::Catalog(_) => Vec::new(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_cancellation_notifies_released_driver() {
		let event = MarketplaceEvent::Order(OrderEvent::Cancelled {
			order_id: "order-1234567890".into(),
			customer_id: "c1".into(),
			released_driver: Some("d1".into()),
		});
		let notifications = NotificationHandler::render(&event);
		let recipients: Vec<_> = notifications.iter().map(|n| n.recipient.as_str()).collect();
		assert_eq!(recipients, vec!["c1", "d1"]);
	}

	#[test]
	fn test_price_changes_are_silent() {
		let event = MarketplaceEvent::Catalog(CatalogEvent::PriceChanged {
			product_id: "p1".into(),
			price: rust_decimal::Decimal::ONE,
		});
		assert!(NotificationHandler::render(&event).is_empty());
	}

	#[tokio::test]
	async fn test_run_stops_when_bus_closes() {
		let (sender, receiver) = broadcast::channel(4);
		let handle = tokio::spawn(NotificationHandler::new(receiver).run());
		sender
			.send(MarketplaceEvent::Order(OrderEvent::Confirmed {
				order_id: "o1".into(),
			}))
			.unwrap();
		drop(sender);
		handle.await.unwrap();
	}
}
