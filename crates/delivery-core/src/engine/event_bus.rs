//! Broadcast event bus for marketplace events.
//!
//! Services publish after their writes commit; notification handlers and any
//! other subscriber receive their own copy of each event.

use delivery_types::MarketplaceEvent;
use tokio::sync::broadcast;

/// Event bus for broadcasting marketplace events to multiple subscribers.
pub struct EventBus {
	sender: broadcast::Sender<MarketplaceEvent>,
}

impl EventBus {
	/// Creates a new EventBus buffering at most `capacity` events per
	/// subscriber. Slow subscribers lose the oldest events first.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Creates a new subscriber that receives events published from now on.
	pub fn subscribe(&self) -> broadcast::Receiver<MarketplaceEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event to all current subscribers.
	///
	/// Fails only when nobody is subscribed, which callers ignore.
	pub fn publish(
		&self,
		event: MarketplaceEvent,
	) -> Result<(), broadcast::error::SendError<MarketplaceEvent>> {
		self.sender.send(event)?;
		Ok(())
	}

	pub fn subscriber_count(&self) -> usize {
		self.sender.receiver_count()
	}
}

impl Clone for EventBus {
	fn clone(&self) -> Self {
		Self {
			sender: self.sender.clone(),
		}
	}
}
