//! Cooperative cancellation shared between a session and its background tasks.

use std::sync::Arc;
use tokio::sync::watch;

/// A cloneable cancellation flag.
///
/// Once cancelled it stays cancelled. Every clone observes the same flag.
#[derive(Debug, Clone)]
pub struct CancelSignal {
	sender: Arc<watch::Sender<bool>>,
	receiver: watch::Receiver<bool>,
}

impl CancelSignal {
	pub fn new() -> Self {
		let (sender, receiver) = watch::channel(false);
		Self {
			sender: Arc::new(sender),
			receiver,
		}
	}

	pub fn cancel(&self) {
		self.sender.send_replace(true);
	}

	pub fn is_cancelled(&self) -> bool {
		*self.receiver.borrow()
	}

	/// Resolves once the signal is cancelled. Resolves immediately if it already is.
	pub async fn cancelled(&self) {
		let mut receiver = self.receiver.clone();
		// The sender lives as long as any clone of self, so this cannot fail.
		let _ = receiver.wait_for(|cancelled| *cancelled).await;
	}
}

impl Default for CancelSignal {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[tokio::test]
	async fn test_clones_observe_cancellation() {
		let signal = CancelSignal::new();
		let observer = signal.clone();
		assert!(!observer.is_cancelled());

		let waiter = tokio::spawn(async move { observer.cancelled().await });
		signal.cancel();

		tokio::time::timeout(Duration::from_secs(1), waiter)
			.await
			.unwrap()
			.unwrap();
		assert!(signal.is_cancelled());
		// Already cancelled resolves immediately.
		signal.cancelled().await;
	}
}
