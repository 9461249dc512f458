//! Edge-triggered, level-held events (`connected`, `ready`).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// A clonable boolean event. Clones share state, so a flag can be waited on
/// outside the per-UE lock while receiver callbacks flip it inside.
#[derive(Clone, Debug)]
pub struct Flag {
	tx: Arc<watch::Sender<bool>>,
}

impl Flag {
	pub fn new(initial: bool) -> Self {
		Flag { tx: Arc::new(watch::channel(initial).0) }
	}

	pub fn set(&self) {
		self.tx.send_replace(true);
	}

	pub fn clear(&self) {
		self.tx.send_replace(false);
	}

	pub fn is_set(&self) -> bool {
		*self.tx.borrow()
	}

	/// Waits until the flag is set, up to `timeout`. Returns whether it was
	/// set in time.
	pub async fn wait_for(&self, timeout: Duration) -> bool {
		let mut rx = self.tx.subscribe();
		tokio::time::timeout(timeout, rx.wait_for(|v| *v)).await.map(|r| r.is_ok()).unwrap_or(false)
	}
}

impl Default for Flag {
	fn default() -> Self {
		Flag::new(false)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn wait_resolves_immediately_when_set() {
		let f = Flag::new(true);
		assert!(f.wait_for(Duration::from_millis(1)).await);
	}

	#[tokio::test]
	async fn wait_times_out_when_clear() {
		let f = Flag::new(false);
		assert!(!f.wait_for(Duration::from_millis(10)).await);
	}

	#[tokio::test]
	async fn set_wakes_a_waiter() {
		let f = Flag::new(false);
		let waiter = f.clone();
		let task = tokio::spawn(async move { waiter.wait_for(Duration::from_secs(5)).await });
		tokio::time::sleep(Duration::from_millis(10)).await;
		f.set();
		assert!(task.await.unwrap());
	}

	#[tokio::test]
	async fn clear_is_level_held() {
		let f = Flag::new(true);
		f.clear();
		assert!(!f.is_set());
		assert!(!f.wait_for(Duration::from_millis(10)).await);
	}
}
