#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use huddle_protocol::pb;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::server::registry::ConnId;
use crate::util::time::unix_ms_now;

/// Per-connection push queues. The registry decides *who* receives an
/// event; the hub only delivers. Each connection has one bounded queue,
/// so events reach a connection in enqueue order.
#[derive(Clone)]
pub struct PushHub {
	inner: Arc<Mutex<Inner>>,
	cfg: PushHubConfig,
}

#[derive(Debug, Clone)]
pub struct PushHubConfig {
	/// Maximum queued events per connection.
	pub queue_capacity: usize,
}

impl Default for PushHubConfig {
	fn default() -> Self {
		Self { queue_capacity: 256 }
	}
}

#[derive(Default)]
struct Inner {
	subs: HashMap<ConnId, Subscriber>,
}

struct Subscriber {
	tx: mpsc::Sender<pb::EventEnvelope>,
	/// Events dropped on a full queue, reported via a `Lagged` marker on
	/// the next successful send.
	pending_lag: u64,
}

/// Stamp an event with the server clock.
pub fn envelope(event: pb::event_envelope::Event) -> pb::EventEnvelope {
	pb::EventEnvelope {
		server_time_unix_ms: unix_ms_now(),
		event: Some(event),
	}
}

impl PushHub {
	pub fn new(cfg: PushHubConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			cfg,
		}
	}

	/// Register a connection's queue; the receiver is drained by the
	/// connection's events task.
	pub async fn register(&self, conn: ConnId) -> mpsc::Receiver<pb::EventEnvelope> {
		let (tx, rx) = mpsc::channel(self.cfg.queue_capacity);
		let mut inner = self.inner.lock().await;
		inner.subs.insert(conn, Subscriber { tx, pending_lag: 0 });
		rx
	}

	pub async fn unregister(&self, conn: ConnId) {
		let mut inner = self.inner.lock().await;
		inner.subs.remove(&conn);
	}

	/// Push one event to one connection. A gone connection is a logged
	/// no-op, never an error for the original actor.
	pub async fn send_to(&self, conn: ConnId, event: pb::EventEnvelope) {
		let mut inner = self.inner.lock().await;
		Self::deliver(&mut inner, conn, event);
	}

	/// Push the same event to a set of connections.
	pub async fn send_to_each(&self, conns: &[ConnId], event: pb::EventEnvelope) {
		if conns.is_empty() {
			return;
		}

		let mut inner = self.inner.lock().await;
		for conn in conns {
			Self::deliver(&mut inner, *conn, event.clone());
		}
	}

	fn deliver(inner: &mut Inner, conn: ConnId, event: pb::EventEnvelope) {
		let Some(sub) = inner.subs.get_mut(&conn) else {
			debug!(conn, "push skipped: connection gone");
			return;
		};

		match sub.tx.try_send(event) {
			Ok(()) => {
				if sub.pending_lag > 0 {
					let marker = envelope(pb::event_envelope::Event::Lagged(pb::LaggedEvent {
						dropped: sub.pending_lag,
					}));
					if sub.tx.try_send(marker).is_ok() {
						sub.pending_lag = 0;
					}
				}
			}
			Err(mpsc::error::TrySendError::Full(_)) => {
				sub.pending_lag = sub.pending_lag.saturating_add(1);
				metrics::counter!("huddle_server_pushes_dropped_total").increment(1);
				debug!(conn, "push dropped: subscriber queue full");
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {
				inner.subs.remove(&conn);
			}
		}
	}
}
