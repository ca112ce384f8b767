#![forbid(unsafe_code)]

use std::sync::Arc;

use huddle_domain::{RoomId, UserId};
use huddle_protocol::pb;
use tokio::sync::RwLock;

use crate::server::error::{OpError, OpResult};
use crate::server::hub::{PushHub, envelope};
use crate::server::registry::{ConnId, Registry};

/// Stateless per-room signaling relay. Offers, answers and ICE candidates
/// are opaque payloads re-emitted verbatim to the other connections in
/// the room; role assignment is owned by the registry.
#[derive(Clone)]
pub struct SignalRelay {
	registry: Arc<RwLock<Registry>>,
	hub: PushHub,
}

impl SignalRelay {
	pub fn new(registry: Arc<RwLock<Registry>>, hub: PushHub) -> Self {
		Self { registry, hub }
	}

	pub async fn relay(
		&self,
		conn: ConnId,
		user: &UserId,
		room: &RoomId,
		kind: i32,
		payload: String,
	) -> OpResult<()> {
		let kind = match pb::SignalKind::try_from(kind) {
			Ok(k) if k != pb::SignalKind::SignalKindUnspecified => k,
			_ => return Err(OpError::validation("BAD_SIGNAL", "signal kind must be offer, answer or ice")),
		};

		if payload.is_empty() {
			return Err(OpError::validation("EMPTY", "signal payload must be non-empty"));
		}

		let targets = {
			let reg = self.registry.read().await;
			if !reg.is_joined(conn, room.as_str()) {
				return Err(OpError::authorization("NOT_JOINED", format!("not joined to room {room}")));
			}
			reg.conns_in_room_except(room.as_str(), conn)
		};

		metrics::counter!("huddle_server_signals_relayed_total").increment(1);

		self.hub
			.send_to_each(
				&targets,
				envelope(pb::event_envelope::Event::Signal(pb::SignalEvent {
					room_id: room.as_str().to_string(),
					kind: kind as i32,
					payload,
					from_user_id: user.as_str().to_string(),
				})),
			)
			.await;

		Ok(())
	}
}
