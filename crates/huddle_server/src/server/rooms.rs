#![forbid(unsafe_code)]

use std::sync::Arc;

use huddle_domain::{RoomId, RoomKind, RoomSummary, UserId, sort_room_summaries};
use huddle_protocol::pb;
use tokio::sync::RwLock;
use tracing::debug;

use crate::server::error::{OpError, OpResult};
use crate::server::hub::{PushHub, envelope};
use crate::server::registry::{ConnId, JoinOutcome, Registry};
use crate::server::store::{ChatStore, MessageRecord};
use crate::util::time::unix_ms_now;

/// Hard cap on a history page regardless of what the client asks for.
const MAX_HISTORY_PAGE: u32 = 200;

/// Room directory and event router: answers directory reads and fans
/// typed events out to exactly the connections that should see them.
/// Persistence always happens before the corresponding broadcast.
#[derive(Clone)]
pub struct RoomService {
	store: ChatStore,
	registry: Arc<RwLock<Registry>>,
	hub: PushHub,
	history_page_size: u32,
}

pub(crate) fn kind_to_pb(kind: RoomKind) -> pb::RoomKind {
	match kind {
		RoomKind::Direct => pb::RoomKind::Direct,
		RoomKind::Group => pb::RoomKind::Group,
	}
}

pub(crate) fn message_to_pb(m: &MessageRecord) -> pb::ChatMessage {
	pb::ChatMessage {
		id: m.id.clone(),
		room_id: m.room_id.clone(),
		author_id: m.author_id.clone(),
		text: m.text.clone(),
		at_unix_ms: m.at,
	}
}

fn summary_to_pb(s: RoomSummary) -> pb::RoomSummary {
	pb::RoomSummary {
		id: s.id.as_str().to_string(),
		title: s.title,
		kind: kind_to_pb(s.kind) as i32,
		created_at_unix_ms: s.created_at,
		last_message: s.last_message,
		last_at_unix_ms: s.last_at,
		unread: s.unread,
		pinned: s.pinned,
		muted: s.muted,
	}
}

impl RoomService {
	pub fn new(store: ChatStore, registry: Arc<RwLock<Registry>>, hub: PushHub, history_page_size: u32) -> Self {
		Self {
			store,
			registry,
			hub,
			history_page_size,
		}
	}

	/// Directory read: live-membership rooms in display order. The same
	/// ordering function runs client-side on every patch.
	pub async fn list_rooms(&self, user: &UserId) -> OpResult<Vec<pb::RoomSummary>> {
		let mut rooms = self.store.list_rooms_for_user(user).await.map_err(OpError::transient)?;
		sort_room_summaries(&mut rooms);
		Ok(rooms.into_iter().map(summary_to_pb).collect())
	}

	/// Persist a chat message, then push it to the room's occupants and a
	/// per-member room patch to each member's out-of-room connections.
	pub async fn send_message(
		&self,
		_conn: ConnId,
		user: &UserId,
		room: &RoomId,
		text: &str,
	) -> OpResult<pb::ChatMessage> {
		if text.trim().is_empty() {
			return Err(OpError::validation("EMPTY", "message text must be non-empty"));
		}

		if !self.store.is_live_member(room, user).await.map_err(OpError::transient)? {
			return Err(OpError::authorization("NOT_A_MEMBER", format!("not a member of room {room}")));
		}

		let record = self
			.store
			.insert_message(room, user, text, unix_ms_now())
			.await
			.map_err(OpError::transient)?;

		self.store.bump_unread_others(room, user).await.map_err(OpError::transient)?;
		let unreads = self.store.member_unreads(room).await.map_err(OpError::transient)?;

		let message = message_to_pb(&record);

		// Joined connections get the message itself; members' remaining
		// connections get a patch so out-of-room room lists update.
		let (joined, patch_targets) = {
			let reg = self.registry.read().await;
			let joined = reg.conns_in_room(room.as_str());
			let patch_targets: Vec<(Vec<ConnId>, u32)> = unreads
				.iter()
				.map(|(member, unread)| {
					let conns: Vec<ConnId> = reg
						.conns_for_user(member)
						.into_iter()
						.filter(|c| !joined.contains(c))
						.collect();
					(conns, *unread)
				})
				.collect();
			(joined, patch_targets)
		};

		self.hub
			.send_to_each(
				&joined,
				envelope(pb::event_envelope::Event::MessageNew(pb::MessageNewEvent {
					message: Some(message.clone()),
				})),
			)
			.await;

		for (conns, unread) in patch_targets {
			let patch = pb::RoomPatch {
				last_message: Some(record.text.clone()),
				last_at_unix_ms: Some(record.at),
				unread: Some(unread),
				..Default::default()
			};
			self.hub
				.send_to_each(
					&conns,
					envelope(pb::event_envelope::Event::RoomPatch(pb::RoomPatchEvent {
						room_id: room.as_str().to_string(),
						patch: Some(patch),
					})),
				)
				.await;
		}

		metrics::counter!("huddle_server_messages_total").increment(1);
		Ok(message)
	}

	/// Ephemeral typing relay; nothing is persisted.
	pub async fn set_typing(&self, conn: ConnId, user: &UserId, room: &RoomId, typing: bool) -> OpResult<()> {
		let targets = {
			let reg = self.registry.read().await;
			if !reg.is_joined(conn, room.as_str()) {
				return Err(OpError::authorization("NOT_JOINED", format!("not joined to room {room}")));
			}
			reg.conns_in_room_except(room.as_str(), conn)
		};

		self.hub
			.send_to_each(
				&targets,
				envelope(pb::event_envelope::Event::Typing(pb::TypingEvent {
					room_id: room.as_str().to_string(),
					user_id: user.as_str().to_string(),
					typing,
				})),
			)
			.await;

		Ok(())
	}

	/// Reset the reader's unread, relay the receipt into the room and
	/// converge the reader's other devices.
	pub async fn mark_read(&self, conn: ConnId, user: &UserId, room: &RoomId) -> OpResult<()> {
		self.store.reset_unread(room, user).await.map_err(OpError::transient)?;
		let at = unix_ms_now();

		let (others, own) = {
			let reg = self.registry.read().await;
			(reg.conns_in_room_except(room.as_str(), conn), reg.conns_for_user(user))
		};

		self.hub
			.send_to_each(
				&others,
				envelope(pb::event_envelope::Event::Read(pb::ReadEvent {
					room_id: room.as_str().to_string(),
					user_id: user.as_str().to_string(),
					at_unix_ms: at,
				})),
			)
			.await;

		self.patch_to(&own, room, pb::RoomPatch {
			unread: Some(0),
			..Default::default()
		})
		.await;

		Ok(())
	}

	pub async fn set_pinned(&self, user: &UserId, room: &RoomId, pinned: bool) -> OpResult<()> {
		let updated = self.store.set_pinned(room, user, pinned).await.map_err(OpError::transient)?;
		if !updated {
			return Err(OpError::authorization("NOT_A_MEMBER", format!("not a member of room {room}")));
		}

		let own = self.registry.read().await.conns_for_user(user);
		self.patch_to(&own, room, pb::RoomPatch {
			pinned: Some(pinned),
			..Default::default()
		})
		.await;

		Ok(())
	}

	pub async fn set_muted(&self, user: &UserId, room: &RoomId, muted: bool) -> OpResult<()> {
		let updated = self.store.set_muted(room, user, muted).await.map_err(OpError::transient)?;
		if !updated {
			return Err(OpError::authorization("NOT_A_MEMBER", format!("not a member of room {room}")));
		}

		let own = self.registry.read().await.conns_for_user(user);
		self.patch_to(&own, room, pb::RoomPatch {
			muted: Some(muted),
			..Default::default()
		})
		.await;

		Ok(())
	}

	/// Per-user soft delete. The membership row is tombstoned (created
	/// tombstoned if absent) and the user's connections drop the room.
	pub async fn soft_delete(&self, user: &UserId, room: &RoomId) -> OpResult<()> {
		self.store
			.soft_delete_membership(room, user, unix_ms_now())
			.await
			.map_err(OpError::transient)?;

		let own = self.registry.read().await.conns_for_user(user);
		self.hub
			.send_to_each(
				&own,
				envelope(pb::event_envelope::Event::RoomRemoved(pb::RoomRemovedEvent {
					room_id: room.as_str().to_string(),
				})),
			)
			.await;

		Ok(())
	}

	/// One page of history: newest-to-oldest internally, oldest-to-newest
	/// on the wire for display.
	pub async fn history(&self, user: &UserId, room: &RoomId, before: Option<i64>, limit: u32) -> OpResult<pb::HistoryPage> {
		if !self.store.is_live_member(room, user).await.map_err(OpError::transient)? {
			return Err(OpError::authorization("NOT_A_MEMBER", format!("not a member of room {room}")));
		}

		let limit = if limit == 0 {
			self.history_page_size
		} else {
			limit.min(MAX_HISTORY_PAGE)
		};

		let mut rows = self
			.store
			.history_page(room, before, limit + 1)
			.await
			.map_err(OpError::transient)?;

		let has_more = rows.len() as u32 > limit;
		rows.truncate(limit as usize);
		let next_before_unix_ms = if has_more { rows.last().map(|m| m.at).unwrap_or(0) } else { 0 };
		rows.reverse();

		Ok(pb::HistoryPage {
			room_id: room.as_str().to_string(),
			messages: rows.iter().map(message_to_pb).collect(),
			next_before_unix_ms,
			has_more,
		})
	}

	/// Live-presence join. Membership is not required here; it only
	/// governs the directory. Direct rooms are the 2-party call context:
	/// the second occupant triggers deterministic role assignment, a
	/// third is told the room is full.
	pub async fn join(&self, conn: ConnId, room: &RoomId) -> OpResult<()> {
		let record = self
			.store
			.get_room(room)
			.await
			.map_err(OpError::transient)?
			.ok_or_else(|| OpError::not_found("UNKNOWN_ROOM", format!("no such room {room}")))?;

		let outcome = self.registry.write().await.join(conn, room.as_str(), record.kind);

		match outcome {
			JoinOutcome::Full => {
				metrics::counter!("huddle_server_call_room_full_total").increment(1);
				self.hub
					.send_to(
						conn,
						envelope(pb::event_envelope::Event::CallFull(pb::CallFullEvent {
							room_id: room.as_str().to_string(),
						})),
					)
					.await;
			}
			JoinOutcome::Joined { ready: Some(assignment) } => {
				debug!(room = %room, offerer = assignment.offerer, answerer = assignment.answerer, "call ready");
				self.hub
					.send_to(
						assignment.offerer,
						envelope(pb::event_envelope::Event::CallRole(pb::CallRoleEvent {
							room_id: room.as_str().to_string(),
							role: pb::CallRole::Offerer as i32,
						})),
					)
					.await;
				self.hub
					.send_to(
						assignment.answerer,
						envelope(pb::event_envelope::Event::CallRole(pb::CallRoleEvent {
							room_id: room.as_str().to_string(),
							role: pb::CallRole::Answerer as i32,
						})),
					)
					.await;
				self.hub
					.send_to_each(
						&[assignment.offerer, assignment.answerer],
						envelope(pb::event_envelope::Event::CallReady(pb::CallReadyEvent {
							room_id: room.as_str().to_string(),
						})),
					)
					.await;
			}
			JoinOutcome::Joined { ready: None } | JoinOutcome::AlreadyJoined => {}
		}

		Ok(())
	}

	pub async fn leave(&self, conn: ConnId, room: &RoomId) -> OpResult<()> {
		self.registry.write().await.leave(conn, room.as_str());
		Ok(())
	}

	async fn patch_to(&self, conns: &[ConnId], room: &RoomId, patch: pb::RoomPatch) {
		self.hub
			.send_to_each(
				conns,
				envelope(pb::event_envelope::Event::RoomPatch(pb::RoomPatchEvent {
					room_id: room.as_str().to_string(),
					patch: Some(patch),
				})),
			)
			.await;
	}
}
