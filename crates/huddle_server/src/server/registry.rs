#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use huddle_domain::{RoomKind, UserId};

pub type ConnId = u64;

/// Call capacity of a direct room.
pub const CALL_CAPACITY: usize = 2;

/// Deterministic role split for a two-party call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallAssignment {
	pub offerer: ConnId,
	pub answerer: ConnId,
}

#[derive(Debug, PartialEq, Eq)]
pub enum JoinOutcome {
	/// The connection now occupies the room. `ready` is set when this join
	/// brought a direct room to exactly two occupants.
	Joined { ready: Option<CallAssignment> },
	AlreadyJoined,
	/// Direct room at capacity; the connection was not added.
	Full,
}

/// Advisory map of live connections: who they authenticate as and which
/// rooms they currently occupy. Never authoritative for membership; the
/// store is. All state is process-local and mutated under one lock.
#[derive(Debug, Default)]
pub struct Registry {
	conns: HashMap<ConnId, ConnEntry>,
	rooms: HashMap<String, HashSet<ConnId>>,
	users: HashMap<String, HashSet<ConnId>>,
}

#[derive(Debug)]
struct ConnEntry {
	user_id: UserId,
	/// Sortable identifier used for deterministic role assignment;
	/// arrival order is not reliable once reconnects happen.
	label: String,
	joined: HashSet<String>,
}

impl Registry {
	pub fn add_conn(&mut self, conn: ConnId, user_id: UserId, label: String) {
		self.users.entry(user_id.as_str().to_string()).or_default().insert(conn);
		self.conns.insert(
			conn,
			ConnEntry {
				user_id,
				label,
				joined: HashSet::new(),
			},
		);
	}

	/// Drop a connection from every room it occupied; returns the rooms
	/// it was in. No role re-assignment happens here.
	pub fn remove_conn(&mut self, conn: ConnId) -> Vec<String> {
		let Some(entry) = self.conns.remove(&conn) else {
			return Vec::new();
		};

		if let Some(set) = self.users.get_mut(entry.user_id.as_str()) {
			set.remove(&conn);
			if set.is_empty() {
				self.users.remove(entry.user_id.as_str());
			}
		}

		let mut left = Vec::new();
		for room in entry.joined {
			if let Some(occupants) = self.rooms.get_mut(&room) {
				occupants.remove(&conn);
				if occupants.is_empty() {
					self.rooms.remove(&room);
				}
			}
			left.push(room);
		}

		left
	}

	pub fn user_of(&self, conn: ConnId) -> Option<&UserId> {
		self.conns.get(&conn).map(|e| &e.user_id)
	}

	pub fn join(&mut self, conn: ConnId, room: &str, kind: RoomKind) -> JoinOutcome {
		let Some(entry) = self.conns.get_mut(&conn) else {
			return JoinOutcome::Full;
		};

		if entry.joined.contains(room) {
			return JoinOutcome::AlreadyJoined;
		}

		let occupants = self.rooms.entry(room.to_string()).or_default();
		if kind == RoomKind::Direct && occupants.len() >= CALL_CAPACITY {
			return JoinOutcome::Full;
		}

		occupants.insert(conn);
		entry.joined.insert(room.to_string());

		let ready = if kind == RoomKind::Direct && occupants.len() == CALL_CAPACITY {
			let mut pair: Vec<ConnId> = occupants.iter().copied().collect();
			pair.sort_by(|a, b| {
				let la = self.conns.get(a).map(|e| e.label.as_str()).unwrap_or("");
				let lb = self.conns.get(b).map(|e| e.label.as_str()).unwrap_or("");
				la.cmp(lb)
			});
			Some(CallAssignment {
				offerer: pair[0],
				answerer: pair[1],
			})
		} else {
			None
		};

		JoinOutcome::Joined { ready }
	}

	pub fn leave(&mut self, conn: ConnId, room: &str) {
		if let Some(entry) = self.conns.get_mut(&conn) {
			entry.joined.remove(room);
		}

		if let Some(occupants) = self.rooms.get_mut(room) {
			occupants.remove(&conn);
			if occupants.is_empty() {
				self.rooms.remove(room);
			}
		}
	}

	pub fn is_joined(&self, conn: ConnId, room: &str) -> bool {
		self.conns.get(&conn).is_some_and(|e| e.joined.contains(room))
	}

	/// Current occupants of a room, unordered.
	pub fn conns_in_room(&self, room: &str) -> Vec<ConnId> {
		self.rooms.get(room).map(|s| s.iter().copied().collect()).unwrap_or_default()
	}

	pub fn conns_in_room_except(&self, room: &str, excluded: ConnId) -> Vec<ConnId> {
		self.rooms
			.get(room)
			.map(|s| s.iter().copied().filter(|c| *c != excluded).collect())
			.unwrap_or_default()
	}

	/// Every live connection authenticated as `user`.
	pub fn conns_for_user(&self, user: &UserId) -> Vec<ConnId> {
		self.users
			.get(user.as_str())
			.map(|s| s.iter().copied().collect())
			.unwrap_or_default()
	}

	pub fn occupancy(&self, room: &str) -> usize {
		self.rooms.get(room).map(|s| s.len()).unwrap_or(0)
	}
}
