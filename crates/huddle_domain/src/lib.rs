#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown room kind: {0}")]
	UnknownRoomKind(String),
	#[error("unknown invite kind: {0}")]
	UnknownInviteKind(String),
}

/// Stable user identifier, owned by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
	/// Create a non-empty `UserId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for UserId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		UserId::new(s.to_string())
	}
}

/// Room (conversation/call context) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
	/// Create a non-empty `RoomId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}

	/// Fresh opaque id for a group room.
	pub fn new_group() -> Self {
		Self(uuid::Uuid::new_v4().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for RoomId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for RoomId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomId::new(s.to_string())
	}
}

/// Room kinds. Direct rooms are the 2-party call context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
	Direct,
	Group,
}

impl RoomKind {
	/// Stable string identifier, as stored in `rooms.type`.
	pub const fn as_str(self) -> &'static str {
		match self {
			RoomKind::Direct => "direct",
			RoomKind::Group => "group",
		}
	}
}

impl fmt::Display for RoomKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for RoomKind {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"direct" => Ok(RoomKind::Direct),
			"group" => Ok(RoomKind::Group),
			other => Err(ParseIdError::UnknownRoomKind(other.to_string())),
		}
	}
}

/// Invite kinds, as stored in `invites.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteKind {
	Contact,
	Room,
}

impl InviteKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			InviteKind::Contact => "contact",
			InviteKind::Room => "room",
		}
	}
}

impl fmt::Display for InviteKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for InviteKind {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"contact" => Ok(InviteKind::Contact),
			"room" => Ok(InviteKind::Room),
			other => Err(ParseIdError::UnknownInviteKind(other.to_string())),
		}
	}
}

/// Canonical contact pair: smaller id first, so one row represents the
/// pair regardless of who initiated contact.
pub fn contact_pair(a: &UserId, b: &UserId) -> (UserId, UserId) {
	if a <= b {
		(a.clone(), b.clone())
	} else {
		(b.clone(), a.clone())
	}
}

/// Canonical direct-room id for an unordered user pair: `dm:<a>:<b>` with
/// the pair sorted lexicographically. Order-independent and idempotent.
pub fn direct_room_id(a: &UserId, b: &UserId) -> RoomId {
	let (x, y) = contact_pair(a, b);
	RoomId(format!("dm:{}:{}", x.as_str(), y.as_str()))
}

/// One row of a user's room list, as served by the directory and patched
/// by server pushes. Client and server share this shape so reconciliation
/// on a patch is a pure merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
	pub id: RoomId,
	pub title: Option<String>,
	pub kind: RoomKind,
	pub created_at: i64,
	pub last_message: Option<String>,
	pub last_at: Option<i64>,
	pub unread: u32,
	pub pinned: bool,
	pub muted: bool,
}

impl RoomSummary {
	/// Last activity in the room: latest message time, falling back to the
	/// room's creation time when no messages exist yet.
	pub fn last_activity(&self) -> i64 {
		self.last_at.unwrap_or(self.created_at)
	}
}

/// Room-list ordering contract: pinned rooms first, then last activity
/// descending, room id as the final tiebreak. Both the server's directory
/// response and a client applying patches use this same function.
pub fn sort_room_summaries(rooms: &mut [RoomSummary]) {
	rooms.sort_by(|a, b| {
		b.pinned
			.cmp(&a.pinned)
			.then_with(|| b.last_activity().cmp(&a.last_activity()))
			.then_with(|| a.id.cmp(&b.id))
	});
}

#[cfg(test)]
mod tests {
	use super::*;

	fn user(s: &str) -> UserId {
		UserId::new(s).expect("valid UserId")
	}

	fn summary(id: &str, pinned: bool, created_at: i64, last_at: Option<i64>) -> RoomSummary {
		RoomSummary {
			id: RoomId::new(id).expect("valid RoomId"),
			title: None,
			kind: RoomKind::Group,
			created_at,
			last_message: last_at.map(|_| "hi".to_string()),
			last_at,
			unread: 0,
			pinned,
			muted: false,
		}
	}

	#[test]
	fn direct_room_id_is_order_independent() {
		let a = user("alice");
		let b = user("bob");
		assert_eq!(direct_room_id(&a, &b), direct_room_id(&b, &a));
		assert_eq!(direct_room_id(&a, &b).as_str(), "dm:alice:bob");
	}

	#[test]
	fn direct_room_id_is_idempotent_and_distinct_per_pair() {
		let a = user("u1");
		let b = user("u2");
		let c = user("u3");
		assert_eq!(direct_room_id(&a, &b), direct_room_id(&a, &b));
		assert_ne!(direct_room_id(&a, &b), direct_room_id(&a, &c));
	}

	#[test]
	fn contact_pair_puts_smaller_id_first() {
		let (x, y) = contact_pair(&user("zoe"), &user("amy"));
		assert_eq!(x.as_str(), "amy");
		assert_eq!(y.as_str(), "zoe");
	}

	#[test]
	fn kinds_parse_and_display() {
		assert_eq!("direct".parse::<RoomKind>().unwrap(), RoomKind::Direct);
		assert_eq!("GROUP".parse::<RoomKind>().unwrap(), RoomKind::Group);
		assert_eq!(RoomKind::Direct.to_string(), "direct");
		assert_eq!("room".parse::<InviteKind>().unwrap(), InviteKind::Room);
		assert!("webinar".parse::<RoomKind>().is_err());
	}

	#[test]
	fn rejects_empty_ids() {
		assert!(UserId::new("").is_err());
		assert!(RoomId::new("   ").is_err());
	}

	#[test]
	fn ordering_puts_pinned_first_then_recency() {
		let mut rooms = vec![
			summary("old", false, 10, Some(100)),
			summary("pinned-stale", true, 10, Some(50)),
			summary("fresh", false, 10, Some(200)),
			summary("pinned-fresh", true, 10, Some(150)),
		];
		sort_room_summaries(&mut rooms);

		let ids: Vec<&str> = rooms.iter().map(|r| r.id.as_str()).collect();
		assert_eq!(ids, vec!["pinned-fresh", "pinned-stale", "fresh", "old"]);
	}

	#[test]
	fn ordering_falls_back_to_creation_time() {
		let mut rooms = vec![
			summary("empty-new", false, 300, None),
			summary("busy", false, 10, Some(200)),
			summary("empty-old", false, 100, None),
		];
		sort_room_summaries(&mut rooms);

		let ids: Vec<&str> = rooms.iter().map(|r| r.id.as_str()).collect();
		assert_eq!(ids, vec!["empty-new", "busy", "empty-old"]);
	}
}
