#![forbid(unsafe_code)]

//! Wire messages (`huddle.v1`), maintained by hand as prost structs.
//! Tag numbers are part of the protocol; never reuse a retired tag.

/// Machine-readable failure classes carried by `Error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ErrorKind {
	Unspecified = 0,
	/// Missing/invalid/expired credential; terminal for the attempt.
	Auth = 1,
	/// Malformed input; never retried.
	Validation = 2,
	/// Caller is not allowed to act on the target.
	Authorization = 3,
	/// The operation lost to an earlier, conflicting outcome.
	Conflict = 4,
	NotFound = 5,
	/// Storage unavailable; the caller may retry.
	Transient = 6,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RoomKind {
	RoomKindUnspecified = 0,
	Direct = 1,
	Group = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum InviteKind {
	InviteKindUnspecified = 0,
	Contact = 1,
	Room = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SignalKind {
	SignalKindUnspecified = 0,
	Offer = 1,
	Answer = 2,
	Ice = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum CallRole {
	CallRoleUnspecified = 0,
	Offerer = 1,
	Answerer = 2,
}

/// Top-level frame payload for both stream directions.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
	#[prost(uint32, tag = "1")]
	pub version: u32,
	/// Correlates a `Response`/`Error` with its `Request`; empty on pushes.
	#[prost(string, tag = "2")]
	pub request_id: String,
	#[prost(oneof = "envelope::Msg", tags = "3, 4, 5, 6, 7, 8, 9, 10")]
	pub msg: Option<envelope::Msg>,
}

pub mod envelope {
	#[derive(Clone, PartialEq, ::prost::Oneof)]
	pub enum Msg {
		#[prost(message, tag = "3")]
		Hello(super::Hello),
		#[prost(message, tag = "4")]
		Welcome(super::Welcome),
		#[prost(message, tag = "5")]
		Error(super::Error),
		#[prost(message, tag = "6")]
		Ping(super::Ping),
		#[prost(message, tag = "7")]
		Pong(super::Pong),
		#[prost(message, tag = "8")]
		Request(super::Request),
		#[prost(message, tag = "9")]
		Response(super::Response),
		#[prost(message, tag = "10")]
		Event(super::EventEnvelope),
	}
}

/// First client message on the control stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Hello {
	#[prost(string, tag = "1")]
	pub auth_token: String,
	#[prost(string, tag = "2")]
	pub client_name: String,
}

/// Server acknowledgement binding the connection to a user.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Welcome {
	#[prost(string, tag = "1")]
	pub server_name: String,
	#[prost(string, tag = "2")]
	pub user_id: String,
	#[prost(int64, tag = "3")]
	pub server_time_unix_ms: i64,
	#[prost(uint32, tag = "4")]
	pub max_frame_bytes: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Error {
	#[prost(enumeration = "ErrorKind", tag = "1")]
	pub kind: i32,
	/// Stable code such as `NOT_A_MEMBER`, `USED`, `BAD_TOKEN`.
	#[prost(string, tag = "2")]
	pub code: String,
	#[prost(string, tag = "3")]
	pub message: String,
	#[prost(string, tag = "4")]
	pub request_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ping {
	#[prost(int64, tag = "1")]
	pub client_time_unix_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Pong {
	#[prost(int64, tag = "1")]
	pub client_time_unix_ms: i64,
	#[prost(int64, tag = "2")]
	pub server_time_unix_ms: i64,
}

/// Client-initiated operation; answered by `Response` or `Error`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Request {
	#[prost(oneof = "request::Op", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14")]
	pub op: Option<request::Op>,
}

pub mod request {
	#[derive(Clone, PartialEq, ::prost::Oneof)]
	pub enum Op {
		#[prost(message, tag = "1")]
		ListRooms(super::ListRooms),
		#[prost(message, tag = "2")]
		AddContact(super::AddContact),
		#[prost(message, tag = "3")]
		CreateInvite(super::CreateInvite),
		#[prost(message, tag = "4")]
		AcceptInvite(super::AcceptInvite),
		#[prost(message, tag = "5")]
		SendMessage(super::SendMessage),
		#[prost(message, tag = "6")]
		GetHistory(super::GetHistory),
		#[prost(message, tag = "7")]
		JoinRoom(super::JoinRoom),
		#[prost(message, tag = "8")]
		LeaveRoom(super::LeaveRoom),
		#[prost(message, tag = "9")]
		SetTyping(super::SetTyping),
		#[prost(message, tag = "10")]
		MarkRead(super::MarkRead),
		#[prost(message, tag = "11")]
		SetPin(super::SetPin),
		#[prost(message, tag = "12")]
		SetMute(super::SetMute),
		#[prost(message, tag = "13")]
		DeleteRoom(super::DeleteRoom),
		#[prost(message, tag = "14")]
		Signal(super::SignalRequest),
	}
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListRooms {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddContact {
	#[prost(string, tag = "1")]
	pub email: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateInvite {
	#[prost(enumeration = "InviteKind", tag = "1")]
	pub kind: i32,
	/// Required iff `kind == Room`.
	#[prost(string, tag = "2")]
	pub room_id: String,
	/// 0 means the server's default lifetime.
	#[prost(uint32, tag = "3")]
	pub ttl_days: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AcceptInvite {
	#[prost(string, tag = "1")]
	pub token: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendMessage {
	#[prost(string, tag = "1")]
	pub room_id: String,
	#[prost(string, tag = "2")]
	pub text: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetHistory {
	#[prost(string, tag = "1")]
	pub room_id: String,
	/// Only messages strictly older than this; 0 means newest page.
	#[prost(int64, tag = "2")]
	pub before_unix_ms: i64,
	/// 0 means the server default page size.
	#[prost(uint32, tag = "3")]
	pub limit: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JoinRoom {
	#[prost(string, tag = "1")]
	pub room_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LeaveRoom {
	#[prost(string, tag = "1")]
	pub room_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetTyping {
	#[prost(string, tag = "1")]
	pub room_id: String,
	#[prost(bool, tag = "2")]
	pub typing: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MarkRead {
	#[prost(string, tag = "1")]
	pub room_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetPin {
	#[prost(string, tag = "1")]
	pub room_id: String,
	#[prost(bool, tag = "2")]
	pub pinned: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetMute {
	#[prost(string, tag = "1")]
	pub room_id: String,
	#[prost(bool, tag = "2")]
	pub muted: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteRoom {
	#[prost(string, tag = "1")]
	pub room_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignalRequest {
	#[prost(string, tag = "1")]
	pub room_id: String,
	#[prost(enumeration = "SignalKind", tag = "2")]
	pub kind: i32,
	/// Opaque SDP or ICE payload; never inspected by the relay.
	#[prost(string, tag = "3")]
	pub payload: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Response {
	#[prost(oneof = "response::Body", tags = "1, 2, 3, 4, 5, 6, 7")]
	pub body: Option<response::Body>,
}

pub mod response {
	#[derive(Clone, PartialEq, ::prost::Oneof)]
	pub enum Body {
		#[prost(message, tag = "1")]
		RoomList(super::RoomList),
		#[prost(message, tag = "2")]
		ContactAdded(super::ContactAdded),
		#[prost(message, tag = "3")]
		InviteCreated(super::InviteCreated),
		#[prost(message, tag = "4")]
		InviteAccepted(super::InviteAccepted),
		#[prost(message, tag = "5")]
		MessageSent(super::MessageSent),
		#[prost(message, tag = "6")]
		History(super::HistoryPage),
		#[prost(message, tag = "7")]
		Ack(super::Ack),
	}
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RoomList {
	#[prost(message, repeated, tag = "1")]
	pub rooms: Vec<RoomSummary>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContactAdded {
	#[prost(string, tag = "1")]
	pub room_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InviteCreated {
	#[prost(string, tag = "1")]
	pub token: String,
	/// Shareable URL; empty when no public base is configured.
	#[prost(string, tag = "2")]
	pub url: String,
	/// 0 means the invite never expires.
	#[prost(int64, tag = "3")]
	pub expires_unix_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InviteAccepted {
	#[prost(string, tag = "1")]
	pub room_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageSent {
	#[prost(message, optional, tag = "1")]
	pub message: Option<ChatMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ack {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RoomSummary {
	#[prost(string, tag = "1")]
	pub id: String,
	#[prost(string, optional, tag = "2")]
	pub title: Option<String>,
	#[prost(enumeration = "RoomKind", tag = "3")]
	pub kind: i32,
	#[prost(int64, tag = "4")]
	pub created_at_unix_ms: i64,
	#[prost(string, optional, tag = "5")]
	pub last_message: Option<String>,
	#[prost(int64, optional, tag = "6")]
	pub last_at_unix_ms: Option<i64>,
	#[prost(uint32, tag = "7")]
	pub unread: u32,
	#[prost(bool, tag = "8")]
	pub pinned: bool,
	#[prost(bool, tag = "9")]
	pub muted: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChatMessage {
	#[prost(string, tag = "1")]
	pub id: String,
	#[prost(string, tag = "2")]
	pub room_id: String,
	#[prost(string, tag = "3")]
	pub author_id: String,
	#[prost(string, tag = "4")]
	pub text: String,
	#[prost(int64, tag = "5")]
	pub at_unix_ms: i64,
}

/// One page of history, oldest-to-newest for display.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HistoryPage {
	#[prost(string, tag = "1")]
	pub room_id: String,
	#[prost(message, repeated, tag = "2")]
	pub messages: Vec<ChatMessage>,
	/// Cursor for the next (older) page; 0 when `has_more` is false.
	#[prost(int64, tag = "3")]
	pub next_before_unix_ms: i64,
	#[prost(bool, tag = "4")]
	pub has_more: bool,
}

/// Server→client push.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EventEnvelope {
	#[prost(int64, tag = "1")]
	pub server_time_unix_ms: i64,
	#[prost(oneof = "event_envelope::Event", tags = "2, 3, 4, 5, 6, 7, 8, 9, 10, 11")]
	pub event: Option<event_envelope::Event>,
}

pub mod event_envelope {
	#[derive(Clone, PartialEq, ::prost::Oneof)]
	pub enum Event {
		#[prost(message, tag = "2")]
		RoomPatch(super::RoomPatchEvent),
		#[prost(message, tag = "3")]
		RoomRemoved(super::RoomRemovedEvent),
		#[prost(message, tag = "4")]
		MessageNew(super::MessageNewEvent),
		#[prost(message, tag = "5")]
		Typing(super::TypingEvent),
		#[prost(message, tag = "6")]
		Read(super::ReadEvent),
		#[prost(message, tag = "7")]
		CallRole(super::CallRoleEvent),
		#[prost(message, tag = "8")]
		CallReady(super::CallReadyEvent),
		#[prost(message, tag = "9")]
		CallFull(super::CallFullEvent),
		#[prost(message, tag = "10")]
		Signal(super::SignalEvent),
		#[prost(message, tag = "11")]
		Lagged(super::LaggedEvent),
	}
}

/// Partial room-list update; unset fields are untouched on merge.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RoomPatch {
	#[prost(string, optional, tag = "1")]
	pub title: Option<String>,
	#[prost(string, optional, tag = "2")]
	pub last_message: Option<String>,
	#[prost(int64, optional, tag = "3")]
	pub last_at_unix_ms: Option<i64>,
	#[prost(uint32, optional, tag = "4")]
	pub unread: Option<u32>,
	#[prost(bool, optional, tag = "5")]
	pub pinned: Option<bool>,
	#[prost(bool, optional, tag = "6")]
	pub muted: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RoomPatchEvent {
	#[prost(string, tag = "1")]
	pub room_id: String,
	#[prost(message, optional, tag = "2")]
	pub patch: Option<RoomPatch>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RoomRemovedEvent {
	#[prost(string, tag = "1")]
	pub room_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageNewEvent {
	#[prost(message, optional, tag = "1")]
	pub message: Option<ChatMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TypingEvent {
	#[prost(string, tag = "1")]
	pub room_id: String,
	#[prost(string, tag = "2")]
	pub user_id: String,
	#[prost(bool, tag = "3")]
	pub typing: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadEvent {
	#[prost(string, tag = "1")]
	pub room_id: String,
	#[prost(string, tag = "2")]
	pub user_id: String,
	#[prost(int64, tag = "3")]
	pub at_unix_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallRoleEvent {
	#[prost(string, tag = "1")]
	pub room_id: String,
	#[prost(enumeration = "CallRole", tag = "2")]
	pub role: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallReadyEvent {
	#[prost(string, tag = "1")]
	pub room_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallFullEvent {
	#[prost(string, tag = "1")]
	pub room_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignalEvent {
	#[prost(string, tag = "1")]
	pub room_id: String,
	#[prost(enumeration = "SignalKind", tag = "2")]
	pub kind: i32,
	#[prost(string, tag = "3")]
	pub payload: String,
	#[prost(string, tag = "4")]
	pub from_user_id: String,
}

/// Emitted after pushes were dropped on a full per-connection queue.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LaggedEvent {
	#[prost(uint64, tag = "1")]
	pub dropped: u64,
}
