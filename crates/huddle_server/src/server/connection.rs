#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context as _, anyhow};
use bytes::BytesMut;
use huddle_domain::{RoomId, UserId};
use huddle_protocol::framing::{DEFAULT_MAX_FRAME_SIZE, encode_frame, try_decode_frame};
use huddle_protocol::pb;
use huddle_protocol::version::PROTOCOL_VERSION;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SecretString;
use crate::server::error::{OpError, OpResult};
use crate::server::hub::PushHub;
use crate::server::invites::InviteService;
use crate::server::registry::{ConnId, Registry};
use crate::server::rooms::RoomService;
use crate::server::signaling::SignalRelay;
use crate::util::time::unix_ms_now;

/// Per-connection server settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	pub max_frame_bytes: u32,

	/// HMAC secret the identity verifier checks bearer tokens against.
	pub auth_hmac_secret: SecretString,

	pub request_rate_limit_per_conn_burst: u32,
	pub request_rate_limit_per_conn_per_minute: u32,
	pub request_rate_limit_per_room_burst: u32,
	pub request_rate_limit_per_room_per_minute: u32,
}

#[derive(Debug, Clone)]
struct TokenBucket {
	capacity: f64,
	tokens: f64,
	refill_per_sec: f64,
	last: Instant,
}

impl TokenBucket {
	fn new(capacity: u32, refill_per_minute: u32) -> Option<Self> {
		if capacity == 0 || refill_per_minute == 0 {
			return None;
		}
		Some(Self {
			capacity: capacity as f64,
			tokens: capacity as f64,
			refill_per_sec: refill_per_minute as f64 / 60.0,
			last: Instant::now(),
		})
	}

	fn allow(&mut self) -> bool {
		let now = Instant::now();
		let elapsed = now.duration_since(self.last).as_secs_f64();
		if elapsed > 0.0 {
			self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
			self.last = now;
		}
		if self.tokens >= 1.0 {
			self.tokens -= 1.0;
			true
		} else {
			false
		}
	}
}

#[derive(Debug)]
struct RequestRateLimiter {
	per_connection: Option<TokenBucket>,
	per_room: HashMap<String, TokenBucket>,
	per_room_burst: u32,
	per_room_per_minute: u32,
	max_rooms: usize,
}

impl RequestRateLimiter {
	fn new(settings: &ConnectionSettings) -> Self {
		Self {
			per_connection: TokenBucket::new(
				settings.request_rate_limit_per_conn_burst,
				settings.request_rate_limit_per_conn_per_minute,
			),
			per_room: HashMap::new(),
			per_room_burst: settings.request_rate_limit_per_room_burst,
			per_room_per_minute: settings.request_rate_limit_per_room_per_minute,
			max_rooms: 1024,
		}
	}

	fn allow_connection(&mut self) -> bool {
		match self.per_connection.as_mut() {
			Some(bucket) => bucket.allow(),
			None => true,
		}
	}

	fn allow_room(&mut self, room: &str) -> bool {
		let Some(bucket) = TokenBucket::new(self.per_room_burst, self.per_room_per_minute) else {
			return true;
		};

		if self.per_room.len() >= self.max_rooms {
			self.per_room.clear();
		}

		self.per_room.entry(room.to_string()).or_insert(bucket).allow()
	}
}

pub async fn handle_connection(
	conn_id: ConnId,
	connection: quinn::Connection,
	registry: Arc<RwLock<Registry>>,
	hub: PushHub,
	rooms: RoomService,
	invites: InviteService,
	signals: SignalRelay,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("huddle_server_active_connections").decrement(1.0);
		}
	}

	metrics::gauge!("huddle_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let (mut control_send, mut control_recv) =
		connection.accept_bi().await.context("accept control bidirectional stream")?;

	let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<pb::Envelope>();
	let mut rate_limiter = RequestRateLimiter::new(&settings);

	let reader_task = tokio::spawn(async move {
		let mut buf = BytesMut::with_capacity(16 * 1024);
		let mut tmp = [0u8; 8192];

		loop {
			let n = match control_recv.read(&mut tmp).await {
				Ok(Some(n)) => n,
				Ok(None) => return Ok::<(), anyhow::Error>(()),
				Err(e) => return Err(anyhow!(e).context("control stream read failed")),
			};

			metrics::counter!("huddle_server_control_bytes_in_total").increment(n as u64);
			buf.extend_from_slice(&tmp[..n]);

			loop {
				match try_decode_frame::<pb::Envelope>(&mut buf, DEFAULT_MAX_FRAME_SIZE) {
					Ok(Some(msg)) => {
						metrics::counter!("huddle_server_envelopes_in_total").increment(1);
						if ctrl_tx.send(msg).is_err() {
							return Ok(());
						}
					}
					Ok(None) => break,
					Err(e) => {
						metrics::counter!("huddle_server_control_decode_errors_total").increment(1);
						return Err(anyhow!(e).context("failed to decode control frame"));
					}
				}
			}
		}
	});

	let hello = wait_for_hello(&mut ctrl_rx).await?;
	info!(conn_id, client_name = %hello.client_name, "received Hello");
	metrics::counter!("huddle_server_hello_total").increment(1);

	// Identity binding happens before any room operation is possible.
	// Missing and bad credentials are distinct, both terminal.
	let token = hello.auth_token.trim();
	if token.is_empty() {
		send_envelope(
			&mut control_send,
			error_envelope(OpError::auth("NO_TOKEN", "connection requires a bearer token"), ""),
		)
		.await
		.ok();
		return Ok(());
	}

	let user = match crate::server::auth::verify_token(token, settings.auth_hmac_secret.expose()) {
		Ok(claims) => match UserId::new(claims.sub) {
			Ok(user) => user,
			Err(_) => {
				send_envelope(
					&mut control_send,
					error_envelope(OpError::auth("BAD_TOKEN", "token carries no subject"), ""),
				)
				.await
				.ok();
				return Ok(());
			}
		},
		Err(e) => {
			warn!(conn_id, error = %e, "bearer token rejected");
			send_envelope(&mut control_send, error_envelope(OpError::auth("BAD_TOKEN", e.to_string()), ""))
				.await
				.ok();
			return Ok(());
		}
	};

	info!(conn_id, user = %user, "connection authenticated");

	send_envelope(&mut control_send, pb::Envelope {
		version: PROTOCOL_VERSION,
		request_id: String::new(),
		msg: Some(pb::envelope::Msg::Welcome(pb::Welcome {
			server_name: format!("huddle-server/{}", env!("CARGO_PKG_VERSION")),
			user_id: user.as_str().to_string(),
			server_time_unix_ms: unix_ms_now(),
			max_frame_bytes: settings.max_frame_bytes,
		})),
	})
	.await
	.context("send Welcome")?;

	{
		let mut reg = registry.write().await;
		reg.add_conn(conn_id, user.clone(), Uuid::new_v4().to_string());
	}
	let mut push_rx = hub.register(conn_id).await;

	let connection_for_events = connection.clone();
	let events_task = tokio::spawn(async move {
		let (mut events_send, _recv) = connection_for_events
			.accept_bi()
			.await
			.context("accept events bidirectional stream")?;

		while let Some(event) = push_rx.recv().await {
			let frame = encode_frame(
				&pb::Envelope {
					version: PROTOCOL_VERSION,
					request_id: String::new(),
					msg: Some(pb::envelope::Msg::Event(event)),
				},
				DEFAULT_MAX_FRAME_SIZE,
			)
			.context("encode event frame")?;

			metrics::counter!("huddle_server_events_out_total").increment(1);
			events_send.write_all(&frame).await.context("events stream write failed")?;
		}

		Ok::<(), anyhow::Error>(())
	});

	let loop_result = async {
		while let Some(env) = ctrl_rx.recv().await {
			let Some(msg) = env.msg else { continue };

			match msg {
				pb::envelope::Msg::Ping(ping) => {
					send_envelope(&mut control_send, pb::Envelope {
						version: PROTOCOL_VERSION,
						request_id: env.request_id,
						msg: Some(pb::envelope::Msg::Pong(pb::Pong {
							client_time_unix_ms: ping.client_time_unix_ms,
							server_time_unix_ms: unix_ms_now(),
						})),
					})
					.await?;
				}

				pb::envelope::Msg::Request(req) => {
					let Some(op) = req.op else {
						send_envelope(
							&mut control_send,
							error_envelope(OpError::validation("NO_OP", "request carries no operation"), &env.request_id),
						)
						.await?;
						continue;
					};

					if !rate_limiter.allow_connection()
						|| room_scope(&op).is_some_and(|room| !rate_limiter.allow_room(room))
					{
						metrics::counter!("huddle_server_requests_rate_limited_total").increment(1);
						send_envelope(
							&mut control_send,
							error_envelope(OpError::authorization("RATE_LIMITED", "slow down"), &env.request_id),
						)
						.await?;
						continue;
					}

					metrics::counter!("huddle_server_requests_total").increment(1);
					let reply = match dispatch_request(conn_id, &user, op, &rooms, &invites, &signals).await {
						Ok(body) => pb::Envelope {
							version: PROTOCOL_VERSION,
							request_id: env.request_id,
							msg: Some(pb::envelope::Msg::Response(pb::Response { body: Some(body) })),
						},
						Err(err) => {
							if err.is_transient() {
								warn!(conn_id, error = %err, "request failed on storage");
							} else {
								debug!(conn_id, error = %err, "request rejected");
							}
							metrics::counter!("huddle_server_requests_failed_total").increment(1);
							error_envelope(err, &env.request_id)
						}
					};

					send_envelope(&mut control_send, reply).await?;
				}

				pb::envelope::Msg::Hello(_) => {
					debug!(conn_id, "ignoring duplicate Hello");
				}

				other => {
					warn!(conn_id, "unhandled control message: {:?}", other);
				}
			}
		}
		Ok::<(), anyhow::Error>(())
	}
	.await;

	// Disconnect: drop the connection from every room it occupied. No
	// role re-assignment happens; a fresh join recomputes from scratch.
	{
		let mut reg = registry.write().await;
		let left = reg.remove_conn(conn_id);
		if !left.is_empty() {
			debug!(conn_id, rooms = left.len(), "connection closed, left rooms");
		}
	}
	hub.unregister(conn_id).await;

	let _ = reader_task.await;
	let _ = events_task.await;

	loop_result
}

async fn wait_for_hello(ctrl_rx: &mut mpsc::UnboundedReceiver<pb::Envelope>) -> anyhow::Result<pb::Hello> {
	while let Some(env) = ctrl_rx.recv().await {
		let Some(msg) = env.msg else { continue };
		if let pb::envelope::Msg::Hello(h) = msg {
			return Ok(h);
		}
	}
	Err(anyhow!("connection closed before Hello"))
}

/// Room a request is scoped to, for per-room rate limiting.
fn room_scope(op: &pb::request::Op) -> Option<&str> {
	use huddle_protocol::pb::request::Op;

	match op {
		Op::SendMessage(r) => Some(r.room_id.as_str()),
		Op::SetTyping(r) => Some(r.room_id.as_str()),
		Op::Signal(r) => Some(r.room_id.as_str()),
		_ => None,
	}
}

fn parse_room(id: &str) -> OpResult<RoomId> {
	RoomId::new(id).map_err(|_| OpError::validation("NO_ROOM", "room id is required"))
}

fn ack() -> pb::response::Body {
	pb::response::Body::Ack(pb::Ack {})
}

async fn dispatch_request(
	conn_id: ConnId,
	user: &UserId,
	op: pb::request::Op,
	rooms: &RoomService,
	invites: &InviteService,
	signals: &SignalRelay,
) -> OpResult<pb::response::Body> {
	use huddle_protocol::pb::request::Op;
	use huddle_protocol::pb::response::Body;

	match op {
		Op::ListRooms(_) => Ok(Body::RoomList(pb::RoomList {
			rooms: rooms.list_rooms(user).await?,
		})),
		Op::AddContact(r) => invites.add_contact_by_email(user, &r.email).await.map(Body::ContactAdded),
		Op::CreateInvite(r) => invites
			.create_invite(user, r.kind, &r.room_id, r.ttl_days)
			.await
			.map(Body::InviteCreated),
		Op::AcceptInvite(r) => invites.accept_invite(user, &r.token).await.map(Body::InviteAccepted),
		Op::SendMessage(r) => {
			let room = parse_room(&r.room_id)?;
			rooms
				.send_message(conn_id, user, &room, &r.text)
				.await
				.map(|message| Body::MessageSent(pb::MessageSent { message: Some(message) }))
		}
		Op::GetHistory(r) => {
			let room = parse_room(&r.room_id)?;
			let before = (r.before_unix_ms > 0).then_some(r.before_unix_ms);
			rooms.history(user, &room, before, r.limit).await.map(Body::History)
		}
		Op::JoinRoom(r) => {
			let room = parse_room(&r.room_id)?;
			rooms.join(conn_id, &room).await.map(|()| ack())
		}
		Op::LeaveRoom(r) => {
			let room = parse_room(&r.room_id)?;
			rooms.leave(conn_id, &room).await.map(|()| ack())
		}
		Op::SetTyping(r) => {
			let room = parse_room(&r.room_id)?;
			rooms.set_typing(conn_id, user, &room, r.typing).await.map(|()| ack())
		}
		Op::MarkRead(r) => {
			let room = parse_room(&r.room_id)?;
			rooms.mark_read(conn_id, user, &room).await.map(|()| ack())
		}
		Op::SetPin(r) => {
			let room = parse_room(&r.room_id)?;
			rooms.set_pinned(user, &room, r.pinned).await.map(|()| ack())
		}
		Op::SetMute(r) => {
			let room = parse_room(&r.room_id)?;
			rooms.set_muted(user, &room, r.muted).await.map(|()| ack())
		}
		Op::DeleteRoom(r) => {
			let room = parse_room(&r.room_id)?;
			rooms.soft_delete(user, &room).await.map(|()| ack())
		}
		Op::Signal(r) => {
			let room = parse_room(&r.room_id)?;
			signals.relay(conn_id, user, &room, r.kind, r.payload).await.map(|()| ack())
		}
	}
}

fn error_envelope(err: OpError, request_id: &str) -> pb::Envelope {
	pb::Envelope {
		version: PROTOCOL_VERSION,
		request_id: request_id.to_string(),
		msg: Some(pb::envelope::Msg::Error(err.to_pb(request_id))),
	}
}

async fn send_envelope(send: &mut quinn::SendStream, env: pb::Envelope) -> anyhow::Result<()> {
	let frame = encode_frame(&env, DEFAULT_MAX_FRAME_SIZE).map_err(|e| anyhow!(e))?;
	metrics::counter!("huddle_server_envelopes_out_total").increment(1);
	metrics::counter!("huddle_server_control_bytes_out_total").increment(frame.len() as u64);

	send.write_all(&frame).await.context("stream write")?;
	Ok(())
}
