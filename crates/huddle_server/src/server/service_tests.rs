#![forbid(unsafe_code)]

use std::sync::Arc;

use huddle_domain::{InviteKind, RoomId, RoomKind, UserId, direct_room_id};
use huddle_protocol::pb;
use huddle_protocol::pb::event_envelope::Event;
use tokio::sync::{RwLock, mpsc};

use crate::server::hub::{PushHub, PushHubConfig};
use crate::server::invites::InviteService;
use crate::server::registry::Registry;
use crate::server::rooms::RoomService;
use crate::server::signaling::SignalRelay;
use crate::server::store::{ChatStore, InviteRecord};
use crate::util::time::unix_ms_now;

struct Harness {
	store: ChatStore,
	registry: Arc<RwLock<Registry>>,
	hub: PushHub,
	rooms: RoomService,
	invites: InviteService,
	signals: SignalRelay,
}

async fn harness() -> Harness {
	let store = ChatStore::connect("sqlite::memory:").await.expect("in-memory store");
	let registry = Arc::new(RwLock::new(Registry::default()));
	let hub = PushHub::new(PushHubConfig::default());
	let rooms = RoomService::new(store.clone(), Arc::clone(&registry), hub.clone(), 50);
	let invites = InviteService::new(store.clone(), Some("https://app.example.com".to_string()), 7);
	let signals = SignalRelay::new(Arc::clone(&registry), hub.clone());

	Harness {
		store,
		registry,
		hub,
		rooms,
		invites,
		signals,
	}
}

impl Harness {
	/// Bind a fake connection: registry entry plus a push queue.
	async fn connect(&self, conn: u64, user: &str, label: &str) -> mpsc::Receiver<pb::EventEnvelope> {
		self.registry
			.write()
			.await
			.add_conn(conn, uid(user), label.to_string());
		self.hub.register(conn).await
	}
}

fn uid(s: &str) -> UserId {
	UserId::new(s).expect("valid UserId")
}

fn rid(s: &str) -> RoomId {
	RoomId::new(s).expect("valid RoomId")
}

fn pop(rx: &mut mpsc::Receiver<pb::EventEnvelope>) -> Event {
	rx.try_recv().expect("expected a queued event").event.expect("event variant set")
}

fn assert_no_events(rx: &mut mpsc::Receiver<pb::EventEnvelope>) {
	assert!(rx.try_recv().is_err(), "expected no queued events");
}

#[tokio::test]
async fn room_invite_lifecycle_with_ttl() {
	let h = harness().await;
	let (u1, u2) = (uid("u1"), uid("u2"));
	let r = rid("standup");

	h.store.ensure_room(&r, Some("Standup"), RoomKind::Group, 1).await.expect("room");
	h.store.ensure_membership(&r, &u1).await.expect("inviter member");

	let created = h
		.invites
		.create_invite(&u1, pb::InviteKind::Room as i32, "standup", 7)
		.await
		.expect("create invite");
	assert!(created.url.starts_with("https://app.example.com/invite/"));
	assert!(created.expires_unix_ms > unix_ms_now());

	let accepted = h.invites.accept_invite(&u2, &created.token).await.expect("accept");
	assert_eq!(accepted.room_id, "standup");
	assert!(h.store.is_live_member(&r, &u2).await.expect("membership"));

	let stored = h.store.get_invite(&created.token).await.expect("get").expect("row");
	assert!(stored.used_at.is_some());

	let err = h.invites.accept_invite(&u2, &created.token).await.unwrap_err();
	assert_eq!(err.code, "USED");
	assert_eq!(err.kind, pb::ErrorKind::Conflict);
}

#[tokio::test]
async fn room_invites_require_live_membership() {
	let h = harness().await;
	let r = rid("standup");

	h.store.ensure_room(&r, None, RoomKind::Group, 1).await.expect("room");

	let err = h
		.invites
		.create_invite(&uid("outsider"), pb::InviteKind::Room as i32, "standup", 0)
		.await
		.unwrap_err();
	assert_eq!(err.code, "NOT_A_MEMBER");
	assert_eq!(err.kind, pb::ErrorKind::Authorization);
}

#[tokio::test]
async fn expired_invite_is_rejected_without_being_consumed() {
	let h = harness().await;
	let now = unix_ms_now();

	let invite = InviteRecord {
		token: "tok-old".to_string(),
		kind: InviteKind::Contact,
		inviter_id: uid("u1"),
		room_id: None,
		created_at: now - 120_000,
		expires_at: Some(now - 60_000),
		used_at: None,
	};
	h.store.create_invite(&invite).await.expect("create");

	let err = h.invites.accept_invite(&uid("u2"), "tok-old").await.unwrap_err();
	assert_eq!(err.code, "EXPIRED");

	let stored = h.store.get_invite("tok-old").await.expect("get").expect("row");
	assert_eq!(stored.used_at, None);
}

#[tokio::test]
async fn contact_invite_creates_the_canonical_direct_room() {
	let h = harness().await;
	let (u1, u2) = (uid("u1"), uid("u2"));

	let created = h
		.invites
		.create_invite(&u1, pb::InviteKind::Contact as i32, "", 0)
		.await
		.expect("create");

	let accepted = h.invites.accept_invite(&u2, &created.token).await.expect("accept");
	let dm = direct_room_id(&u1, &u2);
	assert_eq!(accepted.room_id, dm.as_str());

	let rec = h.store.get_room(&dm).await.expect("get").expect("room");
	assert_eq!(rec.kind, RoomKind::Direct);
	assert!(h.store.is_live_member(&dm, &u1).await.expect("u1"));
	assert!(h.store.is_live_member(&dm, &u2).await.expect("u2"));
}

#[tokio::test]
async fn accepting_your_own_contact_invite_is_rejected() {
	let h = harness().await;
	let u1 = uid("u1");

	let created = h
		.invites
		.create_invite(&u1, pb::InviteKind::Contact as i32, "", 0)
		.await
		.expect("create");

	let err = h.invites.accept_invite(&u1, &created.token).await.unwrap_err();
	assert_eq!(err.code, "SELF_NOT_ALLOWED");

	// The token survives for its intended recipient.
	let stored = h.store.get_invite(&created.token).await.expect("get").expect("row");
	assert_eq!(stored.used_at, None);
}

#[tokio::test]
async fn add_contact_by_email_is_idempotent() {
	let h = harness().await;
	let (u1, u2) = (uid("u1"), uid("u2"));

	h.store.seed_user("u1", "u1@example.com", "One").await.expect("seed");
	h.store.seed_user("u2", "u2@example.com", "Two").await.expect("seed");

	let first = h.invites.add_contact_by_email(&u1, "u2@example.com").await.expect("add");
	let second = h.invites.add_contact_by_email(&u1, "u2@example.com").await.expect("add again");
	assert_eq!(first.room_id, second.room_id);
	assert_eq!(first.room_id, direct_room_id(&u1, &u2).as_str());

	assert_eq!(h.rooms.list_rooms(&u1).await.expect("list").len(), 1);
	assert_eq!(h.rooms.list_rooms(&u2).await.expect("list").len(), 1);

	let err = h.invites.add_contact_by_email(&u1, "nobody@example.com").await.unwrap_err();
	assert_eq!(err.code, "USER_NOT_FOUND");

	let err = h.invites.add_contact_by_email(&u1, "u1@example.com").await.unwrap_err();
	assert_eq!(err.code, "SELF_NOT_ALLOWED");
}

#[tokio::test]
async fn send_message_fans_out_and_tracks_unread() {
	let h = harness().await;
	let (u1, u2) = (uid("u1"), uid("u2"));
	let dm = direct_room_id(&u1, &u2);

	h.store.ensure_room(&dm, None, RoomKind::Direct, 1).await.expect("room");
	h.store.ensure_membership(&dm, &u1).await.expect("u1");
	h.store.ensure_membership(&dm, &u2).await.expect("u2");

	let mut c1 = h.connect(1, "u1", "label-a").await;
	let mut c2 = h.connect(2, "u2", "label-b").await;

	// u1 is in the room; u2's connection is not.
	h.rooms.join(1, &dm).await.expect("join");
	assert_no_events(&mut c1);

	let sent = h.rooms.send_message(1, &u1, &dm, "hello").await.expect("send");
	assert_eq!(sent.text, "hello");

	match pop(&mut c1) {
		Event::MessageNew(ev) => {
			let message = ev.message.expect("message set");
			assert_eq!(message.text, "hello");
			assert_eq!(message.author_id, "u1");
		}
		other => panic!("expected MessageNew, got {other:?}"),
	}

	match pop(&mut c2) {
		Event::RoomPatch(ev) => {
			assert_eq!(ev.room_id, dm.as_str());
			let patch = ev.patch.expect("patch set");
			assert_eq!(patch.unread, Some(1));
			assert_eq!(patch.last_message.as_deref(), Some("hello"));
		}
		other => panic!("expected RoomPatch, got {other:?}"),
	}

	let u2_rooms = h.rooms.list_rooms(&u2).await.expect("list");
	assert_eq!(u2_rooms[0].unread, 1);
	assert_eq!(u2_rooms[0].last_message.as_deref(), Some("hello"));

	h.rooms.mark_read(2, &u2, &dm).await.expect("mark read");

	match pop(&mut c1) {
		Event::Read(ev) => assert_eq!(ev.user_id, "u2"),
		other => panic!("expected Read, got {other:?}"),
	}

	match pop(&mut c2) {
		Event::RoomPatch(ev) => {
			let patch = ev.patch.expect("patch set");
			assert_eq!(patch.unread, Some(0));
		}
		other => panic!("expected RoomPatch, got {other:?}"),
	}

	assert_eq!(h.rooms.list_rooms(&u2).await.expect("list")[0].unread, 0);
	assert_no_events(&mut c1);
	assert_no_events(&mut c2);
}

#[tokio::test]
async fn send_message_validates_text_and_membership() {
	let h = harness().await;
	let (u1, outsider) = (uid("u1"), uid("outsider"));
	let r = rid("standup");

	h.store.ensure_room(&r, None, RoomKind::Group, 1).await.expect("room");
	h.store.ensure_membership(&r, &u1).await.expect("member");

	let err = h.rooms.send_message(1, &u1, &r, "   ").await.unwrap_err();
	assert_eq!(err.code, "EMPTY");
	assert_eq!(err.kind, pb::ErrorKind::Validation);

	let err = h.rooms.send_message(2, &outsider, &r, "hi").await.unwrap_err();
	assert_eq!(err.code, "NOT_A_MEMBER");
	assert_eq!(err.kind, pb::ErrorKind::Authorization);
}

#[tokio::test]
async fn call_setup_assigns_roles_and_relays_the_offer() {
	let h = harness().await;
	let (u1, u2) = (uid("u1"), uid("u2"));
	let dm = direct_room_id(&u1, &u2);

	h.store.ensure_room(&dm, None, RoomKind::Direct, 1).await.expect("room");
	h.store.ensure_membership(&dm, &u1).await.expect("u1");
	h.store.ensure_membership(&dm, &u2).await.expect("u2");

	let mut c1 = h.connect(1, "u1", "label-a").await;
	let mut c2 = h.connect(2, "u2", "label-b").await;
	let mut c3 = h.connect(3, "u3", "label-c").await;

	h.rooms.join(1, &dm).await.expect("first join");
	assert_no_events(&mut c1);

	h.rooms.join(2, &dm).await.expect("second join");

	match pop(&mut c1) {
		Event::CallRole(ev) => assert_eq!(ev.role, pb::CallRole::Offerer as i32),
		other => panic!("expected CallRole, got {other:?}"),
	}
	match pop(&mut c1) {
		Event::CallReady(ev) => assert_eq!(ev.room_id, dm.as_str()),
		other => panic!("expected CallReady, got {other:?}"),
	}
	match pop(&mut c2) {
		Event::CallRole(ev) => assert_eq!(ev.role, pb::CallRole::Answerer as i32),
		other => panic!("expected CallRole, got {other:?}"),
	}
	match pop(&mut c2) {
		Event::CallReady(_) => {}
		other => panic!("expected CallReady, got {other:?}"),
	}

	// Offerer's SDP reaches the answerer verbatim and nobody else.
	let sdp = "v=0\r\no=- 42 2 IN IP4 127.0.0.1\r\n";
	h.signals
		.relay(1, &u1, &dm, pb::SignalKind::Offer as i32, sdp.to_string())
		.await
		.expect("relay offer");

	match pop(&mut c2) {
		Event::Signal(ev) => {
			assert_eq!(ev.kind, pb::SignalKind::Offer as i32);
			assert_eq!(ev.payload, sdp);
			assert_eq!(ev.from_user_id, "u1");
		}
		other => panic!("expected Signal, got {other:?}"),
	}
	assert_no_events(&mut c1);

	// Third connection is told the room is full; the pair keeps going.
	h.rooms.join(3, &dm).await.expect("third join");
	match pop(&mut c3) {
		Event::CallFull(ev) => assert_eq!(ev.room_id, dm.as_str()),
		other => panic!("expected CallFull, got {other:?}"),
	}
	assert_eq!(h.registry.read().await.occupancy(dm.as_str()), 2);

	let err = h
		.signals
		.relay(3, &uid("u3"), &dm, pb::SignalKind::Ice as i32, "candidate:1".to_string())
		.await
		.unwrap_err();
	assert_eq!(err.code, "NOT_JOINED");
}

#[tokio::test]
async fn soft_delete_hides_the_room_for_that_user_only() {
	let h = harness().await;
	let (u1, u2) = (uid("u1"), uid("u2"));
	let r = rid("standup");

	h.store.ensure_room(&r, None, RoomKind::Group, 1).await.expect("room");
	h.store.ensure_membership(&r, &u1).await.expect("u1");
	h.store.ensure_membership(&r, &u2).await.expect("u2");

	let mut c1 = h.connect(1, "u1", "label-a").await;

	h.rooms.soft_delete(&u1, &r).await.expect("delete");

	match pop(&mut c1) {
		Event::RoomRemoved(ev) => assert_eq!(ev.room_id, "standup"),
		other => panic!("expected RoomRemoved, got {other:?}"),
	}

	assert!(h.rooms.list_rooms(&u1).await.expect("list").is_empty());
	assert_eq!(h.rooms.list_rooms(&u2).await.expect("list").len(), 1);
}

#[tokio::test]
async fn typing_reaches_the_other_occupants_only() {
	let h = harness().await;
	let u1 = uid("u1");
	let r = rid("standup");

	h.store.ensure_room(&r, None, RoomKind::Group, 1).await.expect("room");

	let mut c1 = h.connect(1, "u1", "label-a").await;
	let mut c2 = h.connect(2, "u2", "label-b").await;
	let mut c3 = h.connect(3, "u3", "label-c").await;

	h.rooms.join(1, &r).await.expect("join");
	h.rooms.join(2, &r).await.expect("join");

	h.rooms.set_typing(1, &u1, &r, true).await.expect("typing");

	match pop(&mut c2) {
		Event::Typing(ev) => {
			assert_eq!(ev.user_id, "u1");
			assert!(ev.typing);
		}
		other => panic!("expected Typing, got {other:?}"),
	}
	assert_no_events(&mut c1);
	assert_no_events(&mut c3);

	let err = h.rooms.set_typing(3, &uid("u3"), &r, true).await.unwrap_err();
	assert_eq!(err.code, "NOT_JOINED");
}

#[tokio::test]
async fn history_pages_read_oldest_to_newest_with_cursor() {
	let h = harness().await;
	let (u1, outsider) = (uid("u1"), uid("outsider"));
	let r = rid("standup");

	h.store.ensure_room(&r, None, RoomKind::Group, 1).await.expect("room");
	h.store.ensure_membership(&r, &u1).await.expect("member");
	h.store.insert_message(&r, &u1, "hello", 1_000).await.expect("insert");
	h.store.insert_message(&r, &u1, "world", 2_000).await.expect("insert");
	h.store.insert_message(&r, &u1, "again", 3_000).await.expect("insert");

	let page = h.rooms.history(&u1, &r, None, 2).await.expect("page");
	let texts: Vec<&str> = page.messages.iter().map(|m| m.text.as_str()).collect();
	assert_eq!(texts, vec!["world", "again"]);
	assert!(page.has_more);
	assert_eq!(page.next_before_unix_ms, 2_000);

	let rest = h.rooms.history(&u1, &r, Some(page.next_before_unix_ms), 2).await.expect("page");
	let texts: Vec<&str> = rest.messages.iter().map(|m| m.text.as_str()).collect();
	assert_eq!(texts, vec!["hello"]);
	assert!(!rest.has_more);
	assert_eq!(rest.next_before_unix_ms, 0);

	let err = h.rooms.history(&outsider, &r, None, 2).await.unwrap_err();
	assert_eq!(err.code, "NOT_A_MEMBER");
}

#[tokio::test]
async fn join_requires_a_known_room() {
	let h = harness().await;
	let _rx = h.connect(1, "u1", "label-a").await;

	let err = h.rooms.join(1, &rid("ghost")).await.unwrap_err();
	assert_eq!(err.code, "UNKNOWN_ROOM");
	assert_eq!(err.kind, pb::ErrorKind::NotFound);
}

#[tokio::test]
async fn pin_and_mute_patch_every_device_of_the_user() {
	let h = harness().await;
	let u1 = uid("u1");
	let r = rid("standup");

	h.store.ensure_room(&r, None, RoomKind::Group, 1).await.expect("room");
	h.store.ensure_membership(&r, &u1).await.expect("member");

	let mut c1 = h.connect(1, "u1", "label-a").await;
	let mut c2 = h.connect(2, "u1", "label-b").await;

	h.rooms.set_pinned(&u1, &r, true).await.expect("pin");

	for rx in [&mut c1, &mut c2] {
		match pop(rx) {
			Event::RoomPatch(ev) => {
				assert_eq!(ev.patch.expect("patch").pinned, Some(true));
			}
			other => panic!("expected RoomPatch, got {other:?}"),
		}
	}

	let err = h.rooms.set_muted(&uid("outsider"), &r, true).await.unwrap_err();
	assert_eq!(err.code, "NOT_A_MEMBER");
}
