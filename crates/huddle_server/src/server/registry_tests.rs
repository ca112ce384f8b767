#![forbid(unsafe_code)]

use huddle_domain::{RoomKind, UserId};

use crate::server::registry::{JoinOutcome, Registry};

fn user(s: &str) -> UserId {
	UserId::new(s).expect("valid UserId")
}

fn registry_with(conns: &[(u64, &str, &str)]) -> Registry {
	let mut reg = Registry::default();
	for (conn, user_id, label) in conns {
		reg.add_conn(*conn, user(user_id), label.to_string());
	}
	reg
}

#[test]
fn second_join_assigns_roles_by_label_order() {
	let mut reg = registry_with(&[(1, "alice", "label-b"), (2, "bob", "label-a")]);

	assert_eq!(reg.join(1, "dm:alice:bob", RoomKind::Direct), JoinOutcome::Joined { ready: None });

	let JoinOutcome::Joined { ready: Some(assignment) } = reg.join(2, "dm:alice:bob", RoomKind::Direct) else {
		panic!("expected ready assignment on second join");
	};

	// Lexicographically smaller label wins the offerer role, not the
	// earlier arrival.
	assert_eq!(assignment.offerer, 2);
	assert_eq!(assignment.answerer, 1);
}

#[test]
fn assignment_is_independent_of_join_order() {
	let mut reg_a = registry_with(&[(1, "alice", "aaa"), (2, "bob", "bbb")]);
	let mut reg_b = registry_with(&[(1, "alice", "aaa"), (2, "bob", "bbb")]);

	reg_a.join(1, "dm:alice:bob", RoomKind::Direct);
	let JoinOutcome::Joined { ready: Some(first) } = reg_a.join(2, "dm:alice:bob", RoomKind::Direct) else {
		panic!("expected assignment");
	};

	reg_b.join(2, "dm:alice:bob", RoomKind::Direct);
	let JoinOutcome::Joined { ready: Some(second) } = reg_b.join(1, "dm:alice:bob", RoomKind::Direct) else {
		panic!("expected assignment");
	};

	assert_eq!(first, second);
}

#[test]
fn third_join_is_rejected_at_call_capacity() {
	let mut reg = registry_with(&[(1, "alice", "a"), (2, "bob", "b"), (3, "carol", "c")]);

	reg.join(1, "dm:alice:bob", RoomKind::Direct);
	reg.join(2, "dm:alice:bob", RoomKind::Direct);

	assert_eq!(reg.join(3, "dm:alice:bob", RoomKind::Direct), JoinOutcome::Full);
	assert_eq!(reg.occupancy("dm:alice:bob"), 2);
	assert!(!reg.is_joined(3, "dm:alice:bob"));

	let mut occupants = reg.conns_in_room("dm:alice:bob");
	occupants.sort_unstable();
	assert_eq!(occupants, vec![1, 2]);
}

#[test]
fn group_rooms_are_uncapped_and_role_free() {
	let mut reg = registry_with(&[(1, "alice", "a"), (2, "bob", "b"), (3, "carol", "c")]);

	for conn in [1, 2, 3] {
		assert_eq!(reg.join(conn, "standup", RoomKind::Group), JoinOutcome::Joined { ready: None });
	}

	assert_eq!(reg.occupancy("standup"), 3);
}

#[test]
fn rejoining_the_same_room_is_a_noop() {
	let mut reg = registry_with(&[(1, "alice", "a")]);

	reg.join(1, "standup", RoomKind::Group);
	assert_eq!(reg.join(1, "standup", RoomKind::Group), JoinOutcome::AlreadyJoined);
	assert_eq!(reg.occupancy("standup"), 1);
}

#[test]
fn leave_then_fresh_join_recomputes_from_scratch() {
	let mut reg = registry_with(&[(1, "alice", "a"), (2, "bob", "b"), (3, "carol", "c")]);

	reg.join(1, "dm:alice:bob", RoomKind::Direct);
	reg.join(2, "dm:alice:bob", RoomKind::Direct);
	reg.leave(2, "dm:alice:bob");

	let JoinOutcome::Joined { ready: Some(assignment) } = reg.join(3, "dm:alice:bob", RoomKind::Direct) else {
		panic!("expected a fresh assignment");
	};

	assert_eq!(assignment.offerer, 1);
	assert_eq!(assignment.answerer, 3);
}

#[test]
fn remove_conn_vacates_all_rooms() {
	let mut reg = registry_with(&[(1, "alice", "a"), (2, "bob", "b")]);

	reg.join(1, "standup", RoomKind::Group);
	reg.join(1, "dm:alice:bob", RoomKind::Direct);
	reg.join(2, "dm:alice:bob", RoomKind::Direct);

	let mut left = reg.remove_conn(1);
	left.sort();
	assert_eq!(left, vec!["dm:alice:bob".to_string(), "standup".to_string()]);
	assert_eq!(reg.occupancy("standup"), 0);
	assert_eq!(reg.occupancy("dm:alice:bob"), 1);
	assert!(reg.user_of(1).is_none());
	assert!(reg.conns_for_user(&user("alice")).is_empty());
}

#[test]
fn user_index_tracks_every_device() {
	let mut reg = registry_with(&[(1, "alice", "a"), (2, "alice", "b")]);

	let mut conns = reg.conns_for_user(&user("alice"));
	conns.sort_unstable();
	assert_eq!(conns, vec![1, 2]);

	reg.remove_conn(2);
	assert_eq!(reg.conns_for_user(&user("alice")), vec![1]);
}
