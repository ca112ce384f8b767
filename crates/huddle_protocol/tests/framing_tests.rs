use bytes::BytesMut;
use huddle_protocol::pb;
use huddle_protocol::version::PROTOCOL_VERSION;
use huddle_protocol::{DEFAULT_MAX_FRAME_SIZE, FramingError, encode_frame, encode_frame_default, try_decode_frame};
use proptest::prelude::*;

fn request_envelope(request_id: &str, op: pb::request::Op) -> pb::Envelope {
	pb::Envelope {
		version: PROTOCOL_VERSION,
		request_id: request_id.to_string(),
		msg: Some(pb::envelope::Msg::Request(pb::Request { op: Some(op) })),
	}
}

#[test]
fn send_message_request_roundtrip() {
	let env = request_envelope(
		"req-1",
		pb::request::Op::SendMessage(pb::SendMessage {
			room_id: "dm:alice:bob".to_string(),
			text: "hello".to_string(),
		}),
	);

	let frame = encode_frame_default(&env).expect("encode");
	let mut buf = BytesMut::from(&frame[..]);
	let decoded: pb::Envelope = try_decode_frame(&mut buf, DEFAULT_MAX_FRAME_SIZE)
		.expect("ok")
		.expect("some");

	assert_eq!(decoded, env);
	assert!(buf.is_empty());
}

#[test]
fn event_envelope_roundtrip_preserves_opaque_signal_payload() {
	let sdp = "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n".to_string();
	let env = pb::Envelope {
		version: PROTOCOL_VERSION,
		request_id: String::new(),
		msg: Some(pb::envelope::Msg::Event(pb::EventEnvelope {
			server_time_unix_ms: 1_700_000_000_000,
			event: Some(pb::event_envelope::Event::Signal(pb::SignalEvent {
				room_id: "dm:alice:bob".to_string(),
				kind: pb::SignalKind::Offer as i32,
				payload: sdp.clone(),
				from_user_id: "alice".to_string(),
			})),
		})),
	};

	let frame = encode_frame_default(&env).expect("encode");
	let mut buf = BytesMut::from(&frame[..]);
	let decoded: pb::Envelope = try_decode_frame(&mut buf, DEFAULT_MAX_FRAME_SIZE)
		.expect("ok")
		.expect("some");

	let Some(pb::envelope::Msg::Event(ev)) = decoded.msg else {
		panic!("expected Event envelope");
	};
	let Some(pb::event_envelope::Event::Signal(sig)) = ev.event else {
		panic!("expected Signal event");
	};
	assert_eq!(sig.payload, sdp);
	assert_eq!(pb::SignalKind::try_from(sig.kind), Ok(pb::SignalKind::Offer));
}

#[test]
fn room_patch_keeps_unset_fields_absent() {
	let env = pb::EventEnvelope {
		server_time_unix_ms: 1,
		event: Some(pb::event_envelope::Event::RoomPatch(pb::RoomPatchEvent {
			room_id: "r1".to_string(),
			patch: Some(pb::RoomPatch {
				unread: Some(0),
				..Default::default()
			}),
		})),
	};

	let frame = encode_frame_default(&env).expect("encode");
	let mut buf = BytesMut::from(&frame[..]);
	let decoded: pb::EventEnvelope = try_decode_frame(&mut buf, DEFAULT_MAX_FRAME_SIZE)
		.expect("ok")
		.expect("some");

	let Some(pb::event_envelope::Event::RoomPatch(p)) = decoded.event else {
		panic!("expected RoomPatch event");
	};
	let patch = p.patch.expect("patch present");
	assert_eq!(patch.unread, Some(0));
	assert_eq!(patch.pinned, None);
	assert_eq!(patch.last_message, None);
}

#[test]
fn oversized_frame_is_rejected_before_decode() {
	let env = request_envelope(
		"req-big",
		pb::request::Op::SendMessage(pb::SendMessage {
			room_id: "r".to_string(),
			text: "x".repeat(4096),
		}),
	);

	let err = encode_frame(&env, 64).unwrap_err();
	assert!(matches!(err, FramingError::FrameTooLarge { .. }));
}

proptest! {
	#[test]
	fn chat_message_text_roundtrips(text in ".{0,256}", at in 0i64..=i64::MAX / 2) {
		let env = request_envelope(
			"req-p",
			pb::request::Op::SendMessage(pb::SendMessage {
				room_id: format!("room-{at}"),
				text: text.clone(),
			}),
		);

		let frame = encode_frame_default(&env).unwrap();
		let mut buf = BytesMut::from(&frame[..]);
		let decoded: pb::Envelope = try_decode_frame(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();

		let Some(pb::envelope::Msg::Request(req)) = decoded.msg else {
			panic!("expected Request");
		};
		let Some(pb::request::Op::SendMessage(send)) = req.op else {
			panic!("expected SendMessage");
		};
		prop_assert_eq!(send.text, text);
	}
}
