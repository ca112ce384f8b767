#![forbid(unsafe_code)]

use bytes::BytesMut;
use prost::Message;
use thiserror::Error;

/// Default maximum frame payload size. SDP blobs run to a few tens of KiB;
/// a history page of chat messages stays well under this.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024; // 1 MiB

#[derive(Debug, Error)]
pub enum FramingError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge { len: usize, max: usize },

	#[error("protobuf decode error: {0}")]
	Decode(#[from] prost::DecodeError),

	#[error("protobuf encode error: {0}")]
	Encode(#[from] prost::EncodeError),
}

/// Encode a protobuf message into a length-prefixed (u32 BE) frame.
pub fn encode_frame<M: Message>(msg: &M, max_frame_size: usize) -> Result<Vec<u8>, FramingError> {
	let payload_len = msg.encoded_len();
	if payload_len > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: payload_len,
			max: max_frame_size,
		});
	}

	let mut out = Vec::with_capacity(4 + payload_len);
	out.extend_from_slice(&(payload_len as u32).to_be_bytes());
	msg.encode(&mut out)?;
	Ok(out)
}

/// Encode a frame using `DEFAULT_MAX_FRAME_SIZE`.
pub fn encode_frame_default<M: Message>(msg: &M) -> Result<Vec<u8>, FramingError> {
	encode_frame(msg, DEFAULT_MAX_FRAME_SIZE)
}

/// Try to decode one frame from the front of a growable receive buffer.
/// Returns `Ok(None)` until a complete frame has been buffered; consumed
/// bytes are split off the buffer.
pub fn try_decode_frame<M: Message + Default>(
	buf: &mut BytesMut,
	max_frame_size: usize,
) -> Result<Option<M>, FramingError> {
	if buf.len() < 4 {
		return Ok(None);
	}

	let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
	if len > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len,
			max: max_frame_size,
		});
	}

	let need = 4 + len;
	if buf.len() < need {
		return Ok(None);
	}

	let frame = buf.split_to(need);
	let msg = M::decode(&frame[4..])?;
	Ok(Some(msg))
}
