#![forbid(unsafe_code)]

pub mod framing;
pub mod pb;

pub use framing::{DEFAULT_MAX_FRAME_SIZE, FramingError, encode_frame, encode_frame_default, try_decode_frame};

/// Protocol version constants.
pub mod version {
	/// Current protocol version, written into `Envelope.version`.
	pub const PROTOCOL_VERSION: u32 = 1;
}
