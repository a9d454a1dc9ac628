//! pv-protocol: Encrypted wire protocol for pivot mirrors
//!
//! This crate defines the framed, AES-256-GCM sealed protocol spoken between
//! two mirrors, the secure session built on top of it, and the control
//! messages used to negotiate dial-back connections.

pub mod codec;
pub mod compress;
pub mod control;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod session;
pub mod socket;

pub use codec::{encode_frame, SecureCodec};
pub use control::{receive_control_message, send_control_message, ControlMessage};
pub use crypto::{Cipher, SharedKey, KEY_SIZE};
pub use error::{CryptoError, ProtocolError, TransportError};
pub use frame::{FrameType, SecureFrame, MAX_FRAME_LEN, MAX_PAYLOAD_SIZE, MIN_FRAME_LEN};
pub use session::{SecureContext, SecureReader, SecureSession, SecureWriter};
pub use socket::{SocketOptions, SocketTuning};
