//! Control messages carried over the command link
//!
//! The only control message asks the peer mirror to dial back to the sender
//! on a freshly bound port:
//!
//! ```json
//! {"type":"control","port":40123}
//! ```
//!
//! It travels as an ordinary data write, so it goes through the same
//! compression and encryption path as relayed bytes.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::ProtocolError;
use crate::session::{SecureReader, SecureWriter};

/// Value of the `type` field of a control message
pub const CONTROL_TYPE: &str = "control";

/// Request for the peer to connect back on `port`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Message kind, always [`CONTROL_TYPE`]
    #[serde(rename = "type")]
    pub kind: String,
    /// Port the sender is listening on
    pub port: u16,
}

impl ControlMessage {
    /// Create a dial-back request for `port`
    pub fn new(port: u16) -> Self {
        Self {
            kind: CONTROL_TYPE.to_string(),
            port,
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate a JSON payload
    pub fn from_json(payload: &[u8]) -> Result<Self, ProtocolError> {
        let msg: ControlMessage = serde_json::from_slice(payload)?;
        if msg.kind != CONTROL_TYPE {
            return Err(ProtocolError::UnexpectedMessage(format!(
                "unknown control type '{}'",
                msg.kind
            )));
        }
        Ok(msg)
    }
}

/// Ask the peer to dial back on `port`
pub async fn send_control_message<S, W>(writer: &mut W, port: u16) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: AsMut<SecureWriter<S>>,
{
    let payload = ControlMessage::new(port).to_json()?;
    tracing::debug!(
        "Sending control message: {} ({} bytes)",
        String::from_utf8_lossy(&payload),
        payload.len()
    );
    writer.as_mut().write(&payload).await?;
    Ok(())
}

/// Wait for the next control message
pub async fn receive_control_message<S, R>(reader: &mut R) -> Result<ControlMessage, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsMut<SecureReader<S>>,
{
    let payload = reader
        .as_mut()
        .read()
        .await?
        .ok_or(ProtocolError::ConnectionClosed)?;
    tracing::debug!("Received control payload ({} bytes)", payload.len());
    ControlMessage::from_json(&payload)
}
