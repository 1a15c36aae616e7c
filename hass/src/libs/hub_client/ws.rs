//! WebSocket connection to the hub, including the auth handshake.
//!
//! The hub speaks first: after the upgrade it sends `auth_required`, the
//! client answers with its access token, and the hub settles the session
//! with `auth_ok` or `auth_invalid`. [`connect`] drives the whole ritual and
//! returns the split stream halves ready for a session.

use std::time::Duration;

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

use crate::libs::hub_client::frame::{self, ClientFrame, ServerFrame};

/// Type alias for the WebSocket sink (writer).
pub type Writer = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Type alias for the WebSocket stream (reader).
pub type Reader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Configuration for establishing an authenticated hub connection.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub ws_url: String,
    pub access_token: String,
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
}

impl ConnectConfig {
    #[must_use]
    pub fn new(ws_url: String, access_token: String) -> Self {
        Self {
            ws_url,
            access_token,
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(5),
        }
    }
}

/// Authenticated connection with the hub version it reported.
pub struct HubConnection {
    pub writer: Writer,
    pub reader: Reader,
    pub ha_version: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid hub url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to dial hub: {0}")]
    Dial(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("hub rejected credentials: {0}")]
    AuthInvalid(String),
    #[error("protocol violation during handshake: {0}")]
    Protocol(String),
}

/// Dials the hub with the configured timeout. No frames are exchanged yet.
pub async fn dial(conf: &ConnectConfig) -> Result<(Writer, Reader), ConnectError> {
    let url = Url::parse(&conf.ws_url)?;

    let (stream, _) = tokio::time::timeout(conf.connect_timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| ConnectError::Timeout("websocket upgrade"))?
        .map_err(|e| ConnectError::Dial(e.to_string()))?;

    Ok(stream.split())
}

/// Runs the two-phase auth ritual on a freshly dialed connection.
///
/// Returns the hub version from `auth_ok`. An `auth_invalid` answer is a
/// distinct error so callers can avoid hammering a bad token.
pub async fn authenticate(
    writer: &mut Writer,
    reader: &mut Reader,
    conf: &ConnectConfig,
) -> Result<String, ConnectError> {
    match read_handshake_frame(reader, conf.auth_timeout).await? {
        ServerFrame::AuthRequired { ha_version } => {
            debug!(ha_version, "hub requested authentication");
        }
        other => {
            return Err(ConnectError::Protocol(format!(
                "expected auth_required, got {}",
                other.kind()
            )));
        }
    }

    let auth = frame::encode(&ClientFrame::Auth {
        access_token: conf.access_token.clone(),
    })
    .map_err(|e| ConnectError::Protocol(e.to_string()))?;

    writer
        .send(Message::Text(auth.into()))
        .await
        .map_err(|e| ConnectError::Dial(e.to_string()))?;

    match read_handshake_frame(reader, conf.auth_timeout).await? {
        ServerFrame::AuthOk { ha_version } => Ok(ha_version),
        ServerFrame::AuthInvalid { message } => Err(ConnectError::AuthInvalid(message)),
        other => Err(ConnectError::Protocol(format!(
            "expected auth result, got {}",
            other.kind()
        ))),
    }
}

/// Dials and authenticates in one step.
pub async fn connect(conf: &ConnectConfig) -> Result<HubConnection, ConnectError> {
    let (mut writer, mut reader) = dial(conf).await?;
    let ha_version = authenticate(&mut writer, &mut reader, conf).await?;

    Ok(HubConnection {
        writer,
        reader,
        ha_version,
    })
}

/// Reads the next text frame during the handshake, skipping transport noise.
async fn read_handshake_frame(
    reader: &mut Reader,
    timeout: Duration,
) -> Result<ServerFrame, ConnectError> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let message = tokio::time::timeout_at(deadline, reader.next())
            .await
            .map_err(|_| ConnectError::Timeout("handshake frame"))?;

        match message {
            Some(Ok(Message::Text(text))) => {
                return frame::decode(&text).map_err(|e| ConnectError::Protocol(e.to_string()));
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => {
                return Err(ConnectError::Protocol(
                    "connection closed during handshake".to_owned(),
                ));
            }
            Some(Err(e)) => return Err(ConnectError::Dial(e.to_string())),
            Some(Ok(_)) => {}
        }
    }
}
