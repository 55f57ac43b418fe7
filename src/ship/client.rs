use futures_util::SinkExt;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;

use super::wire::ShipRequest;
use crate::abi::AbiDef;
use crate::errors::ShipError;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A connected state-history socket.
///
/// The endpoint sends its protocol ABI as the first (text) frame; all
/// subsequent traffic is binary, encoded against that ABI.
pub struct ShipClient {
    stream: WsStream,
}

impl ShipClient {
    /// Connect and read the protocol ABI handshake.
    pub async fn connect(url: &str) -> Result<(Self, AbiDef), ShipError> {
        tracing::debug!("connecting to state-history endpoint {url}");
        let (stream, _) = tokio_tungstenite::connect_async(url).await?;
        let mut client = Self { stream };

        let abi_text = loop {
            match client.stream.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(Message::Ping(payload))) => {
                    client.stream.send(Message::Pong(payload)).await?;
                }
                Some(Ok(Message::Close(_))) | None => return Err(ShipError::Closed),
                Some(Ok(_)) => return Err(ShipError::MissingAbi),
                Some(Err(e)) => return Err(e.into()),
            }
        };
        let abi = AbiDef::from_json(&abi_text)?;
        tracing::debug!("received state-history ABI ({})", abi.version);
        Ok((client, abi))
    }

    pub async fn send(&mut self, request: &ShipRequest) -> Result<(), ShipError> {
        self.stream.send(Message::Binary(request.encode())).await?;
        Ok(())
    }

    /// Wait for the next binary result frame.
    pub async fn recv(&mut self) -> Result<Vec<u8>, ShipError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(data),
                Some(Ok(Message::Ping(payload))) => {
                    self.stream.send(Message::Pong(payload)).await?;
                }
                Some(Ok(Message::Close(_))) | None => return Err(ShipError::Closed),
                Some(Ok(other)) => {
                    return Err(ShipError::UnexpectedMessage(format!("{other:?}")));
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), ShipError> {
        self.stream.close(None).await?;
        Ok(())
    }
}
