use anyhow::{anyhow, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use watchparty_common::{ClientMessage, ServerMessage};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct SignalingClient {
    ws: Socket,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _) = connect_async(url).await?;
        debug!("signaling connected to {}", url);
        Ok(Self { ws })
    }

    pub async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        send_frame(&mut self.ws, msg).await
    }

    /// Next decodable message; `None` once the gateway closed the socket.
    pub async fn recv(&mut self) -> Result<Option<ServerMessage>> {
        next_message(&mut self.ws).await
    }

    /// Split into halves that can be used from different `select!` arms.
    pub fn split(self) -> (SignalingSender, SignalingReceiver) {
        let (sink, stream) = self.ws.split();
        (SignalingSender { sink }, SignalingReceiver { stream })
    }
}

pub struct SignalingSender {
    sink: SplitSink<Socket, WsMessage>,
}

impl SignalingSender {
    pub async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        send_frame(&mut self.sink, msg).await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await?;
        Ok(())
    }
}

pub struct SignalingReceiver {
    stream: SplitStream<Socket>,
}

impl SignalingReceiver {
    pub async fn recv(&mut self) -> Result<Option<ServerMessage>> {
        next_message(&mut self.stream).await
    }
}

async fn send_frame<S>(sink: &mut S, msg: &ClientMessage) -> Result<()>
where
    S: futures::Sink<WsMessage> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let text = msg.to_text()?;
    sink.send(WsMessage::Text(text)).await?;
    Ok(())
}

async fn next_message<S>(stream: &mut S) -> Result<Option<ServerMessage>>
where
    S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame.map_err(|e| anyhow!("signaling socket error: {e}"))? {
            WsMessage::Text(text) => match ServerMessage::from_text(&text) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    warn!("skipping undecodable signaling frame: {}", e);
                    continue;
                }
            },
            WsMessage::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}
