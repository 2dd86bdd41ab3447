//! Transport channels to shard endpoints
//!
//! A [`Connector`] opens one [`Transport`] per shard and reports its
//! lifecycle as [`TransportEvent`]s on a shared queue, tagged with the shard.

use crate::error::WalletError;
use crate::zone::Shard;
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// Normal closure code.
pub const CLOSE_NORMAL: u16 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

pub type EventSender = mpsc::UnboundedSender<(Shard, TransportEvent)>;
pub type EventReceiver = mpsc::UnboundedReceiver<(Shard, TransportEvent)>;

pub trait Transport: Send + Sync {
    /// Queues a text payload.
    fn send(&self, payload: String) -> Result<(), WalletError>;

    fn close(&self, code: Option<u16>, reason: Option<&str>) -> Result<(), WalletError>;
}

pub trait Connector: Send + Sync {
    /// Starts connecting to `url`. The returned transport accepts payloads
    /// right away; `Open` is reported on `events` once the endpoint is live.
    fn connect(&self, shard: Shard, url: &str, events: EventSender) -> Result<Arc<dyn Transport>, WalletError>;
}

/// WebSocket transport backed by a writer task.
pub struct WsTransport {
    shard: Shard,
    outgoing: mpsc::UnboundedSender<Message>,
}

impl Transport for WsTransport {
    fn send(&self, payload: String) -> Result<(), WalletError> {
        self.outgoing
            .send(Message::Text(payload))
            .map_err(|_| WalletError::ChannelClosed(self.shard.to_string()))
    }

    fn close(&self, code: Option<u16>, reason: Option<&str>) -> Result<(), WalletError> {
        let frame = CloseFrame {
            code: CloseCode::from(code.unwrap_or(CLOSE_NORMAL)),
            reason: Cow::Owned(reason.unwrap_or_default().to_string()),
        };
        self.outgoing
            .send(Message::Close(Some(frame)))
            .map_err(|_| WalletError::ChannelClosed(self.shard.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, shard: Shard, url: &str, events: EventSender) -> Result<Arc<dyn Transport>, WalletError> {
        let (outgoing, mut queued) = mpsc::unbounded_channel::<Message>();
        let url = url.to_string();

        tokio::spawn(async move {
            let stream = match connect_async(url.as_str()).await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!(shard = %shard, %url, "websocket connect failed: {}", e);
                    let _ = events.send((shard, TransportEvent::Error(e.to_string())));
                    let _ = events.send((
                        shard,
                        TransportEvent::Closed {
                            code: None,
                            reason: "connect failed".to_string(),
                        },
                    ));
                    return;
                }
            };
            debug!(shard = %shard, %url, "websocket open");
            let _ = events.send((shard, TransportEvent::Open));

            let (mut sink, mut source) = stream.split();
            let writer_events = events.clone();
            let writer = tokio::spawn(async move {
                while let Some(message) = queued.recv().await {
                    let closing = matches!(message, Message::Close(_));
                    if let Err(e) = sink.send(message).await {
                        let _ = writer_events.send((shard, TransportEvent::Error(e.to_string())));
                        break;
                    }
                    if closing {
                        break;
                    }
                }
            });

            let mut closed = (None, String::new());
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        let _ = events.send((shard, TransportEvent::Message(text)));
                    }
                    Ok(Message::Binary(bytes)) => {
                        let text = String::from_utf8_lossy(&bytes).into_owned();
                        let _ = events.send((shard, TransportEvent::Message(text)));
                    }
                    Ok(Message::Close(frame)) => {
                        if let Some(frame) = frame {
                            closed = (Some(u16::from(frame.code)), frame.reason.into_owned());
                        }
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = events.send((shard, TransportEvent::Error(e.to_string())));
                        break;
                    }
                }
            }
            writer.abort();
            let _ = events.send((
                shard,
                TransportEvent::Closed {
                    code: closed.0,
                    reason: closed.1,
                },
            ));
        });

        Ok(Arc::new(WsTransport { shard, outgoing }))
    }
}
