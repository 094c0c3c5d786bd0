/// In-memory WebSocket connection
///
/// `pair()` returns the server half (hand it to `Bridge::accept`) and a
/// `MemoryPeer` that plays the browser.
use super::frame::WsFrame;
use crate::errors::BridgeError;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::{Sink, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

pub struct MemoryConnection {
    incoming: UnboundedReceiver<WsFrame>,
    outgoing: UnboundedSender<WsFrame>,
}

pub struct MemoryPeer {
    tx: UnboundedSender<WsFrame>,
    rx: UnboundedReceiver<WsFrame>,
}

pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let (to_server, from_peer) = unbounded();
    let (to_peer, from_server) = unbounded();
    (
        MemoryConnection {
            incoming: from_peer,
            outgoing: to_peer,
        },
        MemoryPeer {
            tx: to_server,
            rx: from_server,
        },
    )
}

impl Stream for MemoryConnection {
    type Item = Result<WsFrame, BridgeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.incoming.poll_next_unpin(cx).map(|frame| frame.map(Ok))
    }
}

impl Sink<WsFrame> for MemoryConnection {
    type Error = BridgeError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.outgoing)
            .poll_ready(cx)
            .map_err(BridgeError::transport)
    }

    fn start_send(mut self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        Pin::new(&mut self.outgoing)
            .start_send(item)
            .map_err(BridgeError::transport)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.outgoing)
            .poll_flush(cx)
            .map_err(BridgeError::transport)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.outgoing)
            .poll_close(cx)
            .map_err(BridgeError::transport)
    }
}

impl MemoryPeer {
    pub fn send(&self, frame: WsFrame) -> bool {
        self.tx.unbounded_send(frame).is_ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(WsFrame::Text(text.into()))
    }

    /// Browser-side close
    pub fn close(&self) {
        let _ = self.tx.unbounded_send(WsFrame::Close);
        self.tx.close_channel();
    }

    /// Next frame from the server; `None` when the server side is gone
    pub async fn next_frame(&mut self) -> Option<WsFrame> {
        self.rx.next().await
    }

    /// Next text frame within `wait`, skipping pings
    pub async fn next_text(&mut self, wait: Duration) -> Option<String> {
        tokio::time::timeout(wait, async {
            loop {
                match self.rx.next().await {
                    Some(WsFrame::Text(text)) => return Some(text),
                    Some(WsFrame::Ping(_)) | Some(WsFrame::Pong(_)) => continue,
                    Some(_) | None => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    /// Every text frame already delivered, without waiting
    pub fn drain_texts(&mut self) -> Vec<String> {
        let mut texts = Vec::new();
        while let Ok(Some(frame)) = self.rx.try_next() {
            if let WsFrame::Text(text) = frame {
                texts.push(text);
            }
        }
        texts
    }
}
