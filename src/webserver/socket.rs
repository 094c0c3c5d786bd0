/// Adapter from axum's WebSocket to the bridge's frame contract
use crate::bridge::WsFrame;
use crate::errors::BridgeError;
use axum::extract::ws::{Message, WebSocket};
use futures::{ready, Sink, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

pub struct AxumSocket {
    inner: WebSocket,
}

impl AxumSocket {
    pub fn new(inner: WebSocket) -> Self {
        Self { inner }
    }
}

fn from_message(message: Message) -> WsFrame {
    match message {
        Message::Text(text) => WsFrame::Text(text),
        Message::Binary(bytes) => WsFrame::Binary(bytes),
        Message::Ping(data) => WsFrame::Ping(data),
        Message::Pong(data) => WsFrame::Pong(data),
        Message::Close(_) => WsFrame::Close,
    }
}

fn to_message(frame: WsFrame) -> Message {
    match frame {
        WsFrame::Text(text) => Message::Text(text),
        WsFrame::Binary(bytes) => Message::Binary(bytes),
        WsFrame::Ping(data) => Message::Ping(data),
        WsFrame::Pong(data) => Message::Pong(data),
        WsFrame::Close => Message::Close(None),
    }
}

impl Stream for AxumSocket {
    type Item = Result<WsFrame, BridgeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let next = ready!(self.inner.poll_next_unpin(cx));
        Poll::Ready(next.map(|item| item.map(from_message).map_err(BridgeError::transport)))
    }
}

impl Sink<WsFrame> for AxumSocket {
    type Error = BridgeError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_ready(cx)
            .map_err(BridgeError::transport)
    }

    fn start_send(mut self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        Pin::new(&mut self.inner)
            .start_send(to_message(item))
            .map_err(BridgeError::transport)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_flush(cx)
            .map_err(BridgeError::transport)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_close(cx)
            .map_err(BridgeError::transport)
    }
}
