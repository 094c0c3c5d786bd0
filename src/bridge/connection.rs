/// Transport contract for a client connection
///
/// The bridge only needs a stream of inbound frames and a sink for outbound
/// ones. The axum adapter and the in-memory test connection both provide it.
use super::frame::WsFrame;
use crate::errors::BridgeError;
use futures::{Sink, Stream};

pub trait WsConnection:
    Stream<Item = Result<WsFrame, BridgeError>> + Sink<WsFrame, Error = BridgeError> + Send + Unpin + 'static
{
}

impl<T> WsConnection for T where
    T: Stream<Item = Result<WsFrame, BridgeError>>
        + Sink<WsFrame, Error = BridgeError>
        + Send
        + Unpin
        + 'static
{
}
