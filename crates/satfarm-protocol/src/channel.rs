//! Typed WebSocket channels.
//!
//! A connection is split into an [`Outbox`] and an [`Inbox`], each carrying
//! one message direction. Every WebSocket binary message holds one frame.
//! `GROW_BUFFER` frames are produced and consumed here, so callers only ever
//! see their own message types.

use std::marker::PhantomData;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use satfarm_base::{Error, Result};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{accept_async, client_async, WebSocketStream};

use crate::codec::{decode, encode, frame, split_frame};
use crate::messages::Message;
use crate::window::{Bounds, ReceiveWindow, SendWindow, GROW_BUFFER_LEN, GROW_BUFFER_TAG};

fn transport(e: WsError) -> Error {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            Error::Disconnected("connection closed".to_string())
        }
        WsError::Io(io) => Error::Io(io),
        other => Error::Transport(other.to_string()),
    }
}

/// Sending half of a channel.
pub struct Outbox<M, S = TcpStream> {
    sink: SplitSink<WebSocketStream<S>, WsMessage>,
    window: SendWindow,
    _marker: PhantomData<fn(M)>,
}

impl<M, S> Outbox<M, S>
where
    M: Message,
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Sends one message, announcing a larger buffer first when needed.
    pub async fn send(&mut self, msg: &M) -> Result<()> {
        let payload = msg.to_payload()?;
        if let Some(size) = self.window.reserve(payload.len())? {
            tracing::trace!("{}: growing peer buffer to {} bytes", M::CHANNEL, size);
            let announce = frame(GROW_BUFFER_TAG, &encode(&size, M::CHANNEL)?);
            self.sink
                .send(WsMessage::binary(announce))
                .await
                .map_err(transport)?;
        }
        tracing::trace!("{}: sending {} ({} bytes)", M::CHANNEL, msg.kind(), payload.len());
        self.sink
            .send(WsMessage::binary(frame(msg.tag(), &payload)))
            .await
            .map_err(transport)
    }

    /// Starts the close handshake.
    pub async fn close(&mut self) -> Result<()> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(transport(e)),
        }
    }

    /// Payload size the peer is believed to accept.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.window.capacity()
    }
}

/// Receiving half of a channel.
pub struct Inbox<M, S = TcpStream> {
    source: SplitStream<WebSocketStream<S>>,
    window: ReceiveWindow,
    _marker: PhantomData<fn() -> M>,
}

impl<M, S> Inbox<M, S>
where
    M: Message,
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Waits for the next message.
    ///
    /// Returns `Ok(None)` once the peer closed the connection. Cancel safe:
    /// dropping the future never loses a message.
    pub async fn recv(&mut self) -> Result<Option<M>> {
        while let Some(item) = self.source.next().await {
            let data = match item {
                Ok(WsMessage::Binary(data)) => data,
                Ok(WsMessage::Close(_)) => return Ok(None),
                Ok(WsMessage::Text(_)) => {
                    return Err(Error::protocol(M::CHANNEL, "unexpected text message"));
                }
                Ok(_) => continue,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return Ok(None),
                Err(e) => return Err(transport(e)),
            };

            let (tag, payload) = split_frame(&data, M::CHANNEL)?;
            if tag == GROW_BUFFER_TAG {
                self.window
                    .admit("GROW_BUFFER", payload.len(), Bounds::exact(GROW_BUFFER_LEN))?;
                let size: i32 = decode(payload, M::CHANNEL)?;
                self.window.grow(size)?;
                tracing::trace!("{}: receive buffer now {} bytes", M::CHANNEL, self.window.capacity());
                continue;
            }

            let (kind, bounds) = M::describe(tag)
                .ok_or_else(|| Error::protocol(M::CHANNEL, format!("unknown tag {tag}")))?;
            self.window.admit(kind, payload.len(), bounds)?;
            let msg = M::from_payload(tag, payload)?;
            tracing::trace!("{}: received {}", M::CHANNEL, kind);
            return Ok(Some(msg));
        }
        Ok(None)
    }

    /// Returns a message only if one is ready right now.
    ///
    /// `None` means nothing was ready; `Some(Ok(None))` means closed.
    pub fn try_recv(&mut self) -> Option<Result<Option<M>>> {
        self.recv().now_or_never()
    }

    /// Current receive capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.window.capacity()
    }
}

/// Both halves of one connection, receiving `In` and sending `Out`.
pub struct Link<In, Out, S = TcpStream> {
    pub outbox: Outbox<Out, S>,
    pub inbox: Inbox<In, S>,
}

impl<In, Out, S> Link<In, Out, S>
where
    In: Message,
    Out: Message,
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Splits an established WebSocket into typed halves with default windows.
    pub fn new(ws: WebSocketStream<S>) -> Self {
        let (sink, source) = ws.split();
        Self {
            outbox: Outbox {
                sink,
                window: SendWindow::new(Out::CHANNEL),
                _marker: PhantomData,
            },
            inbox: Inbox {
                source,
                window: ReceiveWindow::new(In::CHANNEL),
                _marker: PhantomData,
            },
        }
    }

    /// Separates the halves.
    pub fn into_parts(self) -> (Outbox<Out, S>, Inbox<In, S>) {
        (self.outbox, self.inbox)
    }
}

/// Connects to a listening peer.
pub async fn connect<In: Message, Out: Message>(addr: &str) -> Result<Link<In, Out>> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let (ws, _) = client_async(format!("ws://{addr}/"), stream)
        .await
        .map_err(transport)?;
    Ok(Link::new(ws))
}

/// Completes the handshake of an accepted connection.
pub async fn accept<In: Message, Out: Message>(stream: TcpStream) -> Result<Link<In, Out>> {
    stream.set_nodelay(true)?;
    let ws = accept_async(stream).await.map_err(transport)?;
    Ok(Link::new(ws))
}

/// Two connected in-process endpoints, `A` receiving what `B` sends.
pub async fn in_memory<A: Message, B: Message>(
) -> (Link<A, B, DuplexStream>, Link<B, A, DuplexStream>) {
    let (left, right) = tokio::io::duplex(1 << 20);
    let client = WebSocketStream::from_raw_socket(left, Role::Client, None).await;
    let server = WebSocketStream::from_raw_socket(right, Role::Server, None).await;
    (Link::new(client), Link::new(server))
}
