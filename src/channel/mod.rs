//! Duplex message channels.
//!
//! A channel handler runs once per accepted connection with a
//! [`ChannelSession`] and its injected values. It assigns the callbacks it
//! cares about; frames are read only after it returns. A callback returning
//! a value sends it straight back.

mod socket;

pub(crate) use socket::serve_channel;

use crate::error::{Result, SwitchyardError};
use crate::handler::ChannelFn;
use crate::inject::Injections;
use crate::routing::PathPattern;
use crate::value::Serializer;
use bytes::{Bytes, BytesMut};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Frames a session may queue ahead of a slow peer.
pub const OUTBOUND_CAPACITY: usize = 256;

/// A value to send over a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelPayload {
    Text(String),
    Binary(Bytes),
    /// Serialized with the registry's serializer and sent as text.
    Structured(Value),
}

impl From<&str> for ChannelPayload {
    fn from(value: &str) -> Self {
        ChannelPayload::Text(value.to_string())
    }
}

impl From<String> for ChannelPayload {
    fn from(value: String) -> Self {
        ChannelPayload::Text(value)
    }
}

impl From<Bytes> for ChannelPayload {
    fn from(value: Bytes) -> Self {
        ChannelPayload::Binary(value)
    }
}

impl From<Vec<u8>> for ChannelPayload {
    fn from(value: Vec<u8>) -> Self {
        ChannelPayload::Binary(Bytes::from(value))
    }
}

impl From<Value> for ChannelPayload {
    fn from(value: Value) -> Self {
        ChannelPayload::Structured(value)
    }
}

/// What a callback hands back: nothing, or a frame to send in reply.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelReply(pub Option<ChannelPayload>);

impl From<()> for ChannelReply {
    fn from(_: ()) -> Self {
        ChannelReply(None)
    }
}

impl<T: Into<ChannelPayload>> From<Option<T>> for ChannelReply {
    fn from(value: Option<T>) -> Self {
        ChannelReply(value.map(Into::into))
    }
}

macro_rules! reply_from {
    ($($t:ty),*) => {
        $(impl From<$t> for ChannelReply {
            fn from(value: $t) -> Self {
                ChannelReply(Some(value.into()))
            }
        })*
    };
}

reply_from!(&str, String, Bytes, Vec<u8>, Value);

/// A receive event from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Text(String),
    /// One message, possibly split over several buffers.
    Binary(Vec<Bytes>),
    Close(Option<CloseReason>),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

#[derive(Debug)]
pub(crate) enum Outbound {
    Text(String),
    Binary(Bytes),
    Close,
}

type TextCallback =
    dyn Fn(&ChannelSession, String) -> anyhow::Result<ChannelReply> + Send + Sync;
type BinaryCallback = dyn Fn(&ChannelSession, Bytes) -> anyhow::Result<ChannelReply> + Send + Sync;
type CloseCallback = dyn Fn(&ChannelSession, Option<CloseReason>) + Send + Sync;
type ErrorCallback = dyn Fn(&ChannelSession, &str) + Send + Sync;

/// One accepted duplex connection.
pub struct ChannelSession {
    id: String,
    path: String,
    params: Vec<(String, String)>,
    outbound: mpsc::Sender<Outbound>,
    serializer: Arc<dyn Serializer>,
    on_text: Option<Arc<TextCallback>>,
    on_binary: Option<Arc<BinaryCallback>>,
    on_close: Option<Arc<CloseCallback>>,
    on_error: Option<Arc<ErrorCallback>>,
}

impl ChannelSession {
    pub(crate) fn new(
        path: String,
        params: Vec<(String, String)>,
        outbound: mpsc::Sender<Outbound>,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            path,
            params,
            outbound,
            serializer,
            on_text: None,
            on_binary: None,
            on_close: None,
            on_error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// A path capture of the upgraded request.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Queue one frame. Frames leave in the order they were queued.
    ///
    /// Fails with [`SwitchyardError::ChannelFull`] when the peer is not
    /// reading and the queue is at capacity.
    pub fn send(&self, payload: impl Into<ChannelPayload>) -> Result<()> {
        let frame = match payload.into() {
            ChannelPayload::Text(text) => Outbound::Text(text),
            ChannelPayload::Binary(data) => Outbound::Binary(data),
            ChannelPayload::Structured(value) => Outbound::Text(self.serializer.serialize(&value)?),
        };
        self.enqueue(frame)
    }

    pub fn close(&self) -> Result<()> {
        self.enqueue(Outbound::Close)
    }

    fn enqueue(&self, frame: Outbound) -> Result<()> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SwitchyardError::ChannelFull {
                capacity: self.outbound.max_capacity(),
            },
            TrySendError::Closed(_) => SwitchyardError::ChannelClosed,
        })
    }

    pub fn on_text<F, R>(&mut self, f: F)
    where
        F: Fn(&ChannelSession, String) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Into<ChannelReply>,
    {
        self.on_text = Some(Arc::new(
            move |session: &ChannelSession, text: String| -> anyhow::Result<ChannelReply> {
                f(session, text).map(Into::into)
            },
        ));
    }

    pub fn on_binary<F, R>(&mut self, f: F)
    where
        F: Fn(&ChannelSession, Bytes) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Into<ChannelReply>,
    {
        self.on_binary = Some(Arc::new(
            move |session: &ChannelSession, data: Bytes| -> anyhow::Result<ChannelReply> {
                f(session, data).map(Into::into)
            },
        ));
    }

    pub fn on_close<F>(&mut self, f: F)
    where
        F: Fn(&ChannelSession, Option<CloseReason>) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(f));
    }

    pub fn on_error<F>(&mut self, f: F)
    where
        F: Fn(&ChannelSession, &str) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
    }

    /// Hand one receive event to the matching callback.
    pub fn deliver(&self, event: ChannelEvent) {
        let reply = match event {
            ChannelEvent::Text(text) => match &self.on_text {
                Some(callback) => callback(self, text),
                None => return,
            },
            ChannelEvent::Binary(fragments) => {
                let Some(callback) = &self.on_binary else {
                    return;
                };
                let data = reassemble(fragments);
                callback(self, data)
            }
            ChannelEvent::Close(reason) => {
                if let Some(callback) = &self.on_close {
                    callback(self, reason);
                }
                return;
            }
            ChannelEvent::Error(message) => {
                self.report_error(&message);
                return;
            }
        };

        match reply {
            Ok(ChannelReply(Some(payload))) => {
                if let Err(e) = self.send(payload) {
                    tracing::debug!(channel = %self.id, error = %e, "Reply dropped");
                }
            }
            Ok(ChannelReply(None)) => {}
            Err(e) => {
                tracing::warn!(channel = %self.id, error = %e, "Channel callback failed");
                self.report_error(&e.to_string());
            }
        }
    }

    fn report_error(&self, message: &str) {
        if let Some(callback) = &self.on_error {
            callback(self, message);
        }
    }
}

/// Join the fragments of one binary message. The fragments are released
/// before the result is handed on.
fn reassemble(fragments: Vec<Bytes>) -> Bytes {
    if fragments.len() == 1 {
        return fragments.into_iter().next().unwrap_or_default();
    }
    let mut buffer = BytesMut::with_capacity(fragments.iter().map(Bytes::len).sum());
    for fragment in fragments {
        buffer.extend_from_slice(&fragment);
    }
    buffer.freeze()
}

/// A registered channel handler.
pub(crate) struct ChannelRoute {
    pub(crate) pattern: PathPattern,
    pub(crate) function: Arc<ChannelFn>,
    pub(crate) injections: Injections,
}

impl ChannelRoute {
    /// Build the session and run the handler once; callbacks are set after this.
    pub(crate) fn open(
        &self,
        path: String,
        params: Vec<(String, String)>,
        outbound: mpsc::Sender<Outbound>,
        serializer: Arc<dyn Serializer>,
    ) -> anyhow::Result<ChannelSession> {
        let mut session = ChannelSession::new(path, params, outbound, serializer);
        let values = self.injections.resolve(None)?;
        (self.function)(&mut session, &values)?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::channel_with;
    use crate::inject::{Injector, ProviderFn};
    use crate::value::{Injected, JsonSerializer};
    use serde_json::json;
    use std::sync::Mutex;

    fn session() -> (ChannelSession, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let session = ChannelSession::new("/ws".into(), Vec::new(), tx, Arc::new(JsonSerializer));
        (session, rx)
    }

    fn next_text(rx: &mut mpsc::Receiver<Outbound>) -> String {
        match rx.try_recv().unwrap() {
            Outbound::Text(text) => text,
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn test_text_echo() {
        let (mut session, mut rx) = session();
        session.on_text(|_, text| Ok(format!("echo-{text}")));
        session.deliver(ChannelEvent::Text("hello".into()));
        assert_eq!(next_text(&mut rx), "echo-hello");
    }

    #[test]
    fn test_binary_fragments_are_joined() {
        let (mut session, mut rx) = session();
        session.on_binary(|_, data| Ok(data));
        session.deliver(ChannelEvent::Binary(vec![
            Bytes::from_static(b"ab"),
            Bytes::from_static(b"cd"),
        ]));
        match rx.try_recv().unwrap() {
            Outbound::Binary(data) => assert_eq!(data.as_ref(), b"abcd"),
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[test]
    fn test_structured_reply_and_no_reply() {
        let (mut session, mut rx) = session();
        session.on_text(|_, text| {
            Ok(if text == "quiet" {
                None
            } else {
                Some(json!({"got": text}))
            })
        });
        session.deliver(ChannelEvent::Text("quiet".into()));
        assert!(rx.try_recv().is_err());
        session.deliver(ChannelEvent::Text("x".into()));
        assert_eq!(next_text(&mut rx), r#"{"got":"x"}"#);
    }

    #[test]
    fn test_callback_errors_reach_on_error() {
        let (mut session, _rx) = session();
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = seen.clone();
        session.on_text(|_, _| -> anyhow::Result<()> { anyhow::bail!("bad frame") });
        session.on_error(move |_, message| sink.lock().unwrap().push(message.to_string()));
        session.deliver(ChannelEvent::Text("x".into()));
        session.deliver(ChannelEvent::Error("reset".into()));
        assert_eq!(*seen.lock().unwrap(), ["bad frame", "reset"]);
    }

    #[test]
    fn test_open_runs_handler_with_null_context() {
        let provider = ProviderFn::new("test", |name: &str| Injected::new(format!("INJECTED:{name}")));
        let injector = Injector::new(vec![Arc::new(provider)], Vec::new());
        let spec = channel_with(["test:a test injection", "$entity:json"], |session, values| {
            assert!(values[1].is_null());
            session.send(values[0].as_str().unwrap_or_default().to_string())?;
            session.on_text(|_, text| Ok(format!("echo-{text}")));
            Ok(())
        });
        let route = ChannelRoute {
            pattern: PathPattern::parse("/ws").unwrap(),
            injections: injector.bind(spec.specifiers()),
            function: spec.function().clone(),
        };
        let (tx, mut rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let session = route
            .open("/ws".into(), Vec::new(), tx, Arc::new(JsonSerializer))
            .unwrap();
        assert_eq!(next_text(&mut rx), "INJECTED:a test injection");
        session.deliver(ChannelEvent::Text("hi".into()));
        assert_eq!(next_text(&mut rx), "echo-hi");
    }

    #[test]
    fn test_send_after_close_fails() {
        let (session, rx) = session();
        drop(rx);
        assert!(matches!(session.send("x"), Err(SwitchyardError::ChannelClosed)));
    }

    #[test]
    fn test_full_queue_rejects_frames() {
        let (tx, mut rx) = mpsc::channel(2);
        let session = ChannelSession::new("/ws".into(), Vec::new(), tx, Arc::new(JsonSerializer));
        session.send("a").unwrap();
        session.send("b").unwrap();
        assert!(matches!(
            session.send("c"),
            Err(SwitchyardError::ChannelFull { capacity: 2 })
        ));

        // draining makes room again
        assert_eq!(next_text(&mut rx), "a");
        session.send("c").unwrap();
        assert_eq!(next_text(&mut rx), "b");
        assert_eq!(next_text(&mut rx), "c");
    }

    #[test]
    fn test_reply_to_full_queue_is_dropped() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut session = ChannelSession::new("/ws".into(), Vec::new(), tx, Arc::new(JsonSerializer));
        session.on_text(|_, text| Ok(text));
        session.deliver(ChannelEvent::Text("first".into()));
        session.deliver(ChannelEvent::Text("second".into()));
        assert_eq!(next_text(&mut rx), "first");
        assert!(rx.try_recv().is_err());
    }
}
