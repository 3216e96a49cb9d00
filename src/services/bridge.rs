//! Typed request/reply channels between isolation contexts.
//!
//! Frames are serialized to JSON text before they are sent, so nothing but
//! owned strings ever crosses a boundary. Replies are matched back to callers
//! through a [`PendingTable`]; replies nobody waits for are dropped.

use crate::error::{DetectorError, Result};
use crate::models::message_types::{Envelope, Reply};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub type Frame = String;

/// Correlation table from request id to the waiter for its reply.
pub struct PendingTable<T> {
    entries: Mutex<HashMap<Uuid, oneshot::Sender<T>>>,
}

impl<T> Default for PendingTable<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> PendingTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` and returns the receiver its reply will arrive on.
    /// Registering an id twice replaces the earlier waiter.
    pub fn register(&self, id: Uuid) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        rx
    }

    /// Hands `value` to the waiter for `id`. Returns false, dropping the value,
    /// when nothing is registered under `id` or the waiter has gone away.
    pub fn resolve(&self, id: &Uuid, value: T) -> bool {
        let waiter = self.lock().remove(id);
        match waiter {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    pub fn forget(&self, id: &Uuid) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, oneshot::Sender<T>>> {
        // A poisoned map is still structurally valid.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Caller half of a boundary: sends `Req` frames, awaits `Reply<Resp>` frames.
pub struct Channel<Req, Resp> {
    kind: &'static str,
    outbound: mpsc::UnboundedSender<Frame>,
    pending: Arc<PendingTable<Reply<Resp>>>,
    timeout: Option<Duration>,
    pump: JoinHandle<()>,
    _req: PhantomData<fn(Req)>,
}

impl<Req, Resp> Channel<Req, Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned + Send + 'static,
{
    /// Wires a channel onto an existing frame pair and starts its reply pump.
    pub fn connect(
        kind: &'static str,
        outbound: mpsc::UnboundedSender<Frame>,
        mut inbound: mpsc::UnboundedReceiver<Frame>,
        timeout: Option<Duration>,
    ) -> Self {
        let pending: Arc<PendingTable<Reply<Resp>>> = Arc::new(PendingTable::new());
        let table = pending.clone();

        let pump = tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                let envelope: Envelope<Reply<Resp>> = match serde_json::from_str(&frame) {
                    Ok(envelope) => envelope,
                    Err(e) => match frame_id(&frame) {
                        // The waiter still gets an answer, just not the one it asked for.
                        Some(id) => {
                            tracing::warn!(kind, request_id = %id, error = %e, "malformed reply frame");
                            Envelope {
                                id,
                                body: Reply::err(DetectorError::protocol(format!(
                                    "Malformed {} reply: {}",
                                    kind, e
                                ))),
                            }
                        }
                        None => {
                            tracing::warn!(kind, error = %e, "dropping unparseable reply frame");
                            continue;
                        }
                    },
                };
                if !table.resolve(&envelope.id, envelope.body) {
                    tracing::debug!(kind, request_id = %envelope.id, "discarding stale reply");
                }
            }
            tracing::debug!(kind, "reply stream closed");
        });

        Self {
            kind,
            outbound,
            pending,
            timeout,
            pump,
            _req: PhantomData,
        }
    }

    pub async fn call(&self, request: Req) -> Result<Resp> {
        self.call_with_id(Uuid::new_v4(), request).await
    }

    /// Sends `request` under a caller-chosen correlation id.
    pub async fn call_with_id(&self, id: Uuid, request: Req) -> Result<Resp> {
        let frame = serde_json::to_string(&Envelope { id, body: request }).map_err(|e| {
            DetectorError::ChannelClosed {
                message: format!("Failed to serialize {} request: {}", self.kind, e),
            }
        })?;

        let reply = self.pending.register(id);
        if self.outbound.send(frame).is_err() {
            self.pending.forget(&id);
            return Err(self.closed("peer context is gone"));
        }

        let reply = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, reply).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.pending.forget(&id);
                    return Err(DetectorError::BoundaryTimeout {
                        channel: self.kind.to_string(),
                        seconds: limit.as_secs(),
                    });
                }
            },
            None => reply.await,
        };

        reply
            .map_err(|_| self.closed("request was retired before a reply arrived"))?
            .into_result()
    }

    /// Number of calls still waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Retires every outstanding call; their callers fail with `ChannelClosed`
    /// and any late reply is discarded.
    pub fn retire_all(&self) {
        self.pending.clear();
    }

    fn closed(&self, why: &str) -> DetectorError {
        DetectorError::ChannelClosed {
            message: format!("{}: {}", self.kind, why),
        }
    }
}

impl<Req, Resp> Drop for Channel<Req, Resp> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Server half of a boundary. Each request is handled on its own task so a
/// slow request never holds up the others.
pub fn serve<Req, Resp, H, Fut>(
    kind: &'static str,
    mut inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: mpsc::UnboundedSender<Frame>,
    handler: H,
) -> JoinHandle<()>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    H: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
{
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        while let Some(frame) = inbound.recv().await {
            let envelope: Envelope<Req> = match serde_json::from_str(&frame) {
                Ok(envelope) => envelope,
                Err(e) => {
                    match frame_id(&frame) {
                        Some(id) => {
                            tracing::warn!(kind, request_id = %id, error = %e, "rejecting malformed request frame");
                            let reply = Reply::<Resp>::err(DetectorError::protocol(format!(
                                "Malformed {} request: {}",
                                kind, e
                            )));
                            send_reply(kind, &outbound, id, reply);
                        }
                        None => tracing::warn!(kind, error = %e, "dropping unparseable request frame"),
                    }
                    continue;
                }
            };

            let handler = handler.clone();
            let outbound = outbound.clone();
            tokio::spawn(async move {
                let id = envelope.id;
                let reply: Reply<Resp> = handler(envelope.body).await.into();
                send_reply(kind, &outbound, id, reply);
            });
        }
        tracing::debug!(kind, "request stream closed");
    })
}

/// Writes a reply frame. A reply that cannot be encoded is replaced by an
/// error reply so the caller is never left waiting.
fn send_reply<Resp: Serialize>(
    kind: &'static str,
    outbound: &mpsc::UnboundedSender<Frame>,
    id: Uuid,
    reply: Reply<Resp>,
) {
    let frame = serde_json::to_string(&Envelope { id, body: reply }).or_else(|e| {
        tracing::error!(kind, request_id = %id, error = %e, "failed to serialize reply");
        let fallback = Reply::<Resp>::err(DetectorError::protocol(format!("Unencodable {} reply: {}", kind, e)));
        serde_json::to_string(&Envelope { id, body: fallback })
    });
    match frame {
        Ok(frame) => {
            if outbound.send(frame).is_err() {
                tracing::debug!(kind, request_id = %id, "caller gone, reply dropped");
            }
        }
        Err(e) => tracing::error!(kind, request_id = %id, error = %e, "reply lost"),
    }
}

#[derive(Deserialize)]
struct FrameId {
    id: Uuid,
}

/// Pulls the correlation id out of a frame whose body did not parse.
fn frame_id(frame: &str) -> Option<Uuid> {
    serde_json::from_str::<FrameId>(frame).ok().map(|f| f.id)
}

/// Opens a boundary: spawns the serving side and returns the caller side.
pub fn open<Req, Resp, H, Fut>(
    kind: &'static str,
    timeout: Option<Duration>,
    handler: H,
) -> (Channel<Req, Resp>, JoinHandle<()>)
where
    Req: Serialize + DeserializeOwned + Send + 'static,
    Resp: Serialize + DeserializeOwned + Send + 'static,
    H: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
{
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let server = serve(kind, request_rx, reply_tx, handler);
    (Channel::connect(kind, request_tx, reply_rx, timeout), server)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(tag = "type", rename = "ECHO")]
    struct Echo {
        text: String,
    }

    #[test]
    fn pending_table_drops_unmatched_values() {
        let table: PendingTable<u32> = PendingTable::new();
        let id = Uuid::new_v4();
        let mut rx = table.register(id);
        assert_eq!(table.len(), 1);

        assert!(!table.resolve(&Uuid::new_v4(), 7));
        assert!(table.resolve(&id, 42));
        assert_eq!(rx.try_recv().unwrap(), 42);
        assert!(table.is_empty());

        // Second reply for the same id has nobody to go to.
        assert!(!table.resolve(&id, 43));
    }

    #[tokio::test]
    async fn call_round_trips_through_json_frames() {
        let (channel, _server) = open("ECHO", None, |req: Echo| async move {
            Ok::<_, DetectorError>(req.text.to_uppercase())
        });

        let reply: String = channel.call(Echo { text: "hi".into() }).await.unwrap();
        assert_eq!(reply, "HI");
        assert_eq!(channel.in_flight(), 0);
    }

    #[tokio::test]
    async fn handler_errors_are_re_raised_for_the_caller() {
        let (channel, _server) = open("ECHO", None, |_: Echo| async move {
            Err::<String, _>(DetectorError::Auth {
                message: "no key".into(),
            })
        });

        let err = channel.call(Echo { text: "x".into() }).await.unwrap_err();
        assert!(matches!(err, DetectorError::Auth { .. }));
    }

    #[tokio::test]
    async fn stale_and_garbage_replies_are_ignored() {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<Frame>();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel::<Frame>();
        let channel: Channel<Echo, String> = Channel::connect("ECHO", request_tx, reply_rx, None);

        let id = Uuid::new_v4();
        let call = tokio::spawn(async move { channel.call_with_id(id, Echo { text: "a".into() }).await });

        let sent = request_rx.recv().await.unwrap();
        assert!(sent.contains(&id.to_string()));

        reply_tx.send("not json".to_string()).unwrap();
        let stale = Envelope {
            id: Uuid::new_v4(),
            body: Reply::ok("stale".to_string()),
        };
        reply_tx.send(serde_json::to_string(&stale).unwrap()).unwrap();
        let real = Envelope {
            id,
            body: Reply::ok("fresh".to_string()),
        };
        reply_tx.send(serde_json::to_string(&real).unwrap()).unwrap();

        assert_eq!(call.await.unwrap().unwrap(), "fresh");
    }

    #[tokio::test]
    async fn malformed_reply_with_known_id_fails_the_call() {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<Frame>();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel::<Frame>();
        let channel: Channel<Echo, Vec<f32>> = Channel::connect("ECHO", request_tx, reply_rx, None);

        let id = Uuid::new_v4();
        let call = tokio::spawn(async move { channel.call_with_id(id, Echo { text: "a".into() }).await });
        request_rx.recv().await.unwrap();

        // What a NaN logit looks like once serde_json has written it.
        let reply = Envelope {
            id,
            body: Reply::ok(vec![f32::NAN, 1.0]),
        };
        let frame = serde_json::to_string(&reply).unwrap();
        assert!(frame.contains("null"));
        reply_tx.send(frame).unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, DetectorError::RemoteProtocol { .. }));
    }

    #[tokio::test]
    async fn malformed_request_gets_an_error_reply() {
        let (request_tx, request_rx) = mpsc::unbounded_channel::<Frame>();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Frame>();
        let _server = serve("ECHO", request_rx, reply_tx, |req: Echo| async move {
            Ok::<_, DetectorError>(req.text)
        });

        let id = Uuid::new_v4();
        request_tx
            .send(format!(r#"{{"id":"{}","type":"ECHO","text":42}}"#, id))
            .unwrap();
        request_tx.send("no id at all".to_string()).unwrap();

        let frame = reply_rx.recv().await.unwrap();
        let reply: Envelope<Reply<String>> = serde_json::from_str(&frame).unwrap();
        assert_eq!(reply.id, id);
        assert!(matches!(
            reply.body.into_result(),
            Err(DetectorError::RemoteProtocol { .. })
        ));
    }

    #[tokio::test]
    async fn timeout_forgets_the_pending_entry() {
        let (request_tx, _request_rx) = mpsc::unbounded_channel::<Frame>();
        let (_reply_tx, reply_rx) = mpsc::unbounded_channel::<Frame>();
        let channel: Channel<Echo, String> =
            Channel::connect("ECHO", request_tx, reply_rx, Some(Duration::from_millis(20)));

        let err = channel.call(Echo { text: "a".into() }).await.unwrap_err();
        assert!(matches!(err, DetectorError::BoundaryTimeout { .. }));
        assert_eq!(channel.in_flight(), 0);
    }

    #[tokio::test]
    async fn retired_calls_fail_as_closed() {
        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<Frame>();
        let (_reply_tx, reply_rx) = mpsc::unbounded_channel::<Frame>();
        let channel = Arc::new(Channel::<Echo, String>::connect("ECHO", request_tx, reply_rx, None));

        let caller = channel.clone();
        let call = tokio::spawn(async move { caller.call(Echo { text: "a".into() }).await });
        request_rx.recv().await.unwrap();

        channel.retire_all();
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, DetectorError::ChannelClosed { .. }));
    }
}
