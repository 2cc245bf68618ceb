//! Per-thread message channel to an add-on.
//!
//! A [`RunningThread`] is one call/response conduit tied to one logical
//! thread of the add-on. Socket channels own a pump thread running a
//! current-thread tokio runtime: it writes outbound calls, answers inbound
//! add-on calls through an [`InboundDispatch`], and routes replies back to
//! the blocked caller. Direct channels call the in-process entry on the
//! caller's thread.
//!
//! At most one request is outstanding per channel. Every blocking call has a
//! timeout; a timed-out call marks the channel suspect, which the sweep
//! treats like a dead process.

use crate::api;
use crate::api::main::KillChild;
use crate::entry::AddonEntry;
use crate::error::{InterfaceError, Result};
use crate::protocol::{Envelope, Frame, ReplyStatus};
use crate::transport::{read_envelope, write_envelope, TransportListener};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::{mpsc, Notify};

/// Host side handler for calls arriving from the add-on.
pub trait InboundDispatch: Send + Sync {
    fn dispatch(&self, thread_id: u64, frame: &Frame) -> Result<Vec<u8>>;
}

type ReplySender = Sender<Result<Vec<u8>>>;

enum ChannelEvent {
    Outbound {
        nonce: u64,
        frame: Frame,
        reply: Option<ReplySender>,
    },
    Inbound(Envelope),
    Closed(String),
}

#[derive(Default)]
struct SocketState {
    connected: AtomicBool,
    closed: AtomicBool,
}

struct SocketBackend {
    events: mpsc::UnboundedSender<ChannelEvent>,
    shutdown: Arc<Notify>,
    state: Arc<SocketState>,
    pump: Mutex<Option<JoinHandle<()>>>,
    pump_thread: ThreadId,
}

enum Backend {
    Socket(SocketBackend),
    Direct(Arc<dyn AddonEntry>),
}

pub struct RunningThread {
    label: String,
    backend: Backend,
    gate: Mutex<()>,
    nonce: AtomicU64,
    suspect: AtomicBool,
    destroyed: AtomicBool,
}

impl RunningThread {
    /// Binds `endpoint` and starts the pump, which waits for the add-on
    /// thread `id` of process `uuid` to connect.
    pub fn listen(
        id: u64,
        uuid: &str,
        endpoint: &Path,
        dispatch: Arc<dyn InboundDispatch>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let label = format!("{uuid}-{id}");
        let listener = TransportListener::bind(endpoint)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());
        let state = Arc::new(SocketState::default());

        let pump = Pump {
            id,
            uuid: uuid.to_string(),
            label: label.clone(),
            listener,
            dispatch,
            events_tx: events_tx.clone(),
            events_rx,
            shutdown: Arc::clone(&shutdown),
            state: Arc::clone(&state),
            connect_timeout,
        };

        let handle = thread::Builder::new()
            .name(format!("addon-channel-{label}"))
            .spawn(move || {
                let state = Arc::clone(&pump.state);
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!(channel = %pump.label, "failed to build channel runtime: {e}");
                        state.closed.store(true, Ordering::SeqCst);
                        return;
                    }
                };
                runtime.block_on(pump.run());
                state.closed.store(true, Ordering::SeqCst);
            })?;

        let pump_thread = handle.thread().id();
        Ok(Self {
            label,
            backend: Backend::Socket(SocketBackend {
                events: events_tx,
                shutdown,
                state,
                pump: Mutex::new(Some(handle)),
                pump_thread,
            }),
            gate: Mutex::new(()),
            nonce: AtomicU64::new(0),
            suspect: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Channel to an add-on linked into the host.
    pub fn direct(label: impl Into<String>, entry: Arc<dyn AddonEntry>) -> Self {
        Self {
            label: label.into(),
            backend: Backend::Direct(entry),
            gate: Mutex::new(()),
            nonce: AtomicU64::new(0),
            suspect: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Whether the add-on side completed its handshake.
    pub fn is_connected(&self) -> bool {
        match &self.backend {
            Backend::Socket(socket) => socket.state.connected.load(Ordering::SeqCst),
            Backend::Direct(_) => true,
        }
    }

    pub fn is_closed(&self) -> bool {
        if self.destroyed.load(Ordering::SeqCst) {
            return true;
        }
        match &self.backend {
            Backend::Socket(socket) => socket.state.closed.load(Ordering::SeqCst),
            Backend::Direct(_) => false,
        }
    }

    /// Set once a call on this channel timed out.
    pub fn is_suspect(&self) -> bool {
        self.suspect.load(Ordering::SeqCst)
    }

    /// Fire-and-forget call.
    pub fn send(&self, frame: Frame) -> Result<()> {
        match &self.backend {
            Backend::Direct(entry) => {
                let _gate = self.gate.lock();
                if let Err(e) = entry.handle(&frame) {
                    tracing::debug!(channel = %self.label, "one-way call failed: {e}");
                }
                Ok(())
            }
            Backend::Socket(socket) => self.socket_call(socket, frame, None).map(|_| ()),
        }
    }

    /// Blocking request/response call.
    pub fn call(&self, frame: Frame, timeout: Duration) -> Result<Vec<u8>> {
        match &self.backend {
            Backend::Direct(entry) => {
                if self.destroyed.load(Ordering::SeqCst) {
                    return Err(InterfaceError::ChannelClosed(self.label.clone()));
                }
                let _gate = self.gate.lock();
                entry.handle(&frame)
            }
            Backend::Socket(socket) => self
                .socket_call(socket, frame, Some(timeout))?
                .ok_or_else(|| InterfaceError::ChannelClosed(self.label.clone())),
        }
    }

    fn socket_call(
        &self,
        socket: &SocketBackend,
        frame: Frame,
        timeout: Option<Duration>,
    ) -> Result<Option<Vec<u8>>> {
        if thread::current().id() == socket.pump_thread {
            return Err(InterfaceError::ReentrantCall);
        }
        if self.is_closed() {
            return Err(InterfaceError::ChannelClosed(self.label.clone()));
        }

        let _gate = self.gate.lock();
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed) + 1;
        let closed = |_| InterfaceError::ChannelClosed(self.label.clone());

        let Some(timeout) = timeout else {
            socket
                .events
                .send(ChannelEvent::Outbound {
                    nonce,
                    frame,
                    reply: None,
                })
                .map_err(closed)?;
            return Ok(None);
        };

        let operation = api::function_name(frame.group, frame.func).unwrap_or("call");
        let (reply_tx, reply_rx) = bounded(1);
        socket
            .events
            .send(ChannelEvent::Outbound {
                nonce,
                frame,
                reply: Some(reply_tx),
            })
            .map_err(closed)?;

        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result.map(Some),
            Err(RecvTimeoutError::Timeout) => {
                self.suspect.store(true, Ordering::SeqCst);
                tracing::warn!(channel = %self.label, nonce, "{operation} timed out, channel marked suspect");
                Err(InterfaceError::Timeout {
                    operation: operation.to_string(),
                    duration_ms: timeout.as_millis() as u64,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(InterfaceError::ChannelClosed(self.label.clone()))
            }
        }
    }

    /// The in-process entry behind a direct channel.
    pub fn direct_entry(&self) -> Option<Arc<dyn AddonEntry>> {
        match &self.backend {
            Backend::Direct(entry) => Some(Arc::clone(entry)),
            Backend::Socket(_) => None,
        }
    }

    /// Asks the add-on to wind down before it is killed.
    pub fn request_stop(&self, uuid: &str, timeout: Duration) -> Result<()> {
        match &self.backend {
            Backend::Direct(entry) => {
                entry.stop();
                Ok(())
            }
            Backend::Socket(_) => self
                .call(api::frame::<KillChild>(&uuid.to_string())?, timeout)
                .map(|_| ()),
        }
    }

    /// Stops the pump and releases the endpoint. Safe to call repeatedly.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Backend::Socket(socket) = &self.backend {
            socket.shutdown.notify_one();
            if thread::current().id() != socket.pump_thread {
                if let Some(handle) = socket.pump.lock().take() {
                    let _ = handle.join();
                }
            }
        }
        tracing::debug!(channel = %self.label, "channel destroyed");
    }
}

impl Drop for RunningThread {
    fn drop(&mut self) {
        self.destroy();
    }
}

struct Pump {
    id: u64,
    uuid: String,
    label: String,
    listener: TransportListener,
    dispatch: Arc<dyn InboundDispatch>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    events_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    shutdown: Arc<Notify>,
    state: Arc<SocketState>,
    connect_timeout: Duration,
}

impl Pump {
    async fn run(mut self) {
        let accepted = tokio::select! {
            accepted = tokio::time::timeout(self.connect_timeout, self.listener.accept()) => Some(accepted),
            _ = self.shutdown.notified() => None,
        };
        let transport = match accepted {
            Some(Ok(Ok(transport))) => transport,
            Some(Ok(Err(e))) => {
                tracing::warn!(channel = %self.label, "accept failed: {e}");
                return self.close(None);
            }
            Some(Err(_)) => {
                tracing::warn!(channel = %self.label, "add-on did not connect within {:?}", self.connect_timeout);
                return self.close(None);
            }
            None => return self.close(None),
        };

        let (mut reader, mut writer) = transport.into_split();
        match tokio::time::timeout(self.connect_timeout, read_envelope(&mut reader)).await {
            Ok(Ok(Envelope::Hello { uuid, thread_id }))
                if uuid == self.uuid && thread_id == self.id => {}
            Ok(Ok(other)) => {
                tracing::warn!(channel = %self.label, "bad handshake: {other:?}");
                return self.close(None);
            }
            Ok(Err(e)) => {
                tracing::warn!(channel = %self.label, "handshake failed: {e}");
                return self.close(None);
            }
            Err(_) => {
                tracing::warn!(channel = %self.label, "handshake timed out");
                return self.close(None);
            }
        }
        self.state.connected.store(true, Ordering::SeqCst);
        tracing::debug!(channel = %self.label, "add-on thread connected");

        let reader_tx = self.events_tx.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match read_envelope(&mut reader).await {
                    Ok(envelope) => {
                        if reader_tx.send(ChannelEvent::Inbound(envelope)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = reader_tx.send(ChannelEvent::Closed(e.to_string()));
                        break;
                    }
                }
            }
        });

        let mut pending: Option<(u64, ReplySender)> = None;
        loop {
            let event = tokio::select! {
                biased;
                event = self.events_rx.recv() => event,
                _ = self.shutdown.notified() => None,
            };
            let Some(event) = event else {
                break;
            };
            if !self.handle_event(event, &mut writer, &mut pending).await {
                break;
            }
        }

        reader_task.abort();
        self.close(pending);
    }

    /// Returns false when the channel is finished.
    async fn handle_event(
        &self,
        event: ChannelEvent,
        writer: &mut OwnedWriteHalf,
        pending: &mut Option<(u64, ReplySender)>,
    ) -> bool {
        match event {
            ChannelEvent::Outbound {
                nonce,
                frame,
                reply,
            } => {
                let envelope = Envelope::Call {
                    nonce,
                    frame,
                    expects_reply: reply.is_some(),
                };
                if let Err(e) = write_envelope(writer, &envelope).await {
                    tracing::warn!(channel = %self.label, "write failed: {e}");
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(InterfaceError::ChannelClosed(e.to_string())));
                    }
                    return false;
                }
                if let Some(reply) = reply {
                    *pending = Some((nonce, reply));
                }
                true
            }
            ChannelEvent::Inbound(Envelope::Call {
                nonce,
                frame,
                expects_reply,
            }) => {
                let result = self.dispatch.dispatch(self.id, &frame);
                if !expects_reply {
                    if let Err(e) = result {
                        tracing::debug!(channel = %self.label, "one-way add-on call failed: {e}");
                    }
                    return true;
                }
                let reply = match result {
                    Ok(payload) => Envelope::Reply {
                        nonce,
                        status: ReplyStatus::Ok,
                        payload,
                    },
                    Err(e) => {
                        tracing::debug!(channel = %self.label, group = ?frame.group, func = frame.func, "add-on call failed: {e}");
                        Envelope::Reply {
                            nonce,
                            status: ReplyStatus::Failed(e.to_string()),
                            payload: Vec::new(),
                        }
                    }
                };
                if let Err(e) = write_envelope(writer, &reply).await {
                    tracing::warn!(channel = %self.label, "reply write failed: {e}");
                    return false;
                }
                true
            }
            ChannelEvent::Inbound(Envelope::Reply {
                nonce,
                status,
                payload,
            }) => {
                match pending.take() {
                    Some((expected, reply)) if expected == nonce => {
                        let result = match status {
                            ReplyStatus::Ok => Ok(payload),
                            ReplyStatus::Failed(message) => Err(InterfaceError::Remote(message)),
                        };
                        let _ = reply.send(result);
                    }
                    other => {
                        tracing::warn!(channel = %self.label, nonce, "discarding unmatched reply");
                        *pending = other;
                    }
                }
                true
            }
            ChannelEvent::Inbound(Envelope::Hello { .. }) => {
                tracing::warn!(channel = %self.label, "ignoring handshake on open channel");
                true
            }
            ChannelEvent::Closed(reason) => {
                tracing::debug!(channel = %self.label, "add-on side closed: {reason}");
                false
            }
        }
    }

    fn close(mut self, pending: Option<(u64, ReplySender)>) {
        self.state.closed.store(true, Ordering::SeqCst);
        let closed = || InterfaceError::ChannelClosed(self.label.clone());
        if let Some((_, reply)) = pending {
            let _ = reply.send(Err(closed()));
        }
        self.events_rx.close();
        while let Ok(event) = self.events_rx.try_recv() {
            if let ChannelEvent::Outbound {
                reply: Some(reply), ..
            } = event
            {
                let _ = reply.send(Err(closed()));
            }
        }
    }
}
