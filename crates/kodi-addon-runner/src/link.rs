//! Add-on side of one thread channel.
//!
//! Each [`RunnerLink`] owns a pump thread running a current-thread tokio
//! runtime. The pump writes outbound envelopes, routes replies to the caller
//! waiting on their nonce and queues host calls for the add-on. Host calls
//! are answered by the thread running [`RunnerLink::serve`], or by that same
//! thread while it waits for the reply to one of its own calls.

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use kodi_addon_ifc::api::main::{CreateForNewThread, DestroyForThread, KillChild, NewThread};
use kodi_addon_ifc::api::{self, ApiFunction};
use kodi_addon_ifc::protocol::{Envelope, Frame, FuncGroup, ReplyStatus};
use kodi_addon_ifc::transport::{read_envelope, write_envelope, MessageTransport};
use kodi_addon_ifc::{AddonEntry, HostLink, InterfaceError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::{mpsc, Notify};

type ReplySender = Sender<Result<Vec<u8>>>;

enum LinkEvent {
    Outbound {
        envelope: Envelope,
        reply: Option<(u64, ReplySender)>,
    },
    Inbound(Envelope),
    Closed(String),
}

struct HostRequest {
    nonce: u64,
    frame: Frame,
    expects_reply: bool,
}

pub struct RunnerLink {
    uuid: String,
    thread_id: u64,
    label: String,
    entry: Weak<dyn AddonEntry>,
    events: mpsc::UnboundedSender<LinkEvent>,
    requests: Receiver<HostRequest>,
    shutdown: Arc<Notify>,
    closed: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
    nonce: AtomicU64,
    serving: Mutex<Option<ThreadId>>,
    stopping: AtomicBool,
}

impl RunnerLink {
    /// Connects to `endpoint` and introduces itself as thread `thread_id`
    /// of process `uuid`. Returns once the handshake is written.
    pub fn connect(
        endpoint: &Path,
        uuid: &str,
        thread_id: u64,
        entry: Weak<dyn AddonEntry>,
    ) -> Result<Arc<Self>> {
        let label = format!("{uuid}-{thread_id}");
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (requests_tx, requests_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let shutdown = Arc::new(Notify::new());
        let closed = Arc::new(AtomicBool::new(false));

        let pump = Pump {
            label: label.clone(),
            events_rx,
            requests: requests_tx,
            shutdown: Arc::clone(&shutdown),
            closed: Arc::clone(&closed),
            pending: HashMap::new(),
        };
        let endpoint = endpoint.to_path_buf();
        let hello = Envelope::Hello {
            uuid: uuid.to_string(),
            thread_id,
        };
        let reader_tx = events_tx.clone();

        let handle = thread::Builder::new()
            .name(format!("addon-link-{label}"))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };
                runtime.block_on(async move {
                    match handshake(&endpoint, &hello).await {
                        Ok(transport) => {
                            let _ = ready_tx.send(Ok(()));
                            pump.run(transport, reader_tx).await;
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                        }
                    }
                });
            })?;

        let connected = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(InterfaceError::ChannelClosed(label.clone())));
        if let Err(e) = connected {
            let _ = handle.join();
            return Err(e);
        }
        tracing::debug!(link = %label, "connected to host");

        Ok(Arc::new(Self {
            uuid: uuid.to_string(),
            thread_id,
            label,
            entry,
            events: events_tx,
            requests: requests_rx,
            shutdown,
            closed,
            pump: Mutex::new(Some(handle)),
            nonce: AtomicU64::new(0),
            serving: Mutex::new(None),
            stopping: AtomicBool::new(false),
        }))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Set once the host asked the add-on to stop.
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn closed_error(&self) -> InterfaceError {
        InterfaceError::ChannelClosed(self.label.clone())
    }

    fn post(&self, envelope: Envelope, reply: Option<(u64, ReplySender)>) -> Result<()> {
        self.events
            .send(LinkEvent::Outbound { envelope, reply })
            .map_err(|_| self.closed_error())
    }

    /// Answers host calls on the current thread until the host asks the
    /// add-on to stop or the connection drops.
    pub fn serve(&self) {
        *self.serving.lock() = Some(thread::current().id());
        while !self.is_stopping() {
            match self.requests.recv() {
                Ok(request) => self.answer(request),
                Err(_) => break,
            }
        }
        *self.serving.lock() = None;
        tracing::debug!(link = %self.label, stopping = self.is_stopping(), "serve loop finished");
    }

    fn is_serving_thread(&self) -> bool {
        *self.serving.lock() == Some(thread::current().id())
    }

    fn wait_reply(&self, reply: &Receiver<Result<Vec<u8>>>) -> Result<Vec<u8>> {
        if !self.is_serving_thread() {
            return reply.recv().map_err(|_| self.closed_error())?;
        }

        // The host may call back in while this thread waits.
        loop {
            select! {
                recv(reply) -> result => return result.map_err(|_| self.closed_error())?,
                recv(self.requests) -> request => match request {
                    Ok(request) => self.answer(request),
                    Err(_) => return Err(self.closed_error()),
                },
            }
        }
    }

    fn answer(&self, request: HostRequest) {
        let HostRequest {
            nonce,
            frame,
            expects_reply,
        } = request;
        let result = self.handle_request(&frame);
        if !expects_reply {
            if let Err(e) = result {
                tracing::debug!(link = %self.label, "one-way host call failed: {e}");
            }
            return;
        }

        let reply = match result {
            Ok(payload) => Envelope::Reply {
                nonce,
                status: ReplyStatus::Ok,
                payload,
            },
            Err(e) => {
                tracing::debug!(link = %self.label, group = ?frame.group, func = frame.func, "host call failed: {e}");
                Envelope::Reply {
                    nonce,
                    status: ReplyStatus::Failed(e.to_string()),
                    payload: Vec::new(),
                }
            }
        };
        if self.post(reply, None).is_err() {
            tracing::debug!(link = %self.label, nonce, "reply dropped, link closed");
        }
    }

    fn handle_request(&self, frame: &Frame) -> Result<Vec<u8>> {
        let entry = self.entry.upgrade().ok_or_else(|| self.closed_error())?;
        if frame.group == FuncGroup::Main && frame.func == KillChild::ID {
            let uuid: String = api::decode(&frame.payload)?;
            if uuid != self.uuid {
                return Err(InterfaceError::Protocol(format!("kill request for {uuid}")));
            }
            tracing::debug!(link = %self.label, "host asked the add-on to stop");
            entry.stop();
            self.stopping.store(true, Ordering::SeqCst);
            return api::encode(&());
        }
        entry.handle(frame)
    }

    /// Stops the pump. Queued envelopes are written first.
    pub fn close(&self) {
        self.shutdown.notify_one();
        if let Some(handle) = self.pump.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!(link = %self.label, "link pump panicked");
            }
        }
    }
}

impl HostLink for RunnerLink {
    fn thread_id(&self) -> u64 {
        self.thread_id
    }

    fn call(&self, frame: Frame) -> Result<Vec<u8>> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed) + 1;
        let (reply_tx, reply_rx) = bounded(1);
        self.post(
            Envelope::Call {
                nonce,
                frame,
                expects_reply: true,
            },
            Some((nonce, reply_tx)),
        )?;
        self.wait_reply(&reply_rx)
    }

    fn create_thread_link(&self) -> Result<Arc<dyn HostLink>> {
        let reply = self.call(api::frame::<CreateForNewThread>(&self.thread_id)?)?;
        let thread: NewThread = api::decode(&reply)?;
        let endpoint = thread
            .endpoint
            .map(PathBuf::from)
            .ok_or_else(|| InterfaceError::Protocol("no endpoint for new thread".into()))?;
        let link = RunnerLink::connect(&endpoint, &self.uuid, thread.thread_id, self.entry.clone())?;
        Ok(link)
    }

    fn release(&self) -> Result<()> {
        let released = self.call(api::frame::<DestroyForThread>(&self.thread_id)?);
        self.close();
        match released {
            // The host may tear the channel down before its reply is read.
            Ok(_) | Err(InterfaceError::ChannelClosed(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for RunnerLink {
    fn drop(&mut self) {
        self.close();
    }
}

async fn handshake(endpoint: &Path, hello: &Envelope) -> Result<MessageTransport> {
    let mut transport = MessageTransport::connect(endpoint).await?;
    transport.send(hello).await?;
    Ok(transport)
}

struct Pump {
    label: String,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    requests: Sender<HostRequest>,
    shutdown: Arc<Notify>,
    closed: Arc<AtomicBool>,
    pending: HashMap<u64, ReplySender>,
}

impl Pump {
    async fn run(mut self, transport: MessageTransport, reader_tx: mpsc::UnboundedSender<LinkEvent>) {
        let (mut reader, mut writer) = transport.into_split();
        let reader_task = tokio::spawn(async move {
            loop {
                match read_envelope(&mut reader).await {
                    Ok(envelope) => {
                        if reader_tx.send(LinkEvent::Inbound(envelope)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = reader_tx.send(LinkEvent::Closed(e.to_string()));
                        break;
                    }
                }
            }
        });

        loop {
            let event = tokio::select! {
                biased;
                event = self.events_rx.recv() => event,
                _ = self.shutdown.notified() => None,
            };
            let Some(event) = event else {
                break;
            };
            if !self.handle_event(event, &mut writer).await {
                break;
            }
        }

        reader_task.abort();
        self.close();
    }

    /// Returns false when the link is finished.
    async fn handle_event(&mut self, event: LinkEvent, writer: &mut OwnedWriteHalf) -> bool {
        match event {
            LinkEvent::Outbound { envelope, reply } => {
                if let Err(e) = write_envelope(writer, &envelope).await {
                    tracing::warn!(link = %self.label, "write failed: {e}");
                    if let Some((_, reply)) = reply {
                        let _ = reply.send(Err(InterfaceError::ChannelClosed(e.to_string())));
                    }
                    return false;
                }
                if let Some((nonce, reply)) = reply {
                    self.pending.insert(nonce, reply);
                }
                true
            }
            LinkEvent::Inbound(Envelope::Call {
                nonce,
                frame,
                expects_reply,
            }) => self
                .requests
                .send(HostRequest {
                    nonce,
                    frame,
                    expects_reply,
                })
                .is_ok(),
            LinkEvent::Inbound(Envelope::Reply {
                nonce,
                status,
                payload,
            }) => {
                match self.pending.remove(&nonce) {
                    Some(reply) => {
                        let result = match status {
                            ReplyStatus::Ok => Ok(payload),
                            ReplyStatus::Failed(message) => Err(InterfaceError::Remote(message)),
                        };
                        let _ = reply.send(result);
                    }
                    None => tracing::warn!(link = %self.label, nonce, "discarding unmatched reply"),
                }
                true
            }
            LinkEvent::Inbound(Envelope::Hello { .. }) => {
                tracing::warn!(link = %self.label, "unexpected handshake from host");
                true
            }
            LinkEvent::Closed(reason) => {
                tracing::debug!(link = %self.label, "host side closed: {reason}");
                false
            }
        }
    }

    fn close(mut self) {
        self.closed.store(true, Ordering::SeqCst);
        let closed = || InterfaceError::ChannelClosed(self.label.clone());
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(closed()));
        }
        self.events_rx.close();
        while let Ok(event) = self.events_rx.try_recv() {
            if let LinkEvent::Outbound {
                reply: Some((_, reply)),
                ..
            } = event
            {
                let _ = reply.send(Err(closed()));
            }
        }
    }
}
