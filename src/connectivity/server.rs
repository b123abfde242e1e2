// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Threaded multi-client transport server

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::framing::{FrameDecoder, Framing};
use super::{Connection, Endpoint, Listener};
use crate::core::{EventSink, Worker};
use crate::{Error, Result};

/// Request handler bound to one client
pub trait Session: Send {
    /// Encoded response for one inbound message
    fn handle_frame(&mut self, raw: &[u8]) -> Vec<u8>;

    /// Called once the response from the last `handle_frame` was written
    fn after_reply(&mut self) {}
}

pub trait SessionFactory: Send + Sync + 'static {
    type Session: Session + 'static;

    fn create(&self, client_id: &str) -> Self::Session;
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Accept poll period and per-read timeout
    pub poll_interval: Duration,
    /// Shared deadline for joining every thread on stop
    pub shutdown_timeout: Duration,
    /// Pause after a failed accept
    pub accept_backoff: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(5),
            accept_backoff: Duration::from_millis(500),
        }
    }
}

type ConnOf<E> = <<E as Endpoint>::Listener as Listener>::Conn;

/// Write half of a client connection
struct ClientWriter<C> {
    conn: Mutex<C>,
    closed: AtomicBool,
}

impl<C: Connection> ClientWriter<C> {
    fn new(conn: C) -> Self {
        Self {
            conn: Mutex::new(conn),
            closed: AtomicBool::new(false),
        }
    }

    fn send(&self, frame: &[u8]) -> std::io::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ErrorKind::NotConnected.into());
        }
        let mut conn = self.conn.lock();
        conn.write_all(frame)?;
        conn.flush()
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.conn.lock().shutdown();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ClientEntry<C> {
    writer: Arc<ClientWriter<C>>,
    generation: u64,
    worker: Option<Worker>,
}

struct Shared<E: Endpoint, F> {
    name: String,
    endpoint: E,
    factory: F,
    settings: ServerSettings,
    running: AtomicBool,
    clients: Mutex<HashMap<String, ClientEntry<ConnOf<E>>>>,
    /// Client threads whose table entry is gone but which may still be running
    retired: Mutex<Vec<Worker>>,
    next_generation: AtomicU64,
    live_threads: Arc<AtomicUsize>,
}

/// Accepts peers on an [`Endpoint`], runs one [`Session`] per peer and
/// broadcasts telemetry to all of them.
pub struct TransportServer<E: Endpoint, F: SessionFactory> {
    shared: Arc<Shared<E, F>>,
    accept: Mutex<Option<Worker>>,
}

impl<E: Endpoint, F: SessionFactory> TransportServer<E, F> {
    pub fn new(name: &str, endpoint: E, factory: F, settings: ServerSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.to_string(),
                endpoint,
                factory,
                settings,
                running: AtomicBool::new(false),
                clients: Mutex::new(HashMap::new()),
                retired: Mutex::new(Vec::new()),
                next_generation: AtomicU64::new(0),
                live_threads: Arc::new(AtomicUsize::new(0)),
            }),
            accept: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Bind and start accepting. A no-op while already listening.
    pub fn start(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let listener = match shared.endpoint.bind() {
            Ok(listener) => listener,
            Err(e) => {
                shared.running.store(false, Ordering::SeqCst);
                return Err(Error::TransportIo(e));
            }
        };

        let accept_shared = shared.clone();
        let spawned = Worker::spawn_counted(
            &format!("{}-accept", shared.name),
            Some(shared.live_threads.clone()),
            move || accept_loop(accept_shared, listener),
        );
        match spawned {
            Ok(worker) => *self.accept.lock() = Some(worker),
            Err(e) => {
                shared.running.store(false, Ordering::SeqCst);
                return Err(Error::TransportIo(e));
            }
        }

        info!("{} server listening on {}", shared.name, shared.endpoint.describe());
        Ok(())
    }

    /// Close every client and join all server threads against one deadline
    pub fn stop(&self) {
        let shared = &self.shared;
        if !shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping {} server", shared.name);
        let deadline = Instant::now() + shared.settings.shutdown_timeout;

        let accept = self.accept.lock().take();
        if let Some(worker) = accept {
            worker.join_until(deadline);
        }

        let drained: Vec<ClientEntry<ConnOf<E>>> = shared.clients.lock().drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.writer.close();
        }
        let retired: Vec<Worker> = shared.retired.lock().drain(..).collect();

        let workers = drained.into_iter().filter_map(|e| e.worker).chain(retired);
        for worker in workers {
            worker.join_until(deadline);
        }

        let live = shared.live_threads.load(Ordering::SeqCst);
        if live > 0 {
            warn!("{} server stopped with {} thread(s) still running", shared.name, live);
        } else {
            info!("{} server stopped", shared.name);
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn client_count(&self) -> usize {
        self.shared.clients.lock().len()
    }

    pub fn client_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.clients.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Threads of this server still alive
    pub fn live_threads(&self) -> usize {
        self.shared.live_threads.load(Ordering::SeqCst)
    }

    /// Send one message to every client; returns the number reached
    pub fn broadcast(&self, payload: &[u8]) -> usize {
        let shared = &self.shared;
        let frame = shared.endpoint.framing().encode(payload);
        let snapshot: Vec<(String, Arc<ClientWriter<ConnOf<E>>>)> = shared
            .clients
            .lock()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.writer.clone()))
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, writer) in snapshot {
            match writer.send(&frame) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("{}: broadcast to {} failed: {}", shared.name, id, e);
                    failed.push((id, writer));
                }
            }
        }

        if !failed.is_empty() {
            {
                let mut clients = shared.clients.lock();
                let mut retired = shared.retired.lock();
                for (id, writer) in &failed {
                    let same = clients.get(id).map(|e| Arc::ptr_eq(&e.writer, writer)).unwrap_or(false);
                    if same {
                        if let Some(worker) = clients.remove(id).and_then(|e| e.worker) {
                            retired.push(worker);
                        }
                    }
                }
            }
            for (id, writer) in failed {
                writer.close();
                info!("{}: dropped client {}", shared.name, id);
            }
        }

        delivered
    }
}

impl<E: Endpoint, F: SessionFactory> Drop for TransportServer<E, F> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<E: Endpoint, F: SessionFactory> EventSink for TransportServer<E, F> {
    fn name(&self) -> &str {
        TransportServer::name(self)
    }

    fn start(&self) -> Result<()> {
        TransportServer::start(self)
    }

    fn publish(&self, payload: &[u8]) -> usize {
        self.broadcast(payload)
    }

    fn client_count(&self) -> usize {
        TransportServer::client_count(self)
    }

    fn is_listening(&self) -> bool {
        self.is_running()
    }

    fn stop(&self) {
        TransportServer::stop(self)
    }
}

impl<E: Endpoint, F: SessionFactory> Shared<E, F> {
    fn register(self: &Arc<Self>, conn: ConnOf<E>, id: String) {
        let reader = match conn.try_clone_conn() {
            Ok(reader) => reader,
            Err(e) => {
                warn!("{}: cannot set up client {}: {}", self.name, id, e);
                conn.shutdown();
                return;
            }
        };
        let writer = Arc::new(ClientWriter::new(conn));
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);

        let replaced = {
            let mut clients = self.clients.lock();
            let shared = self.clone();
            let thread_writer = writer.clone();
            let thread_id = id.clone();
            let spawned = Worker::spawn_counted(
                &format!("{}-client", self.name),
                Some(self.live_threads.clone()),
                move || serve_client(shared, thread_id, generation, reader, thread_writer),
            );
            let worker = match spawned {
                Ok(worker) => worker,
                Err(e) => {
                    drop(clients);
                    warn!("{}: cannot spawn reader for {}: {}", self.name, id, e);
                    writer.close();
                    return;
                }
            };
            clients.insert(
                id.clone(),
                ClientEntry {
                    writer,
                    generation,
                    worker: Some(worker),
                },
            )
        };

        if let Some(old) = replaced {
            info!("{}: client {} reconnected, closing the previous connection", self.name, id);
            old.writer.close();
            if let Some(worker) = old.worker {
                self.retired.lock().push(worker);
            }
        } else {
            info!("{}: client {} connected", self.name, id);
        }
        self.retired.lock().retain(|w| !w.is_finished());
    }

    /// Remove `id` if the entry still belongs to connection `generation`
    fn unregister(&self, id: &str, generation: u64) {
        let mut clients = self.clients.lock();
        if clients.get(id).map(|e| e.generation == generation).unwrap_or(false) {
            if let Some(worker) = clients.remove(id).and_then(|e| e.worker) {
                self.retired.lock().push(worker);
            }
            info!("{}: client {} disconnected", self.name, id);
        }
    }
}

fn accept_loop<E: Endpoint, F: SessionFactory>(shared: Arc<Shared<E, F>>, mut listener: E::Listener) {
    while shared.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok(Some((conn, id))) => shared.register(conn, id),
            Ok(None) => thread::sleep(shared.settings.poll_interval),
            Err(e) => {
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
                warn!("{}: accept failed: {}", shared.name, e);
                thread::sleep(shared.settings.accept_backoff);
            }
        }
    }
    drop(listener);
    debug!("{} accept loop exited", shared.name);
}

fn serve_client<E: Endpoint, F: SessionFactory>(
    shared: Arc<Shared<E, F>>,
    id: String,
    generation: u64,
    mut reader: ConnOf<E>,
    writer: Arc<ClientWriter<ConnOf<E>>>,
) {
    let framing: Framing = shared.endpoint.framing();
    let idle_limit = shared.endpoint.read_timeout();
    let mut session = shared.factory.create(&id);
    let mut decoder = FrameDecoder::new(framing);

    if let Err(e) = reader.set_read_timeout(shared.settings.poll_interval) {
        warn!("{}: cannot set read timeout for {}: {}", shared.name, id, e);
    }

    let mut buf = [0u8; 4096];
    let mut last_activity = Instant::now();
    'read: loop {
        if !shared.running.load(Ordering::SeqCst) || writer.is_closed() {
            break;
        }
        match reader.read(&mut buf) {
            Ok(0) => {
                debug!("{}: {} closed the connection", shared.name, id);
                break;
            }
            Ok(n) => {
                last_activity = Instant::now();
                for frame in decoder.push(&buf[..n]) {
                    let response = session.handle_frame(&frame);
                    if let Err(e) = writer.send(&framing.encode(&response)) {
                        debug!("{}: reply to {} failed: {}", shared.name, id, e);
                        break 'read;
                    }
                    session.after_reply();
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                if let Some(limit) = idle_limit {
                    if last_activity.elapsed() >= limit {
                        info!("{}: {} idle for {:?}, disconnecting", shared.name, id, limit);
                        break;
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                debug!("{}: read from {} failed: {}", shared.name, id, e);
                break;
            }
        }
    }

    shared.unregister(&id, generation);
    writer.close();
}
