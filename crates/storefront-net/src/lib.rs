//! Socket runtime for the storefront engine.
//!
//! One tokio task owns the connection and the [`StorefrontEngine`]; it
//! selects over socket reads, queued intents, the engine's next timer
//! deadline and shutdown, so every handler runs to completion in order.

use std::{future, io, time::Duration};

use storefront_core::{
    ConnectionState, EngineConfig, EngineEvent, EngineOutput, Intent, LineFramer,
    StorefrontEngine, encode_request,
};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    net::TcpStream,
    sync::{broadcast, mpsc},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1:8080";
const INTENT_BUFFER: usize = 128;
const EVENT_BUFFER: usize = 512;
const READ_CHUNK: usize = 8 * 1024;

/// Connection settings for [`connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// `host:port` of the storefront server.
    pub server_address: String,
    pub engine: EngineConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            server_address: DEFAULT_SERVER_ADDRESS.to_owned(),
            engine: EngineConfig::default(),
        }
    }
}

/// Engine events as seen by one subscriber.
pub type EventStream = broadcast::Receiver<EngineEvent>;

/// The runtime task has exited and no longer reads intents.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("storefront runtime has stopped")]
pub struct RuntimeStopped;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },
}

/// Cloneable handle to a running storefront runtime.
#[derive(Clone, Debug)]
pub struct StorefrontHandle {
    intents: mpsc::Sender<Intent>,
    events: broadcast::Sender<EngineEvent>,
    shutdown: CancellationToken,
}

impl StorefrontHandle {
    /// Queue one intent; it is applied after everything queued before it.
    pub async fn send(&self, intent: Intent) -> Result<(), RuntimeStopped> {
        self.intents.send(intent).await.map_err(|_| RuntimeStopped)
    }

    /// Events emitted from now on. Slow subscribers see `Lagged`.
    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    /// Ask the runtime to stop; it emits `Disconnected` on the way out.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Connect to the server and start the runtime on the new socket.
pub async fn connect(config: RuntimeConfig) -> Result<StorefrontHandle, ConnectError> {
    let stream = TcpStream::connect(&config.server_address)
        .await
        .map_err(|source| ConnectError::Connect {
            address: config.server_address.clone(),
            source,
        })?;
    if let Err(err) = stream.set_nodelay(true) {
        debug!(error = %err, "failed to disable nagle");
    }
    info!(address = %config.server_address, "connected to storefront server");
    Ok(spawn_runtime(stream, config.engine))
}

/// Start the runtime over an already-established byte stream.
pub fn spawn_runtime<S>(stream: S, config: EngineConfig) -> StorefrontHandle
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (intents, intent_rx) = mpsc::channel(INTENT_BUFFER);
    let (events, _) = broadcast::channel(EVENT_BUFFER);
    let shutdown = CancellationToken::new();
    let (reader, writer) = tokio::io::split(stream);
    let runtime = StorefrontRuntime {
        engine: StorefrontEngine::new(config),
        events: events.clone(),
        intent_rx,
        shutdown: shutdown.child_token(),
        reader,
        writer,
        framer: LineFramer::new(),
        started: Instant::now(),
    };
    tokio::spawn(async move {
        runtime.run().await;
    });

    StorefrontHandle {
        intents,
        events,
        shutdown,
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Shutdown,
    IntentsClosed,
    ConnectionLost,
}

struct StorefrontRuntime<S> {
    engine: StorefrontEngine,
    events: broadcast::Sender<EngineEvent>,
    intent_rx: mpsc::Receiver<Intent>,
    shutdown: CancellationToken,
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    framer: LineFramer,
    started: Instant,
}

impl<S> StorefrontRuntime<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn run(mut self) {
        self.emit(EngineEvent::Connection(ConnectionState::Connected));
        let now_ms = self.now_ms();
        let startup = self.engine.startup(now_ms);
        let exit = match self.apply(startup).await {
            Ok(()) => self.event_loop().await,
            Err(err) => {
                warn!(error = %err, "failed to send startup requests");
                Exit::ConnectionLost
            }
        };

        info!(?exit, "storefront runtime stopping");
        if exit == Exit::ConnectionLost {
            let now_ms = self.now_ms();
            let outputs = self.engine.on_disconnected(now_ms);
            self.emit_alerts(outputs);
        }
        self.emit(EngineEvent::Connection(ConnectionState::Disconnected));
        self.emit_snapshot();
    }

    async fn event_loop(&mut self) -> Exit {
        let mut buf = vec![0_u8; READ_CHUNK];
        loop {
            let deadline = self
                .engine
                .next_deadline_ms()
                .map(|ms| self.started + Duration::from_millis(ms));

            let outputs = tokio::select! {
                _ = self.shutdown.cancelled() => return Exit::Shutdown,
                read = self.reader.read(&mut buf) => match read {
                    Ok(0) => {
                        info!("server closed the connection");
                        return Exit::ConnectionLost;
                    }
                    Ok(n) => {
                        let now_ms = self.now_ms();
                        let mut outputs = Vec::new();
                        for message in self.framer.push(&buf[..n]) {
                            trace!(kind = ?message.kind(), "server message");
                            outputs.extend(self.engine.handle_message(message, now_ms));
                        }
                        outputs
                    }
                    Err(err) => {
                        warn!(error = %err, "socket read failed");
                        return Exit::ConnectionLost;
                    }
                },
                intent = self.intent_rx.recv() => match intent {
                    Some(intent) => {
                        let now_ms = self.now_ms();
                        self.engine.handle_intent(intent, now_ms)
                    }
                    None => return Exit::IntentsClosed,
                },
                _ = sleep_until_deadline(deadline) => {
                    let now_ms = self.now_ms();
                    self.engine.on_tick(now_ms)
                }
            };

            if let Err(err) = self.apply(outputs).await {
                warn!(error = %err, "socket write failed");
                return Exit::ConnectionLost;
            }
        }
    }

    /// Write requests, surface alerts, then publish the new snapshot.
    async fn apply(&mut self, outputs: Vec<EngineOutput>) -> io::Result<()> {
        for output in outputs {
            match output {
                EngineOutput::Send(request) => match encode_request(&request) {
                    Ok(line) => {
                        trace!(request = request.kind(), "writing request");
                        self.writer.write_all(&line).await?;
                    }
                    Err(err) => warn!(request = request.kind(), error = %err, "failed to encode request"),
                },
                EngineOutput::Alert(alert) => self.emit(EngineEvent::Alert(alert)),
            }
        }
        self.writer.flush().await?;
        self.emit_snapshot();
        Ok(())
    }

    fn emit_alerts(&self, outputs: Vec<EngineOutput>) {
        for output in outputs {
            if let EngineOutput::Alert(alert) = output {
                self.emit(EngineEvent::Alert(alert));
            }
        }
    }

    /// Publish to current subscribers; having none is fine.
    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn emit_snapshot(&self) {
        self.emit(EngineEvent::Snapshot(Box::new(self.engine.snapshot())));
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
