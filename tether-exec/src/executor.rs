//! Command Executor.
//!
//! One executor per endpoint. Calls are queued to a single dispatcher task
//! that owns the channel and drains requests in FIFO order, so at most one
//! command is ever in flight on the wire. `disconnect` and `dispose` bump an
//! interrupt generation that fails every request queued before them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use tether_core::{CommandResult, EndpointDescriptor, EndpointId};

use crate::error::ExecError;
use crate::framing::{command_line, frame_command, new_marker, CompletionScanner};
use crate::transport::{Channel, Connector};
use crate::websocket::WebSocketConnector;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Bound on waiting for the channel to open.
    pub connect_timeout: Duration,
    /// Bound on waiting for a command's completion marker.
    pub command_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// Logical connection state of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Disconnected,
    Connecting,
    Connected,
}

struct CommandRequest {
    id: u64,
    command: String,
    marker: String,
}

enum Job {
    Connect {
        generation: u64,
        respond_to: oneshot::Sender<Result<(), ExecError>>,
    },
    Execute {
        generation: u64,
        request: CommandRequest,
        respond_to: oneshot::Sender<Result<CommandResult, ExecError>>,
    },
    Disconnect {
        respond_to: oneshot::Sender<()>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

struct LinkState {
    lifecycle: Lifecycle,
    open: Option<Arc<AtomicBool>>,
}

/// State shared between the handle and the dispatcher.
struct Link {
    state: Mutex<LinkState>,
}

impl Link {
    fn new() -> Self {
        Self {
            state: Mutex::new(LinkState {
                lifecycle: Lifecycle::Disconnected,
                open: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.lock().lifecycle = lifecycle;
    }

    fn attach(&self, open: Arc<AtomicBool>) {
        let mut state = self.lock();
        state.open = Some(open);
        state.lifecycle = Lifecycle::Connected;
    }

    fn detach(&self) {
        let mut state = self.lock();
        state.open = None;
        state.lifecycle = Lifecycle::Disconnected;
    }

    fn is_open(&self) -> bool {
        self.lock()
            .open
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }
}

/// Runs commands on one endpoint, one at a time.
pub struct Executor {
    endpoint: EndpointDescriptor,
    jobs: mpsc::UnboundedSender<Job>,
    interrupt: watch::Sender<u64>,
    link: Arc<Link>,
    next_id: AtomicU64,
    disposed: AtomicBool,
}

impl Executor {
    /// Create an executor and spawn its dispatcher on the current runtime.
    /// No connection is made until `connect` or `execute`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(
        endpoint: EndpointDescriptor,
        connector: Arc<dyn Connector>,
        settings: ExecutorSettings,
    ) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (interrupt_tx, interrupt_rx) = watch::channel(0u64);
        let link = Arc::new(Link::new());

        let dispatcher = Dispatcher {
            endpoint: endpoint.clone(),
            connector,
            settings,
            link: link.clone(),
            interrupt: interrupt_rx,
            channel: None,
        };
        tokio::spawn(dispatcher.run(jobs_rx));

        Self {
            endpoint,
            jobs: jobs_tx,
            interrupt: interrupt_tx,
            link,
            next_id: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
        }
    }

    /// Executor over the terminal WebSocket of `endpoint`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, like [`Executor::new`].
    pub fn websocket(endpoint: EndpointDescriptor, settings: ExecutorSettings) -> Self {
        Self::new(endpoint, Arc::new(WebSocketConnector), settings)
    }

    pub fn endpoint(&self) -> &EndpointDescriptor {
        &self.endpoint
    }

    pub fn endpoint_id(&self) -> &EndpointId {
        &self.endpoint.id
    }

    /// Live channel state, not the logical lifecycle.
    pub fn is_connected(&self) -> bool {
        self.link.is_open()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.link.lock().lifecycle
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Open the channel if it is not already open.
    pub async fn connect(&self) -> Result<(), ExecError> {
        self.ensure_usable()?;
        let (tx, rx) = oneshot::channel();
        self.submit(Job::Connect {
            generation: *self.interrupt.borrow(),
            respond_to: tx,
        })?;
        rx.await.map_err(|_| ExecError::Disposed)?
    }

    /// Close the channel. Any queued or in-flight command fails with
    /// [`ExecError::Disconnected`]. The executor may connect again later.
    pub async fn disconnect(&self) {
        if self.is_disposed() {
            return;
        }
        self.interrupt.send_modify(|generation| *generation += 1);
        let (tx, rx) = oneshot::channel();
        if self.submit(Job::Disconnect { respond_to: tx }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Run `program` with `args` appended, each argument shell-quoted.
    ///
    /// A non-zero exit status is a successful call returning a result with
    /// `success == false`. Connection failures and missing completion
    /// markers are errors.
    pub async fn execute(&self, program: &str, args: &[&str]) -> Result<CommandResult, ExecError> {
        self.ensure_usable()?;
        let request = CommandRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            command: command_line(program, args),
            marker: new_marker(),
        };
        let (tx, rx) = oneshot::channel();
        self.submit(Job::Execute {
            generation: *self.interrupt.borrow(),
            request,
            respond_to: tx,
        })?;
        rx.await.map_err(|_| ExecError::Disposed)?
    }

    /// Disconnect and stop the dispatcher. Every later call fails with
    /// [`ExecError::Disposed`].
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.interrupt.send_modify(|generation| *generation += 1);
        let (tx, rx) = oneshot::channel();
        if self.jobs.send(Job::Shutdown { respond_to: tx }).is_ok() {
            let _ = rx.await;
        }
        self.link.detach();
        tracing::debug!(endpoint = %self.endpoint.id, "executor disposed");
    }

    fn ensure_usable(&self) -> Result<(), ExecError> {
        if self.is_disposed() {
            Err(ExecError::Disposed)
        } else {
            Ok(())
        }
    }

    fn submit(&self, job: Job) -> Result<(), ExecError> {
        self.jobs.send(job).map_err(|_| ExecError::Disposed)
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("endpoint", &self.endpoint.id)
            .field("lifecycle", &self.lifecycle())
            .field("connected", &self.is_connected())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

enum Completion {
    Done(CommandResult),
    Closed,
    TimedOut,
    Interrupted,
}

struct Dispatcher {
    endpoint: EndpointDescriptor,
    connector: Arc<dyn Connector>,
    settings: ExecutorSettings,
    link: Arc<Link>,
    interrupt: watch::Receiver<u64>,
    channel: Option<Channel>,
}

impl Dispatcher {
    async fn run(mut self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = jobs.recv().await {
            match job {
                Job::Connect {
                    generation,
                    respond_to,
                } => {
                    let result = self.ensure_connected(generation).await;
                    let _ = respond_to.send(result);
                }
                Job::Execute {
                    generation,
                    request,
                    respond_to,
                } => {
                    let result = self.execute(generation, request).await;
                    let _ = respond_to.send(result);
                }
                Job::Disconnect { respond_to } => {
                    self.drop_channel("disconnect requested");
                    let _ = respond_to.send(());
                }
                Job::Shutdown { respond_to } => {
                    self.drop_channel("executor disposed");
                    let _ = respond_to.send(());
                    break;
                }
            }
        }
        self.drop_channel("dispatcher stopped");
    }

    fn interrupted(&mut self, generation: u64) -> bool {
        *self.interrupt.borrow_and_update() != generation
    }

    async fn ensure_connected(&mut self, generation: u64) -> Result<(), ExecError> {
        if self.interrupted(generation) {
            return Err(ExecError::Disconnected);
        }
        if self.channel.as_ref().is_some_and(Channel::is_open) {
            return Ok(());
        }
        if self.channel.is_some() {
            self.drop_channel("channel found closed; reconnecting");
        }
        if let Some(expired_at) = self.endpoint.expires_at {
            if self.endpoint.is_expired_at(Utc::now()) {
                return Err(ExecError::TokenExpired {
                    endpoint: self.endpoint.id.clone(),
                    expired_at,
                });
            }
        }

        self.link.set_lifecycle(Lifecycle::Connecting);
        let started = Instant::now();
        let timeout = self.settings.connect_timeout;
        let mut interrupt = self.interrupt.clone();
        let outcome = tokio::select! {
            opened = tokio::time::timeout(timeout, self.connector.open(&self.endpoint)) => match opened {
                Ok(result) => result,
                Err(_) => Err(ExecError::ConnectTimeout {
                    endpoint: self.endpoint.id.clone(),
                    timeout,
                }),
            },
            _ = interrupt.changed() => Err(ExecError::Disconnected),
        };

        match outcome {
            Ok(channel) => {
                self.link.attach(channel.open_flag());
                self.channel = Some(channel);
                tracing::info!(
                    endpoint = %self.endpoint.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "channel connected",
                );
                Ok(())
            }
            Err(err) => {
                self.link.detach();
                tracing::warn!(endpoint = %self.endpoint.id, error = %err, "connect failed");
                Err(err)
            }
        }
    }

    async fn execute(
        &mut self,
        generation: u64,
        request: CommandRequest,
    ) -> Result<CommandResult, ExecError> {
        self.ensure_connected(generation).await?;

        let framed = frame_command(&request.command, &request.marker);
        let timeout = self.settings.command_timeout;
        let started = Instant::now();
        let mut interrupt = self.interrupt.clone();
        tracing::debug!(
            endpoint = %self.endpoint.id,
            request = request.id,
            command = %request.command,
            "executing",
        );

        let completion = {
            let Some(channel) = self.channel.as_mut() else {
                return Err(ExecError::connection(&self.endpoint.id, "channel missing"));
            };
            if let Err(reason) = channel.send(&framed) {
                self.drop_channel("send failed");
                return Err(ExecError::connection(&self.endpoint.id, reason));
            }

            let mut scanner = CompletionScanner::new(&request.marker);
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    chunk = channel.recv() => match chunk {
                        Some(chunk) => {
                            if let Some(exit_code) = scanner.push(&chunk) {
                                break Completion::Done(CommandResult::from_exit(
                                    scanner.into_output(),
                                    exit_code,
                                ));
                            }
                        }
                        None => break Completion::Closed,
                    },
                    _ = &mut deadline => break Completion::TimedOut,
                    _ = interrupt.changed() => break Completion::Interrupted,
                }
            }
        };

        match completion {
            Completion::Done(result) => {
                tracing::debug!(
                    endpoint = %self.endpoint.id,
                    request = request.id,
                    exit_code = result.exit_code,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "command completed",
                );
                Ok(result)
            }
            Completion::Closed => {
                self.drop_channel("channel closed mid-command");
                Err(ExecError::connection(
                    &self.endpoint.id,
                    "channel closed before the command completed",
                ))
            }
            Completion::TimedOut => {
                self.drop_channel("command timed out");
                tracing::warn!(
                    endpoint = %self.endpoint.id,
                    request = request.id,
                    timeout_secs = timeout.as_secs(),
                    "command timed out; channel force-closed",
                );
                Err(ExecError::CommandTimeout {
                    command: request.command,
                    timeout,
                })
            }
            Completion::Interrupted => {
                self.drop_channel("interrupted by disconnect");
                Err(ExecError::Disconnected)
            }
        }
    }

    fn drop_channel(&mut self, reason: &str) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
            tracing::debug!(endpoint = %self.endpoint.id, reason, "channel closed");
        }
        self.link.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeouts_suit_handshake_and_installs() {
        let settings = ExecutorSettings::default();
        assert_eq!(settings.connect_timeout, Duration::from_secs(30));
        assert_eq!(settings.command_timeout, Duration::from_secs(600));
    }

    #[test]
    #[should_panic]
    fn construction_outside_runtime_panics() {
        let endpoint = EndpointDescriptor {
            id: EndpointId::from("e1"),
            address: "ws://fake/tty".to_string(),
            token: "t".to_string(),
            expires_at: None,
        };
        let shell = crate::testing::FakeShell::new(|_| crate::testing::Reply::ok(""));
        let _ = Executor::new(endpoint, Arc::new(shell), ExecutorSettings::default());
    }

    #[test]
    fn link_reports_open_only_while_flag_is_set() {
        let link = Link::new();
        assert!(!link.is_open());
        let flag = Arc::new(AtomicBool::new(true));
        link.attach(flag.clone());
        assert!(link.is_open());
        assert_eq!(link.lock().lifecycle, Lifecycle::Connected);
        flag.store(false, Ordering::Release);
        assert!(!link.is_open());
        link.detach();
        assert_eq!(link.lock().lifecycle, Lifecycle::Disconnected);
    }
}
