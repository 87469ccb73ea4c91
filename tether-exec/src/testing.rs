//! In-process fake remote shell for tests.
//!
//! [`FakeShell`] is a [`Connector`] whose channels behave like an
//! interactive terminal: every framed command is echoed back with
//! bracketed-paste noise, then the scripted output, the completion marker
//! and a prompt. Commands are recorded in arrival order.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use async_trait::async_trait;
use regex::Regex;

use tether_core::EndpointDescriptor;

use crate::error::ExecError;
use crate::transport::{Channel, ChannelPeer, Connector};

const PROMPT: &str = "\x1b[?2004hroot@fake:~# ";

static FRAMED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)^\( (.*) \); rc=\$\?; echo "(__TETHER_DONE_[0-9a-f]+__):exit=\$rc"\n$"#)
        .expect("framed command pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    /// Output and marker in one message each.
    Whole,
    /// The marker line is cut in half across two messages.
    SplitMarker,
    /// Echo only; the marker never arrives.
    Silent,
    /// Echo, then the remote side closes the channel.
    HangUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub output: String,
    pub exit_code: i32,
    pub mode: ReplyMode,
}

impl Reply {
    pub fn ok(output: impl Into<String>) -> Self {
        Self::exit(0, output)
    }

    pub fn exit(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            exit_code,
            mode: ReplyMode::Whole,
        }
    }

    pub fn silent() -> Self {
        Self {
            mode: ReplyMode::Silent,
            ..Self::ok("")
        }
    }

    pub fn hang_up() -> Self {
        Self {
            mode: ReplyMode::HangUp,
            ..Self::ok("")
        }
    }

    pub fn split(mut self) -> Self {
        self.mode = ReplyMode::SplitMarker;
        self
    }
}

type Handler = dyn Fn(&str) -> Reply + Send + Sync;

struct Inner {
    handler: Box<Handler>,
    commands: Mutex<Vec<String>>,
    connections: AtomicUsize,
    refuse: AtomicBool,
    stall: AtomicBool,
}

/// Scripted terminal endpoint. Clones share state.
#[derive(Clone)]
pub struct FakeShell {
    inner: Arc<Inner>,
}

impl FakeShell {
    /// `handler` maps each unframed command line to its reply.
    pub fn new(handler: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                handler: Box::new(handler),
                commands: Mutex::new(Vec::new()),
                connections: AtomicUsize::new(0),
                refuse: AtomicBool::new(false),
                stall: AtomicBool::new(false),
            }),
        }
    }

    /// Commands received so far, unframed, in arrival order.
    pub fn commands(&self) -> Vec<String> {
        self.inner
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_commands(&self) {
        self.inner
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Channels opened so far.
    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::SeqCst)
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Make `open` hang forever, as an unresponsive endpoint would.
    pub fn stall_connections(&self, stall: bool) {
        self.inner.stall.store(stall, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for FakeShell {
    async fn open(&self, endpoint: &EndpointDescriptor) -> Result<Channel, ExecError> {
        if self.inner.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.inner.refuse.load(Ordering::SeqCst) {
            return Err(ExecError::connection(&endpoint.id, "connection refused"));
        }
        self.inner.connections.fetch_add(1, Ordering::SeqCst);
        let (channel, peer) = Channel::pair();
        tokio::spawn(serve(self.inner.clone(), peer));
        Ok(channel)
    }
}

async fn serve(inner: Arc<Inner>, mut peer: ChannelPeer) {
    peer.deliver(PROMPT);
    while let Some(payload) = peer.incoming.recv().await {
        let Some(caps) = FRAMED.captures(&payload) else {
            peer.deliver(format!("{}\r\nsh: unframed input\r\n", payload.trim_end()));
            continue;
        };
        let command = caps[1].to_string();
        let marker = caps[2].to_string();
        inner
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.clone());
        let reply = (inner.handler)(&command);

        peer.deliver(format!("\x1b[?2004l{}\r\n", payload.trim_end()));
        match reply.mode {
            ReplyMode::HangUp => {
                peer.hang_up();
                return;
            }
            ReplyMode::Silent => continue,
            ReplyMode::Whole | ReplyMode::SplitMarker => {}
        }

        if !reply.output.is_empty() {
            peer.deliver(reply.output.replace("\r\n", "\n").replace('\n', "\r\n"));
        }
        let marker_line = format!("{marker}:exit={}\r\n", reply.exit_code);
        if reply.mode == ReplyMode::SplitMarker {
            let (head, tail) = marker_line.split_at(marker.len() / 2);
            peer.deliver(head);
            peer.deliver(tail);
        } else {
            peer.deliver(marker_line);
        }
        peer.deliver(PROMPT);
    }
}
