//! Mirror orchestration
//!
//! A mirror classifies its two endpoints, starts listeners for the ones that
//! listen, dials the command link when endpoint A is a dialer and then runs a
//! single dispatch loop:
//!
//! - command link arrivals start the command handler
//! - endpoint A arrivals start a pivot session
//! - endpoint B arrivals become the B peer, after authenticating on the
//!   non-client side
//! - the exit signal drains the mirror
//!
//! Progress is published on a watch channel as [`MirrorState`].

use std::net::SocketAddr;
use std::sync::Arc;

use pv_core::config::MirrorConfig;
use pv_core::{ConfigError, Endpoint, EndpointId, EndpointRole, MirrorState, PivotError};
use pv_protocol::{SecureContext, SecureSession, SecureWriter, SocketOptions};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::command::CommandHandler;
use crate::endpoint::{EndpointListener, Inbound};
use crate::net;
use crate::peer::{self, BPeerSlot};
use crate::pivot::{self, PivotContext};

/// A configured, not yet started mirror
pub struct Mirror {
    config: MirrorConfig,
    endpoint_a: Endpoint,
    endpoint_b: Endpoint,
    ctx: SecureContext,
}

impl Mirror {
    /// Validate the configuration and classify the endpoints
    pub fn new(config: MirrorConfig, ctx: SecureContext) -> Result<Self, ConfigError> {
        config.validate()?;
        let (endpoint_a, endpoint_b) = config.endpoints()?;
        Ok(Self {
            config,
            endpoint_a,
            endpoint_b,
            ctx,
        })
    }

    /// Mirror name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Bind the listening endpoints and spawn the mirror's tasks
    ///
    /// Returns once listeners are bound; the command link is dialed in the
    /// background.
    pub async fn start(self) -> MirrorHandle {
        let name = self.config.name.clone();
        let (state_tx, state_rx) = watch::channel(MirrorState::Init);
        let cancel = CancellationToken::new();
        let exit_a = cancel.child_token();
        let exit_b = cancel.child_token();
        let options = self.config.socket.to_options();
        // Everything but the command link and the B peer carries user bytes
        let relay_options = options.for_relay();
        let capacity = self.config.queue_capacity;

        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        let (cmd_tx, cmd_rx) = mpsc::channel(1);

        let addr_a = spawn_endpoint(
            &name,
            EndpointId::A,
            &self.endpoint_a,
            &relay_options,
            a_tx.clone(),
            &exit_a,
        )
        .await;
        let addr_b = spawn_endpoint(
            &name,
            EndpointId::B,
            &self.endpoint_b,
            &relay_options,
            b_tx,
            &exit_b,
        )
        .await;

        tracing::info!(
            mirror = %name,
            "Endpoint A {}, endpoint B {}, client: {}",
            self.endpoint_a,
            self.endpoint_b,
            self.config.client
        );
        state_tx.send_replace(MirrorState::RoleResolved);

        let b_peer = Arc::new(BPeerSlot::with_write_timeout(
            self.config.control_write_timeout,
        ));
        let pivot = Arc::new(PivotContext {
            mirror: name.clone(),
            endpoint_b: self.endpoint_b.clone(),
            secured: self.config.secured_leg(),
            ctx: self.ctx.clone(),
            options: relay_options.clone(),
            rendezvous_timeout: self.config.rendezvous_timeout,
            b_peer: Arc::clone(&b_peer),
        });

        let dispatcher = Dispatcher {
            name: name.clone(),
            client: self.config.client,
            auth_timeout: self.config.auth_timeout,
            options,
            relay_options,
            pivot,
            a_tx,
            command_link: None,
            next_session: 0,
        };

        let command_target = match self.endpoint_a.role {
            EndpointRole::Dialer => Some(self.endpoint_a.address.clone()),
            EndpointRole::Listener => None,
        };

        let run = Runner {
            config: self.config,
            ctx: self.ctx,
            state: state_tx,
            cancel: cancel.clone(),
            exits: [exit_a, exit_b],
            command_target,
            cmd_tx,
        };
        tokio::spawn(run.run(dispatcher, Queues { a_rx, b_rx, cmd_rx }));

        MirrorHandle {
            name,
            cancel,
            state: state_rx,
            addr_a,
            addr_b,
            b_peer,
        }
    }
}

/// Bind one endpoint if it listens and spawn its accept loop
async fn spawn_endpoint(
    mirror: &str,
    id: EndpointId,
    endpoint: &Endpoint,
    options: &SocketOptions,
    queue: mpsc::Sender<Inbound>,
    exit: &CancellationToken,
) -> Option<SocketAddr> {
    let bind_addr = endpoint.bind_address()?;
    match EndpointListener::bind(mirror, id, &bind_addr, options.clone()).await {
        Ok(listener) => {
            let addr = listener.local_addr();
            tokio::spawn(listener.run(queue, exit.clone()));
            Some(addr)
        }
        Err(e) => {
            tracing::error!(mirror = %mirror, endpoint = %id, "{}", e);
            exit.cancel();
            None
        }
    }
}

/// Handle to a running mirror
#[derive(Clone)]
pub struct MirrorHandle {
    name: String,
    cancel: CancellationToken,
    state: watch::Receiver<MirrorState>,
    addr_a: Option<SocketAddr>,
    addr_b: Option<SocketAddr>,
    b_peer: Arc<BPeerSlot>,
}

impl MirrorHandle {
    /// Mirror name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> MirrorState {
        *self.state.borrow()
    }

    /// Address a listening endpoint is bound to
    pub fn local_addr(&self, id: EndpointId) -> Option<SocketAddr> {
        match id {
            EndpointId::A => self.addr_a,
            EndpointId::B => self.addr_b,
        }
    }

    /// Address of the connected B peer, if any
    pub async fn b_peer_addr(&self) -> Option<SocketAddr> {
        self.b_peer.peer_addr().await
    }

    /// Wait until the mirror reaches `target` or a later state
    pub async fn wait_for(&self, target: MirrorState) -> MirrorState {
        let mut state = self.state.clone();
        let reached = match state.wait_for(|s| *s >= target).await {
            Ok(s) => *s,
            // Runner is gone
            Err(_) => MirrorState::Closed,
        };
        reached
    }

    /// Whether the mirror has not started draining
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.state() < MirrorState::Draining
    }

    /// Signal exit without waiting
    pub fn signal_exit(&self) {
        self.cancel.cancel();
    }

    /// Signal exit and wait until the mirror is closed
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.wait_for(MirrorState::Closed).await;
    }
}

impl std::fmt::Debug for MirrorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorHandle")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("addr_a", &self.addr_a)
            .field("addr_b", &self.addr_b)
            .finish()
    }
}

struct Queues {
    a_rx: mpsc::Receiver<Inbound>,
    b_rx: mpsc::Receiver<Inbound>,
    cmd_rx: mpsc::Receiver<SecureSession<TcpStream>>,
}

/// Owns the lifecycle: command link dial, dispatch, drain
struct Runner {
    config: MirrorConfig,
    ctx: SecureContext,
    state: watch::Sender<MirrorState>,
    cancel: CancellationToken,
    exits: [CancellationToken; 2],
    command_target: Option<String>,
    cmd_tx: mpsc::Sender<SecureSession<TcpStream>>,
}

impl Runner {
    async fn run(self, mut dispatcher: Dispatcher, mut queues: Queues) {
        let name = self.config.name.clone();

        if let Some(addr) = &self.command_target {
            match self.dial_command_link(addr).await {
                Ok(Some(session)) => {
                    self.state.send_replace(MirrorState::CommandLinkEstablished);
                    // Capacity 1 and sent exactly once
                    let _ = self.cmd_tx.send(session).await;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(mirror = %name, "Command link unavailable: {}", e);
                    self.cancel.cancel();
                }
            }
        }

        if !self.cancel.is_cancelled() {
            self.state.send_replace(MirrorState::Serving);
            tracing::info!(mirror = %name, "Serving");
            dispatcher.run(&mut queues, &self.cancel).await;
        }

        self.state.send_replace(MirrorState::Draining);
        tracing::info!(mirror = %name, "Draining");
        dispatcher.drain().await;
        for exit in &self.exits {
            exit.cancel();
        }

        self.state.send_replace(MirrorState::Closed);
        tracing::info!(mirror = %name, "Closed");
    }

    /// Dial endpoint A and authenticate when this is the client
    async fn dial_command_link(
        &self,
        addr: &str,
    ) -> Result<Option<SecureSession<TcpStream>>, PivotError> {
        let options = self.config.socket.to_options();
        tracing::info!(mirror = %self.config.name, "Dialing command link {}", addr);

        let Some(stream) =
            net::dial_with_backoff(addr, &options, &self.config.command_link, &self.cancel).await?
        else {
            return Ok(None);
        };

        let mut session = SecureSession::tcp(stream, &self.ctx, &options)?;
        if self.config.client {
            tracing::info!(mirror = %self.config.name, "Sending auth token on command link");
            session.send_auth().await?;
        }
        tracing::info!(mirror = %self.config.name, "Command link established to {}", addr);
        Ok(Some(session))
    }
}

/// State owned by the dispatch loop
struct Dispatcher {
    name: String,
    client: bool,
    auth_timeout: std::time::Duration,
    /// Applied to the B peer link
    options: SocketOptions,
    /// Applied to dial-backs
    relay_options: SocketOptions,
    pivot: Arc<PivotContext>,
    a_tx: mpsc::Sender<Inbound>,
    command_link: Option<(SecureWriter<TcpStream>, JoinHandle<()>)>,
    next_session: u64,
}

impl Dispatcher {
    async fn run(&mut self, queues: &mut Queues, cancel: &CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(session) = queues.cmd_rx.recv() => self.on_command_link(session),
                Some(inbound) = queues.a_rx.recv() => self.on_endpoint_a(inbound),
                Some(inbound) = queues.b_rx.recv() => self.on_endpoint_b(inbound),
            }
        }
    }

    fn on_command_link(&mut self, session: SecureSession<TcpStream>) {
        if self.command_link.is_some() {
            tracing::warn!(mirror = %self.name, "Command link already set, dropping duplicate");
            return;
        }
        let Some(peer) = session.peer_addr() else {
            tracing::error!(mirror = %self.name, "Command link has no peer address");
            return;
        };

        let (reader, writer) = session.into_split();
        let handler = CommandHandler::new(
            self.name.clone(),
            peer.ip(),
            self.relay_options.clone(),
            self.a_tx.clone(),
        );
        let name = self.name.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = handler.run(reader).await {
                tracing::warn!(mirror = %name, "Command handler stopped: {}", e);
            }
        });
        self.command_link = Some((writer, task));
    }

    fn on_endpoint_a(&mut self, inbound: Inbound) {
        self.next_session += 1;
        let id = self.next_session;
        let pivot = Arc::clone(&self.pivot);
        tokio::spawn(async move {
            let mirror = pivot.mirror.clone();
            if let Err(e) = pivot::run_pivot(pivot, id, inbound).await {
                tracing::warn!(mirror = %mirror, session = id, "Pivot session failed: {}", e);
            }
        });
    }

    fn on_endpoint_b(&mut self, inbound: Inbound) {
        let name = self.name.clone();
        let slot = Arc::clone(&self.pivot.b_peer);
        let ctx = self.pivot.ctx.clone();
        let options = self.options.clone();
        let verify = !self.client;
        let auth_timeout = self.auth_timeout;

        tokio::spawn(async move {
            let peer_addr = inbound.peer;
            let mut session = match SecureSession::tcp(inbound.stream, &ctx, &options) {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!(mirror = %name, "B peer {} rejected: {}", peer_addr, e);
                    return;
                }
            };

            if verify {
                if let Err(e) = session.expect_auth(auth_timeout).await {
                    tracing::warn!(
                        mirror = %name,
                        "B peer {} failed to authenticate: {}",
                        peer_addr,
                        e
                    );
                    return;
                }
            }

            let (reader, writer) = session.into_split();
            let Some(generation) = slot.install(peer_addr, writer).await else {
                return;
            };
            tracing::info!(mirror = %name, "B peer {} connected", peer_addr);
            peer::watch(&slot, generation, peer_addr, reader).await;
        });
    }

    /// Best-effort close of the command link and the B peer
    async fn drain(&mut self) {
        if let Some((mut writer, task)) = self.command_link.take() {
            let _ = writer.close().await;
            task.abort();
        }
        self.pivot.b_peer.close().await;
    }
}
