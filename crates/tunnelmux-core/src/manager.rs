//! `TunnelManager`: the public multiplexer and its protocol engine.
//!
//! One [`ManagerInner`] is shared (via `Arc`) between the handle returned to
//! callers, the background dispatch task that consumes the transport, and
//! every spawned proxy/connector/connection task. All mutations to the
//! tunnel registry happen while holding `registry`'s lock, which is the
//! single serialization point for the whole manager. Socket I/O runs
//! concurrently on its own tasks, but every effect on shared state funnels
//! back through here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use tunnelmux_proto::{decode, encode, AddressFamily, ConnectionId, Message, TunnelId, TunnelIdAllocator};
use tunnelmux_transport::Transport;

use crate::config::TunnelManagerConfig;
use crate::connection::{self, InboundFrame};
use crate::connector;
use crate::descriptor::TunnelDescriptor;
use crate::error::{self, TunnelError};
use crate::proxy;
use crate::tunnel::Tunnel;

/// A local endpoint this manager is playing for some `TunnelId`.
///
/// Which role a manager plays for a given tunnel follows from who asked for
/// what, not from forward/reverse direction: the side that owns a listener
/// is always a `Proxy`, and the side that connects out on demand is always
/// a `Connector`.
enum Endpoint {
    Proxy {
        #[allow(dead_code)]
        port: u16,
        #[allow(dead_code)]
        family: AddressFamily,
        accept_task: JoinHandle<()>,
    },
    Connector {
        port: u16,
        family: AddressFamily,
    },
}

impl Endpoint {
    fn abort_if_proxy(self) {
        if let Endpoint::Proxy { accept_task, .. } = self {
            accept_task.abort();
        }
    }
}

/// Resolution of a `create_tunnel`/`create_reverse_tunnel` call that joined
/// an existing dedup entry rather than originating a new one.
enum Join {
    /// The existing tunnel has already finished its handshake.
    Ready(Tunnel),
    /// The existing tunnel is still awaiting `proxyCreated`/`proxyError`;
    /// wait for the originator's resolution too.
    Pending(Tunnel, oneshot::Receiver<Result<(), TunnelError>>),
}

impl Join {
    async fn resolve(self) -> Result<Tunnel, TunnelError> {
        match self {
            Join::Ready(tunnel) => Ok(tunnel),
            Join::Pending(tunnel, rx) => match rx.await {
                Ok(Ok(())) => Ok(tunnel),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(TunnelError::ManagerClosed),
            },
        }
    }
}

#[derive(Default)]
struct Registry {
    /// Descriptor -> shared handle, for our own `create_tunnel`/
    /// `create_reverse_tunnel` calls.
    dedup: HashMap<TunnelDescriptor, Tunnel>,
    /// Every tunnel this manager has a local role for, ours or the peer's.
    endpoints: HashMap<TunnelId, Endpoint>,
    /// Callers awaiting `proxyCreated`/`proxyError` for a tunnel we
    /// originated, keyed by tunnel id. More than one sender accumulates
    /// here when concurrent `create_tunnel` calls coalesce onto the same
    /// in-flight descriptor.
    pending_waiters: HashMap<TunnelId, Vec<oneshot::Sender<Result<(), TunnelError>>>>,
    /// Live connections, grouped by tunnel so a `closeProxy` can tear all of
    /// them down at once.
    connections: HashMap<TunnelId, HashMap<ConnectionId, mpsc::Sender<InboundFrame>>>,
}

pub(crate) struct ManagerInner {
    transport: Arc<dyn Transport>,
    config: TunnelManagerConfig,
    ids: TunnelIdAllocator,
    registry: AsyncMutex<Registry>,
    closed: AtomicBool,
    dispatch_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ManagerInner {
    pub(crate) fn config(&self) -> &TunnelManagerConfig {
        &self.config
    }

    /// Sends one wire message to the peer. The only error path is the
    /// transport having ended, which callers treat as `TransportClosed`.
    pub(crate) async fn send(&self, message: Message) -> Result<(), TunnelError> {
        let encoded = encode(&message).expect("Message always serializes");
        self.transport
            .send(encoded)
            .await
            .map_err(|_| TunnelError::TransportClosed)
    }

    /// Looks up (and increments the refcount of) an existing tunnel for
    /// `descriptor`, if one is live or in flight. Returns `None` when the
    /// caller must originate a brand new tunnel.
    async fn join_descriptor(&self, descriptor: &TunnelDescriptor) -> Option<Join> {
        let mut reg = self.registry.lock().await;
        let tunnel = reg.dedup.get(descriptor)?.clone();
        tunnel.incref();
        if let Some(waiters) = reg.pending_waiters.get_mut(&tunnel.id()) {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            Some(Join::Pending(tunnel, rx))
        } else {
            Some(Join::Ready(tunnel))
        }
    }

    /// Undoes the bookkeeping for a tunnel that never completed its
    /// handshake because the *local* side failed (bind rejected the send,
    /// or the manager closed mid-flight). A `proxyError` from the peer is
    /// rolled back separately, inline in `handle_message`, since it needs
    /// to run exactly once regardless of how many callers are waiting on
    /// the same in-flight create.
    async fn rollback(&self, descriptor: &TunnelDescriptor, tunnel_id: TunnelId) {
        let mut reg = self.registry.lock().await;
        reg.dedup.remove(descriptor);
        reg.pending_waiters.remove(&tunnel_id);
        if let Some(endpoint) = reg.endpoints.remove(&tunnel_id) {
            drop(reg);
            endpoint.abort_if_proxy();
        }
    }

    /// Delivers a terminal result to every caller waiting on `tunnel_id`'s
    /// handshake (the originator and anyone who coalesced onto it).
    async fn resolve_pending(&self, tunnel_id: TunnelId, result: Result<(), TunnelError>) {
        let waiters = {
            let mut reg = self.registry.lock().await;
            reg.pending_waiters.remove(&tunnel_id)
        };
        if let Some(waiters) = waiters {
            for tx in waiters {
                let _ = tx.send(result.clone());
            }
        }
    }

    async fn forward_inbound(&self, tunnel_id: TunnelId, connection_id: ConnectionId, frame: InboundFrame) {
        let sender = {
            let reg = self.registry.lock().await;
            reg.connections
                .get(&tunnel_id)
                .and_then(|m| m.get(&connection_id))
                .cloned()
        };
        match sender {
            Some(tx) => {
                let _ = tx.send(frame).await;
            }
            None => {
                tracing::debug!(%tunnel_id, %connection_id, "dropping frame for unknown connection");
            }
        }
    }

    /// Tears down the endpoint (and aborts its accept loop if it owns one)
    /// and every live connection registered under `tunnel_id`. Used both
    /// for an incoming `closeProxy` and for our own `Tunnel::close()` at
    /// refcount zero.
    async fn teardown_endpoint(&self, tunnel_id: TunnelId) {
        let (endpoint, connections) = {
            let mut reg = self.registry.lock().await;
            (
                reg.endpoints.remove(&tunnel_id),
                reg.connections.remove(&tunnel_id),
            )
        };
        if let Some(endpoint) = endpoint {
            endpoint.abort_if_proxy();
        }
        if let Some(connections) = connections {
            for (_, tx) in connections {
                // Dropping the sender makes the connection task's next
                // `inbound_rx.recv()` observe `None`, which it treats the
                // same as an explicit `close`.
                drop(tx);
            }
        }
    }

    /// Reserves a connection-table slot for `connection_id` before its
    /// socket exists. Must be called, and its insert observed, before
    /// anything that could let an inbound `data`/`end`/`close` for this id
    /// race ahead of the eventual pump (sending `newConnection`, awaiting an
    /// outbound `connect`): once the slot is in the table, `forward_inbound`
    /// queues frames on the returned channel instead of dropping them as
    /// unknown, and `connection::run` drains whatever queued up as soon as
    /// it starts.
    pub(crate) async fn reserve_connection_slot(
        &self,
        tunnel_id: TunnelId,
        connection_id: ConnectionId,
    ) -> mpsc::Receiver<InboundFrame> {
        let (tx, rx) = mpsc::channel(self.config.data_channel_capacity);
        let mut reg = self.registry.lock().await;
        reg.connections
            .entry(tunnel_id)
            .or_default()
            .insert(connection_id, tx);
        rx
    }

    /// Spawns the byte pump for a socket belonging to an already-reserved
    /// connection slot (see `reserve_connection_slot`), unregistering the
    /// slot once the pump finishes.
    pub(crate) fn spawn_connection_pump(
        self: Arc<Self>,
        tunnel_id: TunnelId,
        connection_id: ConnectionId,
        socket: TcpStream,
        rx: mpsc::Receiver<InboundFrame>,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            connection::run(manager.clone(), tunnel_id, connection_id, socket, rx).await;
            manager.unregister_connection(tunnel_id, connection_id).await;
        });
    }

    pub(crate) async fn unregister_connection(&self, tunnel_id: TunnelId, connection_id: ConnectionId) {
        let mut reg = self.registry.lock().await;
        if let Some(conns) = reg.connections.get_mut(&tunnel_id) {
            conns.remove(&connection_id);
            if conns.is_empty() {
                reg.connections.remove(&tunnel_id);
            }
        }
    }

    /// `createTunnel`: binds the local listener before doing anything
    /// observable, so a bind failure leaves no trace (no dedup entry, no
    /// message sent).
    async fn create_tunnel(
        self: Arc<Self>,
        local_port: u16,
        remote_port: u16,
        family: AddressFamily,
    ) -> Result<Tunnel, TunnelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TunnelError::ManagerClosed);
        }

        let descriptor = TunnelDescriptor::forward(local_port, remote_port, family);
        if let Some(join) = self.join_descriptor(&descriptor).await {
            return join.resolve().await;
        }

        let bind_addr = format!("{}:{}", family.wildcard_addr(), local_port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| error::local_bind_failure(&e, family.wildcard_addr(), local_port))?;

        let tunnel_id = self.ids.allocate();
        let tunnel = Tunnel::new(tunnel_id, descriptor.clone(), 1, Arc::downgrade(&self));

        let accept_task = proxy::spawn_accept_loop(self.clone(), tunnel_id, listener);
        let (tx, rx) = oneshot::channel();
        {
            let mut reg = self.registry.lock().await;
            reg.dedup.insert(descriptor.clone(), tunnel.clone());
            reg.pending_waiters.insert(tunnel_id, vec![tx]);
            reg.endpoints.insert(
                tunnel_id,
                Endpoint::Proxy {
                    port: local_port,
                    family,
                    accept_task,
                },
            );
        }

        tracing::info!(%tunnel_id, local_port, remote_port, ?family, "forward tunnel created, awaiting peer");

        if let Err(e) = self
            .send(Message::CreateProxy {
                tunnel_id,
                remote_port,
                use_ipv4: family.use_ipv4(),
            })
            .await
        {
            self.rollback(&descriptor, tunnel_id).await;
            return Err(e);
        }

        match rx.await {
            Ok(Ok(())) => Ok(tunnel),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                self.rollback(&descriptor, tunnel_id).await;
                Err(TunnelError::ManagerClosed)
            }
        }
    }

    /// `createReverseTunnel`: the peer does the binding, so the only local
    /// state is the `Connector` endpoint that will dial `localPort`
    /// whenever the peer announces a `newConnection`.
    ///
    /// The public signature (and the wire `createReverseProxy` message)
    /// carries no address family, unlike forward tunnels. Reverse tunnels
    /// default to `Ipv6`, binding on `::` on the peer, see DESIGN.md.
    async fn create_reverse_tunnel(
        self: Arc<Self>,
        local_port: u16,
        remote_port: u16,
    ) -> Result<Tunnel, TunnelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TunnelError::ManagerClosed);
        }

        let family = AddressFamily::Ipv6;
        let descriptor = TunnelDescriptor::reverse(local_port, remote_port, family);
        if let Some(join) = self.join_descriptor(&descriptor).await {
            return join.resolve().await;
        }

        let tunnel_id = self.ids.allocate();
        let tunnel = Tunnel::new(tunnel_id, descriptor.clone(), 1, Arc::downgrade(&self));

        let (tx, rx) = oneshot::channel();
        {
            let mut reg = self.registry.lock().await;
            reg.dedup.insert(descriptor.clone(), tunnel.clone());
            reg.pending_waiters.insert(tunnel_id, vec![tx]);
            reg.endpoints.insert(
                tunnel_id,
                Endpoint::Connector {
                    port: local_port,
                    family,
                },
            );
        }

        tracing::info!(%tunnel_id, local_port, remote_port, "reverse tunnel created, awaiting peer");

        if let Err(e) = self
            .send(Message::CreateReverseProxy {
                tunnel_id,
                remote_port,
            })
            .await
        {
            self.rollback(&descriptor, tunnel_id).await;
            return Err(e);
        }

        match rx.await {
            Ok(Ok(())) => Ok(tunnel),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                self.rollback(&descriptor, tunnel_id).await;
                Err(TunnelError::ManagerClosed)
            }
        }
    }

    /// Called by `Tunnel::close()` once a tunnel's refcount reaches zero:
    /// removes the dedup entry, tells the peer, and tears down the local
    /// endpoint and its connections.
    pub(crate) async fn teardown_initiated_tunnel(self: Arc<Self>, descriptor: TunnelDescriptor, tunnel_id: TunnelId) {
        {
            let mut reg = self.registry.lock().await;
            reg.dedup.remove(&descriptor);
        }
        let _ = self.send(Message::CloseProxy { tunnel_id }).await;
        self.teardown_endpoint(tunnel_id).await;
        tracing::info!(%tunnel_id, "tunnel refcount reached zero, torn down");
    }

    /// Peer asked us to act as the forward tunnel's connector: register a
    /// `Connector` endpoint and ack. There is no local failure mode here;
    /// connect failures surface later, per connection, as a `close`.
    async fn handle_create_proxy(&self, tunnel_id: TunnelId, remote_port: u16, use_ipv4: bool) {
        let family = AddressFamily::from_use_ipv4(use_ipv4);
        {
            let mut reg = self.registry.lock().await;
            reg.endpoints.insert(
                tunnel_id,
                Endpoint::Connector {
                    port: remote_port,
                    family,
                },
            );
        }
        tracing::info!(%tunnel_id, remote_port, ?family, "registered connector for peer's forward tunnel");
        let _ = self.send(Message::ProxyCreated { tunnel_id }).await;
    }

    /// Peer asked us to bind the remote listener for their reverse tunnel.
    /// This is the one place a `proxyError` can originate on our side.
    async fn handle_create_reverse_proxy(self: Arc<Self>, tunnel_id: TunnelId, remote_port: u16) {
        let family = AddressFamily::Ipv6;
        let bind_addr = format!("{}:{}", family.wildcard_addr(), remote_port);

        match TcpListener::bind(&bind_addr).await {
            Ok(listener) => {
                let accept_task = proxy::spawn_accept_loop(self.clone(), tunnel_id, listener);
                {
                    let mut reg = self.registry.lock().await;
                    reg.endpoints.insert(
                        tunnel_id,
                        Endpoint::Proxy {
                            port: remote_port,
                            family,
                            accept_task,
                        },
                    );
                }
                tracing::info!(%tunnel_id, remote_port, "bound listener for peer's reverse tunnel");
                let _ = self.send(Message::ProxyCreated { tunnel_id }).await;
            }
            Err(e) => {
                let err = error::local_bind_failure(&e, family.wildcard_addr(), remote_port);
                tracing::warn!(%tunnel_id, remote_port, error = %err, "failed to bind for peer's reverse tunnel");
                let _ = self
                    .send(Message::ProxyError {
                        tunnel_id,
                        error: error::error_to_wire(&err),
                    })
                    .await;
            }
        }
    }

    async fn handle_message(self: Arc<Self>, message: Message) {
        tracing::debug!(kind = message.kind(), tunnel_id = %message.tunnel_id(), "dispatching message");
        match message {
            Message::CreateProxy {
                tunnel_id,
                remote_port,
                use_ipv4,
            } => self.handle_create_proxy(tunnel_id, remote_port, use_ipv4).await,
            Message::CreateReverseProxy {
                tunnel_id,
                remote_port,
            } => self.handle_create_reverse_proxy(tunnel_id, remote_port).await,
            Message::ProxyCreated { tunnel_id } => {
                self.resolve_pending(tunnel_id, Ok(())).await;
            }
            Message::ProxyError { tunnel_id, error } => {
                self.teardown_endpoint(tunnel_id).await;
                {
                    let mut reg = self.registry.lock().await;
                    reg.dedup.retain(|_, t| t.id() != tunnel_id);
                }
                self.resolve_pending(tunnel_id, Err(TunnelError::RemoteBindFailure(error)))
                    .await;
            }
            Message::NewConnection {
                tunnel_id,
                connection_id,
            } => {
                let target = {
                    let reg = self.registry.lock().await;
                    match reg.endpoints.get(&tunnel_id) {
                        Some(Endpoint::Connector { port, family }) => Some((*port, *family)),
                        _ => None,
                    }
                };
                match target {
                    Some((port, family)) => {
                        // Reserve the connection's table slot here, on the
                        // dispatch loop, before the socket exists. The
                        // eventual `connect` below yields, and a `data`
                        // message for this same id can already be queued
                        // behind us on the transport; reserving first means
                        // `forward_inbound` buffers it instead of treating
                        // it as unknown.
                        let rx = self.reserve_connection_slot(tunnel_id, connection_id).await;
                        let manager = self.clone();
                        tokio::spawn(connector::handle_new_connection(
                            manager,
                            tunnel_id,
                            connection_id,
                            port,
                            family,
                            rx,
                        ));
                    }
                    None => {
                        tracing::warn!(%tunnel_id, %connection_id, "newConnection for unknown or non-connector tunnel");
                    }
                }
            }
            Message::Data {
                tunnel_id,
                connection_id,
                payload,
            } => {
                self.forward_inbound(tunnel_id, connection_id, InboundFrame::Data(payload))
                    .await;
            }
            Message::End {
                tunnel_id,
                connection_id,
            } => {
                self.forward_inbound(tunnel_id, connection_id, InboundFrame::End).await;
            }
            Message::Close {
                tunnel_id,
                connection_id,
            } => {
                self.forward_inbound(tunnel_id, connection_id, InboundFrame::Close)
                    .await;
            }
            Message::CloseProxy { tunnel_id } => {
                self.teardown_endpoint(tunnel_id).await;
            }
        }
    }

    /// Tears down every tunnel, endpoint, connection and pending create.
    /// Returns `true` the first time it runs (idempotent like
    /// `Tunnel::close`).
    async fn teardown_all(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let (endpoints, connections, pending, tunnels) = {
            let mut reg = self.registry.lock().await;
            (
                std::mem::take(&mut reg.endpoints),
                std::mem::take(&mut reg.connections),
                std::mem::take(&mut reg.pending_waiters),
                reg.dedup.drain().map(|(_, t)| t).collect::<Vec<_>>(),
            )
        };

        for (_, endpoint) in endpoints {
            endpoint.abort_if_proxy();
        }
        for (_, conns) in connections {
            for (_, tx) in conns {
                drop(tx);
            }
        }
        for (_, waiters) in pending {
            for tx in waiters {
                let _ = tx.send(Err(TunnelError::ManagerClosed));
            }
        }
        for tunnel in tunnels {
            tunnel.force_close();
        }

        true
    }

    /// Public `close()`: tears down all state and, unlike the internal path
    /// taken when the transport itself ends, also closes the transport and
    /// cancels the dispatch loop so it stops consuming messages.
    async fn close(&self) {
        if self.teardown_all().await {
            self.transport.close().await;
            tracing::info!("tunnel manager closed");
        }
        if let Some(handle) = self.dispatch_task.lock().unwrap().take() {
            handle.abort();
        }
    }

    async fn run_dispatch_loop(self: Arc<Self>) {
        loop {
            match self.transport.recv().await {
                Ok(Some(raw)) => match decode(&raw) {
                    Ok(message) => self.clone().handle_message(message).await,
                    Err(e) => {
                        tracing::warn!(error = %e, raw = %raw, "discarding malformed message");
                    }
                },
                Ok(None) => {
                    tracing::info!("transport ended, closing manager");
                    self.teardown_all().await;
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "transport recv failed, closing manager");
                    self.teardown_all().await;
                    break;
                }
            }
        }
    }
}

/// A bidirectional TCP port-forwarding multiplexer riding on a single
/// message-oriented control link to a peer `TunnelManager`.
///
/// Cloning is cheap (the handle is an `Arc`); every clone refers to the same
/// manager, registry, and dispatch task.
#[derive(Clone)]
pub struct TunnelManager {
    inner: Arc<ManagerInner>,
}

impl TunnelManager {
    /// Builds a manager over `transport` with default tuning (see
    /// [`TunnelManagerConfig`]).
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, TunnelManagerConfig::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: TunnelManagerConfig) -> Self {
        let inner = Arc::new(ManagerInner {
            transport,
            config,
            ids: TunnelIdAllocator::new(),
            registry: AsyncMutex::new(Registry::default()),
            closed: AtomicBool::new(false),
            dispatch_task: std::sync::Mutex::new(None),
        });

        let dispatch_inner = inner.clone();
        let handle = tokio::spawn(async move { dispatch_inner.run_dispatch_loop().await });
        *inner.dispatch_task.lock().unwrap() = Some(handle);

        Self { inner }
    }

    /// Opens (or joins) a forward tunnel: a local listener on `local_port`
    /// that relays each accepted connection to `remote_port` on the peer's
    /// host.
    pub async fn create_tunnel(
        &self,
        local_port: u16,
        remote_port: u16,
        family: AddressFamily,
    ) -> Result<Tunnel, TunnelError> {
        self.inner.clone().create_tunnel(local_port, remote_port, family).await
    }

    /// Opens (or joins) a reverse tunnel: the peer binds `remote_port` and
    /// relays each accepted connection to `local_port` on our host.
    pub async fn create_reverse_tunnel(&self, local_port: u16, remote_port: u16) -> Result<Tunnel, TunnelError> {
        self.inner.clone().create_reverse_tunnel(local_port, remote_port).await
    }

    /// Tears down every tunnel and stops consuming the transport. Idempotent.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for TunnelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelManager")
            .field("closed", &self.is_closed())
            .finish()
    }
}
