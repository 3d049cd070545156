//! umesh Node Entity
//!
//! Top-level structure representing one mesh interface. The node owns
//! every protocol component (neighbor table, allocators, network data,
//! router, forwarder, security and lowpower state) plus the injected
//! radio and IP boundaries.
//!
//! The node is single-threaded and driven from outside: the host pushes
//! received frames and outbound datagrams in, then calls [`MeshNode::tick`]
//! with the current time. `tick` drains the event queue in FIFO order
//! and fires due timers in deadline order; nothing runs concurrently.

mod handlers;
mod lifecycle;
mod retry;
mod state;
#[cfg(test)]
mod tests;

pub use retry::RetryState;
pub use state::{AttachState, DeviceState, LeaderPriority, Mode, NodeType};

use crate::allocator::{AllocError, RsidAllocator, SidAllocator};
use crate::config::{Config, ConfigError, NodeConfig, SecurityMode};
use crate::forwarder::{Destination, ForwardError, Forwarder, LinkStats};
use crate::hal::{Hal, HalError, IpAdapter};
use crate::identity::{ExtAddr, ExtNetId, MeshNetId, Rsid, Sid};
use crate::lowpower::Lowpower;
use crate::neighbor::{Neighbor, NeighborTable};
use crate::network_data::{NetworkData, NetworkDataRecord};
use crate::protocol::ProtocolError;
use crate::router::{RouteTable, Router, RoutingContext};
use crate::security::{AuthServer, AuthState, JoinerAuth, PskAuthServer, SecurityError, SecurityManager};
use crate::timer::{TimerKind, TimerQueue};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Events handled per `tick` before the rest is left for the next call.
const MAX_EVENTS_PER_TICK: usize = 4096;

/// Timer/event rounds per `tick`.
const MAX_TICK_ROUNDS: usize = 64;

/// Errors related to node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node not started")]
    NotStarted,

    #[error("node already started")]
    AlreadyStarted,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("security error: {0}")]
    Security(#[from] SecurityError),

    #[error("link error: {0}")]
    Hal(#[from] HalError),

    #[error("forwarding error: {0}")]
    Forward(#[from] ForwardError),

    #[error("allocation error: {0}")]
    Alloc(#[from] AllocError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Node operational state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Created but not started.
    Created,
    /// Starting up.
    Starting,
    /// Fully operational.
    Running,
    /// Shutting down.
    Stopping,
    /// Stopped.
    Stopped,
}

impl NodeState {
    /// Check if node is operational.
    pub fn is_operational(&self) -> bool {
        matches!(self, NodeState::Running)
    }

    /// Check if node can be started.
    pub fn can_start(&self) -> bool {
        matches!(self, NodeState::Created | NodeState::Stopped)
    }

    /// Check if node can be stopped.
    pub fn can_stop(&self) -> bool {
        matches!(self, NodeState::Running)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Created => "created",
            NodeState::Starting => "starting",
            NodeState::Running => "running",
            NodeState::Stopping => "stopping",
            NodeState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Work queued for the next `tick`.
#[derive(Debug)]
enum Event {
    Frame {
        src: ExtAddr,
        frame: Vec<u8>,
        rssi: Option<i8>,
    },
    SendDown {
        dest: Destination,
        datagram: Vec<u8>,
    },
    LinkDown(ExtAddr),
    Timer(TimerKind),
}

/// Attach bookkeeping that outlives a single handler call.
#[derive(Debug, Default)]
struct AttachContext {
    /// Neighbor the pending attach or SID request went to.
    candidate: Option<ExtAddr>,
    /// Attach timer firings that found no candidate.
    empty_attempts: u32,
    retry: RetryState,
    rsid_retry: RetryState,
    rsid_pending: bool,
}

/// A joiner this node relays authentication for.
#[derive(Clone, Copy, Debug)]
struct RelaySession {
    state: AuthState,
    started_ms: u64,
}

/// Copyable snapshot of the local addressing a routing pass needs.
#[derive(Clone, Copy, Debug)]
struct LocalView {
    ext: ExtAddr,
    sid: Sid,
    netid: MeshNetId,
    rsid: Option<Rsid>,
    is_router: bool,
    now_ms: u64,
}

impl LocalView {
    fn context(self, neighbors: &NeighborTable) -> RoutingContext<'_> {
        RoutingContext {
            own_ext: self.ext,
            own_sid: self.sid,
            netid: self.netid,
            rsid: self.rsid,
            is_router: self.is_router,
            neighbors,
            now_ms: self.now_ms,
        }
    }
}

/// One mesh interface.
///
/// ## Roles
///
/// A started node is `Detached` until it attaches under a parent router
/// (becoming `Leaf` or `Router`), or elects itself `Leader` after finding
/// no network. A router granted an RSID becomes a `SuperRouter`.
pub struct MeshNode {
    // === Identity ===
    ext: ExtAddr,

    // === Configuration ===
    config: NodeConfig,

    // === State ===
    state: NodeState,
    device_state: DeviceState,
    attach_state: AttachState,
    mode: Mode,
    sid: Sid,
    netid: MeshNetId,
    ext_netid: ExtNetId,
    rsid: Option<Rsid>,
    /// Cost to the leader through the parent.
    path_cost: u16,
    /// Priority of the leader of the network we are in.
    leader: Option<LeaderPriority>,
    channel: u8,
    now_ms: u64,
    started_ms: u64,
    attach: AttachContext,

    // === Neighbors ===
    neighbors: NeighborTable,

    // === Addressing ===
    allocator: SidAllocator,
    rsid_allocator: RsidAllocator,

    // === Network Data ===
    network_data: NetworkData,
    /// Records waiting to be re-flooded, with the neighbor they came from.
    flood_queue: Vec<(NetworkDataRecord, Option<ExtAddr>)>,

    // === Routing & Forwarding ===
    router: Router,
    forwarder: Forwarder,

    // === Security ===
    security: SecurityManager,
    auth_server: Option<Box<dyn AuthServer>>,
    joiner: JoinerAuth,
    relays: BTreeMap<ExtAddr, RelaySession>,

    // === Lowpower ===
    lowpower: Lowpower,

    // === Scheduling ===
    timers: TimerQueue,
    events: VecDeque<Event>,
    rng: StdRng,
    cmd_seq: u16,

    // === Platform ===
    hal: Box<dyn Hal>,
    ip: Box<dyn IpAdapter>,
}

impl MeshNode {
    /// Create a node from configuration and the platform boundaries.
    ///
    /// The extended address comes from `node.identity.ext_addr` when set,
    /// otherwise from the radio.
    pub fn new(
        config: Config,
        hal: Box<dyn Hal>,
        ip: Box<dyn IpAdapter>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let config = config.node;
        let ext = config.identity.ext_addr.unwrap_or_else(|| hal.mac_address());
        let security = SecurityManager::new(&config.security, config.ext_netid, &ext)?;
        let auth_server: Option<Box<dyn AuthServer>> = match (config.security.mode, security.psk()) {
            (SecurityMode::Eap, Some(psk)) => Some(Box::new(PskAuthServer::new(psk.to_vec()))),
            _ => None,
        };
        let seed = config.rng_seed.unwrap_or_else(|| ext.to_u64());
        let lease_ms = config.timing.advertisement_interval_ms * config.attach.sid_lease_intervals as u64;

        Ok(Self {
            ext,
            state: NodeState::Created,
            device_state: DeviceState::Disabled,
            attach_state: AttachState::Idle,
            mode: config.mode.to_mode(),
            sid: Sid::INVALID,
            netid: MeshNetId::BCAST,
            ext_netid: config.ext_netid,
            rsid: None,
            path_cost: u16::MAX,
            leader: None,
            channel: config.channel,
            now_ms: 0,
            started_ms: 0,
            attach: AttachContext::default(),
            neighbors: NeighborTable::new(config.limits.max_neighbors),
            allocator: SidAllocator::new(lease_ms),
            rsid_allocator: RsidAllocator::new(config.router.max_rsid, config.router.rsid_lease_ms),
            network_data: NetworkData::new(config.network_data.max_records),
            flood_queue: Vec::new(),
            router: Router::new(&config.router),
            forwarder: Forwarder::new(
                config.forwarder.clone(),
                config.limits.outbound_queue,
                config.limits.reassembly_buffers,
                config.limits.mcast_cache,
            ),
            security,
            auth_server,
            joiner: JoinerAuth::new(),
            relays: BTreeMap::new(),
            lowpower: Lowpower::new(config.lowpower.clone()),
            timers: TimerQueue::new(),
            events: VecDeque::new(),
            rng: StdRng::seed_from_u64(seed),
            cmd_seq: 0,
            hal,
            ip,
            config,
        })
    }

    /// Replace the leader-side authentication server.
    pub fn with_auth_server(mut self, server: Box<dyn AuthServer>) -> Self {
        self.auth_server = Some(server);
        self
    }

    // === Accessors ===

    pub fn ext_addr(&self) -> ExtAddr {
        self.ext
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn device_state(&self) -> DeviceState {
        self.device_state
    }

    pub fn attach_state(&self) -> AttachState {
        self.attach_state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn sid(&self) -> Sid {
        self.sid
    }

    pub fn netid(&self) -> MeshNetId {
        self.netid
    }

    pub fn ext_netid(&self) -> ExtNetId {
        self.ext_netid
    }

    pub fn rsid(&self) -> Option<Rsid> {
        self.rsid
    }

    pub fn path_cost(&self) -> u16 {
        self.path_cost
    }

    pub fn leader(&self) -> Option<LeaderPriority> {
        self.leader
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Milliseconds since `start`.
    pub fn uptime_ms(&self) -> u64 {
        self.now_ms.saturating_sub(self.started_ms)
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn neighbor(&self, ext: &ExtAddr) -> Option<&Neighbor> {
        self.neighbors.get(ext)
    }

    pub fn parent(&self) -> Option<&Neighbor> {
        self.neighbors.parent()
    }

    pub fn allocator(&self) -> &SidAllocator {
        &self.allocator
    }

    /// Leader-side RSID leases.
    pub fn rsid_allocator(&self) -> &RsidAllocator {
        &self.rsid_allocator
    }

    pub fn network_data(&self) -> &NetworkData {
        &self.network_data
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn routes(&self) -> &RouteTable {
        self.router.table()
    }

    pub fn stats(&self) -> &LinkStats {
        self.forwarder.stats()
    }

    pub fn security(&self) -> &SecurityManager {
        &self.security
    }

    pub fn security_mut(&mut self) -> &mut SecurityManager {
        &mut self.security
    }

    pub fn lowpower(&self) -> &Lowpower {
        &self.lowpower
    }

    pub fn bcast_mtu(&self) -> usize {
        self.hal.bcast_mtu()
    }

    pub fn ucast_mtu(&self) -> usize {
        self.hal.ucast_mtu()
    }

    /// Next hop currently chosen for a unicast to `dest`.
    pub fn next_hop(&self, dest: Sid) -> Option<ExtAddr> {
        let ctx = self.local_view().context(&self.neighbors);
        self.router.next_hop(dest, &ctx).map(|n| n.ext)
    }

    fn local_view(&self) -> LocalView {
        LocalView {
            ext: self.ext,
            sid: self.sid,
            netid: self.netid,
            rsid: self.rsid,
            is_router: self.device_state.is_router(),
            now_ms: self.now_ms,
        }
    }

    // === Host Interface ===

    /// Queue a frame received from the radio.
    pub fn receive(&mut self, src: ExtAddr, frame: Vec<u8>, rssi: Option<i8>) {
        if !self.state.is_operational() {
            return;
        }
        self.events.push_back(Event::Frame { src, frame, rssi });
    }

    /// Queue a datagram from the IP stack.
    pub fn send_down(&mut self, datagram: Vec<u8>, dest: Destination) {
        if !self.state.is_operational() {
            self.ip.delivery_failed(dest, crate::forwarder::DeliveryFailure::Detached);
            return;
        }
        self.events.push_back(Event::SendDown { dest, datagram });
    }

    /// The radio lost a link to `neighbor`.
    pub fn link_down(&mut self, neighbor: ExtAddr) {
        if !self.state.is_operational() {
            return;
        }
        self.events.push_back(Event::LinkDown(neighbor));
    }

    /// Advance the node to `now_ms`.
    ///
    /// Events already queued are handled first, in arrival order. Timers
    /// due by `now_ms` then fire in deadline order, and anything they
    /// queue is handled before `tick` returns.
    pub fn tick(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
        if !self.state.is_operational() {
            self.events.clear();
            return;
        }
        self.drain_events();
        for _ in 0..MAX_TICK_ROUNDS {
            let mut fired = false;
            while let Some(kind) = self.timers.pop_due(self.now_ms) {
                self.events.push_back(Event::Timer(kind));
                fired = true;
            }
            if !fired && self.events.is_empty() {
                break;
            }
            self.drain_events();
        }
        self.flush_outbound();
    }

    /// Earliest time `tick` has work to do.
    pub fn next_deadline(&mut self) -> Option<u64> {
        if !self.events.is_empty() {
            return Some(self.now_ms);
        }
        self.timers.next_deadline()
    }

    fn drain_events(&mut self) {
        let mut handled = 0;
        while let Some(event) = self.events.pop_front() {
            self.process_event(event);
            handled += 1;
            if handled >= MAX_EVENTS_PER_TICK {
                warn!(remaining = self.events.len(), "Event budget exhausted for this tick");
                break;
            }
        }
    }
}

impl fmt::Debug for MeshNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshNode")
            .field("ext", &self.ext)
            .field("state", &self.state)
            .field("device_state", &self.device_state)
            .field("sid", &self.sid)
            .field("netid", &self.netid)
            .field("neighbors", &self.neighbors.len())
            .field("routes", &self.router.table().len())
            .field("queued", &self.forwarder.queued())
            .finish()
    }
}
