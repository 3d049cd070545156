//! Node configuration subsections.
//!
//! All the `node.*` configuration parameters: operating mode, leader
//! policy, attach behavior, protocol timing, resource limits, forwarding,
//! routing, network data, security and lowpower scheduling.

use serde::{Deserialize, Serialize};

use super::IdentityConfig;
use crate::identity::{ExtAddr, ExtNetId};

// ============================================================================
// Node Configuration Subsections
// ============================================================================

/// Operating mode flags (`node.mode.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeConfig {
    /// May become super router or leader ahead of plain routers (`node.mode.super_capable`).
    #[serde(default)]
    pub super_capable: bool,
    /// Forced leader preference (`node.mode.leader`).
    #[serde(default)]
    pub leader: bool,
    /// Radio always on; `false` makes the node sleepy (`node.mode.rx_on`).
    #[serde(default = "ModeConfig::default_rx_on")]
    pub rx_on: bool,
    /// Mobile node: attaches as a leaf and never allocates (`node.mode.mobile`).
    #[serde(default)]
    pub mobile: bool,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            super_capable: false,
            leader: false,
            rx_on: true,
            mobile: false,
        }
    }
}

impl ModeConfig {
    fn default_rx_on() -> bool { true }
}

/// Which nodes may originate a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderEligibility {
    /// Every non-mobile node.
    Any,
    /// Only super-capable or forced-leader nodes.
    SuperOnly,
}

/// Address ordering used after leader weights tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressOrder {
    Higher,
    Lower,
}

/// Leader election policy (`node.leader_policy.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderPolicyConfig {
    /// Who may self-promote (`node.leader_policy.eligibility`).
    #[serde(default = "LeaderPolicyConfig::default_eligibility")]
    pub eligibility: LeaderEligibility,
    /// Weight of a forced-leader node (`node.leader_policy.leader_weight`).
    #[serde(default = "LeaderPolicyConfig::default_leader_weight")]
    pub leader_weight: u8,
    /// Weight of a super-capable node (`node.leader_policy.super_weight`).
    #[serde(default = "LeaderPolicyConfig::default_super_weight")]
    pub super_weight: u8,
    /// Weight of any other eligible node (`node.leader_policy.router_weight`).
    #[serde(default = "LeaderPolicyConfig::default_router_weight")]
    pub router_weight: u8,
    /// Tie-break on equal weight (`node.leader_policy.address_order`).
    #[serde(default = "LeaderPolicyConfig::default_address_order")]
    pub address_order: AddressOrder,
}

impl Default for LeaderPolicyConfig {
    fn default() -> Self {
        Self {
            eligibility: LeaderEligibility::Any,
            leader_weight: 3,
            super_weight: 2,
            router_weight: 1,
            address_order: AddressOrder::Higher,
        }
    }
}

impl LeaderPolicyConfig {
    fn default_eligibility() -> LeaderEligibility { LeaderEligibility::Any }
    fn default_leader_weight() -> u8 { 3 }
    fn default_super_weight() -> u8 { 2 }
    fn default_router_weight() -> u8 { 1 }
    fn default_address_order() -> AddressOrder { AddressOrder::Higher }
}

/// Attach and role transitions (`node.attach.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachConfig {
    /// Discovery broadcast period in ms (`node.attach.request_interval_ms`).
    #[serde(default = "AttachConfig::default_request_interval_ms")]
    pub request_interval_ms: u64,
    /// Unicast attach attempts per candidate (`node.attach.retry_times`).
    #[serde(default = "AttachConfig::default_retry_times")]
    pub retry_times: u32,
    /// Base attach retry backoff in ms (`node.attach.retry_base_ms`).
    #[serde(default = "AttachConfig::default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Cap on attach retry backoff in ms (`node.attach.retry_max_ms`).
    #[serde(default = "AttachConfig::default_retry_max_ms")]
    pub retry_max_ms: u64,
    /// Empty discovery rounds before self-promotion (`node.attach.leader_after_attempts`).
    #[serde(default = "AttachConfig::default_leader_after_attempts")]
    pub leader_after_attempts: u32,
    /// Hold-down for a failed candidate in ms (`node.attach.candidate_holddown_ms`).
    #[serde(default = "AttachConfig::default_candidate_holddown_ms")]
    pub candidate_holddown_ms: u64,
    /// Consecutive better adverts before a parent switch (`node.attach.migrate_wait`).
    #[serde(default = "AttachConfig::default_migrate_wait")]
    pub migrate_wait: u32,
    /// Direct children that trigger super router promotion (`node.attach.super_promotion_threshold`).
    #[serde(default = "AttachConfig::default_super_promotion_threshold")]
    pub super_promotion_threshold: usize,
    /// SID lease lifetime in advertisement intervals (`node.attach.sid_lease_intervals`).
    #[serde(default = "AttachConfig::default_sid_lease_intervals")]
    pub sid_lease_intervals: u32,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            request_interval_ms: 1000,
            retry_times: 3,
            retry_base_ms: 500,
            retry_max_ms: 4000,
            leader_after_attempts: 3,
            candidate_holddown_ms: 6000,
            migrate_wait: 2,
            super_promotion_threshold: 3,
            sid_lease_intervals: 8,
        }
    }
}

impl AttachConfig {
    fn default_request_interval_ms() -> u64 { 1000 }
    fn default_retry_times() -> u32 { 3 }
    fn default_retry_base_ms() -> u64 { 500 }
    fn default_retry_max_ms() -> u64 { 4000 }
    fn default_leader_after_attempts() -> u32 { 3 }
    fn default_candidate_holddown_ms() -> u64 { 6000 }
    fn default_migrate_wait() -> u32 { 2 }
    fn default_super_promotion_threshold() -> usize { 3 }
    fn default_sid_lease_intervals() -> u32 { 8 }
}

/// Protocol timing (`node.timing.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Advertisement period in ms (`node.timing.advertisement_interval_ms`).
    #[serde(default = "TimingConfig::default_advertisement_interval_ms")]
    pub advertisement_interval_ms: u64,
    /// Advertisement jitter in percent of the period (`node.timing.jitter_percent`).
    #[serde(default = "TimingConfig::default_jitter_percent")]
    pub jitter_percent: u8,
    /// Neighbor liveness in advertisement intervals (`node.timing.neighbor_alive_multiplier`).
    #[serde(default = "TimingConfig::default_neighbor_alive_multiplier")]
    pub neighbor_alive_multiplier: u32,
    /// Link request period in ms (`node.timing.link_quality_interval_ms`).
    #[serde(default = "TimingConfig::default_link_quality_interval_ms")]
    pub link_quality_interval_ms: u64,
    /// Reassembly expiry scan period in ms (`node.timing.reassembly_tick_ms`).
    #[serde(default = "TimingConfig::default_reassembly_tick_ms")]
    pub reassembly_tick_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            advertisement_interval_ms: 2000,
            jitter_percent: 10,
            neighbor_alive_multiplier: 4,
            link_quality_interval_ms: 4000,
            reassembly_tick_ms: 1000,
        }
    }
}

impl TimingConfig {
    fn default_advertisement_interval_ms() -> u64 { 2000 }
    fn default_jitter_percent() -> u8 { 10 }
    fn default_neighbor_alive_multiplier() -> u32 { 4 }
    fn default_link_quality_interval_ms() -> u64 { 4000 }
    fn default_reassembly_tick_ms() -> u64 { 1000 }

    /// Time after which a silent always-on neighbor is removed.
    pub fn neighbor_alive_ms(&self) -> u64 {
        self.advertisement_interval_ms * self.neighbor_alive_multiplier as u64
    }
}

/// Resource limits (`node.limits.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Max neighbor table entries (`node.limits.max_neighbors`).
    #[serde(default = "LimitsConfig::default_max_neighbors")]
    pub max_neighbors: usize,
    /// Max concurrent reassembly buffers (`node.limits.reassembly_buffers`).
    #[serde(default = "LimitsConfig::default_reassembly_buffers")]
    pub reassembly_buffers: usize,
    /// Combined command + data outbound queue depth (`node.limits.outbound_queue`).
    #[serde(default = "LimitsConfig::default_outbound_queue")]
    pub outbound_queue: usize,
    /// Frames buffered per sleepy neighbor (`node.limits.sleepy_buffer`).
    #[serde(default = "LimitsConfig::default_sleepy_buffer")]
    pub sleepy_buffer: usize,
    /// Multicast duplicate-suppression entries (`node.limits.mcast_cache`).
    #[serde(default = "LimitsConfig::default_mcast_cache")]
    pub mcast_cache: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_neighbors: 32,
            reassembly_buffers: 8,
            outbound_queue: 64,
            sleepy_buffer: 8,
            mcast_cache: 32,
        }
    }
}

impl LimitsConfig {
    fn default_max_neighbors() -> usize { 32 }
    fn default_reassembly_buffers() -> usize { 8 }
    fn default_outbound_queue() -> usize { 64 }
    fn default_sleepy_buffer() -> usize { 8 }
    fn default_mcast_cache() -> usize { 32 }
}

/// Forwarding pipeline (`node.forwarder.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// Initial hops-left of originated frames (`node.forwarder.hop_limit`).
    #[serde(default = "ForwarderConfig::default_hop_limit")]
    pub hop_limit: u8,
    /// Link send retries before giving up (`node.forwarder.max_send_retries`).
    #[serde(default = "ForwarderConfig::default_max_send_retries")]
    pub max_send_retries: u32,
    /// Base send retry backoff in ms (`node.forwarder.retry_base_ms`).
    #[serde(default = "ForwarderConfig::default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Cap on send retry backoff in ms (`node.forwarder.retry_max_ms`).
    #[serde(default = "ForwarderConfig::default_retry_max_ms")]
    pub retry_max_ms: u64,
    /// Per-hop deadline for a queued frame in ms (`node.forwarder.send_timeout_ms`).
    #[serde(default = "ForwarderConfig::default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Reassembly deadline in ms (`node.forwarder.reassembly_timeout_ms`).
    #[serde(default = "ForwarderConfig::default_reassembly_timeout_ms")]
    pub reassembly_timeout_ms: u64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            hop_limit: 10,
            max_send_retries: 3,
            retry_base_ms: 50,
            retry_max_ms: 800,
            send_timeout_ms: 5000,
            reassembly_timeout_ms: 5000,
        }
    }
}

impl ForwarderConfig {
    fn default_hop_limit() -> u8 { 10 }
    fn default_max_send_retries() -> u32 { 3 }
    fn default_retry_base_ms() -> u64 { 50 }
    fn default_retry_max_ms() -> u64 { 800 }
    fn default_send_timeout_ms() -> u64 { 5000 }
    fn default_reassembly_timeout_ms() -> u64 { 5000 }
}

/// Routing strategy selected at node construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterKind {
    /// Flat structured-SID routing.
    Sid,
    /// Link-state vector routing over router vertices.
    Vector,
}

/// Routing (`node.router.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Strategy (`node.router.kind`).
    #[serde(default = "RouterConfig::default_kind")]
    pub kind: RouterKind,
    /// Initial heartbeat period in ms (`node.router.heartbeat_base_ms`).
    #[serde(default = "RouterConfig::default_heartbeat_base_ms")]
    pub heartbeat_base_ms: u64,
    /// Heartbeat period ceiling in ms (`node.router.heartbeat_max_ms`).
    #[serde(default = "RouterConfig::default_heartbeat_max_ms")]
    pub heartbeat_max_ms: u64,
    /// Vertex expiry in max heartbeat periods (`node.router.vertex_timeout_heartbeats`).
    #[serde(default = "RouterConfig::default_vertex_timeout_heartbeats")]
    pub vertex_timeout_heartbeats: u32,
    /// Max vertices in the topology (`node.router.max_vertices`).
    #[serde(default = "RouterConfig::default_max_vertices")]
    pub max_vertices: usize,
    /// Topology sync retries (`node.router.sync_retry_times`).
    #[serde(default = "RouterConfig::default_sync_retry_times")]
    pub sync_retry_times: u32,
    /// Topology sync retry period in ms (`node.router.sync_retry_interval_ms`).
    #[serde(default = "RouterConfig::default_sync_retry_interval_ms")]
    pub sync_retry_interval_ms: u64,
    /// Highest RSID the leader grants (`node.router.max_rsid`).
    #[serde(default = "RouterConfig::default_max_rsid")]
    pub max_rsid: u8,
    /// RSID lease lifetime in ms (`node.router.rsid_lease_ms`).
    #[serde(default = "RouterConfig::default_rsid_lease_ms")]
    pub rsid_lease_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            kind: RouterKind::Sid,
            heartbeat_base_ms: 1000,
            heartbeat_max_ms: 16_000,
            vertex_timeout_heartbeats: 4,
            max_vertices: 32,
            sync_retry_times: 3,
            sync_retry_interval_ms: 1000,
            max_rsid: 15,
            rsid_lease_ms: 60_000,
        }
    }
}

impl RouterConfig {
    fn default_kind() -> RouterKind { RouterKind::Sid }
    fn default_heartbeat_base_ms() -> u64 { 1000 }
    fn default_heartbeat_max_ms() -> u64 { 16_000 }
    fn default_vertex_timeout_heartbeats() -> u32 { 4 }
    fn default_max_vertices() -> usize { 32 }
    fn default_sync_retry_times() -> u32 { 3 }
    fn default_sync_retry_interval_ms() -> u64 { 1000 }
    fn default_max_rsid() -> u8 { 15 }
    fn default_rsid_lease_ms() -> u64 { 60_000 }
}

/// Network data dissemination (`node.network_data.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDataConfig {
    /// Upper bound on the re-flood delay in ms (`node.network_data.reflood_max_delay_ms`).
    #[serde(default = "NetworkDataConfig::default_reflood_max_delay_ms")]
    pub reflood_max_delay_ms: u64,
    /// Max stored records (`node.network_data.max_records`).
    #[serde(default = "NetworkDataConfig::default_max_records")]
    pub max_records: usize,
}

impl Default for NetworkDataConfig {
    fn default() -> Self {
        Self {
            reflood_max_delay_ms: 200,
            max_records: 32,
        }
    }
}

impl NetworkDataConfig {
    fn default_reflood_max_delay_ms() -> u64 { 200 }
    fn default_max_records() -> usize { 32 }
}

/// Neighbor admission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// Whitelist only.
    Open,
    /// Pre-shared network key with per-frame MIC.
    StaticKey,
    /// EAP-style challenge exchange relayed to the leader.
    Eap,
}

/// Whitelist entry (`node.security.whitelist[]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistEntryConfig {
    pub ext_addr: ExtAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i8>,
}

/// Security (`node.security.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Admission mode (`node.security.mode`).
    #[serde(default = "SecurityConfig::default_mode")]
    pub mode: SecurityMode,
    /// Pre-shared secret (`node.security.psk`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psk: Option<String>,
    /// Device identity presented during EAP (`node.security.device_id`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Whitelist filtering on at startup (`node.security.whitelist_enabled`).
    #[serde(default)]
    pub whitelist_enabled: bool,
    /// Initial whitelist (`node.security.whitelist`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub whitelist: Vec<WhitelistEntryConfig>,
    /// Blacklist hold after failed auth in ms (`node.security.blacklist_ms`).
    #[serde(default = "SecurityConfig::default_blacklist_ms")]
    pub blacklist_ms: u64,
    /// Auth retries per state (`node.security.auth_retry_times`).
    #[serde(default = "SecurityConfig::default_auth_retry_times")]
    pub auth_retry_times: u32,
    /// Auth retry period in ms (`node.security.auth_retry_interval_ms`).
    #[serde(default = "SecurityConfig::default_auth_retry_interval_ms")]
    pub auth_retry_interval_ms: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            mode: SecurityMode::Open,
            psk: None,
            device_id: None,
            whitelist_enabled: false,
            whitelist: Vec::new(),
            blacklist_ms: 30_000,
            auth_retry_times: 3,
            auth_retry_interval_ms: 1000,
        }
    }
}

impl SecurityConfig {
    fn default_mode() -> SecurityMode { SecurityMode::Open }
    fn default_blacklist_ms() -> u64 { 30_000 }
    fn default_auth_retry_times() -> u32 { 3 }
    fn default_auth_retry_interval_ms() -> u64 { 1000 }
}

/// Lowpower scheduling (`node.lowpower.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowpowerConfig {
    /// Slot length in ms (`node.lowpower.slot_interval_ms`).
    #[serde(default = "LowpowerConfig::default_slot_interval_ms")]
    pub slot_interval_ms: u64,
    /// Slots per superframe (`node.lowpower.slots`).
    #[serde(default = "LowpowerConfig::default_slots")]
    pub slots: u32,
    /// Time a woken node stays reachable in ms (`node.lowpower.awake_window_ms`).
    #[serde(default = "LowpowerConfig::default_awake_window_ms")]
    pub awake_window_ms: u64,
}

impl Default for LowpowerConfig {
    fn default() -> Self {
        Self {
            slot_interval_ms: 1000,
            slots: 8,
            awake_window_ms: 300,
        }
    }
}

impl LowpowerConfig {
    fn default_slot_interval_ms() -> u64 { 1000 }
    fn default_slots() -> u32 { 8 }
    fn default_awake_window_ms() -> u64 { 300 }

    /// Liveness threshold for a sleepy neighbor.
    pub fn sleepy_alive_ms(&self) -> u64 {
        self.slot_interval_ms * self.slots as u64 * 3
    }
}

// ============================================================================
// Node Configuration (Root)
// ============================================================================

/// Node configuration (`node.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity configuration (`node.identity.*`).
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Extended network ID (`node.ext_netid`).
    #[serde(default)]
    pub ext_netid: ExtNetId,

    /// Radio channel (`node.channel`).
    #[serde(default = "NodeConfig::default_channel")]
    pub channel: u8,

    /// Seed for protocol jitter; derived from the address when absent (`node.rng_seed`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rng_seed: Option<u64>,

    /// Operating mode (`node.mode.*`).
    #[serde(default)]
    pub mode: ModeConfig,

    /// Leader election policy (`node.leader_policy.*`).
    #[serde(default)]
    pub leader_policy: LeaderPolicyConfig,

    /// Attach behavior (`node.attach.*`).
    #[serde(default)]
    pub attach: AttachConfig,

    /// Protocol timing (`node.timing.*`).
    #[serde(default)]
    pub timing: TimingConfig,

    /// Resource limits (`node.limits.*`).
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Forwarding pipeline (`node.forwarder.*`).
    #[serde(default)]
    pub forwarder: ForwarderConfig,

    /// Routing (`node.router.*`).
    #[serde(default)]
    pub router: RouterConfig,

    /// Network data (`node.network_data.*`).
    #[serde(default)]
    pub network_data: NetworkDataConfig,

    /// Security (`node.security.*`).
    #[serde(default)]
    pub security: SecurityConfig,

    /// Lowpower (`node.lowpower.*`).
    #[serde(default)]
    pub lowpower: LowpowerConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            ext_netid: ExtNetId::default(),
            channel: 1,
            rng_seed: None,
            mode: ModeConfig::default(),
            leader_policy: LeaderPolicyConfig::default(),
            attach: AttachConfig::default(),
            timing: TimingConfig::default(),
            limits: LimitsConfig::default(),
            forwarder: ForwarderConfig::default(),
            router: RouterConfig::default(),
            network_data: NetworkDataConfig::default(),
            security: SecurityConfig::default(),
            lowpower: LowpowerConfig::default(),
        }
    }
}

impl NodeConfig {
    fn default_channel() -> u8 { 1 }
}
