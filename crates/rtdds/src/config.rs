// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant configuration: domain, locators, discovery schedules.
//!
//! Port arithmetic follows the RTPS v2.2 Sec.9.6.1.1 well-known port
//! formula. Everything here is plain data consumed once at participant
//! construction; none of it is shared mutable state.

use crate::core::types::{GuidPrefix, Locator};
use crate::dds::qos::Durability;
use crate::dds::{Error, Result};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

// ===== RTPS well-known port formula (RTPS v2.2 Sec.9.6.1.1) =====

/// Port base (PB).
pub const PORT_BASE: u16 = 7400;
/// Domain ID gain (DG).
pub const DOMAIN_ID_GAIN: u16 = 250;
/// Participant ID gain (PG).
pub const PARTICIPANT_ID_GAIN: u16 = 2;
/// Offset d0: metatraffic multicast.
pub const OFFSET_METATRAFFIC_MULTICAST: u16 = 0;
/// Offset d1: metatraffic unicast.
pub const OFFSET_METATRAFFIC_UNICAST: u16 = 10;
/// Highest valid DDS domain id.
pub const MAX_DOMAIN_ID: u32 = 232;

/// SPDP well-known multicast group.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 1);

/// Metatraffic multicast port for a domain.
pub fn metatraffic_multicast_port(domain_id: u32) -> u16 {
    PORT_BASE + DOMAIN_ID_GAIN * (domain_id as u16) + OFFSET_METATRAFFIC_MULTICAST
}

/// Metatraffic unicast port for a (domain, participant) pair.
pub fn metatraffic_unicast_port(domain_id: u32, participant_id: u8) -> u16 {
    PORT_BASE
        + DOMAIN_ID_GAIN * (domain_id as u16)
        + PARTICIPANT_ID_GAIN * u16::from(participant_id)
        + OFFSET_METATRAFFIC_UNICAST
}

// ===== Discovery settings =====

/// Flow-control budget for the built-in writers.
///
/// When the byte budget is finite and the period non-zero, built-in writers
/// run in asynchronous mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThroughputController {
    pub bytes_per_period: u32,
    pub period_millisecs: u32,
}

impl Default for ThroughputController {
    fn default() -> Self {
        Self {
            bytes_per_period: u32::MAX,
            period_millisecs: 0,
        }
    }
}

impl ThroughputController {
    /// True when the controller forces asynchronous writer mode.
    pub fn is_enabled(&self) -> bool {
        self.bytes_per_period != u32::MAX && self.period_millisecs != 0
    }
}

/// A known discovery server, addressed by prefix and metatraffic locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteServer {
    pub guid_prefix: GuidPrefix,
    pub metatraffic_locator: Locator,
}

/// Which PDP flavor this participant runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DiscoveryProtocol {
    /// Peer-to-peer SPDP announcements.
    #[default]
    Simple,
    /// Client of one or more discovery servers.
    Client { servers: Vec<RemoteServer> },
    /// Discovery server: relays client announcements, may persist history.
    Server {
        /// Other servers of the fleet this server synchronizes with.
        servers: Vec<RemoteServer>,
        /// TRANSIENT persists the PDP writer history to disk; TRANSIENT_LOCAL
        /// keeps it in memory only.
        durability: Durability,
        /// Directory for the per-GUID persistence file.
        persistence_dir: PathBuf,
    },
}

/// Participant configuration.
///
/// # Example
///
/// ```
/// use rtdds::RtpsConfig;
/// use std::time::Duration;
///
/// let config = RtpsConfig {
///     domain_id: 0,
///     lease_duration: Duration::from_secs(20),
///     ..RtpsConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct RtpsConfig {
    pub domain_id: u32,
    pub participant_id: u8,
    /// Static peers the initial PDP burst is addressed to.
    pub initial_peers: Vec<Locator>,
    /// Metatraffic unicast locators announced in DATA(p). When empty, one is
    /// derived from the well-known port formula.
    pub metatraffic_unicast_locators: Vec<Locator>,
    /// Metatraffic multicast locators announced in DATA(p).
    pub metatraffic_multicast_locators: Vec<Locator>,
    /// Default (user traffic) unicast locators announced for EDP use.
    pub default_unicast_locators: Vec<Locator>,
    /// Default multicast locators announced for EDP use.
    pub default_multicast_locators: Vec<Locator>,
    /// Period of the steady-state DATA(p) resend.
    pub announcement_period: Duration,
    /// Remote participants are evicted when no DATA(p) renews the lease
    /// within this window.
    pub lease_duration: Duration,
    /// Number of initial announcements sent before steady state.
    pub initial_announcement_count: u32,
    /// Spacing of the initial burst.
    pub initial_announcement_period: Duration,
    /// PDP flavor.
    pub discovery_protocol: DiscoveryProtocol,
    /// Flow control for built-in writers.
    pub throughput_controller: ThroughputController,
    /// Security attributes; `None` disables the secure builtin endpoints.
    pub security: Option<crate::security::ParticipantSecurityAttributes>,
}

impl Default for RtpsConfig {
    fn default() -> Self {
        Self {
            domain_id: 0,
            participant_id: 0,
            initial_peers: Vec::new(),
            metatraffic_unicast_locators: Vec::new(),
            metatraffic_multicast_locators: Vec::new(),
            default_unicast_locators: Vec::new(),
            default_multicast_locators: Vec::new(),
            announcement_period: Duration::from_secs(3),
            lease_duration: Duration::from_secs(30),
            initial_announcement_count: 5,
            initial_announcement_period: Duration::from_millis(300),
            discovery_protocol: DiscoveryProtocol::Simple,
            throughput_controller: ThroughputController::default(),
            security: None,
        }
    }
}

impl RtpsConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// - `Error::InvalidDomainId` when domain_id > 232
    /// - `Error::InvalidQos` when the initial burst is empty
    ///
    /// A lease at or below the announcement period is legal (peers will
    /// expire between announcements) but almost always a mistake, so it is
    /// logged.
    pub fn validate(&self) -> Result<()> {
        if self.domain_id > MAX_DOMAIN_ID {
            return Err(Error::InvalidDomainId(self.domain_id));
        }
        if self.initial_announcement_count == 0 {
            return Err(Error::InvalidQos(
                "initial_announcement_count must be at least 1".to_string(),
            ));
        }
        if self.lease_duration <= self.announcement_period {
            log::warn!(
                "[config] lease_duration {:?} does not cover announcement_period {:?}; \
                 remote peers will expire this participant between announcements",
                self.lease_duration,
                self.announcement_period
            );
        }
        Ok(())
    }

    /// Metatraffic unicast locators, derived from the port formula when the
    /// configured list is empty.
    pub fn effective_metatraffic_unicast(&self) -> Vec<Locator> {
        if !self.metatraffic_unicast_locators.is_empty() {
            return self.metatraffic_unicast_locators.clone();
        }
        vec![Locator::udpv4(
            Ipv4Addr::LOCALHOST,
            metatraffic_unicast_port(self.domain_id, self.participant_id),
        )]
    }

    /// Metatraffic multicast locators, well-known group when unset.
    pub fn effective_metatraffic_multicast(&self) -> Vec<Locator> {
        if !self.metatraffic_multicast_locators.is_empty() {
            return self.metatraffic_multicast_locators.clone();
        }
        vec![Locator::udpv4(
            DEFAULT_MULTICAST_GROUP,
            metatraffic_multicast_port(self.domain_id),
        )]
    }

    /// Servers this participant must converge with (client or server role).
    pub fn known_servers(&self) -> &[RemoteServer] {
        match &self.discovery_protocol {
            DiscoveryProtocol::Simple => &[],
            DiscoveryProtocol::Client { servers } => servers,
            DiscoveryProtocol::Server { servers, .. } => servers,
        }
    }

    /// True when this participant runs the server PDP variant.
    pub fn is_server(&self) -> bool {
        matches!(self.discovery_protocol, DiscoveryProtocol::Server { .. })
    }
}
