// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant proxy data and its DATA(p) wire form.
//!
//! One `ParticipantProxyData` exists per known participant (local included).
//! It owns the endpoint proxies learned through EDP and carries the lease
//! bookkeeping the PDP engines drive.

use crate::builtin::data::endpoint_proxy::{ReaderProxyData, WriterProxyData};
use crate::builtin::data::parameter::{
    decode_duration, decode_guid, decode_locator, decode_u32, for_each_parameter, ParameterListWriter,
    ParseError, PID_BUILTIN_ENDPOINT_SET, PID_DEFAULT_MULTICAST_LOCATOR,
    PID_DEFAULT_UNICAST_LOCATOR, PID_DOMAIN_ID, PID_EXPECTS_INLINE_QOS, PID_IDENTITY_TOKEN,
    PID_METATRAFFIC_MULTICAST_LOCATOR, PID_METATRAFFIC_UNICAST_LOCATOR, PID_PARTICIPANT_GUID,
    PID_PARTICIPANT_LEASE_DURATION, PID_PERMISSIONS_TOKEN, PID_PROTOCOL_VERSION, PID_VENDOR_ID,
};
use crate::core::types::entity_ids::ENTITYID_PARTICIPANT;
use crate::core::types::{
    EntityId, Guid, GuidPrefix, InstanceHandle, Locator, ProtocolVersion, VendorId,
    PROTOCOL_VERSION_2_2, VENDOR_ID_RTDDS,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Everything known about one participant.
#[derive(Debug, Clone)]
pub struct ParticipantProxyData {
    pub guid: Guid,
    pub protocol_version: ProtocolVersion,
    pub vendor_id: VendorId,
    pub expects_inline_qos: bool,
    /// BuiltinEndpointSet_t bitmask advertised in DATA(p).
    pub available_builtin_endpoints: u32,
    pub metatraffic_unicast_locators: Vec<Locator>,
    pub metatraffic_multicast_locators: Vec<Locator>,
    pub default_unicast_locators: Vec<Locator>,
    pub default_multicast_locators: Vec<Locator>,
    pub lease_duration: Duration,
    pub domain_id: u32,
    /// Opaque authentication token (only meaningful with security active).
    pub identity_token: Option<Vec<u8>>,
    /// Opaque access-control token.
    pub permissions_token: Option<Vec<u8>>,

    // ---- runtime state (never serialized) ----
    /// False once disposed; stale operations on a dead proxy are no-ops.
    pub is_alive: bool,
    /// Timestamp of the last DATA(p) that renewed the lease. Sequence
    /// ordering itself lives in the built-in reader's writer proxies.
    pub last_lease_renewal: Instant,
    /// True when this peer is a known discovery server (from configuration).
    pub is_server_peer: bool,
    /// Endpoint proxies owned by this participant, keyed by entity id.
    pub writers: HashMap<EntityId, WriterProxyData>,
    pub readers: HashMap<EntityId, ReaderProxyData>,
}

impl ParticipantProxyData {
    /// Proxy for a freshly constructed local or remote participant.
    pub fn new(guid_prefix: GuidPrefix, domain_id: u32, lease_duration: Duration) -> Self {
        Self {
            guid: Guid::new(guid_prefix, ENTITYID_PARTICIPANT),
            protocol_version: PROTOCOL_VERSION_2_2,
            vendor_id: VENDOR_ID_RTDDS,
            expects_inline_qos: false,
            available_builtin_endpoints: 0,
            metatraffic_unicast_locators: Vec::new(),
            metatraffic_multicast_locators: Vec::new(),
            default_unicast_locators: Vec::new(),
            default_multicast_locators: Vec::new(),
            lease_duration,
            domain_id,
            identity_token: None,
            permissions_token: None,
            is_alive: true,
            last_lease_renewal: Instant::now(),
            is_server_peer: false,
            writers: HashMap::new(),
            readers: HashMap::new(),
        }
    }

    /// Instance handle keying this participant's DATA(p) changes.
    pub fn key(&self) -> InstanceHandle {
        self.guid.instance_handle()
    }

    pub fn guid_prefix(&self) -> GuidPrefix {
        self.guid.prefix
    }

    /// Mark the lease as renewed now.
    pub fn renew_lease(&mut self) {
        self.last_lease_renewal = Instant::now();
    }

    /// True when the lease elapsed without renewal.
    ///
    /// The local participant's proxy never expires; callers exclude it.
    pub fn lease_expired(&self, now: Instant) -> bool {
        now.duration_since(self.last_lease_renewal) > self.lease_duration
    }

    /// Replace the wire-visible fields from a newer DATA(p).
    ///
    /// Locator lists are replaced as a whole, never merged; the most recent
    /// sample wins even when heard over multiple paths. Runtime state and
    /// owned endpoint proxies are preserved.
    pub fn update_from(&mut self, fresh: &ParticipantProxyData) {
        self.protocol_version = fresh.protocol_version;
        self.vendor_id = fresh.vendor_id;
        self.expects_inline_qos = fresh.expects_inline_qos;
        self.available_builtin_endpoints = fresh.available_builtin_endpoints;
        self.metatraffic_unicast_locators = fresh.metatraffic_unicast_locators.clone();
        self.metatraffic_multicast_locators = fresh.metatraffic_multicast_locators.clone();
        self.default_unicast_locators = fresh.default_unicast_locators.clone();
        self.default_multicast_locators = fresh.default_multicast_locators.clone();
        self.lease_duration = fresh.lease_duration;
        self.domain_id = fresh.domain_id;
        self.identity_token = fresh.identity_token.clone();
        self.permissions_token = fresh.permissions_token.clone();
    }

    /// True when the wire-visible content differs from `other`.
    pub fn differs_from(&self, other: &ParticipantProxyData) -> bool {
        self.available_builtin_endpoints != other.available_builtin_endpoints
            || self.metatraffic_unicast_locators != other.metatraffic_unicast_locators
            || self.metatraffic_multicast_locators != other.metatraffic_multicast_locators
            || self.default_unicast_locators != other.default_unicast_locators
            || self.default_multicast_locators != other.default_multicast_locators
            || self.lease_duration != other.lease_duration
            || self.expects_inline_qos != other.expects_inline_qos
    }

    // ===== DATA(p) wire form =====

    /// Serialize to a DATA(p) ParameterList payload.
    pub fn build_data_p(&self) -> Vec<u8> {
        crate::trace_fn!("ParticipantProxyData::build_data_p");
        let mut writer = ParameterListWriter::new();

        // PID order mirrors the common stacks: version, vendor, guid, set.
        writer.param(
            PID_PROTOCOL_VERSION,
            &[self.protocol_version.major, self.protocol_version.minor],
        );
        writer.param(PID_VENDOR_ID, &self.vendor_id);
        writer.param_guid(PID_PARTICIPANT_GUID, &self.guid);
        writer.param_u32(PID_BUILTIN_ENDPOINT_SET, self.available_builtin_endpoints);
        writer.param_u32(PID_DOMAIN_ID, self.domain_id);
        writer.param(
            PID_EXPECTS_INLINE_QOS,
            &[u8::from(self.expects_inline_qos)],
        );
        for locator in &self.metatraffic_unicast_locators {
            writer.param_locator(PID_METATRAFFIC_UNICAST_LOCATOR, locator);
        }
        for locator in &self.metatraffic_multicast_locators {
            writer.param_locator(PID_METATRAFFIC_MULTICAST_LOCATOR, locator);
        }
        for locator in &self.default_unicast_locators {
            writer.param_locator(PID_DEFAULT_UNICAST_LOCATOR, locator);
        }
        for locator in &self.default_multicast_locators {
            writer.param_locator(PID_DEFAULT_MULTICAST_LOCATOR, locator);
        }
        writer.param_duration(PID_PARTICIPANT_LEASE_DURATION, self.lease_duration);
        if let Some(token) = &self.identity_token {
            writer.param(PID_IDENTITY_TOKEN, token);
        }
        if let Some(token) = &self.permissions_token {
            writer.param(PID_PERMISSIONS_TOKEN, token);
        }
        writer.finish()
    }

    /// Deserialize from a DATA(p) ParameterList payload.
    ///
    /// # Errors
    /// `ParseError` when the list is malformed or the participant GUID is
    /// absent. The caller drops the sample and logs a warning; a bad DATA(p)
    /// never tears the sender down.
    pub fn parse_data_p(payload: &[u8]) -> Result<Self, ParseError> {
        crate::trace_fn!("ParticipantProxyData::parse_data_p");
        let mut data = ParticipantProxyData::new([0; 12], 0, Duration::from_secs(30));
        let mut guid_seen = false;

        for_each_parameter(payload, |pid, value| {
            match pid {
                PID_PROTOCOL_VERSION => {
                    if value.len() < 2 {
                        return Err(ParseError::InvalidValue { pid });
                    }
                    data.protocol_version = ProtocolVersion {
                        major: value[0],
                        minor: value[1],
                    };
                }
                PID_VENDOR_ID => {
                    if value.len() < 2 {
                        return Err(ParseError::InvalidValue { pid });
                    }
                    data.vendor_id = [value[0], value[1]];
                }
                PID_PARTICIPANT_GUID => {
                    data.guid = decode_guid(pid, value)?;
                    guid_seen = true;
                }
                PID_BUILTIN_ENDPOINT_SET => {
                    data.available_builtin_endpoints = decode_u32(pid, value)?;
                }
                PID_DOMAIN_ID => {
                    data.domain_id = decode_u32(pid, value)?;
                }
                PID_EXPECTS_INLINE_QOS => {
                    if value.is_empty() {
                        return Err(ParseError::InvalidValue { pid });
                    }
                    data.expects_inline_qos = value[0] != 0;
                }
                PID_METATRAFFIC_UNICAST_LOCATOR => {
                    data.metatraffic_unicast_locators
                        .push(decode_locator(pid, value)?);
                }
                PID_METATRAFFIC_MULTICAST_LOCATOR => {
                    data.metatraffic_multicast_locators
                        .push(decode_locator(pid, value)?);
                }
                PID_DEFAULT_UNICAST_LOCATOR => {
                    data.default_unicast_locators
                        .push(decode_locator(pid, value)?);
                }
                PID_DEFAULT_MULTICAST_LOCATOR => {
                    data.default_multicast_locators
                        .push(decode_locator(pid, value)?);
                }
                PID_PARTICIPANT_LEASE_DURATION => {
                    data.lease_duration =
                        decode_duration(value).ok_or(ParseError::InvalidValue { pid })?;
                }
                PID_IDENTITY_TOKEN => {
                    data.identity_token = Some(value.to_vec());
                }
                PID_PERMISSIONS_TOKEN => {
                    data.permissions_token = Some(value.to_vec());
                }
                // Unknown pids are tolerated per RTPS v2.2 Sec.9.6.2.2.1.
                _ => {}
            }
            Ok(())
        })?;

        if !guid_seen {
            return Err(ParseError::MissingParameter {
                pid: PID_PARTICIPANT_GUID,
            });
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::entity_ids::BUILTIN_ENDPOINT_SET_DEFAULT;
    use std::net::Ipv4Addr;

    fn sample_proxy() -> ParticipantProxyData {
        let mut data = ParticipantProxyData::new([7; 12], 3, Duration::from_secs(20));
        data.available_builtin_endpoints = BUILTIN_ENDPOINT_SET_DEFAULT;
        data.metatraffic_unicast_locators
            .push(Locator::udpv4(Ipv4Addr::new(192, 168, 0, 5), 7410));
        data.metatraffic_multicast_locators
            .push(Locator::udpv4(Ipv4Addr::new(239, 255, 0, 1), 7400));
        data.default_unicast_locators
            .push(Locator::udpv4(Ipv4Addr::new(192, 168, 0, 5), 7411));
        data
    }

    #[test]
    fn test_data_p_roundtrip() {
        let original = sample_proxy();
        let payload = original.build_data_p();
        let parsed = ParticipantProxyData::parse_data_p(&payload).expect("well-formed DATA(p)");

        assert_eq!(parsed.guid, original.guid);
        assert_eq!(parsed.vendor_id, VENDOR_ID_RTDDS);
        assert_eq!(parsed.domain_id, 3);
        assert_eq!(
            parsed.available_builtin_endpoints,
            BUILTIN_ENDPOINT_SET_DEFAULT
        );
        assert_eq!(
            parsed.metatraffic_unicast_locators,
            original.metatraffic_unicast_locators
        );
        assert_eq!(
            parsed.metatraffic_multicast_locators,
            original.metatraffic_multicast_locators
        );
        assert_eq!(
            parsed.default_unicast_locators,
            original.default_unicast_locators
        );
        assert_eq!(parsed.lease_duration, Duration::from_secs(20));
    }

    #[test]
    fn test_data_p_tokens_roundtrip() {
        let mut original = sample_proxy();
        original.identity_token = Some(vec![1, 2, 3, 4]);
        original.permissions_token = Some(vec![9, 9, 9, 9]);
        let parsed =
            ParticipantProxyData::parse_data_p(&original.build_data_p()).expect("parse tokens");
        assert_eq!(parsed.identity_token, Some(vec![1, 2, 3, 4]));
        assert_eq!(parsed.permissions_token, Some(vec![9, 9, 9, 9]));
    }

    #[test]
    fn test_data_p_missing_guid_rejected() {
        let payload = ParameterListWriter::new().finish();
        let result = ParticipantProxyData::parse_data_p(&payload);
        assert_eq!(
            result.unwrap_err(),
            ParseError::MissingParameter {
                pid: PID_PARTICIPANT_GUID
            }
        );
    }

    #[test]
    fn test_data_p_unknown_pid_tolerated() {
        let mut data = sample_proxy();
        data.identity_token = None;
        let mut payload = data.build_data_p();
        // Splice an unknown vendor pid before the sentinel.
        let sentinel_at = payload.len() - 4;
        payload.splice(
            sentinel_at..sentinel_at,
            [0x34u8, 0x81, 0x04, 0x00, 1, 2, 3, 4],
        );
        assert!(ParticipantProxyData::parse_data_p(&payload).is_ok());
    }

    #[test]
    fn test_update_from_replaces_locators_whole() {
        let mut old = sample_proxy();
        old.writers.insert(
            [0, 0, 0, 2],
            crate::builtin::data::endpoint_proxy::WriterProxyData::new(
                Guid::new([7; 12], [0, 0, 0, 2]),
                "T",
                "t",
            ),
        );
        let mut fresh = sample_proxy();
        fresh.metatraffic_unicast_locators =
            vec![Locator::udpv4(Ipv4Addr::new(10, 1, 1, 1), 7412)];

        old.update_from(&fresh);
        // Replaced wholesale, not merged.
        assert_eq!(
            old.metatraffic_unicast_locators,
            vec![Locator::udpv4(Ipv4Addr::new(10, 1, 1, 1), 7412)]
        );
        // Owned endpoint proxies survive the update.
        assert_eq!(old.writers.len(), 1);
    }

    #[test]
    fn test_lease_expiry_window() {
        let mut data = ParticipantProxyData::new([1; 12], 0, Duration::from_millis(50));
        let renewed_at = Instant::now();
        data.last_lease_renewal = renewed_at;
        assert!(!data.lease_expired(renewed_at + Duration::from_millis(40)));
        assert!(data.lease_expired(renewed_at + Duration::from_millis(60)));
    }

    #[test]
    fn test_differs_from_detects_endpoint_set_change() {
        let a = sample_proxy();
        let mut b = sample_proxy();
        assert!(!a.differs_from(&b));
        b.available_builtin_endpoints |= 1 << 20;
        assert!(a.differs_from(&b));
    }
}
