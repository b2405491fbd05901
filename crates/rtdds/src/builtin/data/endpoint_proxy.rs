// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer/reader proxy data and their DATA(w)/DATA(r) wire forms.
//!
//! A proxy record is replaced atomically on every update; in particular the
//! topic name is immutable once published, so a descriptor with a different
//! topic for a known GUID replaces the whole record rather than mutating it.

use crate::builtin::data::parameter::{
    decode_duration, decode_guid, decode_locator, decode_string, decode_u32, encode_duration,
    for_each_parameter, ParameterListWriter, ParseError, PID_DEADLINE, PID_DURABILITY,
    PID_ENDPOINT_GUID, PID_EXPECTS_INLINE_QOS, PID_HISTORY, PID_KEY_HASH, PID_LIVELINESS,
    PID_MULTICAST_LOCATOR, PID_OWNERSHIP, PID_PARTITION, PID_PERSISTENCE_GUID, PID_RELIABILITY,
    PID_TOPIC_NAME, PID_TYPE_NAME, PID_UNICAST_LOCATOR,
};
use crate::core::types::{Guid, InstanceHandle, Locator};
use crate::dds::qos::{
    Deadline, Durability, EndpointQos, History, Liveliness, LivelinessKind, Ownership, Partition,
    Reliability,
};
use std::time::Duration;

/// Proxy for a remote (or local) data writer, as carried in DATA(w).
#[derive(Debug, Clone, PartialEq)]
pub struct WriterProxyData {
    pub guid: Guid,
    pub topic_name: String,
    pub type_name: String,
    pub qos: EndpointQos,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
    /// GUID under which durable data is persisted; defaults to `guid`.
    pub persistence_guid: Option<Guid>,
    pub key_hash: Option<[u8; 16]>,
}

impl WriterProxyData {
    pub fn new(guid: Guid, topic_name: &str, type_name: &str) -> Self {
        Self {
            guid,
            topic_name: topic_name.to_string(),
            type_name: type_name.to_string(),
            qos: EndpointQos::default(),
            unicast_locators: Vec::new(),
            multicast_locators: Vec::new(),
            persistence_guid: None,
            key_hash: None,
        }
    }

    pub fn key(&self) -> InstanceHandle {
        self.guid.instance_handle()
    }

    /// Serialize to a DATA(w) ParameterList payload.
    pub fn build_data_w(&self) -> Vec<u8> {
        crate::trace_fn!("WriterProxyData::build_data_w");
        let mut writer = ParameterListWriter::new();
        writer.param_guid(PID_ENDPOINT_GUID, &self.guid);
        writer.param_string(PID_TOPIC_NAME, &self.topic_name);
        writer.param_string(PID_TYPE_NAME, &self.type_name);
        write_qos(&mut writer, &self.qos);
        for locator in &self.unicast_locators {
            writer.param_locator(PID_UNICAST_LOCATOR, locator);
        }
        for locator in &self.multicast_locators {
            writer.param_locator(PID_MULTICAST_LOCATOR, locator);
        }
        if let Some(guid) = &self.persistence_guid {
            writer.param_guid(PID_PERSISTENCE_GUID, guid);
        }
        if let Some(hash) = &self.key_hash {
            writer.param(PID_KEY_HASH, hash);
        }
        writer.finish()
    }

    /// Deserialize from a DATA(w) ParameterList payload.
    pub fn parse_data_w(payload: &[u8]) -> Result<Self, ParseError> {
        crate::trace_fn!("WriterProxyData::parse_data_w");
        let common = parse_endpoint_common(payload)?;
        Ok(Self {
            guid: common.guid,
            topic_name: common.topic_name,
            type_name: common.type_name,
            qos: common.qos,
            unicast_locators: common.unicast_locators,
            multicast_locators: common.multicast_locators,
            persistence_guid: common.persistence_guid,
            key_hash: common.key_hash,
        })
    }
}

/// Proxy for a remote (or local) data reader, as carried in DATA(r).
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderProxyData {
    pub guid: Guid,
    pub topic_name: String,
    pub type_name: String,
    pub qos: EndpointQos,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
    pub expects_inline_qos: bool,
    pub key_hash: Option<[u8; 16]>,
}

impl ReaderProxyData {
    pub fn new(guid: Guid, topic_name: &str, type_name: &str) -> Self {
        Self {
            guid,
            topic_name: topic_name.to_string(),
            type_name: type_name.to_string(),
            qos: EndpointQos::default(),
            unicast_locators: Vec::new(),
            multicast_locators: Vec::new(),
            expects_inline_qos: false,
            key_hash: None,
        }
    }

    pub fn key(&self) -> InstanceHandle {
        self.guid.instance_handle()
    }

    /// Serialize to a DATA(r) ParameterList payload.
    pub fn build_data_r(&self) -> Vec<u8> {
        crate::trace_fn!("ReaderProxyData::build_data_r");
        let mut writer = ParameterListWriter::new();
        writer.param_guid(PID_ENDPOINT_GUID, &self.guid);
        writer.param_string(PID_TOPIC_NAME, &self.topic_name);
        writer.param_string(PID_TYPE_NAME, &self.type_name);
        writer.param(
            PID_EXPECTS_INLINE_QOS,
            &[u8::from(self.expects_inline_qos)],
        );
        write_qos(&mut writer, &self.qos);
        for locator in &self.unicast_locators {
            writer.param_locator(PID_UNICAST_LOCATOR, locator);
        }
        for locator in &self.multicast_locators {
            writer.param_locator(PID_MULTICAST_LOCATOR, locator);
        }
        if let Some(hash) = &self.key_hash {
            writer.param(PID_KEY_HASH, hash);
        }
        writer.finish()
    }

    /// Deserialize from a DATA(r) ParameterList payload.
    pub fn parse_data_r(payload: &[u8]) -> Result<Self, ParseError> {
        crate::trace_fn!("ReaderProxyData::parse_data_r");
        let common = parse_endpoint_common(payload)?;
        Ok(Self {
            guid: common.guid,
            topic_name: common.topic_name,
            type_name: common.type_name,
            qos: common.qos,
            unicast_locators: common.unicast_locators,
            multicast_locators: common.multicast_locators,
            expects_inline_qos: common.expects_inline_qos,
            key_hash: common.key_hash,
        })
    }
}

// ===== QoS parameter encoding =====
//
// Wire values per DDS-RTPS v2.2 Sec.9.6.2.2: reliability kinds are 1-based,
// everything else 0-based, durations are Duration_t.

fn write_qos(writer: &mut ParameterListWriter, qos: &EndpointQos) {
    // ReliabilityQosPolicy: kind(u32) + max_blocking_time(Duration_t).
    let mut reliability = [0u8; 12];
    let kind: u32 = match qos.reliability {
        Reliability::BestEffort => 1,
        Reliability::Reliable => 2,
    };
    reliability[0..4].copy_from_slice(&kind.to_le_bytes());
    reliability[4..12].copy_from_slice(&encode_duration(Duration::from_millis(100)));
    writer.param(PID_RELIABILITY, &reliability);

    writer.param_u32(PID_DURABILITY, u32::from(qos.durability.rank()));

    // HistoryQosPolicy: kind(u32) + depth(i32).
    let mut history = [0u8; 8];
    let (kind, depth): (u32, i32) = match qos.history {
        History::KeepLast(depth) => (0, depth as i32),
        History::KeepAll => (1, 0),
    };
    history[0..4].copy_from_slice(&kind.to_le_bytes());
    history[4..8].copy_from_slice(&depth.to_le_bytes());
    writer.param(PID_HISTORY, &history);

    writer.param(PID_DEADLINE, &encode_duration(qos.deadline.period));

    let ownership: u32 = match qos.ownership {
        Ownership::Shared => 0,
        Ownership::Exclusive => 1,
    };
    writer.param_u32(PID_OWNERSHIP, ownership);

    // LivelinessQosPolicy: kind(u32) + lease_duration(Duration_t). The
    // announcement period is writer-local and never reaches the wire.
    let mut liveliness = [0u8; 12];
    liveliness[0..4].copy_from_slice(&u32::from(qos.liveliness.kind.rank()).to_le_bytes());
    liveliness[4..12].copy_from_slice(&encode_duration(qos.liveliness.lease_duration));
    writer.param(PID_LIVELINESS, &liveliness);

    if !qos.partition.is_default() {
        writer.param(PID_PARTITION, &encode_partition(&qos.partition));
    }
}

fn encode_partition(partition: &Partition) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(partition.names.len() as u32).to_le_bytes());
    for name in &partition.names {
        let len = name.len() as u32 + 1;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }
    out
}

fn decode_partition(pid: u16, value: &[u8]) -> Result<Partition, ParseError> {
    if value.len() < 4 {
        return Err(ParseError::InvalidValue { pid });
    }
    let count = u32::from_le_bytes([value[0], value[1], value[2], value[3]]) as usize;
    if count > 256 {
        // Hostile peers do not get to make us allocate unbounded name lists.
        return Err(ParseError::InvalidValue { pid });
    }
    let mut names = Vec::with_capacity(count);
    let mut offset = 4;
    for _ in 0..count {
        if offset + 4 > value.len() {
            return Err(ParseError::InvalidValue { pid });
        }
        let len = u32::from_le_bytes([
            value[offset],
            value[offset + 1],
            value[offset + 2],
            value[offset + 3],
        ]) as usize;
        offset += 4;
        if len == 0 || offset + len > value.len() {
            return Err(ParseError::InvalidValue { pid });
        }
        let name = std::str::from_utf8(&value[offset..offset + len - 1])
            .map_err(|_| ParseError::InvalidValue { pid })?;
        names.push(name.to_string());
        offset += (len + 3) & !3;
    }
    Ok(Partition::new(names))
}

struct EndpointCommon {
    guid: Guid,
    topic_name: String,
    type_name: String,
    qos: EndpointQos,
    unicast_locators: Vec<Locator>,
    multicast_locators: Vec<Locator>,
    expects_inline_qos: bool,
    persistence_guid: Option<Guid>,
    key_hash: Option<[u8; 16]>,
}

fn parse_endpoint_common(payload: &[u8]) -> Result<EndpointCommon, ParseError> {
    let mut guid = None;
    let mut topic_name = None;
    let mut type_name = None;
    let mut qos = EndpointQos::default();
    let mut unicast_locators = Vec::new();
    let mut multicast_locators = Vec::new();
    let mut expects_inline_qos = false;
    let mut persistence_guid = None;
    let mut key_hash = None;

    for_each_parameter(payload, |pid, value| {
        match pid {
            PID_ENDPOINT_GUID => guid = Some(decode_guid(pid, value)?),
            PID_TOPIC_NAME => topic_name = Some(decode_string(pid, value)?),
            PID_TYPE_NAME => type_name = Some(decode_string(pid, value)?),
            PID_RELIABILITY => {
                qos.reliability = match decode_u32(pid, value)? {
                    1 => Reliability::BestEffort,
                    2 => Reliability::Reliable,
                    _ => return Err(ParseError::InvalidValue { pid }),
                };
            }
            PID_DURABILITY => {
                qos.durability = match decode_u32(pid, value)? {
                    0 => Durability::Volatile,
                    1 => Durability::TransientLocal,
                    2 => Durability::Transient,
                    3 => Durability::Persistent,
                    _ => return Err(ParseError::InvalidValue { pid }),
                };
            }
            PID_HISTORY => {
                if value.len() < 8 {
                    return Err(ParseError::InvalidValue { pid });
                }
                let kind = u32::from_le_bytes([value[0], value[1], value[2], value[3]]);
                let depth = i32::from_le_bytes([value[4], value[5], value[6], value[7]]);
                qos.history = match kind {
                    0 if depth >= 0 => History::KeepLast(depth as u32),
                    1 => History::KeepAll,
                    _ => return Err(ParseError::InvalidValue { pid }),
                };
            }
            PID_DEADLINE => {
                qos.deadline = Deadline {
                    period: decode_duration(value).ok_or(ParseError::InvalidValue { pid })?,
                };
            }
            PID_OWNERSHIP => {
                qos.ownership = match decode_u32(pid, value)? {
                    0 => Ownership::Shared,
                    1 => Ownership::Exclusive,
                    _ => return Err(ParseError::InvalidValue { pid }),
                };
            }
            PID_LIVELINESS => {
                if value.len() < 12 {
                    return Err(ParseError::InvalidValue { pid });
                }
                let kind = match u32::from_le_bytes([value[0], value[1], value[2], value[3]]) {
                    0 => LivelinessKind::Automatic,
                    1 => LivelinessKind::ManualByParticipant,
                    2 => LivelinessKind::ManualByTopic,
                    _ => return Err(ParseError::InvalidValue { pid }),
                };
                let lease =
                    decode_duration(&value[4..12]).ok_or(ParseError::InvalidValue { pid })?;
                // Announcement period is writer-local; reconstruct the
                // default derivation from the lease.
                qos.liveliness = Liveliness::new(kind, lease);
            }
            PID_PARTITION => qos.partition = decode_partition(pid, value)?,
            PID_UNICAST_LOCATOR => unicast_locators.push(decode_locator(pid, value)?),
            PID_MULTICAST_LOCATOR => multicast_locators.push(decode_locator(pid, value)?),
            PID_EXPECTS_INLINE_QOS => {
                if value.is_empty() {
                    return Err(ParseError::InvalidValue { pid });
                }
                expects_inline_qos = value[0] != 0;
            }
            PID_PERSISTENCE_GUID => persistence_guid = Some(decode_guid(pid, value)?),
            PID_KEY_HASH => {
                if value.len() < 16 {
                    return Err(ParseError::InvalidValue { pid });
                }
                let mut hash = [0u8; 16];
                hash.copy_from_slice(&value[..16]);
                key_hash = Some(hash);
            }
            _ => {}
        }
        Ok(())
    })?;

    let guid = guid.ok_or(ParseError::MissingParameter {
        pid: PID_ENDPOINT_GUID,
    })?;
    let topic_name = topic_name.ok_or(ParseError::MissingParameter {
        pid: PID_TOPIC_NAME,
    })?;
    let type_name = type_name.ok_or(ParseError::MissingParameter { pid: PID_TYPE_NAME })?;

    Ok(EndpointCommon {
        guid,
        topic_name,
        type_name,
        qos,
        unicast_locators,
        multicast_locators,
        expects_inline_qos,
        persistence_guid,
        key_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dds::qos::DURATION_INFINITE;
    use std::net::Ipv4Addr;

    fn writer_sample() -> WriterProxyData {
        let mut data = WriterProxyData::new(
            Guid::new([3; 12], [0, 0, 0x10, 0x02]),
            "sensors/temperature",
            "SensorData",
        );
        data.qos.reliability = Reliability::Reliable;
        data.qos.durability = Durability::TransientLocal;
        data.qos.liveliness = Liveliness::automatic(Duration::from_secs(5));
        data.qos.deadline = Deadline::from_millis(200);
        data.qos.partition = Partition::single("cell_a");
        data.unicast_locators
            .push(Locator::udpv4(Ipv4Addr::new(10, 0, 0, 2), 7411));
        data
    }

    #[test]
    fn test_data_w_roundtrip() {
        let original = writer_sample();
        let parsed =
            WriterProxyData::parse_data_w(&original.build_data_w()).expect("well-formed DATA(w)");
        assert_eq!(parsed.guid, original.guid);
        assert_eq!(parsed.topic_name, "sensors/temperature");
        assert_eq!(parsed.type_name, "SensorData");
        assert_eq!(parsed.qos.reliability, Reliability::Reliable);
        assert_eq!(parsed.qos.durability, Durability::TransientLocal);
        assert_eq!(parsed.qos.liveliness.kind, LivelinessKind::Automatic);
        assert_eq!(
            parsed.qos.liveliness.lease_duration,
            Duration::from_secs(5)
        );
        assert_eq!(parsed.qos.deadline.period, Duration::from_millis(200));
        assert_eq!(parsed.qos.partition, Partition::single("cell_a"));
        assert_eq!(parsed.unicast_locators, original.unicast_locators);
    }

    #[test]
    fn test_data_w_persistence_guid_roundtrip() {
        let mut original = writer_sample();
        original.persistence_guid = Some(Guid::new([9; 12], [0, 0, 0x10, 0x02]));
        let parsed = WriterProxyData::parse_data_w(&original.build_data_w()).expect("parse");
        assert_eq!(parsed.persistence_guid, original.persistence_guid);
    }

    #[test]
    fn test_data_r_roundtrip() {
        let mut original = ReaderProxyData::new(
            Guid::new([4; 12], [0, 0, 0x10, 0x07]),
            "sensors/temperature",
            "SensorData",
        );
        original.expects_inline_qos = true;
        original.qos.reliability = Reliability::Reliable;
        original.qos.history = History::KeepLast(16);
        let parsed =
            ReaderProxyData::parse_data_r(&original.build_data_r()).expect("well-formed DATA(r)");
        assert_eq!(parsed.guid, original.guid);
        assert!(parsed.expects_inline_qos);
        assert_eq!(parsed.qos.history, History::KeepLast(16));
    }

    #[test]
    fn test_missing_topic_name_rejected() {
        let mut writer = ParameterListWriter::new();
        writer.param_guid(PID_ENDPOINT_GUID, &Guid::new([1; 12], [0, 0, 0, 2]));
        let payload = writer.finish();
        assert_eq!(
            WriterProxyData::parse_data_w(&payload).unwrap_err(),
            ParseError::MissingParameter {
                pid: PID_TOPIC_NAME
            }
        );
    }

    #[test]
    fn test_bogus_qos_kind_rejected() {
        let mut original = writer_sample();
        original.qos.partition = Partition::default();
        let mut payload = original.build_data_w();
        // Corrupt the reliability kind to an undefined value.
        let pid_bytes = PID_RELIABILITY.to_le_bytes();
        let pos = payload
            .windows(2)
            .position(|w| w == pid_bytes)
            .expect("reliability present");
        payload[pos + 4] = 0x77;
        assert!(matches!(
            WriterProxyData::parse_data_w(&payload),
            Err(ParseError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_hostile_partition_count_rejected() {
        // Partition parameter claiming 2^31 entries must not allocate.
        let mut value = Vec::new();
        value.extend_from_slice(&0x8000_0000u32.to_le_bytes());
        assert!(decode_partition(PID_PARTITION, &value).is_err());
    }

    #[test]
    fn test_infinite_lease_keeps_infinite_announcement() {
        let mut original = writer_sample();
        original.qos.liveliness = Liveliness::default();
        let parsed = WriterProxyData::parse_data_w(&original.build_data_w()).expect("parse");
        assert!(parsed.qos.liveliness.is_infinite());
        assert_eq!(parsed.qos.liveliness.announcement_period, DURATION_INFINITE);
    }
}
