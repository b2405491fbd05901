// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ParticipantMessageData: the WLP assertion payload.
//!
//! Carried on the DCPSParticipantMessage built-in topic (RTPS v2.2
//! Sec.8.4.13): the asserting participant's GUID prefix, a 4-octet kind,
//! and an opaque body. One AUTOMATIC sample renews liveliness for every
//! AUTOMATIC writer under that participant; same for MANUAL_BY_PARTICIPANT.
//! Plain CDR little-endian, not a parameter list.

use crate::builtin::data::parameter::ParseError;
use crate::core::types::{GuidPrefix, InstanceHandle};
use crate::dds::qos::LivelinessKind;

/// Kind octets (RTPS v2.2 Sec.9.6.2.1).
pub const KIND_AUTOMATIC: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
pub const KIND_MANUAL_BY_PARTICIPANT: [u8; 4] = [0x00, 0x00, 0x00, 0x02];

/// CDR_LE encapsulation for the plain-CDR WLP payload.
const ENCAPSULATION_CDR_LE: [u8; 4] = [0x00, 0x01, 0x00, 0x00];

/// One liveliness assertion sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantMessageData {
    pub guid_prefix: GuidPrefix,
    pub kind: [u8; 4],
    pub data: Vec<u8>,
}

impl ParticipantMessageData {
    /// Assertion for every writer of `kind` under the given participant.
    pub fn assertion(guid_prefix: GuidPrefix, kind: LivelinessKind) -> Option<Self> {
        let kind = match kind {
            LivelinessKind::Automatic => KIND_AUTOMATIC,
            LivelinessKind::ManualByParticipant => KIND_MANUAL_BY_PARTICIPANT,
            // MANUAL_BY_TOPIC never flows through the WLP endpoints; those
            // writers assert through their own data path.
            LivelinessKind::ManualByTopic => return None,
        };
        Some(Self {
            guid_prefix,
            kind,
            data: Vec::new(),
        })
    }

    /// Liveliness kind this sample renews, if it is an assertion.
    pub fn liveliness_kind(&self) -> Option<LivelinessKind> {
        match self.kind {
            KIND_AUTOMATIC => Some(LivelinessKind::Automatic),
            KIND_MANUAL_BY_PARTICIPANT => Some(LivelinessKind::ManualByParticipant),
            _ => None,
        }
    }

    /// Instance handle: (prefix, kind) pair padded to 16 bytes, so the two
    /// assertion kinds of one participant are distinct keyed instances.
    pub fn key(&self) -> InstanceHandle {
        let mut handle = [0u8; 16];
        handle[0..12].copy_from_slice(&self.guid_prefix);
        handle[12..16].copy_from_slice(&self.kind);
        handle
    }

    /// Serialize (CDR_LE).
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 12 + 4 + 4 + self.data.len());
        out.extend_from_slice(&ENCAPSULATION_CDR_LE);
        out.extend_from_slice(&self.guid_prefix);
        out.extend_from_slice(&self.kind);
        out.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Deserialize.
    ///
    /// # Errors
    /// `ParseError` on truncation or a body length that overruns the buffer;
    /// the sample is dropped, the sender is left alone.
    pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
        if payload.len() < 4 + 12 + 4 + 4 {
            return Err(ParseError::Truncated);
        }
        if payload[0..2] != ENCAPSULATION_CDR_LE[0..2] {
            return Err(ParseError::BadEncapsulation);
        }
        let mut guid_prefix = [0u8; 12];
        guid_prefix.copy_from_slice(&payload[4..16]);
        let mut kind = [0u8; 4];
        kind.copy_from_slice(&payload[16..20]);
        let len = u32::from_le_bytes([payload[20], payload[21], payload[22], payload[23]]) as usize;
        if payload.len() < 24 + len {
            return Err(ParseError::Truncated);
        }
        Ok(Self {
            guid_prefix,
            kind,
            data: payload[24..24 + len].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assertion_kinds() {
        let auto = ParticipantMessageData::assertion([1; 12], LivelinessKind::Automatic)
            .expect("automatic maps to a wire kind");
        assert_eq!(auto.kind, KIND_AUTOMATIC);
        assert_eq!(auto.liveliness_kind(), Some(LivelinessKind::Automatic));

        let manual =
            ParticipantMessageData::assertion([1; 12], LivelinessKind::ManualByParticipant)
                .expect("manual-by-participant maps to a wire kind");
        assert_eq!(manual.kind, KIND_MANUAL_BY_PARTICIPANT);

        assert!(
            ParticipantMessageData::assertion([1; 12], LivelinessKind::ManualByTopic).is_none()
        );
    }

    #[test]
    fn test_serialize_roundtrip() {
        let original = ParticipantMessageData {
            guid_prefix: [0xab; 12],
            kind: KIND_AUTOMATIC,
            data: vec![1, 2, 3],
        };
        let parsed = ParticipantMessageData::parse(&original.serialize()).expect("roundtrip");
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_key_distinguishes_kinds() {
        let auto = ParticipantMessageData::assertion([5; 12], LivelinessKind::Automatic).unwrap();
        let manual =
            ParticipantMessageData::assertion([5; 12], LivelinessKind::ManualByParticipant)
                .unwrap();
        assert_ne!(auto.key(), manual.key());
        assert_eq!(auto.key()[0..12], [5; 12]);
    }

    #[test]
    fn test_parse_truncated_rejected() {
        let payload = ParticipantMessageData {
            guid_prefix: [0; 12],
            kind: KIND_AUTOMATIC,
            data: vec![0; 8],
        }
        .serialize();
        assert!(ParticipantMessageData::parse(&payload[..20]).is_err());
        // Body length overrunning the buffer is also rejected.
        let mut lying = payload.clone();
        lying[20] = 0xff;
        assert_eq!(
            ParticipantMessageData::parse(&lying),
            Err(ParseError::Truncated)
        );
    }

    #[test]
    fn test_unknown_kind_is_not_assertion() {
        let msg = ParticipantMessageData {
            guid_prefix: [0; 12],
            kind: [0, 0, 0x80, 0x01],
            data: vec![],
        };
        assert_eq!(msg.liveliness_kind(), None);
    }
}
