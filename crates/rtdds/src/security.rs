// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Security plugin seam.
//!
//! Authentication, access control, and cryptographic transforms live in
//! external plugins; what the discovery engines need from them is (a) the
//! participant-level protection attributes that decide whether the secure
//! built-in endpoints exist, and (b) a verdict per discovered built-in
//! endpoint before a secure match is installed. A declined endpoint is not
//! matched and not retried until new credentials arrive.

use crate::builtin::data::{ReaderProxyData, WriterProxyData};
use crate::core::types::Guid;

// Plugin participant attribute bits (DDS-Security v1.1 Sec.8.4.2.5).

pub const PLUGIN_ATTRIBUTES_FLAG_IS_VALID: u64 = 1 << 63;
pub const PLUGIN_ATTRIBUTES_IS_DISCOVERY_ENCRYPTED: u64 = 1 << 0;
pub const PLUGIN_ATTRIBUTES_IS_LIVELINESS_ENCRYPTED: u64 = 1 << 1;

/// Participant-level protection attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParticipantSecurityAttributes {
    /// Discovery traffic (PDP/EDP) goes over the secure built-in endpoints.
    pub is_discovery_protected: bool,
    /// Liveliness traffic (WLP) goes over the secure built-in endpoints.
    pub is_liveliness_protected: bool,
    /// Opaque plugin attribute bitmask, advertised as-is.
    pub plugin_participant_attributes: u64,
}

impl ParticipantSecurityAttributes {
    /// True when any secure built-in endpoint must be created.
    pub fn any_protection(&self) -> bool {
        self.is_discovery_protected || self.is_liveliness_protected
    }
}

/// Verdicts on discovered built-in endpoints.
///
/// Called with the participant discovery mutex held; implementations must
/// not call back into the discovery engines.
pub trait SecurityPlugin: Send + Sync {
    /// May the local secure built-in reader match this discovered writer?
    fn discovered_builtin_writer(
        &self,
        local_reader: Guid,
        remote_participant: Guid,
        writer: &WriterProxyData,
    ) -> bool;

    /// May the local secure built-in writer match this discovered reader?
    fn discovered_builtin_reader(
        &self,
        local_writer: Guid,
        remote_participant: Guid,
        reader: &ReaderProxyData,
    ) -> bool;
}

/// Plugin that accepts every discovered endpoint. Test/default stand-in.
pub struct PermissiveSecurityPlugin;

impl SecurityPlugin for PermissiveSecurityPlugin {
    fn discovered_builtin_writer(&self, _: Guid, _: Guid, _: &WriterProxyData) -> bool {
        true
    }

    fn discovered_builtin_reader(&self, _: Guid, _: Guid, _: &ReaderProxyData) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_protection() {
        let mut attrs = ParticipantSecurityAttributes::default();
        assert!(!attrs.any_protection());
        attrs.is_liveliness_protected = true;
        assert!(attrs.any_protection());
    }

    #[test]
    fn test_permissive_plugin_accepts() {
        let plugin = PermissiveSecurityPlugin;
        let guid = Guid::zero();
        let writer = WriterProxyData::new(guid, "T", "t");
        let reader = ReaderProxyData::new(guid, "T", "t");
        assert!(plugin.discovered_builtin_writer(guid, guid, &writer));
        assert!(plugin.discovered_builtin_reader(guid, guid, &reader));
    }
}
