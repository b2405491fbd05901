// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Built-in endpoint factory.
//!
//! Creates the canonical (writer, writer history, reader, reader history)
//! quadruples for PDP, EDP publications, EDP subscriptions, and WLP, with
//! the reserved entity ids and the fixed built-in QoS contract (RELIABLE,
//! TRANSIENT_LOCAL, keyed). When security is active, a parallel secure
//! quadruple set is created; non-secure and secure endpoints coexist and
//! are selected per-remote from the peer's endpoint bitmask and the
//! security plugin's verdict.
//!
//! Creation is all-or-nothing per subsystem: any failure tears down the
//! siblings already built and aborts participant initialization.

use crate::builtin::endpoint::{BuiltinReader, BuiltinWriter};
use crate::config::RtpsConfig;
use crate::core::cache::{HistoryAttributes, BUILTIN_DATA_MAX_SIZE};
use crate::core::types::entity_ids::{
    BUILTIN_ENDPOINT_SET_DEFAULT, BUILTIN_ENDPOINT_SET_SECURE, ENTITYID_READER_LIVELINESS,
    ENTITYID_READER_LIVELINESS_SECURE, ENTITYID_SEDP_PUBLICATIONS_READER,
    ENTITYID_SEDP_PUBLICATIONS_SECURE_READER, ENTITYID_SEDP_PUBLICATIONS_SECURE_WRITER,
    ENTITYID_SEDP_PUBLICATIONS_WRITER, ENTITYID_SEDP_SUBSCRIPTIONS_READER,
    ENTITYID_SEDP_SUBSCRIPTIONS_SECURE_READER, ENTITYID_SEDP_SUBSCRIPTIONS_SECURE_WRITER,
    ENTITYID_SEDP_SUBSCRIPTIONS_WRITER, ENTITYID_SPDP_READER, ENTITYID_SPDP_SECURE_READER,
    ENTITYID_SPDP_SECURE_WRITER, ENTITYID_SPDP_WRITER, ENTITYID_WRITER_LIVELINESS,
    ENTITYID_WRITER_LIVELINESS_SECURE,
};
use crate::core::types::{EntityId, Guid, GuidPrefix};
use crate::dds::{Error, Result};
use crate::transport::MetatrafficSend;
use parking_lot::Mutex;
use std::sync::Arc;

/// One built-in writer/reader pair with their embedded histories.
///
/// Endpoint locks are always acquired AFTER the participant discovery
/// mutex when both are needed.
pub struct BuiltinEndpointPair {
    pub writer: Mutex<BuiltinWriter>,
    pub reader: Mutex<BuiltinReader>,
}

/// The full set of built-in endpoints of one participant.
pub struct BuiltinEndpoints {
    pub pdp: BuiltinEndpointPair,
    pub edp_publications: BuiltinEndpointPair,
    pub edp_subscriptions: BuiltinEndpointPair,
    pub wlp: BuiltinEndpointPair,
    /// Secure quadruples, present only when security is active.
    pub secure: Option<SecureBuiltinEndpoints>,
    /// BuiltinEndpointSet_t advertised in DATA(p).
    pub available_mask: u32,
}

/// Secure counterparts with the reserved secure entity ids.
pub struct SecureBuiltinEndpoints {
    pub pdp: BuiltinEndpointPair,
    pub edp_publications: BuiltinEndpointPair,
    pub edp_subscriptions: BuiltinEndpointPair,
    pub wlp: BuiltinEndpointPair,
}

/// Built-in endpoint factory.
pub struct BuiltinEndpointFactory;

impl BuiltinEndpointFactory {
    /// Create every built-in endpoint of a participant.
    ///
    /// # Errors
    /// `Error::EndpointCreation` when any history attribute set is invalid.
    /// Siblings already allocated are dropped; the participant then aborts
    /// initialization (FatalInit policy).
    pub fn create(
        guid_prefix: GuidPrefix,
        config: &RtpsConfig,
        transport: Arc<dyn MetatrafficSend>,
    ) -> Result<BuiltinEndpoints> {
        crate::trace_fn!("BuiltinEndpointFactory::create");
        let asynchronous = config.throughput_controller.is_enabled();

        let pdp = Self::create_pair(
            guid_prefix,
            ENTITYID_SPDP_WRITER,
            ENTITYID_SPDP_READER,
            Arc::clone(&transport),
            asynchronous,
            // PDP readers bootstrap discovery from unknown writers.
            true,
        )?;
        let edp_publications = Self::create_pair(
            guid_prefix,
            ENTITYID_SEDP_PUBLICATIONS_WRITER,
            ENTITYID_SEDP_PUBLICATIONS_READER,
            Arc::clone(&transport),
            asynchronous,
            false,
        )?;
        let edp_subscriptions = Self::create_pair(
            guid_prefix,
            ENTITYID_SEDP_SUBSCRIPTIONS_WRITER,
            ENTITYID_SEDP_SUBSCRIPTIONS_READER,
            Arc::clone(&transport),
            asynchronous,
            false,
        )?;
        let wlp = Self::create_pair(
            guid_prefix,
            ENTITYID_WRITER_LIVELINESS,
            ENTITYID_READER_LIVELINESS,
            Arc::clone(&transport),
            asynchronous,
            false,
        )?;

        let mut available_mask = BUILTIN_ENDPOINT_SET_DEFAULT;
        let secure = match &config.security {
            Some(attrs) if attrs.any_protection() => {
                available_mask |= BUILTIN_ENDPOINT_SET_SECURE;
                Some(SecureBuiltinEndpoints {
                    pdp: Self::create_pair(
                        guid_prefix,
                        ENTITYID_SPDP_SECURE_WRITER,
                        ENTITYID_SPDP_SECURE_READER,
                        Arc::clone(&transport),
                        asynchronous,
                        false,
                    )?,
                    edp_publications: Self::create_pair(
                        guid_prefix,
                        ENTITYID_SEDP_PUBLICATIONS_SECURE_WRITER,
                        ENTITYID_SEDP_PUBLICATIONS_SECURE_READER,
                        Arc::clone(&transport),
                        asynchronous,
                        false,
                    )?,
                    edp_subscriptions: Self::create_pair(
                        guid_prefix,
                        ENTITYID_SEDP_SUBSCRIPTIONS_SECURE_WRITER,
                        ENTITYID_SEDP_SUBSCRIPTIONS_SECURE_READER,
                        Arc::clone(&transport),
                        asynchronous,
                        false,
                    )?,
                    wlp: Self::create_pair(
                        guid_prefix,
                        ENTITYID_WRITER_LIVELINESS_SECURE,
                        ENTITYID_READER_LIVELINESS_SECURE,
                        Arc::clone(&transport),
                        asynchronous,
                        false,
                    )?,
                })
            }
            _ => None,
        };

        log::debug!(
            "[builtin-factory] endpoints created for {:02x?} (mask=0x{:08x}, async={}, secure={})",
            guid_prefix,
            available_mask,
            asynchronous,
            secure.is_some()
        );

        Ok(BuiltinEndpoints {
            pdp,
            edp_publications,
            edp_subscriptions,
            wlp,
            secure,
            available_mask,
        })
    }

    fn create_pair(
        guid_prefix: GuidPrefix,
        writer_entity: EntityId,
        reader_entity: EntityId,
        transport: Arc<dyn MetatrafficSend>,
        asynchronous: bool,
        reader_accepts_unmatched: bool,
    ) -> Result<BuiltinEndpointPair> {
        let writer_attrs = HistoryAttributes::builtin_writer();
        let reader_attrs = HistoryAttributes::builtin_reader();
        Self::validate_attributes(&writer_attrs, writer_entity)?;
        Self::validate_attributes(&reader_attrs, reader_entity)?;

        let writer = BuiltinWriter::new(
            Guid::new(guid_prefix, writer_entity),
            writer_attrs,
            Arc::clone(&transport),
            asynchronous,
        );
        let reader = BuiltinReader::new(
            Guid::new(guid_prefix, reader_entity),
            reader_attrs,
            transport,
            reader_accepts_unmatched,
        );
        Ok(BuiltinEndpointPair {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    fn validate_attributes(attrs: &HistoryAttributes, entity: EntityId) -> Result<()> {
        if attrs.maximum_reserved_caches == 0
            || attrs.initial_reserved_caches > attrs.maximum_reserved_caches
            || attrs.payload_max_size < BUILTIN_DATA_MAX_SIZE
        {
            return Err(Error::EndpointCreation(format!(
                "invalid history attributes for entity {:02x?}",
                entity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::ParticipantSecurityAttributes;
    use crate::transport::MemTransport;

    fn transport() -> Arc<dyn MetatrafficSend> {
        Arc::new(MemTransport::hub().attach())
    }

    #[test]
    fn test_create_default_set() {
        let endpoints =
            BuiltinEndpointFactory::create([1; 12], &RtpsConfig::default(), transport())
                .expect("factory succeeds");
        assert!(endpoints.secure.is_none());
        assert_eq!(endpoints.available_mask, BUILTIN_ENDPOINT_SET_DEFAULT);

        // Reserved entity ids are wired verbatim.
        assert_eq!(
            endpoints.pdp.writer.lock().guid().entity_id,
            ENTITYID_SPDP_WRITER
        );
        assert_eq!(
            endpoints.edp_publications.reader.lock().guid().entity_id,
            ENTITYID_SEDP_PUBLICATIONS_READER
        );
        assert_eq!(
            endpoints.wlp.writer.lock().guid().entity_id,
            ENTITYID_WRITER_LIVELINESS
        );
    }

    #[test]
    fn test_create_secure_set_when_protected() {
        let config = RtpsConfig {
            security: Some(ParticipantSecurityAttributes {
                is_discovery_protected: true,
                is_liveliness_protected: true,
                plugin_participant_attributes: 0,
            }),
            ..RtpsConfig::default()
        };
        let endpoints =
            BuiltinEndpointFactory::create([1; 12], &config, transport()).expect("factory");
        let secure = endpoints.secure.as_ref().expect("secure quadruples");
        assert_eq!(
            secure.wlp.writer.lock().guid().entity_id,
            ENTITYID_WRITER_LIVELINESS_SECURE
        );
        assert_eq!(
            endpoints.available_mask,
            BUILTIN_ENDPOINT_SET_DEFAULT | BUILTIN_ENDPOINT_SET_SECURE
        );
    }

    #[test]
    fn test_security_attrs_without_protection_skip_secure_set() {
        let config = RtpsConfig {
            security: Some(ParticipantSecurityAttributes::default()),
            ..RtpsConfig::default()
        };
        let endpoints =
            BuiltinEndpointFactory::create([1; 12], &config, transport()).expect("factory");
        assert!(endpoints.secure.is_none());
        assert_eq!(endpoints.available_mask, BUILTIN_ENDPOINT_SET_DEFAULT);
    }

    #[test]
    fn test_async_mode_follows_throughput_controller() {
        let config = RtpsConfig {
            throughput_controller: crate::config::ThroughputController {
                bytes_per_period: 32 * 1024,
                period_millisecs: 50,
            },
            ..RtpsConfig::default()
        };
        let endpoints =
            BuiltinEndpointFactory::create([1; 12], &config, transport()).expect("factory");
        assert!(endpoints.pdp.writer.lock().is_asynchronous());
        assert!(endpoints.wlp.writer.lock().is_asynchronous());
    }

    #[test]
    fn test_invalid_attributes_rejected() {
        let bad = HistoryAttributes {
            initial_reserved_caches: 10,
            maximum_reserved_caches: 5,
            payload_max_size: BUILTIN_DATA_MAX_SIZE,
        };
        assert!(
            BuiltinEndpointFactory::validate_attributes(&bad, ENTITYID_SPDP_WRITER).is_err()
        );
    }
}
