// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire descriptors for the built-in topics.
//!
//! DATA(p), DATA(w), DATA(r) parameter lists and the WLP assertion payload.
//! Topic names follow DDS v1.4 Sec.2.2.5: `DCPSParticipant`,
//! `DCPSPublication`, `DCPSSubscription`, `DCPSParticipantMessage`, plus
//! their `Secure` counterparts.

pub mod endpoint_proxy;
pub mod parameter;
pub mod participant_message;
pub mod participant_proxy;

pub use endpoint_proxy::{ReaderProxyData, WriterProxyData};
pub use parameter::ParseError;
pub use participant_message::ParticipantMessageData;
pub use participant_proxy::ParticipantProxyData;

// Built-in topic names (DDS v1.4 Sec.2.2.5, DDS-Security v1.1 Sec.7.4).

pub const TOPIC_PARTICIPANT: &str = "DCPSParticipant";
pub const TOPIC_PUBLICATION: &str = "DCPSPublication";
pub const TOPIC_SUBSCRIPTION: &str = "DCPSSubscription";
pub const TOPIC_PARTICIPANT_MESSAGE: &str = "DCPSParticipantMessage";
pub const TOPIC_PARTICIPANT_SECURE: &str = "DCPSParticipantsSecure";
pub const TOPIC_PUBLICATION_SECURE: &str = "DCPSPublicationsSecure";
pub const TOPIC_SUBSCRIPTION_SECURE: &str = "DCPSSubscriptionsSecure";
pub const TOPIC_PARTICIPANT_MESSAGE_SECURE: &str = "DCPSParticipantMessageSecure";
