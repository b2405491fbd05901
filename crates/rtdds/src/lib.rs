// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # RTDDS - RTPS built-in discovery and liveliness engine
//!
//! A pure Rust implementation of the RTPS (Real-Time Publish-Subscribe)
//! built-in protocols: participant discovery (PDP, simple and server
//! variants), endpoint discovery and matching (EDP), and the writer
//! liveliness protocol (WLP).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtdds::{MemTransport, Participant, RtpsConfig, Result};
//!
//! fn main() -> Result<()> {
//!     let bus = MemTransport::hub();
//!     let participant = Participant::new(RtpsConfig::default(), bus.attach())?;
//!
//!     // Discovery runs in the background; local endpoints are advertised
//!     // through EDP and matched against remote ones as they are learned.
//!     participant.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +------------------------------------------------------------------+
//! |                        Participant                               |
//! |   config | GUID | timer driver | metatraffic receive thread      |
//! +------------------------------------------------------------------+
//! |                     Discovery Engines                            |
//! |   PDP (simple/server) -> Proxy Store -> EDP matching -> WLP      |
//! +------------------------------------------------------------------+
//! |                   Built-in Endpoint Layer                        |
//! |   reliable transient-local writer/reader pairs + histories       |
//! +------------------------------------------------------------------+
//! |                     Metatraffic Transport                        |
//! |   locator-addressed message bus (in-process hub provided)        |
//! +------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`discovery`] - PDP engines and the participant proxy store
//! - [`builtin`] - built-in endpoints, factory, and wire descriptors
//! - [`liveliness`] - WLP engine and liveliness managers
//! - [`dds`] - error type and the QoS policies discovery reasons about
//! - [`transport`] - metatraffic seam and the in-process hub
//!
//! ## See Also
//!
//! - [RTPS Specification](https://www.omg.org/spec/DDSI-RTPS/2.2/)
//! - [DDS Specification](https://www.omg.org/spec/DDS/1.4/)
//! - [DDS Security](https://www.omg.org/spec/DDS-SECURITY/1.1/)

// Clippy: No blanket suppressions. Fix issues properly or use inline #[allow] with justification.

/// Built-in endpoint layer (factory, stateful writer/reader, wire descriptors).
pub mod builtin;
/// Global configuration (RTPS constants, port mapping, discovery settings).
pub mod config;
/// Core RTPS vocabulary types (GUID, locators, cache changes, timers).
pub mod core;
/// Error type and QoS policy definitions.
pub mod dds;
/// Participant discovery (PDP simple/server) and endpoint discovery (EDP).
pub mod discovery;
/// Writer Liveliness Protocol engine.
pub mod liveliness;
/// Function-entry trace macro (no-op unless the `trace` feature is on).
pub mod logging;
/// Participant assembly: wires engines, endpoints, and timers together.
pub mod participant;
/// Security plugin seam (verdicts on discovered built-in endpoints).
pub mod security;
/// Metatraffic transport seam and the in-process hub implementation.
pub mod transport;

pub use config::RtpsConfig;
pub use dds::{Error, Result};
pub use participant::Participant;
pub use transport::MemTransport;
