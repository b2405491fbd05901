// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server variant of the PDP engine (mediated discovery).
//!
//! A discovery server relays client DATA(p) through its own PDP writer
//! history so clients attached to it learn each other, keeps relayed
//! samples until every matched client acknowledged them, and gates EDP
//! matching of clients behind a two-phase synchronization with the rest of
//! the server fleet:
//!
//! - **Phase 1**: resend the local DATA(p) until every known server both
//!   acknowledged it on the reliable writer and echoed us in its own
//!   DATA(p) stream.
//! - **Phase 2**: hold client participants in the pending set (`p2match`)
//!   until this server's view covers every other server, then run their
//!   deferred EDP matching.
//!
//! The server may persist its PDP writer history (one file per server
//! GUID) and recover the fleet view across restarts.

use crate::builtin::data::ParticipantProxyData;
use crate::core::cache::{CacheChange, ChangeKind};
use crate::core::rt::CancelToken;
use crate::core::types::entity_ids::ENTITYID_SPDP_READER;
use crate::core::types::{Guid, GuidPrefix, InstanceHandle};
use crate::dds::qos::Durability;
use crate::dds::{Error, Result};
use crate::discovery::{edp, pdp, DiscoveryContext, DiscoveryState};
use crate::config::DiscoveryProtocol;
use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Period of the server synchronization event (resend, gating, trim).
pub const SERVER_SYNC_PERIOD: Duration = Duration::from_millis(450);

const PERSISTENCE_MAGIC: &[u8; 8] = b"RTDDSPDP";

/// Server-side PDP state, guarded by the participant discovery mutex.
pub struct ServerState {
    /// Clients whose EDP matching is deferred until the view converges.
    pub p2match: HashSet<GuidPrefix>,
    /// Instance handles flagged for removal from the writer history once
    /// every matched client acknowledged the corresponding changes.
    pub demises: HashSet<InstanceHandle>,
    /// TRANSIENT persists the writer history, TRANSIENT_LOCAL does not.
    pub durability: Durability,
    pub persistence_path: PathBuf,
    pub(crate) sync_token: Option<CancelToken>,
}

impl ServerState {
    /// True while trimming still has work to do.
    pub fn pending_history_cleaning(&self) -> bool {
        !self.demises.is_empty()
    }
}

/// Persistence file name, derived from the server GUID prefix.
pub fn persistence_file_name(prefix: &GuidPrefix) -> String {
    let hex: String = prefix.iter().map(|b| format!("{:02x}", b)).collect();
    format!("pdp-server-{}.db", hex)
}

/// Set up the server state; loads the persisted history when the
/// configured durability asks for it, then starts the sync event.
pub(crate) fn init_server_state(
    ctx: &Arc<DiscoveryContext>,
    state: &mut DiscoveryState,
) -> Result<()> {
    crate::trace_fn!("server::init_server_state");
    let (durability, persistence_dir) = match &ctx.config.discovery_protocol {
        DiscoveryProtocol::Server {
            durability,
            persistence_dir,
            ..
        } => (*durability, persistence_dir.clone()),
        _ => {
            return Err(Error::InvalidState(
                "server state requested for a non-server participant".to_string(),
            ))
        }
    };
    let persistence_path =
        persistence_dir.join(persistence_file_name(&state.store.local_prefix()));

    state.pdp.server = Some(ServerState {
        p2match: HashSet::new(),
        demises: HashSet::new(),
        durability,
        persistence_path,
        sync_token: None,
    });

    if durability == Durability::Transient {
        recover_history(ctx, state)?;
    }
    let token = schedule_sync(ctx);
    if let Some(server) = state.pdp.server.as_mut() {
        server.sync_token = Some(token);
    }
    Ok(())
}

// ===== Synchronization event (DServer-style) =====

/// Arm the next sync firing. Never touches the discovery state itself, so
/// it is safe to call with the participant mutex held; the caller stores
/// the returned token.
fn schedule_sync(ctx: &Arc<DiscoveryContext>) -> CancelToken {
    let weak: Weak<DiscoveryContext> = Arc::downgrade(ctx);
    ctx.driver.schedule_after(
        SERVER_SYNC_PERIOD,
        Box::new(move || {
            let Some(ctx) = weak.upgrade() else { return };
            on_sync_tick(&ctx);
            let token = schedule_sync(&ctx);
            let mut state = ctx.state.lock();
            match state.pdp.server.as_mut() {
                Some(server) => server.sync_token = Some(token),
                None => token.cancel(),
            }
        }),
    )
}

/// One pass of the server synchronization machine.
pub(crate) fn on_sync_tick(ctx: &Arc<DiscoveryContext>) {
    crate::trace_fn!("server::on_sync_tick");
    let mut state = ctx.state.lock();
    if state.pdp.server.is_none() {
        return;
    }

    // Phase 1: keep resending our DATA(p) until the fleet holds it.
    let phase1_done = all_servers_acknowledge_pdp(ctx, &state);
    if !phase1_done {
        if let Err(err) = pdp::announce_participant_state(ctx, &mut state, false, false) {
            log::debug!("[PDP-SERVER] convergence resend failed: {}", err);
        }
    }

    // Phase 2: release gated clients once the view covers the fleet.
    if phase1_done && is_all_servers_pdp_updated(ctx, &state) {
        if let Some(sync) = state.pdp.sync.as_mut() {
            if !sync.converged {
                log::debug!("[PDP-SERVER] fleet view converged");
                sync.converged = true;
            }
        }
        match_all_clients_edp_endpoints(ctx, &mut state);
    }

    trim_writer_history(ctx, &mut state);
}

/// Phase-1 check: every configured server acknowledged our DATA(p) on the
/// reliable writer AND echoed us through its own announcements.
pub(crate) fn all_servers_acknowledge_pdp(
    ctx: &DiscoveryContext,
    state: &DiscoveryState,
) -> bool {
    let servers = ctx.config.known_servers();
    if servers.is_empty() {
        return true;
    }
    let local_key = state.store.local().key();
    let writer = ctx.endpoints.pdp.writer.lock();
    let Some(seq) = writer
        .history()
        .latest_change_for_instance(&local_key)
        .map(|c| c.sequence_number)
    else {
        return false;
    };
    let echoed = state
        .pdp
        .sync
        .as_ref()
        .map(|s| s.echoed_by.clone())
        .unwrap_or_default();
    servers.iter().all(|srv| {
        writer.change_acked_by(&Guid::new(srv.guid_prefix, ENTITYID_SPDP_READER), seq)
            && echoed.contains(&srv.guid_prefix)
    })
}

/// Phase-2 check: every configured server is present and alive in our view.
pub(crate) fn is_all_servers_pdp_updated(ctx: &DiscoveryContext, state: &DiscoveryState) -> bool {
    ctx.config.known_servers().iter().all(|srv| {
        state
            .store
            .lookup(&srv.guid_prefix)
            .map(|p| p.is_alive)
            .unwrap_or(false)
    })
}

/// Run the deferred EDP matching for every pending client.
pub(crate) fn match_all_clients_edp_endpoints(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
) {
    let pending: Vec<GuidPrefix> = match state.pdp.server.as_mut() {
        Some(server) => server.p2match.drain().collect(),
        None => return,
    };
    for prefix in pending {
        log::debug!("[PDP-SERVER] releasing EDP matching for {:02x?}", prefix);
        edp::match_participant_endpoints(ctx, state, &prefix);
    }
}

// ===== PDP hook-ins =====

/// New participant seen by a server.
pub(crate) fn on_participant_discovered(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    ppd: &ParticipantProxyData,
    change: &CacheChange,
) {
    crate::trace_fn!("server::on_participant_discovered");
    // The writer history is the fleet directory: every participant's
    // DATA(p) is republished, servers included (that is how a fellow
    // server sees its own data echoed, completing phase 1 on its side).
    add_relayed_change_to_history(ctx, change);
    if ppd.is_server_peer {
        // Fellow servers are never gated.
        edp::match_participant_endpoints(ctx, state, &ppd.guid_prefix());
    } else {
        if let Some(server) = state.pdp.server.as_mut() {
            server.p2match.insert(ppd.guid_prefix());
            // A rejoining participant reuses its GUID-derived instance
            // handle; it must stop being a trim candidate.
            server.demises.remove(&ppd.key());
        }
        // A lone server (no fleet) has nothing to wait for.
        if all_servers_acknowledge_pdp(ctx, state) && is_all_servers_pdp_updated(ctx, state) {
            match_all_clients_edp_endpoints(ctx, state);
        }
    }
    persist(ctx, state);
}

/// Unchanged refresh heard directly from the origin: relay it so the
/// clients behind this server keep renewing the origin's lease.
pub(crate) fn on_participant_refreshed(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    _prefix: &GuidPrefix,
    change: &CacheChange,
) {
    add_relayed_change_to_history(ctx, change);
    persist(ctx, state);
}

/// Known participant refreshed: relay the newer sample onward.
pub(crate) fn on_participant_updated(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    _ppd: &ParticipantProxyData,
    change: &CacheChange,
) {
    add_relayed_change_to_history(ctx, change);
    persist(ctx, state);
}

/// Participant demised (dispose or lease): flag its relayed changes for
/// deferred trimming. A participant demised while still pending EDP
/// matching is dropped from the pending set and never matched.
pub(crate) fn on_participant_removed(
    ctx: &DiscoveryContext,
    state: &mut DiscoveryState,
    ppd: &ParticipantProxyData,
) {
    crate::trace_fn!("server::on_participant_removed");
    if let Some(server) = state.pdp.server.as_mut() {
        server.p2match.remove(&ppd.guid_prefix());
        server.demises.insert(ppd.key());
    }
    persist(ctx, state);
}

/// Republish a client's DATA(p) through our own PDP writer so the other
/// attached clients (and servers) learn the newcomer.
pub(crate) fn add_relayed_change_to_history(ctx: &DiscoveryContext, change: &CacheChange) {
    let mut writer = ctx.endpoints.pdp.writer.lock();
    match writer.add_relayed_change(change) {
        Ok(seq) => {
            log::debug!(
                "[PDP-SERVER] relayed DATA(p) for {:02x?} as seq {}",
                change.instance_handle,
                seq
            );
        }
        Err(err) => {
            log::warn!("[PDP-SERVER] relay failed: {}", err);
        }
    }
}

/// Deferred history trimming.
///
/// Removes every writer-history change whose instance handle is on the
/// demise list once the full matched-client set acknowledged it. Returns
/// true when nothing is left pending.
pub(crate) fn trim_writer_history(ctx: &DiscoveryContext, state: &mut DiscoveryState) -> bool {
    let demises: Vec<InstanceHandle> = match state.pdp.server.as_ref() {
        Some(server) if !server.demises.is_empty() => server.demises.iter().copied().collect(),
        Some(_) => return true,
        None => return true,
    };

    let mut fully_trimmed: Vec<InstanceHandle> = Vec::new();
    let mut mutated = false;
    {
        let mut writer = ctx.endpoints.pdp.writer.lock();
        for handle in &demises {
            let candidates: Vec<_> = writer
                .history()
                .changes()
                .filter(|c| &c.instance_handle == handle)
                .map(|c| c.sequence_number)
                .collect();
            let mut remaining = candidates.len();
            for seq in candidates {
                if writer.change_acked_by_all(seq) {
                    writer.remove_change(seq);
                    remaining -= 1;
                    mutated = true;
                }
            }
            if remaining == 0 {
                fully_trimmed.push(*handle);
            }
        }
    }

    let done = {
        let server = state
            .pdp
            .server
            .as_mut()
            .expect("server state checked above");
        for handle in fully_trimmed {
            server.demises.remove(&handle);
        }
        server.demises.is_empty()
    };
    if mutated {
        persist(ctx, state);
    }
    done
}

/// Hook run after every local announcement so the persisted history stays
/// in step with the writer history.
pub(crate) fn after_local_announcement(ctx: &DiscoveryContext, state: &mut DiscoveryState) {
    if state.pdp.server.is_some() {
        persist(ctx, state);
    }
}

// ===== Persistence =====

/// Write the PDP writer history to the per-GUID file (TRANSIENT only).
pub(crate) fn persist(ctx: &DiscoveryContext, state: &mut DiscoveryState) {
    let Some(server) = state.pdp.server.as_ref() else {
        return;
    };
    if server.durability != Durability::Transient {
        return;
    }
    let path = server.persistence_path.clone();
    let writer = ctx.endpoints.pdp.writer.lock();
    if let Err(err) = write_history_file(&path, writer.history().changes()) {
        log::warn!(
            "[PDP-SERVER] persisting history to {} failed: {}",
            path.display(),
            err
        );
    }
}

fn write_history_file<'a>(
    path: &PathBuf,
    changes: impl Iterator<Item = &'a CacheChange>,
) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut buf = Vec::new();
    buf.extend_from_slice(PERSISTENCE_MAGIC);
    let changes: Vec<_> = changes.collect();
    buf.extend_from_slice(&(changes.len() as u32).to_le_bytes());
    for change in changes {
        buf.extend_from_slice(&change.sequence_number.to_le_bytes());
        buf.push(match change.kind {
            ChangeKind::Alive => 0,
            ChangeKind::NotAliveDisposed => 1,
            ChangeKind::NotAliveUnregistered => 2,
            ChangeKind::NotAliveDisposedUnregistered => 3,
        });
        buf.extend_from_slice(&change.instance_handle);
        buf.extend_from_slice(&(change.serialized_payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&change.serialized_payload);
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

fn read_history_file(path: &PathBuf, writer_guid: Guid) -> std::io::Result<Vec<CacheChange>> {
    let mut bytes = Vec::new();
    std::fs::File::open(path)?.read_to_end(&mut bytes)?;

    let bad = |msg: &str| std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string());
    if bytes.len() < 12 || &bytes[0..8] != PERSISTENCE_MAGIC {
        return Err(bad("bad persistence header"));
    }
    let count = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let mut changes = Vec::with_capacity(count.min(1024));
    let mut offset = 12;
    for _ in 0..count {
        if offset + 8 + 1 + 16 + 4 > bytes.len() {
            return Err(bad("truncated record header"));
        }
        let sequence_number = i64::from_le_bytes(
            bytes[offset..offset + 8]
                .try_into()
                .expect("slice length fixed above"),
        );
        offset += 8;
        let kind = match bytes[offset] {
            0 => ChangeKind::Alive,
            1 => ChangeKind::NotAliveDisposed,
            2 => ChangeKind::NotAliveUnregistered,
            3 => ChangeKind::NotAliveDisposedUnregistered,
            _ => return Err(bad("unknown change kind")),
        };
        offset += 1;
        let mut instance_handle = [0u8; 16];
        instance_handle.copy_from_slice(&bytes[offset..offset + 16]);
        offset += 16;
        let len = u32::from_le_bytes(
            bytes[offset..offset + 4]
                .try_into()
                .expect("slice length fixed above"),
        ) as usize;
        offset += 4;
        if offset + len > bytes.len() {
            return Err(bad("truncated record payload"));
        }
        changes.push(CacheChange {
            kind,
            writer_guid,
            instance_handle,
            sequence_number,
            serialized_payload: bytes[offset..offset + len].to_vec(),
        });
        offset += len;
    }
    Ok(changes)
}

/// Recover the persisted history and the fleet view it encodes.
fn recover_history(ctx: &DiscoveryContext, state: &mut DiscoveryState) -> Result<()> {
    let path = state
        .pdp
        .server
        .as_ref()
        .expect("caller checked server state")
        .persistence_path
        .clone();
    if !path.exists() {
        return Ok(());
    }
    let writer_guid = ctx.endpoints.pdp.writer.lock().guid();
    let changes = match read_history_file(&path, writer_guid) {
        Ok(changes) => changes,
        Err(err) => {
            log::warn!(
                "[PDP-SERVER] discarding unreadable persistence file {}: {}",
                path.display(),
                err
            );
            return Ok(());
        }
    };
    log::debug!(
        "[PDP-SERVER] recovered {} changes from {}",
        changes.len(),
        path.display()
    );

    let local_key = state.store.local().key();
    {
        // Our own stale announcements are not restored: a fresh DATA(p)
        // with a later sequence number goes out right after enable.
        let mut writer = ctx.endpoints.pdp.writer.lock();
        for change in &changes {
            writer.history_restore(change.clone());
            if change.instance_handle == local_key {
                // Advance the sequence counter past the stale change, but
                // do not replay it to late joiners.
                writer.remove_change(change.sequence_number);
            }
        }
    }
    // Rebuild the fleet view from the recovered ALIVE samples.
    for change in changes {
        if change.kind != ChangeKind::Alive || change.instance_handle == local_key {
            continue;
        }
        if let Ok(data) = ParticipantProxyData::parse_data_p(&change.serialized_payload) {
            let prefix = data.guid_prefix();
            let mask = data.available_builtin_endpoints;
            let mut fresh = data;
            fresh.is_server_peer = ctx
                .config
                .known_servers()
                .iter()
                .any(|s| s.guid_prefix == prefix);
            let is_client = !fresh.is_server_peer;
            if state.store.insert_or_update(fresh) == crate::discovery::InsertResult::New {
                let ppd = state
                    .store
                    .lookup(&prefix)
                    .expect("present, just inserted")
                    .clone();
                pdp::assign_remote_endpoints(ctx, &ppd, mask);
                if is_client {
                    if let Some(server) = state.pdp.server.as_mut() {
                        server.p2match.insert(prefix);
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::entity_ids::ENTITYID_SPDP_WRITER;

    #[test]
    fn test_persistence_file_name_from_prefix() {
        let name = persistence_file_name(&[0xab; 12]);
        assert_eq!(name, "pdp-server-abababababababababababab.db");
    }

    #[test]
    fn test_history_file_roundtrip() {
        let dir = std::env::temp_dir().join("rtdds-server-persist-test");
        let path = dir.join(persistence_file_name(&[1; 12]));
        let guid = Guid::new([1; 12], ENTITYID_SPDP_WRITER);

        let changes = vec![
            CacheChange {
                kind: ChangeKind::Alive,
                writer_guid: guid,
                instance_handle: [2; 16],
                sequence_number: 1,
                serialized_payload: vec![1, 2, 3],
            },
            CacheChange {
                kind: ChangeKind::NotAliveDisposedUnregistered,
                writer_guid: guid,
                instance_handle: [3; 16],
                sequence_number: 2,
                serialized_payload: vec![],
            },
        ];
        write_history_file(&path, changes.iter()).expect("write");
        let recovered = read_history_file(&path, guid).expect("read");
        assert_eq!(recovered, changes);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_history_file_rejects_garbage() {
        let dir = std::env::temp_dir().join("rtdds-server-persist-garbage");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("garbage.db");
        std::fs::write(&path, b"not a history file").unwrap();
        let guid = Guid::new([1; 12], ENTITYID_SPDP_WRITER);
        assert!(read_history_file(&path, guid).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
