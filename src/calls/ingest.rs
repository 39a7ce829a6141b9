//! # Packet Ingestion
//!
//! Accepts one sequenced packet for a call, checks its order against the stored
//! call, advances the call's sequence, and hands the call to enrichment when the
//! packet threshold is reached.
//!
//! ## Ordering Classification:
//! Relative to `last_sequence` as read when the call was fetched:
//! - `sequence <= last_sequence`: **stale or duplicate**, logged, the store update is a no-op
//! - `sequence == last_sequence + 1`: **in order**
//! - `sequence > last_sequence + 1`: **gap**, logged with the missing range, still accepted
//!
//! Every packet is accepted. Ingestion never waits on enrichment and never fails
//! because of it; only storage failures fail the request.
//!
//! ## Concurrency:
//! Two packets for the same call can race between the fetch and the update, so the
//! classification may be based on a stale `last_sequence`. The store's conditional
//! update is what decides whether a packet counts. The threshold check uses the
//! fetched count plus one, so under bursts of concurrent packets for one call the
//! trigger can be missed or doubled; the coordinator refuses a second concurrent
//! run for the same call.

use crate::calls::store::{CallStore, StoreResult};
use crate::calls::{Call, CallStatus};
use crate::enrichment::EnrichmentCoordinator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One packet of audio metadata as submitted by a client.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AudioPacket {
    /// Position of this packet in the call, starting at 1
    pub sequence: i64,
    /// Opaque payload (base64 audio or raw metadata)
    pub data: String,
    /// Unix time the packet was captured
    pub timestamp: f64,
}

/// Where a packet falls relative to the last accepted sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOrder {
    InOrder,
    /// At or below the last accepted sequence
    Stale { last_seen: i64 },
    /// Skips ahead; sequences `missing_from..=missing_to` were never seen
    Gap { missing_from: i64, missing_to: i64 },
}

impl PacketOrder {
    pub fn classify(sequence: i64, last_sequence: i64) -> Self {
        if sequence <= last_sequence {
            PacketOrder::Stale {
                last_seen: last_sequence,
            }
        } else if sequence == last_sequence + 1 {
            PacketOrder::InOrder
        } else {
            PacketOrder::Gap {
                missing_from: last_sequence + 1,
                missing_to: sequence - 1,
            }
        }
    }
}

/// Response body returned for every accepted packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Acknowledgment {
    pub status: String,
    pub call_id: String,
    pub sequence: i64,
}

impl Acknowledgment {
    fn accepted(call_id: &str, sequence: i64) -> Self {
        Self {
            status: "accepted".to_string(),
            call_id: call_id.to_string(),
            sequence,
        }
    }
}

/// What happened to one ingested packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub ack: Acknowledgment,
    pub order: PacketOrder,
    /// Whether the store advanced the call's sequence for this packet
    pub advanced: bool,
    /// Whether this packet handed the call to enrichment
    pub enrichment_triggered: bool,
}

pub struct PacketIngestion {
    store: Arc<dyn CallStore>,
    coordinator: Arc<EnrichmentCoordinator>,
    packet_threshold: i64,
}

impl PacketIngestion {
    pub fn new(
        store: Arc<dyn CallStore>,
        coordinator: Arc<EnrichmentCoordinator>,
        packet_threshold: i64,
    ) -> Self {
        Self {
            store,
            coordinator,
            packet_threshold,
        }
    }

    /// Ingest one packet. The caller must already have checked `sequence >= 1`.
    pub async fn ingest(&self, call_id: &str, packet: &AudioPacket) -> StoreResult<Ingested> {
        let call = self.store.get_or_create(call_id).await?;

        let order = PacketOrder::classify(packet.sequence, call.last_sequence);
        match order {
            PacketOrder::Stale { last_seen } => {
                warn!(
                    call_id,
                    sequence = packet.sequence,
                    last_seen,
                    "Out-of-order or duplicate packet"
                );
            }
            PacketOrder::Gap {
                missing_from,
                missing_to,
            } => {
                warn!(
                    call_id,
                    expected = missing_from,
                    received = packet.sequence,
                    missing_from,
                    missing_to,
                    "Missing packets detected"
                );
            }
            PacketOrder::InOrder => {
                debug!(call_id, sequence = packet.sequence, "Packet in order");
            }
        }

        // Stale packets still go through the conditional update; it is a no-op for them.
        let advanced = self
            .store
            .advance_sequence(call_id, packet.sequence, true)
            .await?;

        let enrichment_triggered = advanced && self.should_trigger(&call) && {
            let packets = placeholder_packets(call.packet_count + 1);
            self.coordinator.trigger(call_id, packets)
        };

        if enrichment_triggered {
            info!(call_id, threshold = self.packet_threshold, "Packet threshold reached");
        }

        Ok(Ingested {
            ack: Acknowledgment::accepted(call_id, packet.sequence),
            order,
            advanced,
            enrichment_triggered,
        })
    }

    /// Threshold check against the count fetched before this packet was applied.
    fn should_trigger(&self, call: &Call) -> bool {
        call.status == CallStatus::InProgress && call.packet_count + 1 == self.packet_threshold
    }
}

/// Raw payloads are not persisted, so enrichment gets one placeholder per accepted packet.
fn placeholder_packets(count: i64) -> Vec<String> {
    (1..=count).map(|n| format!("audio_chunk_{}", n)).collect()
}
