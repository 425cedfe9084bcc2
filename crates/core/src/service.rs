//! Request/response data service
//!
//! This trait is the narrow interface clients use for snapshots and room
//! management, allowing different implementations (in-memory hub, remote
//! service). Any error it returns is a data service error: it is surfaced to
//! the caller and never applied to client projections.

use std::collections::HashMap;

use uuid::Uuid;

use crate::auth::Identity;
use crate::error::Result;
use crate::models::{Room, Segment, SegmentStat, SpinResult, SpinStatistics, Visibility, Wheel};

pub trait DataService: Send + Sync {
    /// Create a room owned and hosted by `caller`
    fn create_room(&self, caller: &Identity, name: &str, visibility: Visibility) -> Result<Room>;

    /// Join by code (case-insensitive). Rejoining refreshes the nickname.
    fn join_room(&self, caller: &Identity, code: &str, nickname: &str) -> Result<Room>;

    fn get_room(&self, room_id: Uuid) -> Result<Room>;

    /// Rooms with public visibility that are still active
    fn list_public_rooms(&self) -> Result<Vec<Room>>;

    /// Mark a room ENDED. Owner only.
    fn end_room(&self, caller: &Identity, room_id: Uuid) -> Result<Room>;

    /// Hand room ownership to another participant. Owner only.
    fn transfer_ownership(&self, caller: &Identity, room_id: Uuid, new_owner: Uuid) -> Result<Room>;

    /// Create the room's active wheel, replacing any previous one. Host only.
    fn create_wheel(
        &self,
        caller: &Identity,
        room_id: Uuid,
        title: &str,
        segments: Vec<Segment>,
    ) -> Result<Wheel>;

    /// Replace a wheel's segments. Host only, refused mid-spin.
    fn update_wheel(&self, caller: &Identity, wheel_id: Uuid, segments: Vec<Segment>) -> Result<Wheel>;

    /// The room's active wheel
    fn get_wheel(&self, room_id: Uuid) -> Result<Wheel>;

    /// Spin results, oldest first
    fn get_spin_history(&self, room_id: Uuid) -> Result<Vec<SpinResult>>;

    fn get_statistics(&self, room_id: Uuid) -> Result<SpinStatistics>;
}

/// Aggregate a spin history into per-segment counts.
///
/// Segments of the current wheel are listed first, in wheel order, including
/// those never selected. Segments that only appear in history (from earlier
/// wheel edits) follow in order of first appearance.
pub fn compute_statistics(history: &[SpinResult], wheel: Option<&Wheel>) -> SpinStatistics {
    let total = history.len() as u64;

    let mut counts: HashMap<Uuid, u64> = HashMap::new();
    for spin in history {
        *counts.entry(spin.segment_id).or_insert(0) += 1;
    }

    let mut rows: Vec<(Uuid, String)> = wheel
        .map(|w| w.segments.iter().map(|s| (s.id, s.text.clone())).collect())
        .unwrap_or_default();
    for spin in history {
        if !rows.iter().any(|(id, _)| *id == spin.segment_id) {
            rows.push((spin.segment_id, spin.result.clone()));
        }
    }

    let segment_stats = rows
        .into_iter()
        .map(|(segment_id, text)| {
            let count = counts.get(&segment_id).copied().unwrap_or(0);
            SegmentStat {
                segment_id,
                text,
                count,
                percentage: percentage(count, total),
            }
        })
        .collect();

    SpinStatistics {
        total_spins: total,
        segment_stats,
    }
}

fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 * 10_000.0 / total as f64).round() / 100.0
}
