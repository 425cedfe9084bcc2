//! Spin result and statistics models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The canonical outcome of one spin. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpinResult {
    pub id: Uuid,
    pub room_id: Uuid,
    pub wheel_id: Uuid,
    pub segment_id: Uuid,
    /// Winning segment text at the time of the spin
    pub result: String,
    pub seed: u64,
    pub spinner_id: Uuid,
    pub spinner_nickname: String,
    /// Target angle in degrees, in [0, 360)
    pub rotation: f64,
    pub spun_at: DateTime<Utc>,
}

/// Aggregate spin counts for a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpinStatistics {
    pub total_spins: u64,
    pub segment_stats: Vec<SegmentStat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentStat {
    pub segment_id: Uuid,
    pub text: String,
    pub count: u64,
    /// Share of all spins, in percent with two decimals
    pub percentage: f64,
}
