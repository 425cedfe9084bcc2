//! Mapping a winning segment to the wheel's target angle

use crate::error::{Error, Result};

/// Angle in `[0, 360)` that brings the fixed pointer to the center of the
/// segment at `winner_order`. Presenting clients may add whole turns.
pub fn resolve_angle(winner_order: u32, segment_count: u32) -> Result<f64> {
    if segment_count == 0 || winner_order >= segment_count {
        return Err(Error::InvalidWheel(format!(
            "winner order {} out of range for {} segments",
            winner_order, segment_count
        )));
    }

    let width = 360.0 / segment_count as f64;
    let angle = 360.0 - (winner_order as f64 * width + width / 2.0);
    Ok(normalize_angle(angle))
}

/// Fold any angle into `[0, 360)`
pub fn normalize_angle(angle: f64) -> f64 {
    let folded = angle.rem_euclid(360.0);
    // rem_euclid can return 360.0 for tiny negative inputs
    if folded >= 360.0 {
        0.0
    } else {
        folded
    }
}
