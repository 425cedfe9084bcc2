//! Weighted segment selection
//!
//! Selection is a pure function of the segment set and a seed, so any
//! recorded spin can be replayed from its `SpinResult`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::models::Segment;

/// Pick the winning segment for `seed`.
///
/// The seed drives a uniform draw over `[0, Σweights)`, which is then walked
/// through the segments in angular order.
pub fn select(segments: &[Segment], seed: u64) -> Result<&Segment> {
    let total = total_weight(segments)?;
    let draw = StdRng::seed_from_u64(seed).gen::<f64>() * total;
    pick(segments, draw)
}

/// Walk segments in order, subtracting each weight from `draw`. The first
/// segment that brings the remainder to zero or below wins.
pub fn pick(segments: &[Segment], draw: f64) -> Result<&Segment> {
    total_weight(segments)?;

    let mut ordered: Vec<&Segment> = segments.iter().collect();
    ordered.sort_by_key(|s| s.order);

    let mut remainder = draw;
    for seg in &ordered {
        remainder -= seg.weight;
        if remainder <= 0.0 {
            return Ok(seg);
        }
    }

    // Rounding can leave a sliver of remainder past the last segment
    ordered
        .last()
        .copied()
        .ok_or_else(|| Error::InvalidWheel("wheel has no segments".into()))
}

fn total_weight(segments: &[Segment]) -> Result<f64> {
    if segments.is_empty() {
        return Err(Error::InvalidWheel("wheel has no segments".into()));
    }
    if let Some(bad) = segments
        .iter()
        .find(|s| !s.weight.is_finite() || s.weight <= 0.0)
    {
        return Err(Error::InvalidWheel(format!(
            "segment '{}' has non-positive weight",
            bad.text
        )));
    }
    let total: f64 = segments.iter().map(|s| s.weight).sum();
    if total <= 0.0 {
        return Err(Error::InvalidWheel("weights sum to zero".into()));
    }
    Ok(total)
}
