//! Wheel and segment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Minimum number of segments a wheel may hold
pub const MIN_SEGMENTS: usize = 2;

/// Colors handed out to new segments, cycled by order
pub const PRESET_COLORS: &[&str] = &[
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A", "#98D8C8", "#F7DC6F", "#C7CEEA", "#FF85A1",
    "#FFB3BA", "#BAE1FF",
];

/// One selectable outcome on a wheel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: Uuid,
    pub text: String,
    pub color: String,
    pub weight: f64,
    /// Angular position, 0-based
    pub order: u32,
}

impl Segment {
    pub fn new(text: impl Into<String>, color: impl Into<String>, weight: f64, order: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            color: color.into(),
            weight,
            order,
        }
    }

    /// Segment with weight 1 and a preset color picked by order
    pub fn evenly_weighted(text: impl Into<String>, order: u32) -> Self {
        let color = PRESET_COLORS[order as usize % PRESET_COLORS.len()];
        Self::new(text, color, 1.0, order)
    }
}

/// The weighted-selection device of a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wheel {
    pub id: Uuid,
    pub room_id: Uuid,
    pub title: String,
    pub segments: Vec<Segment>,
    /// Bumped on every segment edit
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wheel {
    /// Build a wheel after validating its segments. Segments are stored sorted by order.
    pub fn new(room_id: Uuid, title: String, segments: Vec<Segment>) -> Result<Self> {
        let segments = validate_segments(segments)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            room_id,
            title,
            segments,
            revision: 1,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace the segment set, keeping identity
    pub fn replace_segments(&mut self, segments: Vec<Segment>) -> Result<()> {
        self.segments = validate_segments(segments)?;
        self.revision += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn segment(&self, segment_id: Uuid) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == segment_id)
    }
}

/// The six-prize wheel a room starts with
pub fn default_segments() -> Vec<Segment> {
    (0..6u32)
        .map(|i| Segment::evenly_weighted(format!("Prize {}", i + 1), i))
        .collect()
}

/// Check the wheel invariants and return segments sorted by order.
///
/// A wheel holds at least two segments, every weight is finite and positive,
/// text is non-empty, and orders form the dense permutation 0..N-1.
pub fn validate_segments(mut segments: Vec<Segment>) -> Result<Vec<Segment>> {
    if segments.len() < MIN_SEGMENTS {
        return Err(Error::InvalidWheel(format!(
            "wheel must have at least {} segments, got {}",
            MIN_SEGMENTS,
            segments.len()
        )));
    }

    for seg in &segments {
        if seg.text.trim().is_empty() {
            return Err(Error::InvalidWheel("all segments must have text".into()));
        }
        if !seg.weight.is_finite() || seg.weight <= 0.0 {
            return Err(Error::InvalidWheel(format!(
                "segment '{}' has non-positive weight {}",
                seg.text, seg.weight
            )));
        }
    }

    segments.sort_by_key(|s| s.order);
    for (expected, seg) in segments.iter().enumerate() {
        if seg.order as usize != expected {
            return Err(Error::InvalidWheel(format!(
                "segment orders must be 0..{} without gaps or duplicates",
                segments.len() - 1
            )));
        }
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_segments_valid() {
        let segments = validate_segments(default_segments()).unwrap();
        assert_eq!(segments.len(), 6);
        assert_eq!(segments[0].text, "Prize 1");
        assert_eq!(segments[0].color, "#FF6B6B");
    }

    #[test]
    fn test_segments_sorted_by_order() {
        let segments = vec![
            Segment::evenly_weighted("B", 1),
            Segment::evenly_weighted("A", 0),
        ];
        let sorted = validate_segments(segments).unwrap();
        assert_eq!(sorted[0].text, "A");
    }

    #[test]
    fn test_too_few_segments() {
        let result = validate_segments(vec![Segment::evenly_weighted("A", 0)]);
        assert!(matches!(result, Err(Error::InvalidWheel(_))));
    }

    #[test]
    fn test_gap_in_order_rejected() {
        let segments = vec![
            Segment::evenly_weighted("A", 0),
            Segment::evenly_weighted("B", 2),
        ];
        assert!(validate_segments(segments).is_err());
    }

    #[test]
    fn test_duplicate_order_rejected() {
        let segments = vec![
            Segment::evenly_weighted("A", 0),
            Segment::evenly_weighted("B", 0),
        ];
        assert!(validate_segments(segments).is_err());
    }

    #[test]
    fn test_zero_weight_rejected() {
        let segments = vec![
            Segment::new("A", "#000000", 0.0, 0),
            Segment::evenly_weighted("B", 1),
        ];
        assert!(validate_segments(segments).is_err());
    }

    #[test]
    fn test_replace_bumps_revision() {
        let mut wheel = Wheel::new(Uuid::new_v4(), "Lucky".into(), default_segments()).unwrap();
        let id = wheel.id;
        wheel
            .replace_segments(vec![
                Segment::evenly_weighted("Yes", 0),
                Segment::evenly_weighted("No", 1),
            ])
            .unwrap();
        assert_eq!(wheel.id, id);
        assert_eq!(wheel.revision, 2);
        assert_eq!(wheel.segments.len(), 2);
    }
}
