//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use std::collections::HashSet;

use crate::models::{Participant, Room, Wheel, MIN_SEGMENTS};

/// A non-empty participant set has exactly one host; an empty one has none
pub fn assert_single_host(participants: &[Participant]) {
    let host_count = participants.iter().filter(|p| p.is_host()).count();
    let expected = usize::from(!participants.is_empty());
    debug_assert!(
        host_count == expected,
        "Room has {} hosts across {} participants, expected {}",
        host_count,
        participants.len(),
        expected
    );
}

/// Validate that a Room snapshot is internally consistent
pub fn assert_room_invariants(room: &Room) {
    debug_assert!(!room.name.trim().is_empty(), "Room {} has empty name", room.id);

    assert_single_host(&room.participants);

    let listed_host = room.participants.iter().find(|p| p.is_host()).map(|p| p.user_id);
    debug_assert!(
        listed_host == room.host_id,
        "Room {} host_id {:?} disagrees with participant list {:?}",
        room.id,
        room.host_id,
        listed_host
    );

    let unique: HashSet<_> = room.participants.iter().map(|p| p.user_id).collect();
    debug_assert!(
        unique.len() == room.participants.len(),
        "Room {} lists a participant twice",
        room.id
    );
}

/// Validate that a Wheel's segments are dense and positive
pub fn assert_wheel_invariants(wheel: &Wheel) {
    debug_assert!(
        wheel.segments.len() >= MIN_SEGMENTS,
        "Wheel {} has {} segments",
        wheel.id,
        wheel.segments.len()
    );

    for (expected, seg) in wheel.segments.iter().enumerate() {
        debug_assert!(
            seg.order as usize == expected,
            "Wheel {} segment '{}' has order {} at index {}",
            wheel.id,
            seg.text,
            seg.order,
            expected
        );
        debug_assert!(
            seg.weight > 0.0,
            "Wheel {} segment '{}' has weight {}",
            wheel.id,
            seg.text,
            seg.weight
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{default_segments, PresenceStatus, RoomRole, Segment};
    use chrono::Utc;
    use uuid::Uuid;

    fn participant(role: RoomRole) -> Participant {
        Participant {
            user_id: Uuid::new_v4(),
            nickname: "p".into(),
            role,
            status: PresenceStatus::Online,
            joined_at: Utc::now(),
            version: 1,
        }
    }

    #[test]
    fn test_single_host_ok() {
        assert_single_host(&[participant(RoomRole::Host), participant(RoomRole::Player)]);
        assert_single_host(&[]);
    }

    #[test]
    #[should_panic(expected = "hosts")]
    fn test_two_hosts_panics() {
        assert_single_host(&[participant(RoomRole::Host), participant(RoomRole::Host)]);
    }

    #[test]
    fn test_valid_wheel() {
        let wheel = Wheel::new(Uuid::new_v4(), "w".into(), default_segments()).unwrap();
        assert_wheel_invariants(&wheel);
    }

    #[test]
    #[should_panic(expected = "order")]
    fn test_shuffled_wheel_panics() {
        let mut wheel = Wheel::new(Uuid::new_v4(), "w".into(), default_segments()).unwrap();
        wheel.segments.swap(0, 1);
        wheel.segments.push(Segment::evenly_weighted("x", 9));
        assert_wheel_invariants(&wheel);
    }
}
