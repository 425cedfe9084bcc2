//! Participant registry - membership and presence for one room
//!
//! Participants are kept in join order. Every mutation bumps the registry
//! version and stamps it on the participants it touched, which lets clients
//! order updates per user without relying on arrival order.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::invariants::assert_single_host;
use crate::models::{Participant, PresenceStatus, RoomRole};

/// Result of a join
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub participant: Participant,
    /// The user was already a member; nickname and status were refreshed
    pub rejoined: bool,
}

/// Result of a leave
#[derive(Debug, Clone)]
pub struct LeaveOutcome {
    pub removed: Participant,
    pub version: u64,
    /// Set when the leaver was host and someone inherited the role
    pub new_host: Option<Participant>,
}

/// Result of a presence change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub user_id: Uuid,
    pub status: PresenceStatus,
    pub version: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ParticipantRegistry {
    participants: Vec<Participant>,
    version: u64,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join as a player (or host, if the room is empty)
    pub fn join(&mut self, user_id: Uuid, nickname: &str) -> JoinOutcome {
        self.join_with_role(user_id, nickname, RoomRole::Player)
    }

    /// Join with a preferred role.
    ///
    /// The first joiner of an empty room always becomes host, and nobody else
    /// can claim host by joining. Rejoining keeps the existing role and join
    /// time.
    pub fn join_with_role(&mut self, user_id: Uuid, nickname: &str, preferred: RoomRole) -> JoinOutcome {
        let version = self.bump();

        if let Some(existing) = self.participants.iter_mut().find(|p| p.user_id == user_id) {
            existing.nickname = nickname.to_string();
            existing.status = PresenceStatus::Online;
            existing.version = version;
            debug!(user_id = %user_id, version, "Participant rejoined");
            return JoinOutcome {
                participant: existing.clone(),
                rejoined: true,
            };
        }

        let role = if self.participants.is_empty() {
            RoomRole::Host
        } else if preferred == RoomRole::Host {
            RoomRole::Player
        } else {
            preferred
        };

        let participant = Participant {
            user_id,
            nickname: nickname.to_string(),
            role,
            status: PresenceStatus::Online,
            joined_at: Utc::now(),
            version,
        };
        self.participants.push(participant.clone());
        info!(user_id = %user_id, role = %role, version, "Participant joined");

        assert_single_host(&self.participants);
        JoinOutcome {
            participant,
            rejoined: false,
        }
    }

    /// Remove a participant. A departing host hands the role to the
    /// earliest-joined remaining participant in the same update.
    pub fn leave(&mut self, user_id: Uuid) -> Result<LeaveOutcome> {
        let index = self
            .participants
            .iter()
            .position(|p| p.user_id == user_id)
            .ok_or_else(|| Error::NotFound(format!("participant {}", user_id)))?;

        let version = self.bump();
        let removed = self.participants.remove(index);

        let new_host = if removed.is_host() {
            self.participants.first_mut().map(|heir| {
                heir.role = RoomRole::Host;
                heir.version = version;
                info!(user_id = %heir.user_id, version, "Host reassigned");
                heir.clone()
            })
        } else {
            None
        };

        info!(user_id = %user_id, version, "Participant left");
        assert_single_host(&self.participants);
        Ok(LeaveOutcome {
            removed,
            version,
            new_host,
        })
    }

    /// Update presence. Never touches role. Returns `None` when the status
    /// was already current.
    pub fn set_status(&mut self, user_id: Uuid, status: PresenceStatus) -> Result<Option<StatusChange>> {
        let current = self
            .get(user_id)
            .map(|p| p.status)
            .ok_or_else(|| Error::NotFound(format!("participant {}", user_id)))?;
        if current == status {
            return Ok(None);
        }

        let version = self.bump();
        if let Some(p) = self.participants.iter_mut().find(|p| p.user_id == user_id) {
            p.status = status;
            p.version = version;
        }
        debug!(user_id = %user_id, status = ?status, version, "Presence changed");
        Ok(Some(StatusChange {
            user_id,
            status,
            version,
        }))
    }

    /// Participants in join order
    pub fn list(&self) -> Vec<Participant> {
        self.participants.clone()
    }

    pub fn get(&self, user_id: Uuid) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn host(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.is_host())
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn host_count(registry: &ParticipantRegistry) -> usize {
        registry.list().iter().filter(|p| p.is_host()).count()
    }

    #[test]
    fn test_first_joiner_is_host() {
        let mut registry = ParticipantRegistry::new();
        let a = registry.join(Uuid::new_v4(), "alice");
        let b = registry.join(Uuid::new_v4(), "bob");

        assert_eq!(a.participant.role, RoomRole::Host);
        assert_eq!(b.participant.role, RoomRole::Player);
    }

    #[test]
    fn test_cannot_claim_host_by_joining() {
        let mut registry = ParticipantRegistry::new();
        registry.join(Uuid::new_v4(), "alice");
        let b = registry.join_with_role(Uuid::new_v4(), "bob", RoomRole::Host);
        assert_eq!(b.participant.role, RoomRole::Player);
        assert_eq!(host_count(&registry), 1);
    }

    #[test]
    fn test_spectator_join() {
        let mut registry = ParticipantRegistry::new();
        registry.join(Uuid::new_v4(), "alice");
        let s = registry.join_with_role(Uuid::new_v4(), "sam", RoomRole::Spectator);
        assert_eq!(s.participant.role, RoomRole::Spectator);
    }

    #[test]
    fn test_rejoin_is_idempotent() {
        let mut registry = ParticipantRegistry::new();
        let id = Uuid::new_v4();
        registry.join(id, "alice");
        registry.set_status(id, PresenceStatus::Offline).unwrap();

        let again = registry.join(id, "alice2");
        assert!(again.rejoined);
        assert_eq!(registry.len(), 1);
        assert_eq!(again.participant.nickname, "alice2");
        assert_eq!(again.participant.status, PresenceStatus::Online);
        assert_eq!(again.participant.role, RoomRole::Host);
    }

    #[test]
    fn test_host_leaves_three_person_room() {
        let mut registry = ParticipantRegistry::new();
        let host = Uuid::new_v4();
        let second = Uuid::new_v4();
        let third = Uuid::new_v4();
        registry.join(host, "host");
        registry.join(second, "second");
        registry.join(third, "third");

        let outcome = registry.leave(host).unwrap();
        let heir = outcome.new_host.unwrap();

        assert_eq!(heir.user_id, second);
        assert_eq!(heir.version, outcome.version);
        assert_eq!(registry.host().unwrap().user_id, second);
        assert_eq!(host_count(&registry), 1);
    }

    #[test]
    fn test_last_leaver_leaves_empty_room() {
        let mut registry = ParticipantRegistry::new();
        let id = Uuid::new_v4();
        registry.join(id, "alice");
        let outcome = registry.leave(id).unwrap();
        assert!(outcome.new_host.is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_leave_unknown() {
        let mut registry = ParticipantRegistry::new();
        assert!(matches!(registry.leave(Uuid::new_v4()), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_status_change_keeps_role() {
        let mut registry = ParticipantRegistry::new();
        let id = Uuid::new_v4();
        registry.join(id, "alice");

        let change = registry.set_status(id, PresenceStatus::Offline).unwrap().unwrap();
        assert_eq!(change.status, PresenceStatus::Offline);
        assert_eq!(registry.get(id).unwrap().role, RoomRole::Host);

        // Repeating the same status is not a change
        assert!(registry.set_status(id, PresenceStatus::Offline).unwrap().is_none());
    }

    #[test]
    fn test_versions_increase() {
        let mut registry = ParticipantRegistry::new();
        let a = registry.join(Uuid::new_v4(), "a").participant.version;
        let b = registry.join(Uuid::new_v4(), "b").participant.version;
        assert!(b > a);
        assert_eq!(registry.version(), b);
    }

    proptest! {
        #[test]
        fn prop_exactly_one_host(ops in prop::collection::vec((any::<bool>(), 0usize..6), 1..60)) {
            let users: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();
            let mut registry = ParticipantRegistry::new();

            for (is_join, idx) in ops {
                if is_join {
                    registry.join(users[idx], "user");
                } else {
                    let _ = registry.leave(users[idx]);
                }

                let hosts = host_count(&registry);
                if registry.is_empty() {
                    prop_assert_eq!(hosts, 0);
                } else {
                    prop_assert_eq!(hosts, 1);
                }
            }
        }
    }
}
