//! Room projection: membership and presence
//!
//! Every participant update carries the registry version that produced it.
//! Versions are tracked per field (profile, status, role), so an update only
//! overwrites fields that are older than it, and anything at or below a
//! departure tombstone is dropped. That makes duplicates no-ops and lets
//! late arrivals land in any order. Status or role updates for a user not
//! seen yet are parked until the join that introduces them.
//!
//! A snapshot sets a floor: events at or below it are already reflected.

use std::collections::HashMap;

use spinroom_core::{Participant, PresenceStatus, Room, RoomRole, RoomStatus, Visibility};
use spinroom_net::RoomBroadcast;
use uuid::Uuid;

/// Room metadata that is not carried by channel events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub visibility: Visibility,
    pub status: RoomStatus,
    pub owner_id: Uuid,
}

impl From<&Room> for RoomInfo {
    fn from(room: &Room) -> Self {
        Self {
            id: room.id,
            name: room.name.clone(),
            code: room.code.clone(),
            visibility: room.visibility,
            status: room.status,
            owner_id: room.owner_id,
        }
    }
}

#[derive(Debug, Clone)]
struct Member {
    participant: Participant,
    profile_at: u64,
    status_at: u64,
    role_at: u64,
}

impl Member {
    fn new(participant: Participant) -> Self {
        let v = participant.version;
        Self {
            participant,
            profile_at: v,
            status_at: v,
            role_at: v,
        }
    }

    /// Merge a full participant record; returns whether anything changed
    fn merge(&mut self, incoming: &Participant) -> bool {
        let v = incoming.version;
        let mut changed = false;
        if v > self.profile_at {
            self.participant.nickname = incoming.nickname.clone();
            self.participant.joined_at = incoming.joined_at;
            self.profile_at = v;
            changed = true;
        }
        changed |= self.set_status(incoming.status, v);
        changed |= self.set_role(incoming.role, v);
        changed
    }

    fn set_status(&mut self, status: PresenceStatus, v: u64) -> bool {
        if v <= self.status_at {
            return false;
        }
        self.participant.status = status;
        self.status_at = v;
        self.bump(v);
        true
    }

    fn set_role(&mut self, role: RoomRole, v: u64) -> bool {
        if v <= self.role_at {
            return false;
        }
        self.participant.role = role;
        self.role_at = v;
        self.bump(v);
        true
    }

    fn bump(&mut self, v: u64) {
        self.participant.version = self.participant.version.max(v);
    }

    fn latest(&self) -> u64 {
        self.participant.version
    }
}

/// Field updates waiting for a participant to appear
#[derive(Debug, Clone, Default)]
struct Pending {
    status: Option<(PresenceStatus, u64)>,
    role: Option<(RoomRole, u64)>,
}

#[derive(Debug, Clone, Default)]
pub struct RoomProjection {
    info: Option<RoomInfo>,
    members: HashMap<Uuid, Member>,
    /// Version at which each departed user left
    tombstones: HashMap<Uuid, u64>,
    pending: HashMap<Uuid, Pending>,
    floor: u64,
}

/// Two projections are equal when they present the same room and
/// participants; version bookkeeping is not compared.
impl PartialEq for RoomProjection {
    fn eq(&self, other: &Self) -> bool {
        self.info == other.info && self.participants() == other.participants()
    }
}

impl RoomProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self) -> Option<&RoomInfo> {
        self.info.as_ref()
    }

    /// Participants in join order
    pub fn participants(&self) -> Vec<&Participant> {
        let mut list: Vec<&Participant> = self.members.values().map(|m| &m.participant).collect();
        list.sort_by_key(|p| (p.joined_at, p.user_id));
        list
    }

    pub fn participant(&self, user_id: Uuid) -> Option<&Participant> {
        self.members.get(&user_id).map(|m| &m.participant)
    }

    pub fn host(&self) -> Option<&Participant> {
        self.participants().into_iter().find(|p| p.is_host())
    }

    /// Number of participants holding the host role
    pub fn host_count(&self) -> usize {
        self.members
            .values()
            .filter(|m| m.participant.role == RoomRole::Host)
            .count()
    }

    pub fn floor(&self) -> u64 {
        self.floor
    }

    /// Merge a data-service snapshot.
    ///
    /// Members changed after the snapshot was taken (live events that
    /// overtook the fetch) keep their newer fields; everyone else takes the
    /// snapshot's view. Returns false for a snapshot older than the floor.
    pub fn load_snapshot(&mut self, room: &Room) -> bool {
        if room.version < self.floor {
            return false;
        }
        let version = room.version;

        self.members.retain(|id, m| {
            m.latest() > version || room.participants.iter().any(|p| p.user_id == *id)
        });
        for incoming in &room.participants {
            match self.members.get_mut(&incoming.user_id) {
                Some(member) => {
                    member.merge(incoming);
                }
                None => {
                    self.members
                        .insert(incoming.user_id, Member::new(incoming.clone()));
                }
            }
        }
        self.tombstones.retain(|_, left_at| *left_at > version);
        self.pending.retain(|_, p| {
            p.status.is_some_and(|(_, v)| v > version) || p.role.is_some_and(|(_, v)| v > version)
        });
        self.floor = version;
        self.info = Some(RoomInfo::from(room));
        true
    }

    /// Apply a room broadcast; returns whether the projection changed
    pub fn apply(&mut self, event: &RoomBroadcast) -> bool {
        match event {
            RoomBroadcast::ParticipantJoined { participant } => self.upsert(participant),
            RoomBroadcast::ParticipantLeft { user_id, version, .. } => {
                if !self.is_live(*user_id, *version) {
                    return false;
                }
                if self.members.get(user_id).is_some_and(|m| m.latest() >= *version) {
                    return false;
                }
                self.members.remove(user_id);
                self.pending.remove(user_id);
                self.tombstones.insert(*user_id, *version);
                true
            }
            RoomBroadcast::ParticipantStatusChanged {
                user_id,
                status,
                version,
            } => {
                if !self.is_live(*user_id, *version) {
                    return false;
                }
                match self.members.get_mut(user_id) {
                    Some(member) => member.set_status(*status, *version),
                    None => {
                        let pending = self.pending.entry(*user_id).or_default();
                        if pending.status.is_some_and(|(_, v)| v >= *version) {
                            return false;
                        }
                        pending.status = Some((*status, *version));
                        true
                    }
                }
            }
            RoomBroadcast::ParticipantRoleChanged {
                user_id,
                role,
                version,
            } => {
                if !self.is_live(*user_id, *version) {
                    return false;
                }
                match self.members.get_mut(user_id) {
                    Some(member) => member.set_role(*role, *version),
                    None => {
                        let pending = self.pending.entry(*user_id).or_default();
                        if pending.role.is_some_and(|(_, v)| v >= *version) {
                            return false;
                        }
                        pending.role = Some((*role, *version));
                        true
                    }
                }
            }
        }
    }

    fn upsert(&mut self, participant: &Participant) -> bool {
        let user_id = participant.user_id;
        if !self.is_live(user_id, participant.version) {
            return false;
        }
        self.tombstones.remove(&user_id);

        let mut changed = match self.members.get_mut(&user_id) {
            Some(member) => member.merge(participant),
            None => {
                self.members.insert(user_id, Member::new(participant.clone()));
                true
            }
        };

        if let (Some(pending), Some(member)) = (self.pending.remove(&user_id), self.members.get_mut(&user_id)) {
            if let Some((status, v)) = pending.status {
                changed |= member.set_status(status, v);
            }
            if let Some((role, v)) = pending.role {
                changed |= member.set_role(role, v);
            }
        }
        changed
    }

    /// Above the snapshot floor and after any recorded departure
    fn is_live(&self, user_id: Uuid, version: u64) -> bool {
        version > self.floor && self.tombstones.get(&user_id).map_or(true, |left_at| version > *left_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn participant(nickname: &str, role: RoomRole, version: u64, offset_secs: i64) -> Participant {
        Participant {
            user_id: Uuid::new_v4(),
            nickname: nickname.into(),
            role,
            status: PresenceStatus::Online,
            joined_at: Utc::now() + Duration::seconds(offset_secs),
            version,
        }
    }

    fn room(participants: Vec<Participant>, version: u64) -> Room {
        Room {
            id: Uuid::new_v4(),
            name: "r".into(),
            code: "ABCDEF".into(),
            visibility: Visibility::Private,
            status: RoomStatus::Active,
            owner_id: participants[0].user_id,
            host_id: Some(participants[0].user_id),
            participants,
            active_wheel_id: None,
            version,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_duplicate_join_is_noop() {
        let mut projection = RoomProjection::new();
        let p = participant("alice", RoomRole::Host, 1, 0);
        let event = RoomBroadcast::ParticipantJoined { participant: p };

        assert!(projection.apply(&event));
        let once = projection.clone();
        assert!(!projection.apply(&event));
        assert_eq!(projection, once);
    }

    #[test]
    fn test_stale_status_after_leave_is_ignored() {
        let mut projection = RoomProjection::new();
        let p = participant("bob", RoomRole::Player, 2, 0);
        let user_id = p.user_id;

        projection.apply(&RoomBroadcast::ParticipantJoined { participant: p });
        projection.apply(&RoomBroadcast::ParticipantLeft {
            user_id,
            nickname: "bob".into(),
            version: 4,
        });
        // Offline notice produced before the leave, delivered after it
        assert!(!projection.apply(&RoomBroadcast::ParticipantStatusChanged {
            user_id,
            status: PresenceStatus::Offline,
            version: 3,
        }));
        assert!(projection.participant(user_id).is_none());
    }

    #[test]
    fn test_status_before_join_is_parked() {
        let mut projection = RoomProjection::new();
        let p = participant("carol", RoomRole::Player, 2, 0);

        projection.apply(&RoomBroadcast::ParticipantStatusChanged {
            user_id: p.user_id,
            status: PresenceStatus::Offline,
            version: 3,
        });
        assert!(projection.participant(p.user_id).is_none());

        projection.apply(&RoomBroadcast::ParticipantJoined {
            participant: p.clone(),
        });
        let seen = projection.participant(p.user_id).unwrap();
        assert_eq!(seen.status, PresenceStatus::Offline);
        assert_eq!(seen.version, 3);
    }

    #[test]
    fn test_late_rename_keeps_newer_status() {
        let mut projection = RoomProjection::new();
        let original = participant("dave", RoomRole::Player, 1, 0);
        projection.apply(&RoomBroadcast::ParticipantJoined {
            participant: original.clone(),
        });

        let mut renamed = original.clone();
        renamed.nickname = "david".into();
        renamed.version = 2;

        projection.apply(&RoomBroadcast::ParticipantStatusChanged {
            user_id: original.user_id,
            status: PresenceStatus::Offline,
            version: 3,
        });
        projection.apply(&RoomBroadcast::ParticipantJoined { participant: renamed });

        let seen = projection.participant(original.user_id).unwrap();
        assert_eq!(seen.nickname, "david");
        assert_eq!(seen.status, PresenceStatus::Offline);
    }

    #[test]
    fn test_host_handover_converges_in_either_order() {
        let host = participant("host", RoomRole::Host, 1, 0);
        let heir = participant("heir", RoomRole::Player, 2, 1);
        let third = participant("third", RoomRole::Player, 3, 2);
        let snapshot = room(vec![host.clone(), heir.clone(), third], 3);

        let left = RoomBroadcast::ParticipantLeft {
            user_id: host.user_id,
            nickname: "host".into(),
            version: 4,
        };
        let promoted = RoomBroadcast::ParticipantRoleChanged {
            user_id: heir.user_id,
            role: RoomRole::Host,
            version: 4,
        };

        let mut a = RoomProjection::new();
        a.load_snapshot(&snapshot);
        a.apply(&left);
        a.apply(&promoted);

        let mut b = RoomProjection::new();
        b.load_snapshot(&snapshot);
        b.apply(&promoted);
        b.apply(&left);

        assert_eq!(a, b);
        assert_eq!(a.host().unwrap().user_id, heir.user_id);
        assert_eq!(a.host_count(), 1);
        assert_eq!(a.participants().len(), 2);
    }

    #[test]
    fn test_snapshot_floor_drops_older_events() {
        let host = participant("host", RoomRole::Host, 1, 0);
        let guest = participant("guest", RoomRole::Player, 5, 1);
        let mut projection = RoomProjection::new();
        projection.load_snapshot(&room(vec![host, guest.clone()], 5));

        let mut stale = guest.clone();
        stale.version = 2;
        stale.nickname = "old name".into();
        assert!(!projection.apply(&RoomBroadcast::ParticipantJoined { participant: stale }));
        assert_eq!(projection.participant(guest.user_id).unwrap().nickname, "guest");
    }

    #[test]
    fn test_snapshot_keeps_newer_live_entries() {
        let host = participant("host", RoomRole::Host, 1, 0);
        let late = participant("late", RoomRole::Player, 7, 1);

        let mut projection = RoomProjection::new();
        projection.apply(&RoomBroadcast::ParticipantJoined {
            participant: late.clone(),
        });
        // Snapshot taken before `late` joined
        projection.load_snapshot(&room(vec![host], 6));

        assert!(projection.participant(late.user_id).is_some());
        assert_eq!(projection.participants().len(), 2);
    }
}
