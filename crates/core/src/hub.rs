//! Authoritative per-room state
//!
//! Every room is a [`RoomState`] aggregate behind its own mutex, addressed by
//! room id through the [`RoomHub`]. All mutations of one room are serialized
//! by that mutex; different rooms never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::auth::Identity;
use crate::coordinator::SpinCoordinator;
use crate::error::{Error, Result};
use crate::invariants::{assert_room_invariants, assert_wheel_invariants};
use crate::models::{
    default_segments, generate_join_code, normalize_join_code, ChatEvent, Participant,
    PresenceStatus, Room, RoomRole, RoomStatus, Segment, SpinResult, SpinStatistics, StreamEntry,
    Visibility, Wheel,
};
use crate::registry::{JoinOutcome, LeaveOutcome, ParticipantRegistry, StatusChange};
use crate::service::{compute_statistics, DataService};
use crate::stream::{Backlog, MessageStream, DEFAULT_HISTORY_CAPACITY};

/// Title given to wheels created on a room's behalf
pub const DEFAULT_WHEEL_TITLE: &str = "Lucky Wheel";

/// Everything the authoritative side knows about one room
#[derive(Debug)]
pub struct RoomState {
    id: Uuid,
    name: String,
    code: String,
    visibility: Visibility,
    status: RoomStatus,
    owner_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    registry: ParticipantRegistry,
    wheel: Option<Wheel>,
    coordinator: Option<SpinCoordinator>,
    stream: MessageStream,
    history: Vec<SpinResult>,
}

impl RoomState {
    fn new(name: String, code: String, visibility: Visibility, owner_id: Uuid, capacity: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            code,
            visibility,
            status: RoomStatus::Active,
            owner_id,
            created_at: now,
            updated_at: now,
            registry: ParticipantRegistry::new(),
            wheel: None,
            coordinator: None,
            stream: MessageStream::with_capacity(capacity),
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn snapshot(&self) -> Room {
        let room = Room {
            id: self.id,
            name: self.name.clone(),
            code: self.code.clone(),
            visibility: self.visibility,
            status: self.status,
            owner_id: self.owner_id,
            host_id: self.registry.host().map(|p| p.user_id),
            participants: self.registry.list(),
            active_wheel_id: self.wheel.as_ref().map(|w| w.id),
            version: self.registry.version(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        assert_room_invariants(&room);
        room
    }

    pub fn participant(&self, user_id: Uuid) -> Option<&Participant> {
        self.registry.get(user_id)
    }

    pub fn join(&mut self, user_id: Uuid, nickname: &str) -> Result<JoinOutcome> {
        self.join_with_role(user_id, nickname, RoomRole::Player)
    }

    pub fn join_with_role(&mut self, user_id: Uuid, nickname: &str, role: RoomRole) -> Result<JoinOutcome> {
        self.ensure_active()?;
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return Err(Error::InvalidOperation("nickname must not be empty".into()));
        }
        let outcome = self.registry.join_with_role(user_id, nickname, role);
        self.touch();
        Ok(outcome)
    }

    /// Leaving is allowed in ended rooms so clients can always detach
    pub fn leave(&mut self, user_id: Uuid) -> Result<LeaveOutcome> {
        let outcome = self.registry.leave(user_id)?;
        self.touch();
        Ok(outcome)
    }

    pub fn set_status(&mut self, user_id: Uuid, status: PresenceStatus) -> Result<Option<StatusChange>> {
        self.registry.set_status(user_id, status)
    }

    pub fn wheel(&self) -> Option<&Wheel> {
        self.wheel.as_ref()
    }

    pub fn is_spinning(&self) -> bool {
        self.coordinator.as_ref().is_some_and(|c| c.is_spinning())
    }

    /// Install a new active wheel. Host only, refused mid-spin.
    pub fn replace_wheel(&mut self, caller: Uuid, title: &str, segments: Vec<Segment>) -> Result<Wheel> {
        self.ensure_active()?;
        self.ensure_host(caller)?;
        self.ensure_not_spinning()?;

        let wheel = Wheel::new(self.id, title.to_string(), segments)?;
        assert_wheel_invariants(&wheel);
        self.coordinator = Some(SpinCoordinator::new(wheel.id));
        self.wheel = Some(wheel.clone());
        self.touch();
        info!(room_id = %self.id, wheel_id = %wheel.id, "Wheel created");
        Ok(wheel)
    }

    /// Edit the active wheel's segments. Host only, refused mid-spin.
    pub fn update_segments(&mut self, caller: Uuid, wheel_id: Uuid, segments: Vec<Segment>) -> Result<Wheel> {
        self.ensure_active()?;
        self.ensure_host(caller)?;
        self.ensure_not_spinning()?;

        let wheel = self
            .wheel
            .as_mut()
            .filter(|w| w.id == wheel_id)
            .ok_or_else(|| Error::NotFound(format!("wheel {}", wheel_id)))?;
        wheel.replace_segments(segments)?;
        assert_wheel_invariants(wheel);
        let wheel = wheel.clone();
        self.touch();
        info!(room_id = %self.id, wheel_id = %wheel.id, revision = wheel.revision, "Wheel updated");
        Ok(wheel)
    }

    /// Start a spin on the active wheel and record its result in history
    pub fn request_spin(&mut self, requester_id: Uuid, wheel_id: Uuid, seed: u64) -> Result<SpinResult> {
        self.ensure_active()?;
        let requester = self
            .registry
            .get(requester_id)
            .cloned()
            .ok_or(Error::UnauthorizedSpin)?;
        let wheel = self
            .wheel
            .as_ref()
            .filter(|w| w.id == wheel_id)
            .ok_or_else(|| Error::NotFound(format!("wheel {}", wheel_id)))?;
        let coordinator = self
            .coordinator
            .as_mut()
            .ok_or_else(|| Error::NotFound(format!("wheel {}", wheel_id)))?;

        let result = coordinator.request_spin(&requester, wheel, seed)?;
        self.history.push(result.clone());
        Ok(result)
    }

    /// Release the spin lock once the result has been broadcast
    pub fn acknowledge_end(&mut self, spin_id: Uuid) -> bool {
        self.coordinator
            .as_mut()
            .is_some_and(|c| c.acknowledge_end(spin_id))
    }

    pub fn history(&self) -> &[SpinResult] {
        &self.history
    }

    pub fn statistics(&self) -> SpinStatistics {
        compute_statistics(&self.history, self.wheel.as_ref())
    }

    pub fn append_chat(&mut self, event: ChatEvent) -> StreamEntry {
        self.stream.append(event)
    }

    /// Append a system message to the room's stream
    pub fn announce(&mut self, content: String) -> StreamEntry {
        self.stream.append(ChatEvent::system(self.id, content))
    }

    pub fn chat_since(&self, position: u64) -> Backlog {
        self.stream.since(position)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.status == RoomStatus::Ended {
            return Err(Error::RoomEnded);
        }
        Ok(())
    }

    fn ensure_host(&self, user_id: Uuid) -> Result<()> {
        match self.registry.get(user_id) {
            Some(p) if p.is_host() => Ok(()),
            _ => Err(Error::PermissionDenied("only the host can edit the wheel".into())),
        }
    }

    fn ensure_not_spinning(&self) -> Result<()> {
        if self.is_spinning() {
            return Err(Error::SpinInProgress);
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Default)]
struct HubIndex {
    rooms: HashMap<Uuid, Arc<Mutex<RoomState>>>,
    codes: HashMap<String, Uuid>,
    wheels: HashMap<Uuid, Uuid>,
}

/// Registry of live rooms, addressed by identity
#[derive(Debug)]
pub struct RoomHub {
    index: RwLock<HubIndex>,
    history_capacity: usize,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(history_capacity: usize) -> Self {
        Self {
            index: RwLock::new(HubIndex::default()),
            history_capacity,
        }
    }

    /// Look up a room's aggregate
    pub fn room(&self, room_id: Uuid) -> Result<Arc<Mutex<RoomState>>> {
        self.read_index()
            .rooms
            .get(&room_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("room {}", room_id)))
    }

    /// Run `f` with exclusive access to one room
    pub fn with_room<R>(&self, room_id: Uuid, f: impl FnOnce(&mut RoomState) -> Result<R>) -> Result<R> {
        let room = self.room(room_id)?;
        let mut guard = lock_room(&room);
        let before = guard.wheel().map(|w| w.id);
        let result = f(&mut guard)?;
        let after = guard.wheel().map(|w| w.id);
        drop(guard);

        // Re-index only when f installed a different wheel
        if before != after {
            let mut index = self.write_index();
            if let Some(old) = before {
                index.wheels.remove(&old);
            }
            if let Some(new) = after {
                index.wheels.insert(new, room_id);
            }
        }
        Ok(result)
    }

    /// Give a room the six-prize default wheel if it has none
    pub fn create_default_wheel(&self, caller: &Identity, room_id: Uuid) -> Result<Wheel> {
        self.with_room(room_id, |room| match room.wheel() {
            Some(wheel) => Ok(wheel.clone()),
            None => room.replace_wheel(caller.user_id, DEFAULT_WHEEL_TITLE, default_segments()),
        })
    }

    pub fn room_count(&self) -> usize {
        self.read_index().rooms.len()
    }

    fn room_for_wheel(&self, wheel_id: Uuid) -> Result<Uuid> {
        self.read_index()
            .wheels
            .get(&wheel_id)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("wheel {}", wheel_id)))
    }

    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, HubIndex> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_index(&self) -> std::sync::RwLockWriteGuard<'_, HubIndex> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RoomHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock a room, recovering the guard if a previous holder panicked
pub fn lock_room(room: &Mutex<RoomState>) -> MutexGuard<'_, RoomState> {
    room.lock().unwrap_or_else(|e| e.into_inner())
}

impl DataService for RoomHub {
    #[instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    fn create_room(&self, caller: &Identity, name: &str, visibility: Visibility) -> Result<Room> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidOperation("room name must not be empty".into()));
        }

        let mut index = self.write_index();
        let code = loop {
            let candidate = generate_join_code();
            if !index.codes.contains_key(&candidate) {
                break candidate;
            }
        };

        let mut state = RoomState::new(
            name.to_string(),
            code.clone(),
            visibility,
            caller.user_id,
            self.history_capacity,
        );
        state.join(caller.user_id, &caller.nickname)?;
        let room = state.snapshot();

        index.codes.insert(code, room.id);
        index.rooms.insert(room.id, Arc::new(Mutex::new(state)));
        info!(room_id = %room.id, code = %room.code, "Room created");
        Ok(room)
    }

    #[instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    fn join_room(&self, caller: &Identity, code: &str, nickname: &str) -> Result<Room> {
        let code = normalize_join_code(code);
        let room_id = self
            .read_index()
            .codes
            .get(&code)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("room with code {}", code)))?;

        self.with_room(room_id, |room| {
            room.join(caller.user_id, nickname)?;
            Ok(room.snapshot())
        })
    }

    fn get_room(&self, room_id: Uuid) -> Result<Room> {
        self.with_room(room_id, |room| Ok(room.snapshot()))
    }

    fn list_public_rooms(&self) -> Result<Vec<Room>> {
        let rooms: Vec<Arc<Mutex<RoomState>>> = self.read_index().rooms.values().cloned().collect();
        let mut public: Vec<Room> = rooms
            .iter()
            .map(|r| lock_room(r).snapshot())
            .filter(|r| r.visibility == Visibility::Public && r.is_active())
            .collect();
        public.sort_by_key(|r| r.created_at);
        Ok(public)
    }

    fn end_room(&self, caller: &Identity, room_id: Uuid) -> Result<Room> {
        self.with_room(room_id, |room| {
            if room.owner_id != caller.user_id {
                return Err(Error::PermissionDenied("only the owner can end the room".into()));
            }
            room.status = RoomStatus::Ended;
            room.touch();
            info!(room_id = %room_id, "Room ended");
            Ok(room.snapshot())
        })
    }

    fn transfer_ownership(&self, caller: &Identity, room_id: Uuid, new_owner: Uuid) -> Result<Room> {
        self.with_room(room_id, |room| {
            if room.owner_id != caller.user_id {
                return Err(Error::PermissionDenied("only the owner can transfer the room".into()));
            }
            if room.participant(new_owner).is_none() {
                return Err(Error::NotFound(format!("participant {}", new_owner)));
            }
            room.owner_id = new_owner;
            room.touch();
            debug!(room_id = %room_id, owner_id = %new_owner, "Ownership transferred");
            Ok(room.snapshot())
        })
    }

    fn create_wheel(
        &self,
        caller: &Identity,
        room_id: Uuid,
        title: &str,
        segments: Vec<Segment>,
    ) -> Result<Wheel> {
        self.with_room(room_id, |room| room.replace_wheel(caller.user_id, title, segments))
    }

    fn update_wheel(&self, caller: &Identity, wheel_id: Uuid, segments: Vec<Segment>) -> Result<Wheel> {
        let room_id = self.room_for_wheel(wheel_id)?;
        self.with_room(room_id, |room| room.update_segments(caller.user_id, wheel_id, segments))
    }

    fn get_wheel(&self, room_id: Uuid) -> Result<Wheel> {
        self.with_room(room_id, |room| {
            room.wheel()
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("wheel for room {}", room_id)))
        })
    }

    fn get_spin_history(&self, room_id: Uuid) -> Result<Vec<SpinResult>> {
        self.with_room(room_id, |room| Ok(room.history().to_vec()))
    }

    fn get_statistics(&self, room_id: Uuid) -> Result<SpinStatistics> {
        self.with_room(room_id, |room| Ok(room.statistics()))
    }
}
