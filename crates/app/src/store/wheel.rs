//! Wheel projection: active wheel, in-flight spins and history
//!
//! Spins are keyed by spin id (the SpinResult identity). Each in-flight spin
//! only moves forward through started, resulted and ended; a spin that has
//! both ended and produced its result is retired into `finished`, after which
//! any redelivery of its events is ignored.

use std::collections::{HashMap, HashSet};

use spinroom_core::{Segment, SpinResult, Wheel};
use spinroom_net::WheelBroadcast;
use uuid::Uuid;

/// How far a spin has progressed, as seen by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SpinPhase {
    Started,
    Resulted,
    Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpinRecord {
    pub spin_id: Uuid,
    pub phase: SpinPhase,
    pub seed: Option<u64>,
    pub spinner_nickname: Option<String>,
    pub result: Option<SpinResult>,
}

impl SpinRecord {
    fn new(spin_id: Uuid) -> Self {
        Self {
            spin_id,
            phase: SpinPhase::Started,
            seed: None,
            spinner_nickname: None,
            result: None,
        }
    }

    fn advance(&mut self, phase: SpinPhase) {
        self.phase = self.phase.max(phase);
    }
}

/// The wheel as last announced
#[derive(Debug, Clone, PartialEq)]
pub struct WheelView {
    pub wheel_id: Uuid,
    pub title: String,
    pub revision: u64,
    pub segments: Vec<Segment>,
}

impl From<Wheel> for WheelView {
    fn from(wheel: Wheel) -> Self {
        Self {
            wheel_id: wheel.id,
            title: wheel.title,
            revision: wheel.revision,
            segments: wheel.segments,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WheelProjection {
    wheel: Option<WheelView>,
    in_flight: HashMap<Uuid, SpinRecord>,
    finished: HashSet<Uuid>,
    /// Sorted by (spun_at, id)
    history: Vec<SpinResult>,
    /// Spin whose result never arrived in time
    degraded: Option<Uuid>,
}

impl WheelProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wheel(&self) -> Option<&WheelView> {
        self.wheel.as_ref()
    }

    pub fn history(&self) -> &[SpinResult] {
        &self.history
    }

    pub fn last_result(&self) -> Option<&SpinResult> {
        self.history.last()
    }

    /// A spin that has started but not yet ended
    pub fn active_spin(&self) -> Option<&SpinRecord> {
        self.in_flight
            .values()
            .filter(|r| r.phase < SpinPhase::Ended)
            .max_by_key(|r| r.result.as_ref().map(|res| res.spun_at))
    }

    pub fn spin(&self, spin_id: Uuid) -> Option<&SpinRecord> {
        self.in_flight.get(&spin_id)
    }

    pub fn has_result(&self, spin_id: Uuid) -> bool {
        self.finished.contains(&spin_id) || self.history.iter().any(|r| r.id == spin_id)
    }

    /// True while a spin result is overdue; cleared by its arrival or a resync
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    /// Mark an in-flight spin as overdue. No-op if its result is already in.
    pub fn degrade(&mut self, spin_id: Uuid) -> bool {
        if self.has_result(spin_id) || !self.in_flight.contains_key(&spin_id) {
            return false;
        }
        self.degraded = Some(spin_id);
        true
    }

    /// Merge the data service's view: active wheel plus full spin history.
    ///
    /// A spin is recorded in history the moment it is accepted, so every
    /// spin announced before the fetch is in it. All of them retire; any
    /// other in-flight record is a phantom and is dropped.
    pub fn load_snapshot(&mut self, wheel: Option<Wheel>, history: Vec<SpinResult>) {
        if let Some(wheel) = wheel {
            let current = self.wheel.as_ref();
            let stale = current.is_some_and(|w| w.wheel_id == wheel.id && w.revision > wheel.revision);
            if !stale {
                self.wheel = Some(wheel.into());
            }
        }

        for result in history {
            self.finished.insert(result.id);
            self.record_history(result);
        }
        self.in_flight.clear();
        self.degraded = None;
    }

    /// Apply a wheel broadcast; returns whether the projection changed
    pub fn apply(&mut self, event: &WheelBroadcast) -> bool {
        match event {
            WheelBroadcast::SpinStarted {
                spin_id,
                seed,
                spinner_nickname,
            } => {
                if self.finished.contains(spin_id) {
                    return false;
                }
                let record = self
                    .in_flight
                    .entry(*spin_id)
                    .or_insert_with(|| SpinRecord::new(*spin_id));
                if record.seed.is_some() {
                    return false;
                }
                record.seed = Some(*seed);
                record.spinner_nickname = Some(spinner_nickname.clone());
                true
            }
            WheelBroadcast::SpinResult { result } => {
                if self.finished.contains(&result.id) {
                    return false;
                }
                let record = self
                    .in_flight
                    .entry(result.id)
                    .or_insert_with(|| SpinRecord::new(result.id));
                if record.result.is_some() {
                    return false;
                }
                record.advance(SpinPhase::Resulted);
                record.result = Some(result.clone());
                record.spinner_nickname.get_or_insert_with(|| result.spinner_nickname.clone());
                record.seed.get_or_insert(result.seed);

                self.record_history(result.clone());
                if self.degraded == Some(result.id) {
                    self.degraded = None;
                }
                self.retire_if_done(result.id);
                true
            }
            WheelBroadcast::SpinEnded { spin_id } => {
                if self.finished.contains(spin_id) {
                    return false;
                }
                let record = self
                    .in_flight
                    .entry(*spin_id)
                    .or_insert_with(|| SpinRecord::new(*spin_id));
                if record.phase == SpinPhase::Ended {
                    return false;
                }
                record.advance(SpinPhase::Ended);
                self.retire_if_done(*spin_id);
                true
            }
            WheelBroadcast::WheelUpdated {
                wheel_id,
                title,
                revision,
                segments,
            } => {
                if let Some(current) = &self.wheel {
                    if current.wheel_id == *wheel_id && current.revision >= *revision {
                        return false;
                    }
                }
                self.wheel = Some(WheelView {
                    wheel_id: *wheel_id,
                    title: title.clone(),
                    revision: *revision,
                    segments: segments.clone(),
                });
                true
            }
        }
    }

    fn retire_if_done(&mut self, spin_id: Uuid) {
        let done = self
            .in_flight
            .get(&spin_id)
            .is_some_and(|r| r.phase == SpinPhase::Ended && r.result.is_some());
        if done {
            self.in_flight.remove(&spin_id);
            self.finished.insert(spin_id);
        }
    }

    fn record_history(&mut self, result: SpinResult) {
        if self.history.iter().any(|r| r.id == result.id) {
            return;
        }
        let key = (result.spun_at, result.id);
        let at = self.history.partition_point(|r| (r.spun_at, r.id) <= key);
        self.history.insert(at, result);
    }
}
