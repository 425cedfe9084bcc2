//! Spin coordination for a single wheel
//!
//! The coordinator owns the "spin in progress" lock. A wheel is either idle
//! or spinning exactly one spin; the canonical `SpinResult` is produced here
//! and nowhere else.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Participant, SpinResult, Wheel};
use crate::{rotation, selection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinState {
    Idle,
    Spinning { spin_id: Uuid },
}

/// Per-wheel spin state machine
#[derive(Debug, Clone)]
pub struct SpinCoordinator {
    wheel_id: Uuid,
    state: SpinState,
}

impl SpinCoordinator {
    pub fn new(wheel_id: Uuid) -> Self {
        Self {
            wheel_id,
            state: SpinState::Idle,
        }
    }

    pub fn wheel_id(&self) -> Uuid {
        self.wheel_id
    }

    pub fn state(&self) -> SpinState {
        self.state
    }

    pub fn is_spinning(&self) -> bool {
        matches!(self.state, SpinState::Spinning { .. })
    }

    /// IDLE -> SPINNING.
    ///
    /// Only the host may spin, and only while idle. On success the wheel is
    /// locked until [`acknowledge_end`](Self::acknowledge_end) is called with
    /// the returned result's id.
    pub fn request_spin(
        &mut self,
        requester: &Participant,
        wheel: &Wheel,
        seed: u64,
    ) -> Result<SpinResult> {
        if !requester.role.can_spin() {
            debug!(user_id = %requester.user_id, role = %requester.role, "Spin refused: not host");
            return Err(Error::UnauthorizedSpin);
        }
        if self.is_spinning() {
            return Err(Error::SpinInProgress);
        }
        if wheel.id != self.wheel_id {
            return Err(Error::InvalidOperation(format!(
                "coordinator for wheel {} asked to spin wheel {}",
                self.wheel_id, wheel.id
            )));
        }

        let winner = selection::select(&wheel.segments, seed)?;
        let rotation = rotation::resolve_angle(winner.order, wheel.segments.len() as u32)?;

        let result = SpinResult {
            id: Uuid::new_v4(),
            room_id: wheel.room_id,
            wheel_id: wheel.id,
            segment_id: winner.id,
            result: winner.text.clone(),
            seed,
            spinner_id: requester.user_id,
            spinner_nickname: requester.nickname.clone(),
            rotation,
            spun_at: Utc::now(),
        };

        self.state = SpinState::Spinning { spin_id: result.id };
        info!(
            wheel_id = %self.wheel_id,
            spin_id = %result.id,
            winner = %result.result,
            rotation = result.rotation,
            "Spin accepted"
        );
        Ok(result)
    }

    /// SPINNING -> IDLE, once the result has been broadcast.
    ///
    /// Acknowledging a spin that is not the current one is a no-op and
    /// returns `false`.
    pub fn acknowledge_end(&mut self, spin_id: Uuid) -> bool {
        match self.state {
            SpinState::Spinning { spin_id: current } if current == spin_id => {
                self.state = SpinState::Idle;
                debug!(wheel_id = %self.wheel_id, spin_id = %spin_id, "Spin ended");
                true
            }
            _ => false,
        }
    }
}
