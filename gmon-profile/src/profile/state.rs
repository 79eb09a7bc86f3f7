//! Session state machine.

use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ProfileState {
    Off = 0,
    On = 1,
    /// The arc table overflowed. Terminal for the session.
    Error = 2,
}

impl ProfileState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ProfileState::On,
            2 => ProfileState::Error,
            _ => ProfileState::Off,
        }
    }
}

/// Atomic holder for [`ProfileState`] that enforces the legal transitions.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: ProfileState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub(crate) fn get(&self) -> ProfileState {
        ProfileState::from_u8(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn is_on(&self) -> bool {
        self.0.load(Ordering::Relaxed) == ProfileState::On as u8
    }

    /// Off → On. Returns false if the session is in `Error`.
    pub(crate) fn start(&self) -> bool {
        self.transition(ProfileState::Off, ProfileState::On) || self.is_on()
    }

    /// On → Off. Returns false if the session is in `Error`.
    pub(crate) fn stop(&self) -> bool {
        self.transition(ProfileState::On, ProfileState::Off) || self.get() == ProfileState::Off
    }

    /// On → Error. Returns true only for the call that performed the transition.
    pub(crate) fn fail(&self) -> bool {
        self.transition(ProfileState::On, ProfileState::Error)
    }

    fn transition(&self, from: ProfileState, to: ProfileState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }
}
