//! # Simulated RC receiver
//!
//! Turns key-down events into stick positions the flight controller accepts via
//! MSP_SET_RAW_RC. Terminals only report key presses, never releases, so a
//! direction key holds its stick at the extreme until no repeat has arrived for
//! the key timeout; a periodic [`StickSimulator::decay`] then recentres it.
//!
//! `w`/`s` throttle and `a`/`d` yaw drive the left stick, `i`/`k` pitch and
//! `j`/`l` roll the right one. `1`..`8` flip AUX1..AUX8 between low and high.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::msp::{ChannelMap, PayloadError};

pub const RX_LOW: u16 = 1000;
pub const RX_MID: u16 = 1500;
pub const RX_HIGH: u16 = 2000;

pub const AUX_CHANNELS: usize = 8;

pub const DEFAULT_KEY_TIMEOUT: Duration = Duration::from_millis(100);

const KEY_COUNT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RxKey {
    ThrottleUp,
    YawLeft,
    ThrottleDown,
    YawRight,
    PitchUp,
    RollLeft,
    PitchDown,
    RollRight,
    Aux1,
    Aux2,
    Aux3,
    Aux4,
    Aux5,
    Aux6,
    Aux7,
    Aux8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Roll,
    Pitch,
    Yaw,
    Throttle,
}

impl RxKey {
    pub const ALL: [RxKey; KEY_COUNT] = [
        RxKey::ThrottleUp,
        RxKey::YawLeft,
        RxKey::ThrottleDown,
        RxKey::YawRight,
        RxKey::PitchUp,
        RxKey::RollLeft,
        RxKey::PitchDown,
        RxKey::RollRight,
        RxKey::Aux1,
        RxKey::Aux2,
        RxKey::Aux3,
        RxKey::Aux4,
        RxKey::Aux5,
        RxKey::Aux6,
        RxKey::Aux7,
        RxKey::Aux8,
    ];

    pub fn from_char(c: char) -> Option<RxKey> {
        let key = match c.to_ascii_lowercase() {
            'w' => RxKey::ThrottleUp,
            'a' => RxKey::YawLeft,
            's' => RxKey::ThrottleDown,
            'd' => RxKey::YawRight,
            'i' => RxKey::PitchUp,
            'j' => RxKey::RollLeft,
            'k' => RxKey::PitchDown,
            'l' => RxKey::RollRight,
            '1'..='8' => RxKey::ALL[8 + (c as usize - '1' as usize)],
            _ => return None,
        };
        Some(key)
    }

    fn index(self) -> usize {
        self as usize
    }

    /// Axis, the value a press snaps it to, and the key pulling the other way.
    fn stick(self) -> Option<(Axis, u16, RxKey)> {
        match self {
            RxKey::ThrottleUp => Some((Axis::Throttle, RX_HIGH, RxKey::ThrottleDown)),
            RxKey::ThrottleDown => Some((Axis::Throttle, RX_LOW, RxKey::ThrottleUp)),
            RxKey::YawLeft => Some((Axis::Yaw, RX_LOW, RxKey::YawRight)),
            RxKey::YawRight => Some((Axis::Yaw, RX_HIGH, RxKey::YawLeft)),
            RxKey::PitchUp => Some((Axis::Pitch, RX_HIGH, RxKey::PitchDown)),
            RxKey::PitchDown => Some((Axis::Pitch, RX_LOW, RxKey::PitchUp)),
            RxKey::RollLeft => Some((Axis::Roll, RX_LOW, RxKey::RollRight)),
            RxKey::RollRight => Some((Axis::Roll, RX_HIGH, RxKey::RollLeft)),
            _ => None,
        }
    }

    fn aux(self) -> Option<usize> {
        let index = self.index();
        (index >= 8).then(|| index - 8)
    }
}

/// Point-in-time copy of every simulated channel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sticks {
    pub roll: u16,
    pub pitch: u16,
    pub yaw: u16,
    pub throttle: u16,
    pub aux: [u16; AUX_CHANNELS],
}

impl Default for Sticks {
    fn default() -> Self {
        Self {
            roll: RX_MID,
            pitch: RX_MID,
            yaw: RX_MID,
            throttle: RX_MID,
            aux: [RX_LOW; AUX_CHANNELS],
        }
    }
}

impl Sticks {
    fn axis_mut(&mut self, axis: Axis) -> &mut u16 {
        match axis {
            Axis::Roll => &mut self.roll,
            Axis::Pitch => &mut self.pitch,
            Axis::Yaw => &mut self.yaw,
            Axis::Throttle => &mut self.throttle,
        }
    }

    /// Channel values in MSP_SET_RAW_RC order: the four sticks at the slots the
    /// channel map names, then AUX1..AUX8.
    pub fn to_channels(&self, map: &ChannelMap) -> Result<Vec<u16>, PayloadError> {
        let slots = map.stick_slots()?;
        let mut channels = vec![RX_MID; 4];
        channels[slots[0]] = self.roll;
        channels[slots[1]] = self.pitch;
        channels[slots[2]] = self.yaw;
        channels[slots[3]] = self.throttle;
        channels.extend_from_slice(&self.aux);
        Ok(channels)
    }
}

#[derive(Default)]
struct StickState {
    sticks: Sticks,
    last_press: [Option<Instant>; KEY_COUNT],
}

/// Shared between the key-input task and the decay/send timer; every access
/// goes through one lock so the timer never sees half an update.
pub struct StickSimulator {
    state: Mutex<StickState>,
    key_timeout: Duration,
}

impl StickSimulator {
    pub fn new(key_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(StickState::default()),
            key_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StickState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key_timeout(&self) -> Duration {
        self.key_timeout
    }

    pub fn press(&self, key: RxKey) {
        self.press_at(key, Instant::now());
    }

    pub fn press_at(&self, key: RxKey, now: Instant) {
        let mut state = self.lock();
        if let Some((axis, value, opposite)) = key.stick() {
            *state.sticks.axis_mut(axis) = value;
            state.last_press[opposite.index()] = None;
        }
        if let Some(aux) = key.aux() {
            let channel = &mut state.sticks.aux[aux];
            *channel = if *channel == RX_HIGH { RX_LOW } else { RX_HIGH };
        }
        state.last_press[key.index()] = Some(now);
    }

    pub fn decay(&self) {
        self.decay_at(Instant::now());
    }

    /// Recentre every axis whose key has not repeated within the key timeout.
    pub fn decay_at(&self, now: Instant) {
        let timeout = self.key_timeout;
        let mut state = self.lock();
        let StickState { sticks, last_press } = &mut *state;
        for key in RxKey::ALL {
            let Some(pressed) = last_press[key.index()] else {
                continue;
            };
            if now.saturating_duration_since(pressed) > timeout {
                last_press[key.index()] = None;
                if let Some((axis, _, _)) = key.stick() {
                    *sticks.axis_mut(axis) = RX_MID;
                }
            }
        }
    }

    pub fn sticks(&self) -> Sticks {
        self.lock().sticks
    }

    /// Centre all sticks, drop AUX channels low and forget pending presses.
    pub fn reset(&self) {
        *self.lock() = StickState::default();
    }

    pub fn to_channels(&self, map: &ChannelMap) -> Result<Vec<u16>, PayloadError> {
        self.lock().sticks.to_channels(map)
    }
}

impl Default for StickSimulator {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_TIMEOUT)
    }
}
