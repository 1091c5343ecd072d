//! Adaptive update-interval state machine, fed by every `update` reply (and
//! the interval hints a `config` reply may also carry) and read by the
//! sender loop before each tick.

use crate::messages::UpdateResponse;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct CadenceState {
    pub update_wait: i64,
    pub listener_update_interval_seconds: i64,
    pub listener_outage_interval_seconds: i64,
    pub send_col_data: i64,
}

impl CadenceState {
    pub fn initial(configured_fast_delay: i64) -> Self {
        let _ = configured_fast_delay;
        Self {
            update_wait: 2,
            listener_update_interval_seconds: 60,
            listener_outage_interval_seconds: 300,
            send_col_data: 1,
        }
    }
}

/// Owns the cadence cell shared between the receiver loop (writer) and the
/// sender loop (reader). A `parking_lot::Mutex` rather than an atomic bundle
/// because the four fields must be read and updated together.
pub struct CadenceController {
    configured_fast_delay: i64,
    state: Mutex<CadenceState>,
}

impl CadenceController {
    pub fn new(configured_fast_delay: i64) -> Self {
        Self {
            configured_fast_delay,
            state: Mutex::new(CadenceState::initial(configured_fast_delay)),
        }
    }

    pub fn snapshot(&self) -> CadenceState {
        *self.state.lock()
    }

    /// Applies the interval hints carried in a `config` reply's `host`
    /// subtree, if present. A `config` reply never touches `update_wait` or
    /// the collector gate directly -- only the intervals the next `update`
    /// transition reads.
    pub fn apply_config_intervals(
        &self,
        update_interval_seconds: Option<i64>,
        outage_interval_seconds: Option<i64>,
    ) {
        if update_interval_seconds.is_none() && outage_interval_seconds.is_none() {
            return;
        }
        let mut state = self.state.lock();
        if let Some(interval) = update_interval_seconds {
            state.listener_update_interval_seconds = interval;
        }
        if let Some(outage) = outage_interval_seconds {
            state.listener_outage_interval_seconds = outage;
        }
    }

    /// Applies one `update` reply's transition. Pure arithmetic over `state`
    /// plus the response fields -- same inputs always yield the same
    /// outputs, independent of call history.
    pub fn apply(&self, response: &UpdateResponse) {
        let mut state = self.state.lock();

        if let Some(interval) = response.listener_update_interval_seconds {
            state.listener_update_interval_seconds = interval;
        }
        if let Some(outage) = response.listener_outage_interval_seconds {
            state.listener_outage_interval_seconds = outage;
        }

        let (mut update_wait, col_delta) = if response.update_fast {
            (self.configured_fast_delay, 1)
        } else {
            let col_wait =
                state.listener_update_interval_seconds - response.last_col_update_offset_sec;
            let outage_wait =
                state.listener_outage_interval_seconds - response.last_update_offset_sec;
            if col_wait <= outage_wait {
                (col_wait, 1)
            } else {
                (outage_wait, 0)
            }
        };

        if update_wait < 0 {
            update_wait = self.configured_fast_delay;
        }

        state.update_wait = update_wait;
        state.send_col_data += col_delta;
    }

    /// Consumes one unit of the collector gate: `true` means this tick's
    /// `update` should carry collector payloads. A negative counter (missed
    /// responses) is treated as "at least one full payload is owed".
    pub fn take_send_col_data(&self) -> bool {
        let mut state = self.state.lock();
        if state.send_col_data < 0 {
            state.send_col_data = 1;
        }
        if state.send_col_data > 0 {
            state.send_col_data -= 1;
            true
        } else {
            false
        }
    }
}
