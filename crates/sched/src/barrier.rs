//! Frame synchronization between the primary TaskMaster and its auxiliaries.

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct BarrierState {
    /// Frames the primary has completed.
    frame: u64,
    /// Auxiliaries that finished the current frame.
    arrived: usize,
    /// Auxiliaries still running.
    active: usize,
    primary_retired: bool,
}

/// One-primary, many-auxiliary frame barrier.
///
/// An auxiliary starts frame `K + 1` only after the primary signalled the
/// end of frame `K`, and the primary finishes frame `K` only after every
/// active auxiliary has arrived for it.
#[derive(Debug)]
pub struct FrameBarrier {
    state: Mutex<BarrierState>,
    cond: Condvar,
}

impl FrameBarrier {
    pub fn new(auxiliaries: usize) -> Self {
        Self {
            state: Mutex::new(BarrierState {
                frame: 0,
                arrived: 0,
                active: auxiliaries,
                primary_retired: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Frames completed so far.
    pub fn frame(&self) -> u64 {
        self.state.lock().frame
    }

    /// Primary side: wait for every active auxiliary, then open the next
    /// frame. Returns the new frame number.
    pub fn finish_frame(&self) -> u64 {
        let mut state = self.state.lock();
        while state.arrived < state.active {
            self.cond.wait(&mut state);
        }
        state.arrived = 0;
        state.frame += 1;
        self.cond.notify_all();
        state.frame
    }

    /// Auxiliary side: report `frame` finished and block until the primary
    /// opens a later one. Returns immediately once the primary has retired.
    pub fn arrive_and_wait(&self, frame: u64) -> u64 {
        let mut state = self.state.lock();
        if state.primary_retired {
            return state.frame;
        }
        state.arrived += 1;
        self.cond.notify_all();
        while state.frame <= frame && !state.primary_retired {
            self.cond.wait(&mut state);
        }
        state.frame
    }

    /// The primary stopped running frames; release every waiting auxiliary.
    pub fn retire_primary(&self) {
        let mut state = self.state.lock();
        state.primary_retired = true;
        self.cond.notify_all();
    }

    /// An auxiliary stopped running frames; the primary no longer waits for it.
    pub fn retire_auxiliary(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        self.cond.notify_all();
    }
}
