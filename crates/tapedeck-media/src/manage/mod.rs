// crates/tapedeck-media/src/manage/mod.rs
//
// The three decoder managers. Each owns a worker thread that sleeps on a
// condvar (100-200 ms timeout), wakes when the render driver reports a new
// current frame, plans a target set of segments or a window, loads what's
// missing through its decoder and evicts what fell out of the plan.
//
// stop() everywhere: raise the manager stop flag, raise the decoder's stop
// flag (to break out of a mid-range decode), notify, join.

pub mod cached;
pub mod full_res;
pub mod low_cached;
pub mod plan;

pub use cached::CachedManager;
pub use full_res::FullResManager;
pub use low_cached::LowCachedManager;

use std::collections::BTreeSet;

/// Book-keeping shared between a manager thread and its public handle,
/// guarded by the manager mutex the condvar waits on.
pub(crate) struct Tracking {
    pub loaded:     BTreeSet<usize>,
    pub last_frame: Option<usize>,
}

impl Tracking {
    pub(crate) fn new() -> Self {
        Self {
            loaded:     BTreeSet::new(),
            last_frame: None,
        }
    }
}
