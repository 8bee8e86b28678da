use std::sync::Arc;

use log::debug;

use super::{Scheduler, Shared};

/// Zero delay polling task in caller's runtime. Backend calls and callbacks share that runtime.
#[derive(Default)]
pub(crate) struct CooperativeScheduler {
    polling: bool,
}

impl CooperativeScheduler {
    pub fn start(&mut self, shared: &Arc<Shared>, refcnt: &mut u32) {
        if self.polling {
            return;
        }
        self.polling = true;
        // Reference owned by polling task.
        *refcnt += 1;
        shared.runtime.spawn(poll(shared.clone()));
    }
}

async fn poll(shared: Arc<Shared>) {
    while shared.poll_once() {
        tokio::task::yield_now().await;
    }
    shared.unref();
}

impl Shared {
    /// Drives backend one step. Returns whether there is more to do.
    pub(super) fn poll_once(self: &Arc<Self>) -> bool {
        self.ref_();
        if !self.is_deleted() && self.has_pending() {
            self.feed_blob();
        }
        if !self.is_deleted() && self.is_receiving() {
            self.receive_digest();
        }
        let more = {
            let mut guard = self.state();
            let state = &mut *guard;
            debug!("handle {} polled pending={}, receiving={}", self.id, state.pending.len(), state.receiving);
            let more = !state.deleted && (!state.pending.is_empty() || state.receiving);
            if !more {
                if let Scheduler::Cooperative(scheduler) = &mut state.scheduler {
                    scheduler.polling = false;
                }
            }
            more
        };
        self.unref();
        more
    }
}
