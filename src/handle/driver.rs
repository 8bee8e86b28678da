use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};

use super::context::Context;
use super::errors::{is_transient, DigestError};
use super::ops::DigestOps;
use super::queue::FeedHead;
use super::Shared;

struct DigestSlot {
    buf: Vec<u8>,
    offset: usize,
}

/// Backend table, its context and in-flight digest. Only the driving context locks it.
pub(crate) struct Driver {
    ops: Arc<dyn DigestOps>,
    context: Context,
    digest: Option<DigestSlot>,
}

impl Driver {
    pub fn new(ops: Arc<dyn DigestOps>, context: Context) -> Driver {
        Driver { ops, context, digest: None }
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    pub fn cleanup(&mut self) {
        self.digest = None;
        self.ops.cleanup(&mut self.context);
        self.context.release();
    }
}

/// Outcome of one drive step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    Idle,
    Partial,
    Completed,
    Retry,
    Failed,
}

impl Shared {
    /// Feeds queue head to backend once.
    pub(super) fn feed_blob(self: &Arc<Self>) -> Step {
        let head = self.state().pending.head();
        let Some(FeedHead { input, offset, is_last }) = head else {
            warn!("no pending feed for handle {}", self.id);
            return Step::Idle;
        };
        let mut len = input.len() - offset;
        let mut is_last = is_last;
        if let Some(max) = self.feed_block_size {
            if len > max {
                len = max;
                is_last = false;
            }
        }
        let data = &input[offset..offset + len];
        let result = {
            let mut guard = self.driver();
            let driver = &mut *guard;
            driver.ops.feed(&mut driver.context, data, is_last)
        };
        match result {
            Ok(n) => {
                debug!("handle {} feed {} bytes at offset {} is_last={}: {} bytes", self.id, len, offset, is_last, n);
                let n = if n > len {
                    warn!("handle {} backend consumed {} bytes more than offered {}", self.id, n, len);
                    len
                } else {
                    n
                };
                if offset + n < input.len() {
                    self.state().pending.advance(n);
                    return Step::Partial;
                }
                if is_last {
                    self.setup_receive_digest();
                }
                let item = self.state().pending.complete();
                if let Some(item) = item {
                    self.report_feed(item.input, Ok(()));
                }
                Step::Completed
            },
            Err(err) if is_transient(&err) => Step::Retry,
            Err(err) => {
                warn!("couldn't feed handle {} with {} bytes at offset {}: {}", self.id, len, offset, err);
                self.fail(DigestError::from_backend(err));
                Step::Failed
            },
        }
    }

    fn setup_receive_digest(&self) {
        {
            let mut driver = self.driver();
            if driver.digest.is_some() {
                warn!("handle {} already has a digest to be received", self.id);
                return;
            }
            driver.digest = Some(DigestSlot { buf: vec![0; self.digest_size], offset: 0 });
        }
        self.state().receiving = true;
        debug!("handle {} to receive digest of {} bytes", self.id, self.digest_size);
    }

    pub(super) fn has_pending(&self) -> bool {
        !self.state().pending.is_empty()
    }

    pub(super) fn is_receiving(&self) -> bool {
        self.state().receiving
    }

    /// Reads digest from backend once.
    pub(super) fn receive_digest(self: &Arc<Self>) -> Step {
        let mut guard = self.driver();
        let driver = &mut *guard;
        let Some(slot) = driver.digest.as_mut() else {
            return Step::Idle;
        };
        let len = slot.buf.len() - slot.offset;
        let result = driver.ops.read_digest(&mut driver.context, &mut slot.buf[slot.offset..]);
        let digest = match result {
            Ok(n) => {
                debug!("handle {} read digest {} bytes at offset {}: {} bytes", self.id, len, slot.offset, n);
                slot.offset += n.min(len);
                if slot.offset < slot.buf.len() {
                    return Step::Partial;
                }
                let buf = std::mem::take(&mut slot.buf);
                driver.digest = None;
                Ok(Bytes::from(buf))
            },
            Err(err) if is_transient(&err) => return Step::Retry,
            Err(err) => {
                warn!("couldn't receive digest of handle {} with {} bytes: {}", self.id, len, err);
                driver.digest = None;
                Err(DigestError::from_backend(err))
            },
        };
        drop(guard);
        let step = {
            let mut state = self.state();
            state.receiving = false;
            match &digest {
                Ok(_) => Step::Completed,
                Err(err) => {
                    state.failure = Some(err.clone());
                    Step::Failed
                },
            }
        };
        self.report_digest(digest);
        step
    }
}
