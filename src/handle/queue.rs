use std::collections::VecDeque;

use bytes::Bytes;

use super::errors::{DigestError, ErrorKind, Result};

pub(crate) struct PendingFeed {
    pub input: Bytes,
    pub offset: usize,
    pub is_last: bool,
}

impl PendingFeed {
    fn remaining(&self) -> usize {
        self.input.len() - self.offset
    }
}

/// Snapshot of queue head handed to driver outside lock.
pub(crate) struct FeedHead {
    pub input: Bytes,
    pub offset: usize,
    pub is_last: bool,
}

/// Pending feeds in submission order with count of bytes not yet consumed by backend.
#[derive(Default)]
pub(crate) struct FeedQueue {
    items: VecDeque<PendingFeed>,
    accumulated_tx: usize,
}

impl FeedQueue {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn accumulated_tx(&self) -> usize {
        self.accumulated_tx
    }

    /// Appends input unless it overflows or reaches given non zero cap.
    pub fn push(&mut self, input: Bytes, is_last: bool, feed_size: usize) -> Result<()> {
        let Some(total) = self.accumulated_tx.checked_add(input.len()) else {
            let msg = format!("{} pending bytes plus {} bytes", self.accumulated_tx, input.len());
            return Err(DigestError::with_message(ErrorKind::Overflow, msg));
        };
        if feed_size != 0 && total >= feed_size {
            let msg = format!("{} pending bytes reach feed size {}", total, feed_size);
            return Err(DigestError::with_message(ErrorKind::NoSpace, msg));
        }
        self.items.push_back(PendingFeed { input, offset: 0, is_last });
        self.accumulated_tx = total;
        Ok(())
    }

    /// Reverts last successful push.
    pub fn pop_last(&mut self) -> Option<PendingFeed> {
        let item = self.items.pop_back()?;
        self.accumulated_tx -= item.remaining();
        Some(item)
    }

    pub fn head(&self) -> Option<FeedHead> {
        let item = self.items.front()?;
        Some(FeedHead { input: item.input.clone(), offset: item.offset, is_last: item.is_last })
    }

    /// Records partial consumption of head.
    pub fn advance(&mut self, n: usize) {
        let Some(item) = self.items.front_mut() else {
            return;
        };
        let n = n.min(item.remaining());
        item.offset += n;
        self.accumulated_tx -= n;
    }

    /// Removes fully consumed head.
    pub fn complete(&mut self) -> Option<PendingFeed> {
        let item = self.items.pop_front()?;
        self.accumulated_tx -= item.remaining();
        Some(item)
    }

    pub fn drain(&mut self) -> impl Iterator<Item = PendingFeed> + '_ {
        self.accumulated_tx = 0;
        self.items.drain(..)
    }

    #[cfg(test)]
    pub fn set_accumulated_tx(&mut self, accumulated_tx: usize) {
        self.accumulated_tx = accumulated_tx;
    }

    #[cfg(test)]
    pub fn unconsumed(&self) -> usize {
        self.items.iter().map(PendingFeed::remaining).sum()
    }
}
