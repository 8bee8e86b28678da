mod context;
mod cooperative;
mod driver;
pub(crate) mod errors;
mod ops;
mod queue;
mod threaded;

use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use compact_str::CompactString;
use ignore_result::Ignore;
use log::debug;
use static_assertions::assert_impl_all;

use self::cooperative::CooperativeScheduler;
use self::driver::Driver;
pub use self::context::{Context, ContextFree};
pub use self::errors::{DigestError, ErrorKind, Result};
pub use self::ops::DigestOps;
use self::queue::FeedQueue;
use self::threaded::{Dispatch, ThreadedScheduler};

/// Per call feed limit applied by cooperative scheduler, so a large chunk does not monopolize
/// caller's runtime.
pub const DEFAULT_FEED_BLOCK_SIZE: usize = 40960;

pub type FeedDoneCallback = Box<dyn Fn(&MessageDigest, Bytes, Result<()>) + Send + Sync>;
pub type DigestReadyCallback = Box<dyn Fn(&MessageDigest, Result<Bytes>) + Send + Sync>;

/// Strategy driving digest backend to completion.
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
pub enum SchedulerKind {
    /// Dedicated worker thread per handle. Results are relayed back to caller's runtime.
    #[strum(serialize = "worker-thread")]
    WorkerThread,
    /// Zero delay polling task on caller's runtime.
    #[strum(serialize = "cooperative")]
    Cooperative,
}

impl Default for SchedulerKind {
    fn default() -> SchedulerKind {
        if cfg!(feature = "worker-thread") {
            SchedulerKind::WorkerThread
        } else {
            SchedulerKind::Cooperative
        }
    }
}

/// Configuration for message digest.
#[non_exhaustive]
pub struct Configuration {
    algorithm: CompactString,
    feed_size: usize,
    feed_block_size: Option<Option<usize>>,
    scheduler: SchedulerKind,
    on_feed_done: Option<FeedDoneCallback>,
    on_digest_ready: Option<DigestReadyCallback>,
}

impl Configuration {
    /// Constructs configuration with algorithm name for diagnosis.
    pub fn new(algorithm: &str) -> Configuration {
        Configuration {
            algorithm: CompactString::new(algorithm),
            feed_size: 0,
            feed_block_size: None,
            scheduler: SchedulerKind::default(),
            on_feed_done: None,
            on_digest_ready: None,
        }
    }

    /// Caps bytes queued but not yet consumed by backend. Zero means unlimited.
    pub fn feed_size(self, feed_size: usize) -> Self {
        Configuration { feed_size, ..self }
    }

    /// Limits bytes offered to backend in one call. Defaults to [DEFAULT_FEED_BLOCK_SIZE] for
    /// cooperative scheduler and unlimited for worker thread.
    pub fn feed_block_size(self, size: Option<usize>) -> Self {
        Configuration { feed_block_size: Some(size), ..self }
    }

    pub fn scheduler(self, scheduler: SchedulerKind) -> Self {
        Configuration { scheduler, ..self }
    }

    /// Callback for each fed chunk, either consumed by backend or cancelled.
    pub fn on_feed_done<F>(self, callback: F) -> Self
    where
        F: Fn(&MessageDigest, Bytes, Result<()>) + Send + Sync + 'static, {
        Configuration { on_feed_done: Some(Box::new(callback)), ..self }
    }

    /// Callback for final digest. Required.
    pub fn on_digest_ready<F>(self, callback: F) -> Self
    where
        F: Fn(&MessageDigest, Result<Bytes>) + Send + Sync + 'static, {
        Configuration { on_digest_ready: Some(Box::new(callback)), ..self }
    }

    fn effective_feed_block_size(&self) -> Result<Option<usize>> {
        match self.feed_block_size {
            Some(Some(0)) => Err(DigestError::with_description(ErrorKind::InvalidArgument, &"zero feed block size")),
            Some(size) => Ok(size),
            None if self.scheduler == SchedulerKind::Cooperative => Ok(Some(DEFAULT_FEED_BLOCK_SIZE)),
            None => Ok(None),
        }
    }
}

impl Debug for Configuration {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("algorithm", &self.algorithm)
            .field("feed_size", &self.feed_size)
            .field("feed_block_size", &self.feed_block_size)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

enum ContextParams {
    Inline(Box<dyn Any + Send>),
    External(Box<dyn Any + Send>),
}

/// Digest backend binding: operation table, digest size and backend private context.
pub struct BackendParams {
    ops: Arc<dyn DigestOps>,
    digest_size: usize,
    context: ContextParams,
    context_free: Option<ContextFree>,
}

impl BackendParams {
    pub fn new(ops: Arc<dyn DigestOps>, digest_size: usize) -> BackendParams {
        BackendParams { ops, digest_size, context: ContextParams::Inline(Box::new(())), context_free: None }
    }

    /// Context owned by handle. Replaces external context if any.
    pub fn inline_context<T: Any + Send>(self, value: T) -> Self {
        BackendParams { context: ContextParams::Inline(Box::new(value)), ..self }
    }

    /// Context owned by caller. [BackendParams::context_free] is required to release it.
    pub fn external_context<T: Any + Send>(self, handle: T) -> Self {
        BackendParams { context: ContextParams::External(Box::new(handle)), ..self }
    }

    pub fn context_free<F>(self, free: F) -> Self
    where
        F: FnOnce(Box<dyn Any + Send>) + Send + 'static, {
        BackendParams { context_free: Some(Box::new(free)), ..self }
    }

    fn into_driver(self) -> Result<(Driver, usize)> {
        if self.digest_size == 0 {
            return Err(DigestError::with_description(ErrorKind::InvalidArgument, &"zero digest size"));
        }
        let context = match self.context {
            ContextParams::Inline(value) => Context::inline(value),
            ContextParams::External(handle) => match self.context_free {
                None => {
                    let err = DigestError::with_description(
                        ErrorKind::InvalidArgument,
                        &"a freeing function is required for external context",
                    );
                    return Err(err);
                },
                Some(free) => Context::external(handle, free),
            },
        };
        Ok((Driver::new(self.ops, context), self.digest_size))
    }
}

/// Counts of queued chunks and their unconsumed bytes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingStats {
    pub chunks: usize,
    pub bytes: usize,
}

pub(crate) enum Scheduler {
    Threaded(ThreadedScheduler),
    Cooperative(CooperativeScheduler),
}

pub(crate) struct State {
    refcnt: u32,
    finished: bool,
    deleted: bool,
    receiving: bool,
    failure: Option<DigestError>,
    pending: FeedQueue,
    scheduler: Scheduler,
}

impl State {
    fn check_feedable(&self) -> Result<()> {
        if self.deleted || self.refcnt < 1 {
            return Err(DigestError::new(ErrorKind::Deleted));
        } else if self.finished {
            return Err(DigestError::new(ErrorKind::Finished));
        } else if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        Ok(())
    }
}

pub(crate) struct Shared {
    id: u64,
    algorithm: CompactString,
    digest_size: usize,
    feed_size: usize,
    feed_block_size: Option<usize>,
    on_feed_done: Option<FeedDoneCallback>,
    on_digest_ready: DigestReadyCallback,
    runtime: tokio::runtime::Handle,
    state: Mutex<State>,
    driver: Mutex<Driver>,
}

static HANDLE_ID: AtomicU64 = AtomicU64::new(1);

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn driver(&self) -> MutexGuard<'_, Driver> {
        self.driver.lock().unwrap()
    }

    fn is_deleted(&self) -> bool {
        self.state().deleted
    }

    fn ref_(&self) {
        self.state().refcnt += 1;
    }

    fn unref(self: &Arc<Self>) {
        let refcnt = {
            let mut state = self.state();
            state.refcnt -= 1;
            state.refcnt
        };
        if refcnt == 0 {
            self.finalize();
        }
    }

    /// Starts scheduler if not yet, and notifies it about new feed.
    fn start(self: &Arc<Self>) -> Result<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        match &mut state.scheduler {
            Scheduler::Threaded(scheduler) => scheduler.start(self, &mut state.refcnt),
            Scheduler::Cooperative(scheduler) => {
                scheduler.start(self, &mut state.refcnt);
                Ok(())
            },
        }
    }

    fn stop(&self) {
        match &mut self.state().scheduler {
            Scheduler::Threaded(scheduler) => scheduler.stop(),
            // Polling task observes deletion in its next step.
            Scheduler::Cooperative(_) => {},
        }
    }

    fn view(self: &Arc<Self>) -> MessageDigest {
        MessageDigest { shared: self.clone(), owned: false }
    }

    fn notify_feed_done(self: &Arc<Self>, input: Bytes, status: Result<()>) {
        if let Some(callback) = &self.on_feed_done {
            callback(&self.view(), input, status);
        }
    }

    fn notify_digest_ready(self: &Arc<Self>, digest: Result<Bytes>) {
        (self.on_digest_ready)(&self.view(), digest);
    }

    fn report_feed(self: &Arc<Self>, input: Bytes, status: Result<()>) {
        self.report(Dispatch::Feed(input, status));
    }

    fn report_digest(self: &Arc<Self>, digest: Result<Bytes>) {
        self.report(Dispatch::Digest(digest));
    }

    fn report(self: &Arc<Self>, dispatch: Dispatch) {
        let dispatch = {
            let mut state = self.state();
            match &mut state.scheduler {
                Scheduler::Threaded(scheduler) => {
                    scheduler.dispatch(dispatch);
                    return;
                },
                Scheduler::Cooperative(_) => dispatch,
            }
        };
        self.ref_();
        if !self.is_deleted() {
            self.deliver(dispatch);
        } else if let Dispatch::Feed(input, _) = dispatch {
            self.notify_feed_done(input, Err(DigestError::new(ErrorKind::Cancelled)));
        }
        self.unref();
    }

    fn deliver(self: &Arc<Self>, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Feed(input, status) => self.notify_feed_done(input, status),
            Dispatch::Digest(digest) => self.notify_digest_ready(digest),
        }
    }

    /// Fails handle after fatal backend error. All queued chunks are reported with the error, so
    /// is the digest if last chunk has been accepted.
    fn fail(self: &Arc<Self>, err: DigestError) {
        let (items, finished) = {
            let mut state = self.state();
            if state.failure.is_some() {
                return;
            }
            state.failure = Some(err.clone());
            let items: Vec<_> = state.pending.drain().collect();
            (items, state.finished)
        };
        debug!("handle {} failed with {} pending chunks: {}", self.id, items.len(), err);
        for item in items {
            self.report_feed(item.input, Err(err.clone()));
        }
        if finished {
            self.report_digest(Err(err));
        }
    }

    fn finalize(self: &Arc<Self>) {
        let (dispatches, pending) = {
            let mut state = self.state();
            let dispatches = match &mut state.scheduler {
                Scheduler::Threaded(scheduler) => scheduler.take_dispatches(),
                Scheduler::Cooperative(_) => Vec::new(),
            };
            let pending: Vec<_> = state.pending.drain().collect();
            state.receiving = false;
            (dispatches, pending)
        };
        debug!("free handle {} pending_feed={}, undelivered={}", self.id, pending.len(), dispatches.len());
        for dispatch in dispatches {
            if let Dispatch::Feed(input, _) = dispatch {
                self.notify_feed_done(input, Err(DigestError::new(ErrorKind::Cancelled)));
            }
        }
        for item in pending {
            self.notify_feed_done(item.input, Err(DigestError::new(ErrorKind::Cancelled)));
        }
        self.driver().cleanup();
    }
}

/// Asynchronous message digest.
///
/// Chunks fed are handed to digest backend by configured scheduler. Outcomes are delivered
/// through callbacks in the tokio runtime where this handle was created.
pub struct MessageDigest {
    shared: Arc<Shared>,
    owned: bool,
}

assert_impl_all!(MessageDigest: Send, Sync);

impl MessageDigest {
    /// Constructs message digest in current tokio runtime.
    pub fn new(config: Configuration, params: BackendParams) -> Result<MessageDigest> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|e| DigestError::new(ErrorKind::NoRuntime).cause_by(e))?;
        let feed_block_size = config.effective_feed_block_size()?;
        let Some(on_digest_ready) = config.on_digest_ready else {
            return Err(DigestError::with_description(ErrorKind::InvalidArgument, &"no digest ready callback"));
        };
        let (driver, digest_size) = params.into_driver()?;
        let scheduler = match config.scheduler {
            SchedulerKind::WorkerThread => Scheduler::Threaded(ThreadedScheduler::default()),
            SchedulerKind::Cooperative => Scheduler::Cooperative(CooperativeScheduler::default()),
        };
        let state = State {
            refcnt: 1,
            finished: false,
            deleted: false,
            receiving: false,
            failure: None,
            pending: FeedQueue::default(),
            scheduler,
        };
        let shared = Shared {
            id: HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            algorithm: config.algorithm,
            digest_size,
            feed_size: config.feed_size,
            feed_block_size,
            on_feed_done: config.on_feed_done,
            on_digest_ready,
            runtime,
            state: Mutex::new(state),
            driver: Mutex::new(driver),
        };
        debug!(
            "handle {} algorithm=\"{}\" scheduler={} digest_size={} feed_size={}",
            shared.id, shared.algorithm, config.scheduler, shared.digest_size, shared.feed_size
        );
        Ok(MessageDigest { shared: Arc::new(shared), owned: true })
    }

    /// Queues chunk for digesting.
    ///
    /// No chunk is accepted after one with `is_last` set. Fails with [ErrorKind::NoSpace] if
    /// configured feed size would be reached, the queue is left untouched in that case.
    pub fn feed(&self, input: Bytes, is_last: bool) -> Result<()> {
        let shared = &self.shared;
        let size = input.len();
        {
            let mut state = shared.state();
            state.check_feedable()?;
            state.pending.push(input, is_last, shared.feed_size)?;
            state.finished = is_last;
        }
        if let Err(err) = shared.start() {
            let mut state = shared.state();
            state.pending.pop_last();
            state.finished = false;
            return Err(err);
        }
        debug!("handle {} fed {} bytes, is_last={}, pending {}", shared.id, size, is_last, self.pending().chunks);
        Ok(())
    }

    /// Deletes this handle.
    ///
    /// Scheduler is stopped, no callbacks are delivered afterwards except cancellations of
    /// pending chunks when the handle is finally released. In-flight digest is discarded.
    pub fn delete(&self) -> Result<()> {
        let shared = &self.shared;
        {
            let mut state = shared.state();
            if state.deleted || state.refcnt < 1 {
                return Err(DigestError::new(ErrorKind::Deleted));
            }
            state.deleted = true;
            debug!(
                "del handle {} refcnt={}, pending_feed={}, receiving={}",
                shared.id,
                state.refcnt,
                state.pending.len(),
                state.receiving
            );
        }
        shared.stop();
        shared.unref();
        Ok(())
    }

    pub fn is_deleted(&self) -> bool {
        self.shared.is_deleted()
    }

    pub fn algorithm(&self) -> &str {
        &self.shared.algorithm
    }

    pub fn digest_size(&self) -> usize {
        self.shared.digest_size
    }

    pub fn pending(&self) -> PendingStats {
        let state = self.shared.state();
        PendingStats { chunks: state.pending.len(), bytes: state.pending.accumulated_tx() }
    }

    /// Accesses backend private context. Waits for in-flight backend operation if any.
    ///
    /// The handle may be deleted inside `f`, it is released after `f` returns. Nested
    /// `with_context` on the same handle deadlocks.
    pub fn with_context<R>(&self, f: impl FnOnce(&mut Context) -> R) -> R {
        let shared = &self.shared;
        let referenced = {
            let mut state = shared.state();
            if state.refcnt > 0 {
                state.refcnt += 1;
            }
            state.refcnt > 0
        };
        let result = f(shared.driver().context_mut());
        if referenced {
            shared.unref();
        }
        result
    }
}

impl Debug for MessageDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDigest")
            .field("id", &self.shared.id)
            .field("algorithm", &self.shared.algorithm)
            .field("digest_size", &self.shared.digest_size)
            .finish()
    }
}

impl Drop for MessageDigest {
    fn drop(&mut self) {
        if self.owned && !self.shared.is_deleted() {
            self.delete().ignore();
        }
    }
}
