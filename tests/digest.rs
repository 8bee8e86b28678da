use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use bytes::Bytes;
use digest_feeder::prelude::*;
use lazy_static::lazy_static;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

const XOR_DIGEST_SIZE: usize = 32;

lazy_static! {
    static ref INPUT: Bytes = Bytes::from((0..100u8).collect::<Vec<_>>());
}

#[derive(Debug, PartialEq)]
enum Event {
    Fed(Bytes, Option<DigestErrorKind>),
    Digest(Result<Bytes, DigestErrorKind>),
}

struct Events {
    thread: ThreadId,
    receiver: mpsc::UnboundedReceiver<(ThreadId, Event)>,
}

impl Events {
    async fn next(&mut self) -> Event {
        let (thread, event) =
            tokio::time::timeout(Duration::from_secs(10), self.receiver.recv()).await.unwrap().unwrap();
        assert_eq!(self.thread, thread, "callback invoked out of creating runtime");
        event
    }

    async fn take(&mut self, n: usize) -> Vec<Event> {
        let mut events = Vec::with_capacity(n);
        for _ in 0..n {
            events.push(self.next().await);
        }
        events
    }

    async fn assert_idle(&mut self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(self.receiver.try_recv().is_err());
    }
}

fn configuration(scheduler: SchedulerKind) -> (DigestConfiguration, Events) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let digest_sender = sender.clone();
    let config = DigestConfiguration::new("test")
        .scheduler(scheduler)
        .on_feed_done(move |_, input, status| {
            sender.send((thread::current().id(), Event::Fed(input, status.err().map(|e| e.kind())))).ok();
        })
        .on_digest_ready(move |_, digest| {
            digest_sender.send((thread::current().id(), Event::Digest(digest.map_err(|e| e.kind())))).ok();
        });
    (config, Events { thread: thread::current().id(), receiver })
}

fn fed(input: &[u8]) -> Event {
    Event::Fed(Bytes::copy_from_slice(input), None)
}

fn xor_digest(input: &[u8]) -> Bytes {
    let mut digest = vec![0u8; XOR_DIGEST_SIZE];
    for (i, byte) in input.iter().enumerate() {
        digest[i % XOR_DIGEST_SIZE] ^= byte;
    }
    Bytes::from(digest)
}

#[derive(Default)]
struct XorState {
    digest: [u8; XOR_DIGEST_SIZE],
    fed: usize,
    read: usize,
}

/// Backend progressing at most `chunk` bytes per call.
struct XorOps {
    chunk: usize,
}

impl DigestOps for XorOps {
    fn feed(&self, context: &mut DigestContext, data: &[u8], _is_last: bool) -> io::Result<usize> {
        let state = context.get_mut::<XorState>().unwrap();
        let n = self.chunk.min(data.len());
        for byte in &data[..n] {
            state.digest[state.fed % XOR_DIGEST_SIZE] ^= byte;
            state.fed += 1;
        }
        Ok(n)
    }

    fn read_digest(&self, context: &mut DigestContext, buf: &mut [u8]) -> io::Result<usize> {
        let state = context.get_mut::<XorState>().unwrap();
        let n = self.chunk.min(buf.len());
        buf[..n].copy_from_slice(&state.digest[state.read..state.read + n]);
        state.read += n;
        Ok(n)
    }

    fn cleanup(&self, _context: &mut DigestContext) {}
}

const GATE_CLOSED: u8 = 0;
const GATE_OPEN: u8 = 1;
const GATE_BROKEN: u8 = 2;

/// Backend refusing to make progress until opened.
#[derive(Default)]
struct GateOps {
    mode: AtomicU8,
    reads_blocked: AtomicBool,
    consumed: AtomicUsize,
    cleanups: AtomicUsize,
}

impl GateOps {
    fn set(&self, mode: u8) {
        self.mode.store(mode, Ordering::SeqCst);
    }

    fn check(&self) -> io::Result<()> {
        match self.mode.load(Ordering::SeqCst) {
            GATE_CLOSED => Err(io::ErrorKind::WouldBlock.into()),
            GATE_OPEN => Ok(()),
            _ => Err(io::Error::new(io::ErrorKind::Other, "gate broken")),
        }
    }
}

async fn wait_cleanup(ops: &GateOps) {
    for _ in 0..1000 {
        if ops.cleanups.load(Ordering::SeqCst) != 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(1, ops.cleanups.load(Ordering::SeqCst));
}

impl DigestOps for GateOps {
    fn feed(&self, _context: &mut DigestContext, data: &[u8], _is_last: bool) -> io::Result<usize> {
        self.check()?;
        self.consumed.fetch_add(data.len(), Ordering::SeqCst);
        Ok(data.len())
    }

    fn read_digest(&self, _context: &mut DigestContext, buf: &mut [u8]) -> io::Result<usize> {
        self.check()?;
        if self.reads_blocked.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        buf.fill(0xff);
        Ok(buf.len())
    }

    fn cleanup(&self, _context: &mut DigestContext) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

async fn assert_sha1_digest(scheduler: SchedulerKind) {
    let (config, mut events) = configuration(scheduler);
    let params = SoftwareOps::new(DigestType::SHA1).transfer_limit(7).into_params().unwrap();
    let digest = MessageDigest::new(config, params).unwrap();
    assert_eq!(20, digest.digest_size());

    digest.feed(INPUT.slice(..30), false).unwrap();
    digest.feed(INPUT.slice(30..60), false).unwrap();
    digest.feed(INPUT.slice(60..), true).unwrap();

    let events = events.take(4).await;
    assert_eq!(fed(&INPUT[..30]), events[0]);
    assert_eq!(fed(&INPUT[30..60]), events[1]);
    assert_eq!(fed(&INPUT[60..]), events[2]);
    let Event::Digest(Ok(sha1)) = &events[3] else {
        panic!("expect digest, got {:?}", events[3]);
    };
    assert_eq!("1e6634bfaebc0348298105923d0f26e47aa33ff5", hex::encode(sha1));
    assert_eq!(PendingStats::default(), digest.pending());

    digest.delete().unwrap();
    assert!(digest.is_deleted());
}

#[test_log::test(tokio::test)]
async fn test_sha1_worker_thread() {
    assert_sha1_digest(SchedulerKind::WorkerThread).await;
}

#[test_log::test(tokio::test)]
async fn test_sha1_cooperative() {
    assert_sha1_digest(SchedulerKind::Cooperative).await;
}

async fn assert_partial_digest(config: DigestConfiguration, mut events: Events) {
    let params = DigestBackendParams::new(Arc::new(XorOps { chunk: 9 }), XOR_DIGEST_SIZE)
        .inline_context(XorState::default());
    let digest = MessageDigest::new(config, params).unwrap();

    digest.feed(INPUT.clone(), true).unwrap();
    assert_eq!(DigestErrorKind::Finished, digest.feed(Bytes::from_static(b"more"), false).unwrap_err().kind());

    assert_eq!(vec![fed(&INPUT), Event::Digest(Ok(xor_digest(&INPUT)))], events.take(2).await);
    assert_eq!(100, digest.with_context(|context| context.get::<XorState>().unwrap().fed));
    events.assert_idle().await;
}

#[test_log::test(tokio::test)]
async fn test_partial_worker_thread() {
    let (config, events) = configuration(SchedulerKind::WorkerThread);
    assert_partial_digest(config, events).await;
}

#[test_log::test(tokio::test)]
async fn test_partial_cooperative() {
    let (config, events) = configuration(SchedulerKind::Cooperative);
    assert_partial_digest(config.feed_block_size(Some(16)), events).await;
}

async fn assert_delete_cancels(scheduler: SchedulerKind) {
    let ops = Arc::new(GateOps::default());
    let (config, mut events) = configuration(scheduler);
    let digest = MessageDigest::new(config, DigestBackendParams::new(ops.clone(), 8)).unwrap();

    let chunks = [INPUT.slice(..10), INPUT.slice(10..50), INPUT.slice(50..)];
    for (i, chunk) in chunks.iter().enumerate() {
        digest.feed(chunk.clone(), i == chunks.len() - 1).unwrap();
    }
    assert_eq!(3, digest.pending().chunks);
    digest.delete().unwrap();
    assert_eq!(DigestErrorKind::Deleted, digest.feed(INPUT.clone(), false).unwrap_err().kind());

    let cancelled: Vec<_> =
        chunks.iter().map(|chunk| Event::Fed(chunk.clone(), Some(DigestErrorKind::Cancelled))).collect();
    assert_eq!(cancelled, events.take(3).await);
    events.assert_idle().await;
    wait_cleanup(&ops).await;
    assert_eq!(0, ops.consumed.load(Ordering::SeqCst));
}

#[test_log::test(tokio::test)]
async fn test_delete_worker_thread() {
    assert_delete_cancels(SchedulerKind::WorkerThread).await;
}

#[test_log::test(tokio::test)]
async fn test_delete_cooperative() {
    assert_delete_cancels(SchedulerKind::Cooperative).await;
}

async fn assert_delete_discards_digest(scheduler: SchedulerKind) {
    let ops = Arc::new(GateOps::default());
    ops.reads_blocked.store(true, Ordering::SeqCst);
    ops.set(GATE_OPEN);
    let (config, mut events) = configuration(scheduler);
    let digest = MessageDigest::new(config, DigestBackendParams::new(ops.clone(), 8)).unwrap();

    digest.feed(INPUT.clone(), true).unwrap();
    assert_eq!(fed(&INPUT), events.next().await);

    digest.delete().unwrap();
    ops.reads_blocked.store(false, Ordering::SeqCst);
    wait_cleanup(&ops).await;
    events.assert_idle().await;
}

#[test_log::test(tokio::test)]
async fn test_delete_receiving_worker_thread() {
    assert_delete_discards_digest(SchedulerKind::WorkerThread).await;
}

#[test_log::test(tokio::test)]
async fn test_delete_receiving_cooperative() {
    assert_delete_discards_digest(SchedulerKind::Cooperative).await;
}

async fn assert_backpressure(scheduler: SchedulerKind) {
    let ops = Arc::new(GateOps::default());
    let (config, mut events) = configuration(scheduler);
    let digest = MessageDigest::new(config.feed_size(8), DigestBackendParams::new(ops.clone(), 4)).unwrap();

    digest.feed(INPUT.slice(..5), false).unwrap();
    assert_eq!(DigestErrorKind::NoSpace, digest.feed(INPUT.slice(5..8), true).unwrap_err().kind());
    digest.feed(INPUT.slice(5..7), true).unwrap();
    assert_eq!(PendingStats { chunks: 2, bytes: 7 }, digest.pending());

    ops.set(GATE_OPEN);
    let expected = vec![fed(&INPUT[..5]), fed(&INPUT[5..7]), Event::Digest(Ok(Bytes::from_static(&[0xff; 4])))];
    assert_eq!(expected, events.take(3).await);
    assert_eq!(7, ops.consumed.load(Ordering::SeqCst));

    drop(digest);
    wait_cleanup(&ops).await;
}

#[test_log::test(tokio::test)]
async fn test_backpressure_worker_thread() {
    assert_backpressure(SchedulerKind::WorkerThread).await;
}

#[test_log::test(tokio::test)]
async fn test_backpressure_cooperative() {
    assert_backpressure(SchedulerKind::Cooperative).await;
}

async fn assert_backend_failure(scheduler: SchedulerKind) {
    let ops = Arc::new(GateOps::default());
    let (config, mut events) = configuration(scheduler);
    let digest = MessageDigest::new(config, DigestBackendParams::new(ops.clone(), 4)).unwrap();

    digest.feed(INPUT.slice(..10), false).unwrap();
    digest.feed(INPUT.slice(10..), true).unwrap();
    ops.set(GATE_BROKEN);

    let failure = Some(DigestErrorKind::BackendFailure);
    let expected = vec![
        Event::Fed(INPUT.slice(..10), failure),
        Event::Fed(INPUT.slice(10..), failure),
        Event::Digest(Err(DigestErrorKind::BackendFailure)),
    ];
    assert_eq!(expected, events.take(3).await);
    events.assert_idle().await;
    assert_eq!(PendingStats::default(), digest.pending());

    digest.delete().unwrap();
    assert_eq!(DigestErrorKind::Deleted, digest.delete().unwrap_err().kind());
}

#[test_log::test(tokio::test)]
async fn test_backend_failure_worker_thread() {
    assert_backend_failure(SchedulerKind::WorkerThread).await;
}

#[test_log::test(tokio::test)]
async fn test_backend_failure_cooperative() {
    assert_backend_failure(SchedulerKind::Cooperative).await;
}

#[test_log::test(tokio::test)]
async fn test_crc32c_digest() {
    let (config, mut events) = configuration(SchedulerKind::default());
    let digest = MessageDigest::new(config, SoftwareOps::new(DigestType::CRC32C).into_params().unwrap()).unwrap();
    let input = Bytes::from_static(b"abcdefg");
    digest.feed(input.clone(), true).unwrap();
    assert_eq!(
        vec![fed(&input), Event::Digest(Ok(Bytes::from_static(&[0xE6, 0x27, 0xF4, 0x41])))],
        events.take(2).await
    );
}
