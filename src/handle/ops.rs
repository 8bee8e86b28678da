use std::io;

use super::context::Context;

/// Operation table of a digest backend.
///
/// Operations are non-blocking and may make partial progress. `feed` returns bytes consumed from
/// `data`, `read_digest` returns bytes written into `buf`. [io::ErrorKind::WouldBlock] and
/// [io::ErrorKind::Interrupted] ask for a retry, other errors fail the digest.
pub trait DigestOps: Send + Sync + 'static {
    fn feed(&self, context: &mut Context, data: &[u8], is_last: bool) -> io::Result<usize>;

    fn read_digest(&self, context: &mut Context, buf: &mut [u8]) -> io::Result<usize>;

    fn cleanup(&self, context: &mut Context);
}
