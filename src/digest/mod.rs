//! In process digest backends.
//!
//! They complete every operation immediately, optionally accepting only part of each offered
//! chunk to behave like a partial progress backend.

use std::io;
use std::sync::Arc;

use bytes::BufMut;

mod crc;
mod sha1;
pub mod traits;

use self::crc::{CrcAlgorithm, CrcDigester};
use self::sha1::{Sha1Algorithm, Sha1Digester};
use self::traits::{Algorithm as _, Digester as _};
use crate::handle::{BackendParams, Context, DigestError, DigestOps, ErrorKind, Result};

/// Digest types computed in process.
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
pub enum DigestType {
    #[strum(serialize = "crc32")]
    CRC32,
    #[strum(serialize = "crc32c")]
    CRC32C,
    #[strum(serialize = "sha1")]
    SHA1,
}

enum DigesterRepr {
    Crc(CrcDigester),
    Sha1(Sha1Digester),
}

struct Digester {
    repr: DigesterRepr,
}

impl Digester {
    fn update(&mut self, bytes: &[u8]) {
        match &mut self.repr {
            DigesterRepr::Crc(digester) => digester.update(bytes),
            DigesterRepr::Sha1(digester) => digester.update(bytes),
        }
    }

    fn digest(self, buf: &mut impl BufMut) {
        match self.repr {
            DigesterRepr::Crc(digester) => digester.digest(buf),
            DigesterRepr::Sha1(digester) => digester.digest(buf),
        }
    }
}

#[derive(Clone)]
enum AlgorithmRepr {
    Crc(CrcAlgorithm),
    Sha1(Sha1Algorithm),
}

impl AlgorithmRepr {
    fn new(digest_type: DigestType) -> AlgorithmRepr {
        match digest_type {
            DigestType::CRC32 => AlgorithmRepr::Crc(CrcAlgorithm::crc32()),
            DigestType::CRC32C => AlgorithmRepr::Crc(CrcAlgorithm::crc32c()),
            DigestType::SHA1 => AlgorithmRepr::Sha1(Sha1Algorithm::new()),
        }
    }

    fn digester(&self) -> Digester {
        let repr = match self {
            AlgorithmRepr::Crc(algorithm) => DigesterRepr::Crc(algorithm.digester()),
            AlgorithmRepr::Sha1(algorithm) => DigesterRepr::Sha1(algorithm.digester()),
        };
        Digester { repr }
    }

    fn digest_length(&self) -> usize {
        match self {
            AlgorithmRepr::Crc(algorithm) => algorithm.digest_length(),
            AlgorithmRepr::Sha1(algorithm) => algorithm.digest_length(),
        }
    }
}

/// Context of [SoftwareOps] kept in message digest handle.
pub struct SoftwareState {
    digester: Option<Digester>,
    output: Vec<u8>,
    offset: usize,
}

impl SoftwareState {
    fn new(digester: Digester) -> SoftwareState {
        SoftwareState { digester: Some(digester), output: Vec::new(), offset: 0 }
    }

    /// Returns whether last chunk has been consumed.
    pub fn is_finalized(&self) -> bool {
        self.digester.is_none()
    }
}

/// Digest backend computing digest in calling thread.
#[derive(Clone)]
pub struct SoftwareOps {
    digest_type: DigestType,
    algorithm: AlgorithmRepr,
    transfer_limit: Option<usize>,
}

impl SoftwareOps {
    pub fn new(digest_type: DigestType) -> SoftwareOps {
        SoftwareOps { digest_type, algorithm: AlgorithmRepr::new(digest_type), transfer_limit: None }
    }

    /// Accepts or produces at most `limit` bytes per call. Zero is rejected by
    /// [SoftwareOps::into_params].
    pub fn transfer_limit(self, limit: usize) -> Self {
        SoftwareOps { transfer_limit: Some(limit), ..self }
    }

    pub fn digest_type(&self) -> DigestType {
        self.digest_type
    }

    pub fn digest_length(&self) -> usize {
        self.algorithm.digest_length()
    }

    /// Binds this backend with a fresh inline context.
    pub fn into_params(self) -> Result<BackendParams> {
        if self.transfer_limit == Some(0) {
            return Err(DigestError::with_description(ErrorKind::InvalidArgument, &"zero transfer limit"));
        }
        let digest_length = self.digest_length();
        let state = SoftwareState::new(self.algorithm.digester());
        Ok(BackendParams::new(Arc::new(self), digest_length).inline_context(state))
    }

    fn limit(&self, len: usize) -> usize {
        self.transfer_limit.map_or(len, |limit| limit.min(len))
    }

    fn state(context: &mut Context) -> io::Result<&mut SoftwareState> {
        context.get_mut::<SoftwareState>().ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no digest state"))
    }
}

impl DigestOps for SoftwareOps {
    fn feed(&self, context: &mut Context, data: &[u8], is_last: bool) -> io::Result<usize> {
        let state = Self::state(context)?;
        let Some(digester) = state.digester.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "digest already finalized"));
        };
        let n = self.limit(data.len());
        digester.update(&data[..n]);
        if is_last && n == data.len() {
            if let Some(digester) = state.digester.take() {
                digester.digest(&mut state.output);
            }
        }
        Ok(n)
    }

    fn read_digest(&self, context: &mut Context, buf: &mut [u8]) -> io::Result<usize> {
        let state = Self::state(context)?;
        if !state.is_finalized() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let remaining = &state.output[state.offset..];
        let n = self.limit(remaining.len().min(buf.len()));
        buf[..n].copy_from_slice(&remaining[..n]);
        state.offset += n;
        Ok(n)
    }

    fn cleanup(&self, context: &mut Context) {
        if let Ok(state) = Self::state(context) {
            state.digester = None;
            state.output.clear();
            state.offset = 0;
        }
    }
}
