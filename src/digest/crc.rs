use bytes::BufMut;

use super::traits::{Algorithm, Digester};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Polynomial {
    Ieee,
    Castagnoli,
}

/// CRC32 checksums emitted as four big endian bytes.
#[derive(Clone)]
pub struct CrcAlgorithm {
    polynomial: Polynomial,
}

impl CrcAlgorithm {
    pub fn crc32() -> CrcAlgorithm {
        CrcAlgorithm { polynomial: Polynomial::Ieee }
    }

    pub fn crc32c() -> CrcAlgorithm {
        CrcAlgorithm { polynomial: Polynomial::Castagnoli }
    }
}

impl Algorithm for CrcAlgorithm {
    type Digester = CrcDigester;

    fn digester(&self) -> Self::Digester {
        let state = match self.polynomial {
            Polynomial::Ieee => CrcState::Ieee(crc32fast::Hasher::new()),
            Polynomial::Castagnoli => CrcState::Castagnoli(0),
        };
        CrcDigester { state }
    }

    fn digest_length(&self) -> usize {
        4
    }
}

enum CrcState {
    Ieee(crc32fast::Hasher),
    Castagnoli(u32),
}

pub struct CrcDigester {
    state: CrcState,
}

impl Digester for CrcDigester {
    fn update(&mut self, bytes: &[u8]) {
        match &mut self.state {
            CrcState::Ieee(hasher) => hasher.update(bytes),
            CrcState::Castagnoli(crc) => *crc = crc32c::crc32c_append(*crc, bytes),
        }
    }

    fn digest(self, buf: &mut impl BufMut) {
        let crc = match self.state {
            CrcState::Ieee(hasher) => hasher.finalize(),
            CrcState::Castagnoli(crc) => crc,
        };
        buf.put_u32(crc);
    }

    fn digest_length(&self) -> usize {
        4
    }
}
