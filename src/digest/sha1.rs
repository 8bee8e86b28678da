use bytes::BufMut;
use sha1::{Digest, Sha1};

use super::traits::{Algorithm, Digester};

#[derive(Clone, Default)]
pub struct Sha1Algorithm {}

impl Sha1Algorithm {
    pub fn new() -> Sha1Algorithm {
        Sha1Algorithm {}
    }
}

impl Algorithm for Sha1Algorithm {
    type Digester = Sha1Digester;

    fn digester(&self) -> Self::Digester {
        Sha1Digester { hasher: Sha1::new() }
    }

    fn digest_length(&self) -> usize {
        20
    }
}

pub struct Sha1Digester {
    hasher: Sha1,
}

impl Digester for Sha1Digester {
    fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    fn digest(self, buf: &mut impl BufMut) {
        buf.put_slice(&self.hasher.finalize());
    }

    fn digest_length(&self) -> usize {
        20
    }
}
