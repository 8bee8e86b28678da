use bytes::BufMut;

/// Streaming digest algorithm computed in process.
pub trait Algorithm {
    type Digester: Digester;

    /// Starts a fresh running digest.
    fn digester(&self) -> Self::Digester;

    /// Bytes written by [Digester::digest].
    fn digest_length(&self) -> usize;
}

/// Running digest fed chunk by chunk.
pub trait Digester {
    fn update(&mut self, bytes: &[u8]);

    /// Consumes running state and appends final digest to `buf`.
    fn digest(self, buf: &mut impl BufMut);

    fn digest_length(&self) -> usize;
}
