use armature_core::HashAlgorithm;

/// Minimal incremental hasher interface shared by all algorithms.
pub trait Hasher: Send {
    fn update(&mut self, data: &[u8]);

    /// Finalize and return the digest bytes. Consumes self to prevent
    /// reuse.
    fn finalize(self: Box<Self>) -> Vec<u8>;
}

/// Generic wrapper for any `digest::Digest` implementation.
pub struct DigestHasher<D: sha2::digest::Digest + Send>(D);

impl<D: sha2::digest::Digest + Send> DigestHasher<D> {
    pub fn from_digest(digest: D) -> Self {
        Self(digest)
    }
}

impl<D: sha2::digest::Digest + Send> Hasher for DigestHasher<D> {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().to_vec()
    }
}

pub type Sha1Hasher = DigestHasher<sha1::Sha1>;

impl Sha1Hasher {
    pub fn new() -> Self {
        DigestHasher::from_digest(<sha1::Sha1 as sha2::digest::Digest>::new())
    }
}

pub type Sha256Hasher = DigestHasher<sha2::Sha256>;

impl Sha256Hasher {
    pub fn new() -> Self {
        DigestHasher::from_digest(<sha2::Sha256 as sha2::digest::Digest>::new())
    }
}

/// CRC32 (IEEE) hasher; the digest is the big-endian `u32`.
#[derive(Default)]
pub struct Crc32Hasher(crc32fast::Hasher);

impl Crc32Hasher {
    pub fn new() -> Self {
        Self(crc32fast::Hasher::new())
    }
}

impl Hasher for Crc32Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().to_be_bytes().to_vec()
    }
}

/// Construct the hasher for an algorithm, if it is a concrete one.
pub(crate) fn make_hasher(algo: HashAlgorithm) -> Option<Box<dyn Hasher>> {
    match algo {
        HashAlgorithm::Sha1 => Some(Box::new(Sha1Hasher::new())),
        HashAlgorithm::Sha256 => Some(Box::new(Sha256Hasher::new())),
        HashAlgorithm::Crc32 => Some(Box::new(Crc32Hasher::new())),
        HashAlgorithm::Unknown => None,
    }
}
