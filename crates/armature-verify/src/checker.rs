use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use armature_core::{Checksummer, HashAlgorithm, LogThrough, Logger, SigAlgorithm};

use crate::error::VerifyError;
use crate::hasher::make_hasher;
use crate::signature::verify_signature;

const FILE_CHUNK: usize = 32 * 1024;

/// The framework's [`Checksummer`] implementation.
///
/// Failures never propagate: hash operations return an empty string,
/// checks and signature verifications return false, and the cause is
/// logged through the internal-error policy.
pub struct Checker {
    log: Arc<dyn Logger>,
}

impl Checker {
    pub fn new(log: Arc<dyn Logger>) -> Self {
        Checker { log }
    }

    fn hash_file_inner(&self, path: &Path, algo: HashAlgorithm) -> Result<String, VerifyError> {
        let mut hasher = make_hasher(algo).ok_or(VerifyError::UnsupportedAlgorithm)?;
        let mut file = File::open(path)?;
        let mut buf = [0u8; FILE_CHUNK];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Case-insensitive digest comparison. CRC32 sums additionally match
    /// their decimal `u32` rendition, since chibit indexes encode them as
    /// JSON numbers.
    fn sums_match(actual_hex: &str, expected: &str, algo: HashAlgorithm) -> bool {
        if actual_hex.eq_ignore_ascii_case(expected.trim()) {
            return true;
        }
        if algo == HashAlgorithm::Crc32 {
            let expected = expected.trim();
            if expected.len() != 8 {
                if let (Ok(expected_num), Ok(actual_bytes)) =
                    (expected.parse::<u32>(), hex::decode(actual_hex))
                {
                    if let Ok(actual) = <[u8; 4]>::try_from(actual_bytes.as_slice()) {
                        return u32::from_be_bytes(actual) == expected_num;
                    }
                }
            }
        }
        false
    }
}

impl Checksummer for Checker {
    fn hash_file(&self, path: &Path, algo: HashAlgorithm) -> String {
        match self.hash_file_inner(path, algo) {
            Ok(sum) => sum,
            Err(e) => {
                self.log.log_through(e);
                String::new()
            }
        }
    }

    fn hash_buf(&self, buf: &[u8], algo: HashAlgorithm) -> String {
        match make_hasher(algo) {
            Some(mut hasher) => {
                hasher.update(buf);
                hex::encode(hasher.finalize())
            }
            None => {
                self.log.log_through(VerifyError::UnsupportedAlgorithm);
                String::new()
            }
        }
    }

    fn hash_str(&self, content: &str, algo: HashAlgorithm) -> String {
        self.hash_buf(content.as_bytes(), algo)
    }

    fn check_file(&self, path: &Path, sum: &str, algo: HashAlgorithm) -> bool {
        let hash = self.hash_file(path, algo);
        !hash.is_empty() && Self::sums_match(&hash, sum, algo)
    }

    fn check_buf(&self, buf: &[u8], sum: &str, algo: HashAlgorithm) -> bool {
        let hash = self.hash_buf(buf, algo);
        !hash.is_empty() && Self::sums_match(&hash, sum, algo)
    }

    fn check_str(&self, content: &str, sum: &str, algo: HashAlgorithm) -> bool {
        let hash = self.hash_str(content, algo);
        !hash.is_empty() && Self::sums_match(&hash, sum, algo)
    }

    fn sig_file(
        &self,
        path: &Path,
        algo: SigAlgorithm,
        public_key_pem: &str,
        signature: &[u8],
    ) -> bool {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                self.log.log_through(VerifyError::Io(e));
                return false;
            }
        };
        self.sig_buf(&data, algo, public_key_pem, signature)
    }

    fn sig_buf(
        &self,
        buf: &[u8],
        algo: SigAlgorithm,
        public_key_pem: &str,
        signature: &[u8],
    ) -> bool {
        match verify_signature(buf, algo, public_key_pem, signature) {
            Ok(valid) => valid,
            Err(e) => {
                self.log.log_through(e);
                false
            }
        }
    }

    fn sig_str(
        &self,
        content: &str,
        algo: SigAlgorithm,
        public_key_pem: &str,
        signature: &[u8],
    ) -> bool {
        self.sig_buf(content.as_bytes(), algo, public_key_pem, signature)
    }

    fn guess_algo(&self, sum: &str) -> HashAlgorithm {
        let sum = sum.trim().to_lowercase();
        if sum.is_empty() || hex::decode(&sum).is_err() {
            return HashAlgorithm::Unknown;
        }
        match sum.len() {
            8 => HashAlgorithm::Crc32,
            40 => HashAlgorithm::Sha1,
            64 => HashAlgorithm::Sha256,
            _ => HashAlgorithm::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armature_core::{LogError, LogLevel};
    use std::io::Write;

    struct SilentLogger;

    impl Logger for SilentLogger {
        fn log(&self, _level: LogLevel, _message: &str) -> Result<(), LogError> {
            Ok(())
        }

        fn log_through_line(&self, _line: &str) {}
    }

    fn checker() -> Checker {
        Checker::new(Arc::new(SilentLogger))
    }

    #[test]
    fn buf_and_str_hash_identically() {
        let c = checker();
        for algo in [
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha256,
            HashAlgorithm::Crc32,
        ] {
            assert_eq!(c.hash_buf(b"some payload", algo), c.hash_str("some payload", algo));
        }
    }

    #[test]
    fn guess_algo_inverts_hash_buf() {
        let c = checker();
        for algo in [
            HashAlgorithm::Crc32,
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha256,
        ] {
            let sum = c.hash_buf(b"roundtrip", algo);
            assert_eq!(c.guess_algo(&sum), algo);
        }
    }

    #[test]
    fn guess_algo_rejects_non_hex() {
        let c = checker();
        assert_eq!(c.guess_algo("zzzzzzzz"), HashAlgorithm::Unknown);
        assert_eq!(c.guess_algo("abc"), HashAlgorithm::Unknown);
        assert_eq!(c.guess_algo(""), HashAlgorithm::Unknown);
    }

    #[test]
    fn check_is_case_insensitive() {
        let c = checker();
        let sum = c.hash_buf(b"hello", HashAlgorithm::Sha256);
        assert!(c.check_buf(b"hello", &sum.to_uppercase(), HashAlgorithm::Sha256));
        assert!(!c.check_buf(b"other", &sum, HashAlgorithm::Sha256));
    }

    #[test]
    fn crc32_accepts_decimal_form() {
        let c = checker();
        // CRC32("123456789") = 0xcbf43926 = 3421780262
        assert!(c.check_buf(b"123456789", "cbf43926", HashAlgorithm::Crc32));
        assert!(c.check_buf(b"123456789", "3421780262", HashAlgorithm::Crc32));
        assert!(!c.check_buf(b"123456789", "3421780263", HashAlgorithm::Crc32));
    }

    #[test]
    fn file_hash_matches_buffer_hash() {
        let c = checker();
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"file contents").unwrap();
        let from_file = c.hash_file(tmp.path(), HashAlgorithm::Sha256);
        let from_buf = c.hash_buf(b"file contents", HashAlgorithm::Sha256);
        assert_eq!(from_file, from_buf);
        assert!(c.check_file(tmp.path(), &from_buf, HashAlgorithm::Sha256));
    }

    #[test]
    fn missing_file_hashes_empty() {
        let c = checker();
        assert_eq!(
            c.hash_file(Path::new("/no/such/file"), HashAlgorithm::Sha1),
            ""
        );
    }
}
