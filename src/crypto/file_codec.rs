//! Streaming encrypted file format
//!
//! On disk, every encrypted file is `nonce(12) || ciphertext || tag(16)` with
//! no header, version byte, or embedded metadata. One file, one fresh random
//! nonce. Plaintext is streamed through the cipher in tiered chunks so peak
//! memory stays bounded regardless of file size.
//!
//! Decryption is atomic: output is staged to a sibling temp file and renamed
//! into place only after the authentication tag verifies, so a tampered file
//! never delivers partial plaintext.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use zeroize::{Zeroize, Zeroizing};

use super::gcm_stream::{StreamDecryptor, StreamEncryptor, TAG_SIZE};
use super::master_key::MasterKeyStore;
use super::random::NONCE_SIZE;
use crate::error::{StrongboxError, StrongboxResult};

/// Inputs at or below this size are processed in a single pass
const SMALL_INPUT_MAX: u64 = 64 * 1024;

/// Chunk size for inputs up to 1 MiB
const CHUNK_SMALL: usize = 64 * 1024;

/// Chunk size for inputs up to 64 MiB
const CHUNK_MEDIUM: usize = 128 * 1024;

/// Chunk size for larger inputs
const CHUNK_LARGE: usize = 256 * 1024;

/// Smallest well-formed file: full nonce plus at least one tag byte
const MIN_FILE_SIZE: u64 = (NONCE_SIZE + 1) as u64;

/// Bounded worker pool size for batch decryption
const POOL_SIZE: usize = 4;

/// Per-file timeout for batch decryption
const TASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Pick the streaming buffer size for a given total input size
fn chunk_size_for(total: u64) -> usize {
    if total <= SMALL_INPUT_MAX {
        // Single pass for small inputs
        total.max(1) as usize
    } else if total <= 1024 * 1024 {
        CHUNK_SMALL
    } else if total <= 64 * 1024 * 1024 {
        CHUNK_MEDIUM
    } else {
        CHUNK_LARGE
    }
}

/// Outcome of one file inside a batch decryption
#[derive(Debug)]
pub enum BatchOutcome {
    /// Decryption succeeded
    Decrypted {
        /// Number of plaintext bytes produced
        bytes: u64,
    },
    /// Decryption failed for this file only
    Failed(StrongboxError),
    /// The per-file timeout elapsed; the task was abandoned
    TimedOut,
}

/// Per-file result of a batch decryption
#[derive(Debug)]
pub struct BatchResult {
    /// Source path of the encrypted file
    pub source: PathBuf,
    /// What happened to it
    pub outcome: BatchOutcome,
}

/// Streaming encryptor/decryptor over the master key
pub struct FileCodec {
    master: Arc<MasterKeyStore>,
}

impl FileCodec {
    /// Create a codec bound to a master key store
    pub fn new(master: Arc<MasterKeyStore>) -> Self {
        Self { master }
    }

    /// Encrypt a file; returns the number of plaintext bytes consumed
    ///
    /// Output layout: 12-byte nonce, ciphertext, 16-byte tag. The output is
    /// staged to a temp file and renamed into place when complete.
    pub fn encrypt_file(&self, source: &Path, dest: &Path) -> StrongboxResult<u64> {
        encrypt_file_with(&self.master, source, dest)
    }

    /// Decrypt a file; returns the number of plaintext bytes produced
    ///
    /// The plaintext is surfaced only after the authentication tag verifies.
    pub fn decrypt_file(&self, source: &Path, dest: &Path) -> StrongboxResult<u64> {
        decrypt_file_with(&self.master, source, dest)
    }

    /// Decrypt a file fully into memory
    ///
    /// Intended for decrypt-for-view flows where the plaintext moves straight
    /// into a secure buffer. On tag mismatch the staged plaintext is wiped
    /// before the error is returned.
    pub fn decrypt_to_vec(&self, source: &Path) -> StrongboxResult<Vec<u8>> {
        let (nonce, ciphertext_len, mut reader) = open_encrypted(source)?;
        let decryptor = self.master.decryption_cipher(&nonce)?;

        let mut plaintext = Vec::with_capacity(ciphertext_len as usize);
        if let Err(e) = run_decrypt(decryptor, ciphertext_len, &mut reader, &mut plaintext) {
            plaintext.zeroize();
            return Err(e);
        }
        Ok(plaintext)
    }

    /// Decrypt several independent files concurrently
    ///
    /// Each file gets its own isolated cipher context; concurrency is bounded
    /// by a small fixed pool and each task carries an individual timeout. A
    /// timeout or per-file failure is captured in that file's result and
    /// never aborts the batch.
    pub fn decrypt_batch(&self, jobs: &[(PathBuf, PathBuf)]) -> Vec<BatchResult> {
        self.decrypt_batch_with_timeout(jobs, TASK_TIMEOUT)
    }

    /// Batch decryption with an explicit per-task timeout (used by tests)
    pub fn decrypt_batch_with_timeout(
        &self,
        jobs: &[(PathBuf, PathBuf)],
        timeout: Duration,
    ) -> Vec<BatchResult> {
        // Pool tokens: a worker may start only after taking one, and returns
        // it when finished. An abandoned (timed-out) worker returns its token
        // whenever it eventually completes.
        let (token_tx, token_rx) = mpsc::channel::<()>();
        for _ in 0..POOL_SIZE {
            let _ = token_tx.send(());
        }

        let mut in_flight = Vec::with_capacity(jobs.len());
        for (source, dest) in jobs {
            if token_rx.recv().is_err() {
                break;
            }

            let (result_tx, result_rx) = mpsc::channel::<StrongboxResult<u64>>();
            let master = Arc::clone(&self.master);
            let token_return = token_tx.clone();
            let src = source.clone();
            let dst = dest.clone();

            thread::spawn(move || {
                let result = decrypt_file_with(&master, &src, &dst);
                let _ = result_tx.send(result);
                let _ = token_return.send(());
            });

            in_flight.push((source.clone(), result_rx, Instant::now()));
        }

        in_flight
            .into_iter()
            .map(|(source, rx, started)| {
                let remaining = timeout.saturating_sub(started.elapsed());
                let outcome = match rx.recv_timeout(remaining) {
                    Ok(Ok(bytes)) => BatchOutcome::Decrypted { bytes },
                    Ok(Err(e)) => BatchOutcome::Failed(e),
                    Err(mpsc::RecvTimeoutError::Timeout) => BatchOutcome::TimedOut,
                    Err(mpsc::RecvTimeoutError::Disconnected) => BatchOutcome::Failed(
                        StrongboxError::Crypto("decryption worker terminated".into()),
                    ),
                };
                BatchResult { source, outcome }
            })
            .collect()
    }
}

/// Open an encrypted file, validate framing, and read past the nonce
fn open_encrypted(source: &Path) -> StrongboxResult<([u8; NONCE_SIZE], u64, BufReader<File>)> {
    let total = fs::metadata(source)
        .map_err(|e| StrongboxError::Io(format!("Failed to stat {}: {}", source.display(), e)))?
        .len();

    // Rejected before any cipher is invoked
    if total < MIN_FILE_SIZE {
        return Err(StrongboxError::Malformed(format!(
            "{} bytes is too short to contain a nonce",
            total
        )));
    }
    let remaining = total - NONCE_SIZE as u64;
    if remaining < TAG_SIZE as u64 {
        // Nonce present but the tag cannot be complete
        return Err(StrongboxError::BadTag);
    }

    let file = File::open(source)
        .map_err(|e| StrongboxError::Io(format!("Failed to open {}: {}", source.display(), e)))?;
    let mut reader = BufReader::new(file);

    let mut nonce = [0u8; NONCE_SIZE];
    reader
        .read_exact(&mut nonce)
        .map_err(|e| StrongboxError::Io(format!("Failed to read nonce: {}", e)))?;

    Ok((nonce, remaining - TAG_SIZE as u64, reader))
}

fn encrypt_file_with(
    master: &MasterKeyStore,
    source: &Path,
    dest: &Path,
) -> StrongboxResult<u64> {
    let total = fs::metadata(source)
        .map_err(|e| StrongboxError::Io(format!("Failed to stat {}: {}", source.display(), e)))?
        .len();
    let file = File::open(source)
        .map_err(|e| StrongboxError::Io(format!("Failed to open {}: {}", source.display(), e)))?;
    let mut reader = BufReader::new(file);

    let (encryptor, nonce) = master.encryption_cipher()?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| StrongboxError::Io(format!("Failed to create directory: {}", e)))?;
    }
    let tmp = staging_path(dest);
    let out = File::create(&tmp)
        .map_err(|e| StrongboxError::Io(format!("Failed to create output: {}", e)))?;
    let mut writer = BufWriter::new(out);

    let result = run_encrypt(
        encryptor,
        &nonce,
        &mut reader,
        &mut writer,
        chunk_size_for(total),
    );
    match result {
        Ok(bytes) => {
            commit_staged(&mut writer, &tmp, dest)?;
            Ok(bytes)
        }
        Err(e) => {
            drop(writer);
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

fn run_encrypt(
    mut encryptor: StreamEncryptor,
    nonce: &[u8; NONCE_SIZE],
    reader: &mut impl Read,
    writer: &mut impl Write,
    chunk: usize,
) -> StrongboxResult<u64> {
    writer
        .write_all(nonce)
        .map_err(|e| StrongboxError::Io(format!("Failed to write nonce: {}", e)))?;

    // Zeroizing wipes the staging buffer on every exit path
    let mut buf = Zeroizing::new(vec![0u8; chunk]);
    let mut consumed = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| StrongboxError::Io(format!("Read failed: {}", e)))?;
        if n == 0 {
            break;
        }
        encryptor.update(&mut buf[..n])?;
        writer
            .write_all(&buf[..n])
            .map_err(|e| StrongboxError::Io(format!("Write failed: {}", e)))?;
        consumed += n as u64;
    }

    let tag = encryptor.finalize();
    writer
        .write_all(&tag)
        .map_err(|e| StrongboxError::Io(format!("Failed to write tag: {}", e)))?;
    Ok(consumed)
}

fn decrypt_file_with(
    master: &MasterKeyStore,
    source: &Path,
    dest: &Path,
) -> StrongboxResult<u64> {
    let (nonce, ciphertext_len, mut reader) = open_encrypted(source)?;
    let decryptor = master.decryption_cipher(&nonce)?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| StrongboxError::Io(format!("Failed to create directory: {}", e)))?;
    }
    let tmp = staging_path(dest);
    let out = File::create(&tmp)
        .map_err(|e| StrongboxError::Io(format!("Failed to create output: {}", e)))?;
    let mut writer = BufWriter::new(out);

    let result = run_decrypt(decryptor, ciphertext_len, &mut reader, &mut writer);
    match result {
        Ok(bytes) => {
            commit_staged(&mut writer, &tmp, dest)?;
            Ok(bytes)
        }
        Err(e) => {
            // Never deliver partial plaintext
            drop(writer);
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

fn run_decrypt(
    mut decryptor: StreamDecryptor,
    ciphertext_len: u64,
    reader: &mut impl Read,
    writer: &mut impl Write,
) -> StrongboxResult<u64> {
    let mut buf = Zeroizing::new(vec![0u8; chunk_size_for(ciphertext_len)]);
    let mut remaining = ciphertext_len;
    while remaining > 0 {
        let want = buf.len().min(remaining as usize);
        reader
            .read_exact(&mut buf[..want])
            .map_err(|e| StrongboxError::Io(format!("Read failed: {}", e)))?;
        decryptor.update(&mut buf[..want])?;
        writer
            .write_all(&buf[..want])
            .map_err(|e| StrongboxError::Io(format!("Write failed: {}", e)))?;
        remaining -= want as u64;
    }

    let mut tag = [0u8; TAG_SIZE];
    reader
        .read_exact(&mut tag)
        .map_err(|e| StrongboxError::Io(format!("Failed to read tag: {}", e)))?;
    decryptor.finalize(&tag)?;
    Ok(ciphertext_len)
}

fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

fn commit_staged(writer: &mut BufWriter<File>, tmp: &Path, dest: &Path) -> StrongboxResult<()> {
    writer
        .flush()
        .map_err(|e| StrongboxError::Io(format!("Flush failed: {}", e)))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| StrongboxError::Io(format!("Sync failed: {}", e)))?;
    fs::rename(tmp, dest).map_err(|e| {
        let _ = fs::remove_file(tmp);
        StrongboxError::Io(format!("Failed to commit output: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keystore::MemoryKeystore;
    use crate::store::EncryptedPrefs;
    use tempfile::TempDir;

    fn codec() -> (FileCodec, Arc<MemoryKeystore>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let keystore = Arc::new(MemoryKeystore::new());
        let prefs = Arc::new(
            EncryptedPrefs::open(tmp.path().join("prefs.json"), keystore.clone()).unwrap(),
        );
        let master = MasterKeyStore::new(keystore.clone(), prefs);
        master.record_biometric_success();
        (FileCodec::new(Arc::new(master)), keystore, tmp)
    }

    fn write_source(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_round_trip_small() {
        let (codec, _ks, tmp) = codec();
        let src = write_source(&tmp, "plain.txt", b"hello strongbox");
        let enc = tmp.path().join("plain.txt.enc");
        let dec = tmp.path().join("plain.txt.dec");

        codec.encrypt_file(&src, &enc).unwrap();
        codec.decrypt_file(&enc, &dec).unwrap();

        assert_eq!(fs::read(&dec).unwrap(), b"hello strongbox");
    }

    #[test]
    fn test_round_trip_single_byte() {
        let (codec, _ks, tmp) = codec();
        let src = write_source(&tmp, "one", b"x");
        let enc = tmp.path().join("one.enc");
        let dec = tmp.path().join("one.dec");

        codec.encrypt_file(&src, &enc).unwrap();
        assert_eq!(fs::metadata(&enc).unwrap().len(), 29);
        codec.decrypt_file(&enc, &dec).unwrap();
        assert_eq!(fs::read(&dec).unwrap(), b"x");
    }

    #[test]
    fn test_empty_file_is_exactly_28_bytes() {
        let (codec, _ks, tmp) = codec();
        let src = write_source(&tmp, "empty", b"");
        let enc = tmp.path().join("empty.enc");
        let dec = tmp.path().join("empty.dec");

        codec.encrypt_file(&src, &enc).unwrap();
        assert_eq!(fs::metadata(&enc).unwrap().len(), 28);

        codec.decrypt_file(&enc, &dec).unwrap();
        assert_eq!(fs::read(&dec).unwrap(), b"");
    }

    #[test]
    fn test_round_trip_multi_chunk() {
        let (codec, _ks, tmp) = codec();
        // 5 MiB forces the streaming path across many chunks
        let data: Vec<u8> = (0..5 * 1024 * 1024).map(|i| (i % 256) as u8).collect();
        let src = write_source(&tmp, "big.bin", &data);
        let enc = tmp.path().join("big.enc");
        let dec = tmp.path().join("big.dec");

        codec.encrypt_file(&src, &enc).unwrap();
        assert_eq!(
            fs::metadata(&enc).unwrap().len(),
            data.len() as u64 + (NONCE_SIZE + TAG_SIZE) as u64
        );

        codec.decrypt_file(&enc, &dec).unwrap();
        assert_eq!(fs::read(&dec).unwrap(), data);
    }

    #[test]
    fn test_single_bit_flip_fails_and_leaves_no_output() {
        let (codec, _ks, tmp) = codec();
        let src = write_source(&tmp, "doc.txt", b"sensitive content here");
        let enc = tmp.path().join("doc.enc");
        let dec = tmp.path().join("doc.dec");
        codec.encrypt_file(&src, &enc).unwrap();

        let mut bytes = fs::read(&enc).unwrap();
        let mid = NONCE_SIZE + 5;
        bytes[mid] ^= 0x01;
        fs::write(&enc, &bytes).unwrap();

        let err = codec.decrypt_file(&enc, &dec).unwrap_err();
        assert!(matches!(err, StrongboxError::BadTag));
        assert!(!dec.exists());
    }

    #[test]
    fn test_tag_flip_fails() {
        let (codec, _ks, tmp) = codec();
        let src = write_source(&tmp, "doc.txt", b"tag target");
        let enc = tmp.path().join("doc.enc");
        codec.encrypt_file(&src, &enc).unwrap();

        let mut bytes = fs::read(&enc).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x80;
        fs::write(&enc, &bytes).unwrap();

        let err = codec
            .decrypt_file(&enc, &tmp.path().join("doc.dec"))
            .unwrap_err();
        assert!(matches!(err, StrongboxError::BadTag));
    }

    #[test]
    fn test_too_short_file_is_malformed() {
        let (codec, _ks, tmp) = codec();
        let enc = write_source(&tmp, "stub.enc", &[0u8; 12]);
        let err = codec
            .decrypt_file(&enc, &tmp.path().join("stub.dec"))
            .unwrap_err();
        assert!(matches!(err, StrongboxError::Malformed(_)));
    }

    #[test]
    fn test_nonce_and_ciphertext_unique_per_encryption() {
        let (codec, _ks, tmp) = codec();
        let src = write_source(&tmp, "same.txt", b"identical plaintext");

        let mut nonces = std::collections::HashSet::new();
        let mut bodies = std::collections::HashSet::new();
        for _ in 0..1000 {
            let enc = tmp.path().join("same.enc");
            codec.encrypt_file(&src, &enc).unwrap();
            let bytes = fs::read(&enc).unwrap();
            nonces.insert(bytes[..NONCE_SIZE].to_vec());
            bodies.insert(bytes[NONCE_SIZE..].to_vec());
        }
        assert_eq!(nonces.len(), 1000);
        assert_eq!(bodies.len(), 1000);
    }

    #[test]
    fn test_decrypt_to_vec_round_trip() {
        let (codec, _ks, tmp) = codec();
        let src = write_source(&tmp, "view.txt", b"decrypt for viewing");
        let enc = tmp.path().join("view.enc");
        codec.encrypt_file(&src, &enc).unwrap();

        let plaintext = codec.decrypt_to_vec(&enc).unwrap();
        assert_eq!(plaintext, b"decrypt for viewing");
    }

    #[test]
    fn test_batch_mixed_results() {
        let (codec, _ks, tmp) = codec();
        let good_src = write_source(&tmp, "good.txt", b"good file");
        let good_enc = tmp.path().join("good.enc");
        codec.encrypt_file(&good_src, &good_enc).unwrap();

        // A corrupt entry and a missing entry alongside a good one
        let bad_enc = write_source(&tmp, "bad.enc", &[0u8; 5]);
        let missing = tmp.path().join("missing.enc");

        let jobs = vec![
            (good_enc.clone(), tmp.path().join("good.dec")),
            (bad_enc.clone(), tmp.path().join("bad.dec")),
            (missing.clone(), tmp.path().join("missing.dec")),
        ];
        let results = codec.decrypt_batch(&jobs);
        assert_eq!(results.len(), 3);

        assert!(matches!(results[0].outcome, BatchOutcome::Decrypted { .. }));
        assert!(matches!(
            results[1].outcome,
            BatchOutcome::Failed(StrongboxError::Malformed(_))
        ));
        assert!(matches!(
            results[2].outcome,
            BatchOutcome::Failed(StrongboxError::Io(_))
        ));
        assert_eq!(fs::read(tmp.path().join("good.dec")).unwrap(), b"good file");
    }

    #[test]
    fn test_batch_more_jobs_than_pool() {
        let (codec, _ks, tmp) = codec();
        let mut jobs = Vec::new();
        for i in 0..10 {
            let src = write_source(&tmp, &format!("f{}.txt", i), format!("file {}", i).as_bytes());
            let enc = tmp.path().join(format!("f{}.enc", i));
            codec.encrypt_file(&src, &enc).unwrap();
            jobs.push((enc, tmp.path().join(format!("f{}.dec", i))));
        }

        let results = codec.decrypt_batch(&jobs);
        assert_eq!(results.len(), 10);
        for (i, result) in results.iter().enumerate() {
            assert!(matches!(result.outcome, BatchOutcome::Decrypted { .. }));
            assert_eq!(
                fs::read(tmp.path().join(format!("f{}.dec", i))).unwrap(),
                format!("file {}", i).as_bytes()
            );
        }
    }

    #[test]
    fn test_batch_task_timeout_is_reported_not_fatal() {
        let (codec, _ks, tmp) = codec();
        let quick_src = write_source(&tmp, "quick.txt", b"small and fast");
        let quick_enc = tmp.path().join("quick.enc");
        codec.encrypt_file(&quick_src, &quick_enc).unwrap();

        // Large enough that its worker cannot finish before a zero deadline
        let data = vec![0x5Au8; 32 * 1024 * 1024];
        let slow_src = write_source(&tmp, "slow.bin", &data);
        let slow_enc = tmp.path().join("slow.enc");
        codec.encrypt_file(&slow_src, &slow_enc).unwrap();

        let jobs = vec![
            (slow_enc, tmp.path().join("slow.dec")),
            (quick_enc, tmp.path().join("quick.dec")),
        ];
        let results = codec.decrypt_batch_with_timeout(&jobs, Duration::from_millis(0));
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0].outcome, BatchOutcome::TimedOut));

        // A generous deadline decrypts the same file fine afterwards
        let retry = vec![(jobs[0].0.clone(), tmp.path().join("slow.retry.dec"))];
        let results = codec.decrypt_batch_with_timeout(&retry, Duration::from_secs(30));
        assert!(matches!(results[0].outcome, BatchOutcome::Decrypted { .. }));
        assert_eq!(
            fs::read(tmp.path().join("slow.retry.dec")).unwrap(),
            data
        );
    }

    #[test]
    fn test_chunk_size_tiers() {
        assert_eq!(chunk_size_for(0), 1);
        assert_eq!(chunk_size_for(1000), 1000);
        assert_eq!(chunk_size_for(64 * 1024), 64 * 1024);
        assert_eq!(chunk_size_for(500 * 1024), CHUNK_SMALL);
        assert_eq!(chunk_size_for(5 * 1024 * 1024), CHUNK_MEDIUM);
        assert_eq!(chunk_size_for(100 * 1024 * 1024), CHUNK_LARGE);
    }
}
