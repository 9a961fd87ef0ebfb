//! Encrypted (and merely zstd-compressed, for an empty password) file sink,
//! with online key rotation and relocation (spec §4.8.2-§4.8.4).
//!
//! Grounded in `original_source/lib/__/core/log/detail/stream_sink.hxx`'s
//! `stream_context`/`aes` RAII types: one zstd frame and (if a password is
//! set) one AES-256-CBC session span the sink's whole open lifetime, ending
//! only when the sink is stopped, rotated or relocated.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::compress::{CompressStream, DecompressStream};
use crate::crypto::{self, CbcStreamEncryptor};
use crate::error::{LogError, Result};
use crate::path_util::unique_path;
use crate::sink::SinkBody;

pub struct EncryptedFileSink {
    base_path: PathBuf,
    password: String,
    current_path: PathBuf,
    known_paths: Vec<PathBuf>,
    file: std::fs::File,
    zstd: Option<CompressStream>,
    cipher: Option<CbcStreamEncryptor>,
}

impl EncryptedFileSink {
    /// Resolve a fresh unique path under `base_path` and start a pipeline
    /// there (spec §4.8.2 "On start").
    pub fn start(base_path: impl Into<PathBuf>, password: impl Into<String>) -> Result<Self> {
        let base_path = base_path.into();
        let path = unique_path(&base_path);
        let mut sink = Self::start_at(&path, password.into())?;
        sink.base_path = base_path;
        Ok(sink)
    }

    fn start_at(path: &Path, password: String) -> Result<Self> {
        let mut file = open_new(path)?;
        if !password.is_empty() {
            let header = crypto::verification_header(&password);
            file.write_all(&header)
                .map_err(|source| io_write_failed(path, source))?;
        }
        let zstd = CompressStream::new().map_err(|source| io_write_failed(path, source))?;
        let cipher = (!password.is_empty()).then(|| CbcStreamEncryptor::new(&password));
        Ok(Self {
            base_path: path.to_path_buf(),
            password,
            current_path: path.to_path_buf(),
            known_paths: vec![path.to_path_buf()],
            file,
            zstd: Some(zstd),
            cipher,
        })
    }

    #[must_use]
    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    #[must_use]
    pub fn known_paths(&self) -> &[PathBuf] {
        &self.known_paths
    }

    fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        let zstd = self
            .zstd
            .as_mut()
            .ok_or(LogError::InvalidState("sink already stopped"))?;
        let compressed = zstd.push(payload).map_err(|source| io_write_failed(&self.current_path, source))?;
        let out = match &mut self.cipher {
            Some(cipher) => cipher.update(&compressed),
            None => compressed,
        };
        self.file
            .write_all(&out)
            .map_err(|source| io_write_failed(&self.current_path, source))
    }

    /// Finalize the zstd frame and (if encrypted) the cipher's last padded
    /// block, then flush the file (spec §4.8.2 "On stop"). Idempotent.
    pub fn finalize(&mut self) -> Result<()> {
        let Some(zstd) = self.zstd.take() else {
            return Ok(());
        };
        let epilogue = zstd.finish().map_err(|source| io_write_failed(&self.current_path, source))?;
        let out = match self.cipher.take() {
            Some(mut cipher) => {
                let mut bytes = cipher.update(&epilogue);
                bytes.extend_from_slice(&cipher.finish());
                bytes
            }
            None => epilogue,
        };
        self.file
            .write_all(&out)
            .map_err(|source| io_write_failed(&self.current_path, source))?;
        self.file.flush().map_err(|source| io_write_failed(&self.current_path, source))
    }
}

impl SinkBody for EncryptedFileSink {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let mut payload = line.as_bytes().to_vec();
        payload.push(b'\n');
        self.write_payload(&payload)
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush().map_err(|source| io_write_failed(&self.current_path, source))
    }
}

fn open_new(path: &Path) -> Result<std::fs::File> {
    std::fs::File::create(path).map_err(|source| io_write_failed(path, source))
}

fn io_write_failed(path: &Path, source: std::io::Error) -> LogError {
    LogError::IoWriteFailed {
        path: path.to_path_buf(),
        source,
    }
}

/// `rotate_key(new_password, old_password?)` (spec §4.8.3): stop, reopen at
/// the same configured name, merge old content in under the new password.
pub fn rotate_key(handle: &Arc<Mutex<EncryptedFileSink>>, new_password: &str, old_password: Option<&str>) -> Result<()> {
    reopen(handle, None, new_password, old_password)
}

/// `relocate(new_path, new_password?, old_password?)` (spec §4.8.3): as
/// `rotate_key`, but the fresh sink is opened under a different base name.
/// Content only merges in if `new_path`'s stem matches the sink's current
/// configured name — a relocate to a genuinely different name just starts
/// a new, empty history entry alongside the untouched old logs.
pub fn relocate(
    handle: &Arc<Mutex<EncryptedFileSink>>,
    new_path: &Path,
    new_password: &str,
    old_password: Option<&str>,
) -> Result<()> {
    reopen(handle, Some(new_path), new_password, old_password)
}

fn reopen(
    handle: &Arc<Mutex<EncryptedFileSink>>,
    new_base: Option<&Path>,
    new_password: &str,
    old_password: Option<&str>,
) -> Result<()> {
    let mut guard = handle.lock();
    guard.finalize()?;

    let old_base = guard.base_path.clone();
    let old_known_paths = guard.known_paths.clone();
    let target_base = new_base.map_or(old_base.clone(), Path::to_path_buf);
    let merges = !old_known_paths.is_empty() && old_base.file_stem() == target_base.file_stem();

    if merges {
        let tmp_path = target_base.with_extension("tmp");
        let mut fresh = EncryptedFileSink::start_at(&tmp_path, new_password.to_string())?;
        merge_logs(&old_known_paths, old_password, &mut fresh)?;
        for old in &old_known_paths {
            let _ = std::fs::remove_file(old);
        }
        let final_path = unique_path(&target_base);
        std::fs::rename(&tmp_path, &final_path).map_err(|source| io_write_failed(&final_path, source))?;
        fresh.base_path = target_base;
        fresh.current_path = final_path.clone();
        fresh.known_paths = vec![final_path];
        *guard = fresh;
    } else {
        let mut fresh = EncryptedFileSink::start(target_base, new_password.to_string())?;
        fresh.known_paths = old_known_paths;
        fresh.known_paths.push(fresh.current_path.clone());
        *guard = fresh;
    }
    Ok(())
}

fn merge_logs(old_paths: &[PathBuf], old_password: Option<&str>, into: &mut EncryptedFileSink) -> Result<()> {
    for old in old_paths {
        let plaintext = extract_plaintext(old, old_password)?;
        for line in plaintext.split(|&b| b == b'\n') {
            if !line.is_empty() {
                into.write_payload(&[line, b"\n"].concat())?;
            }
        }
    }
    Ok(())
}

fn extract_plaintext(path: &Path, password: Option<&str>) -> Result<Vec<u8>> {
    let raw = std::fs::read(path).map_err(|source| LogError::IoReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    decode(&raw, password)
}

/// `extract(input, output, password?)` (spec §4.8.4): verify the header (if
/// any), stream-decrypt then stream-decompress, and write whatever
/// plaintext was recovered even if the stream turns out to be truncated.
pub fn extract(input: &Path, output: &Path, password: Option<&str>) -> Result<()> {
    let raw = std::fs::read(input).map_err(|source| LogError::IoReadFailed {
        path: input.to_path_buf(),
        source,
    })?;

    let decode_result = decode(&raw, password);
    let (plaintext, err) = match decode_result {
        Ok(plaintext) => (plaintext, None),
        Err((partial, err)) => (partial, Some(err)),
    };

    std::fs::write(output, &plaintext).map_err(|source| LogError::IoWriteFailed {
        path: output.to_path_buf(),
        source,
    })?;

    match err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Decode a complete encrypted/compressed buffer into plaintext, used both
/// by `extract` and by merge. On decode failure the error carries whatever
/// prefix of plaintext was recoverable.
fn decode(raw: &[u8], password: Option<&str>) -> std::result::Result<Vec<u8>, (Vec<u8>, LogError)> {
    // `cipher_err`, when set, is the root cause (a truncated encrypted file);
    // `compressed` is still whatever prefix of the zstd stream the cipher
    // managed to recover before it ran out of input. We decompress that
    // prefix regardless, so a caller always gets genuine plaintext back
    // rather than raw zstd bytes (spec §4.8.4).
    let (compressed, cipher_err) = match password {
        None => (raw.to_vec(), None),
        Some(pw) => {
            if raw.len() < crypto::BLOCK_SIZE {
                return Err((Vec::new(), LogError::PrematureEnd("verification header")));
            }
            let mut header = [0_u8; crypto::BLOCK_SIZE];
            header.copy_from_slice(&raw[..crypto::BLOCK_SIZE]);
            if !crypto::verify_header(pw, &header) {
                return Err((Vec::new(), LogError::BadPassword));
            }
            let mut dec = crypto::CbcStreamDecryptor::new(pw);
            let mut plain = dec.update(&raw[crypto::BLOCK_SIZE..]).unwrap_or_default();
            match dec.finish() {
                Ok(tail) => {
                    plain.extend_from_slice(&tail);
                    (plain, None)
                }
                Err(err) => (plain, Some(err)),
            }
        }
    };

    let mut decompressor = match DecompressStream::new() {
        Ok(d) => d,
        Err(_source) => {
            return Err((
                Vec::new(),
                cipher_err.unwrap_or(LogError::PrematureEnd("decompression init")),
            ))
        }
    };
    let mut plaintext = match decompressor.push(&compressed) {
        Ok(bytes) => bytes,
        Err(_source) => {
            return Err((
                Vec::new(),
                cipher_err.unwrap_or(LogError::PrematureEnd("decompression")),
            ))
        }
    };
    match decompressor.finish() {
        Ok(tail) => {
            plaintext.extend_from_slice(&tail);
            match cipher_err {
                Some(err) => Err((plaintext, err)),
                None => Ok(plaintext),
            }
        }
        Err(_source) => Err((
            plaintext,
            cipher_err.unwrap_or(LogError::PrematureEnd("decompression")),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn round_trips_through_extract() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("secure.log");
        let mut sink = EncryptedFileSink::start(&base, "hunter2").unwrap();
        sink.write_line("first record").unwrap();
        sink.write_line("second record").unwrap();
        sink.finalize().unwrap();

        let out = dir.path().join("out.txt");
        extract(sink.current_path(), &out, Some("hunter2")).unwrap();
        let plaintext = std::fs::read_to_string(&out).unwrap();
        assert!(plaintext.contains("first record"));
        assert!(plaintext.contains("second record"));
    }

    #[test]
    fn wrong_password_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("secure.log");
        let mut sink = EncryptedFileSink::start(&base, "hunter2").unwrap();
        sink.write_line("hello").unwrap();
        sink.finalize().unwrap();

        let out = dir.path().join("out.txt");
        let err = extract(sink.current_path(), &out, Some("nope")).unwrap_err();
        assert!(matches!(err, LogError::BadPassword));
    }

    #[test]
    fn empty_password_means_compressed_only() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("plain.log");
        let mut sink = EncryptedFileSink::start(&base, "").unwrap();
        sink.write_line("hello world").unwrap();
        sink.finalize().unwrap();

        let out = dir.path().join("out.txt");
        extract(sink.current_path(), &out, None).unwrap();
        assert!(std::fs::read_to_string(&out).unwrap().contains("hello world"));
    }

    #[test]
    fn rotate_key_merges_old_content_under_new_password() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("secure.log");
        let sink = EncryptedFileSink::start(&base, "old-pw").unwrap();
        let handle = Arc::new(Mutex::new(sink));
        handle.lock().write_line("before rotation").unwrap();

        rotate_key(&handle, "new-pw", Some("old-pw")).unwrap();
        handle.lock().write_line("after rotation").unwrap();
        handle.lock().finalize().unwrap();

        let out = dir.path().join("out.txt");
        let current = handle.lock().current_path().to_path_buf();
        extract(&current, &out, Some("new-pw")).unwrap();
        let plaintext = std::fs::read_to_string(&out).unwrap();
        assert!(plaintext.contains("before rotation"));
        assert!(plaintext.contains("after rotation"));
    }
}
