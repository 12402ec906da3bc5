//! Content-addressed cache for verifier results.
//!
//! Keys are SHA-256 digests over a canonical encoding of everything that
//! influences a run: file contents, include directories, entry function,
//! timeout, and params. Because keys are content hashes, stale entries are
//! impossible by construction. One mutex serialises all access; lookups on
//! the hot path are in-memory, with an optional spill to disk as JSON blobs
//! in a git-style 2-character sharded layout.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tracing::debug;

use super::{VerifierOutput, VerifyRequest};
use crate::solution::Solution;

/// Process-local verifier result cache.
#[derive(Debug)]
pub struct VerifierCache {
    entries: Mutex<HashMap<String, VerifierOutput>>,
    objects_dir: Option<PathBuf>,
}

impl VerifierCache {
    /// In-memory cache with no disk persistence.
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            objects_dir: None,
        }
    }

    /// Cache that additionally persists blobs under `<root>/objects/`.
    pub fn with_dir(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let objects_dir = root.into().join("objects");
        fs::create_dir_all(&objects_dir)?;
        Ok(Self {
            entries: Mutex::new(HashMap::new()),
            objects_dir: Some(objects_dir),
        })
    }

    /// Compute the content key for a run. Files and include dirs are fed in
    /// sorted order so the key is independent of container ordering; params
    /// keep caller order because the verifier is order-sensitive.
    pub fn cache_key(solution: &Solution, request: &VerifyRequest) -> String {
        let mut hasher = Sha256::new();
        let working_dir = solution.working_dir();

        let mut files: Vec<(String, &str)> = solution
            .files()
            .iter()
            .map(|f| {
                let relative = f
                    .path()
                    .strip_prefix(&working_dir)
                    .unwrap_or(f.path())
                    .display()
                    .to_string();
                (relative, f.content.as_str())
            })
            .collect();
        files.sort_by(|a, b| a.0.cmp(&b.0));
        for (path, content) in files {
            feed(&mut hasher, path.as_bytes());
            feed(&mut hasher, &Sha256::digest(content.as_bytes()));
        }

        let mut dirs: Vec<String> = solution
            .include_dirs()
            .iter()
            .map(|d| d.display().to_string())
            .collect();
        dirs.sort();
        for dir in dirs {
            feed(&mut hasher, dir.as_bytes());
        }

        feed(&mut hasher, request.entry_function.as_bytes());
        feed(&mut hasher, &request.timeout_secs.to_le_bytes());
        for param in &request.params {
            feed(&mut hasher, param.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Look up a stored result.
    pub fn get(&self, key: &str) -> Option<VerifierOutput> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        if let Some(output) = entries.get(key) {
            debug!(key, "verifier cache hit (memory)");
            return Some(output.clone());
        }

        let dir = self.objects_dir.as_ref()?;
        let blob = fs::read(blob_path(dir, key)).ok()?;
        let output: VerifierOutput = serde_json::from_slice(&blob).ok()?;
        debug!(key, "verifier cache hit (disk)");
        entries.insert(key.to_string(), output.clone());
        Some(output)
    }

    /// Store a result.
    pub fn put(&self, key: &str, output: &VerifierOutput) {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.insert(key.to_string(), output.clone());

        let Some(dir) = self.objects_dir.as_ref() else {
            return;
        };
        let path = blob_path(dir, key);
        let Some(shard) = path.parent() else { return };
        // Atomic write: temp file in the shard directory, then rename.
        let result: std::io::Result<()> = fs::create_dir_all(shard).and_then(|_| {
            let mut tmp = tempfile::NamedTempFile::new_in(shard)?;
            tmp.write_all(&serde_json::to_vec(output)?)?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        });
        if let Err(error) = result {
            debug!(key, %error, "failed to persist verifier cache blob");
        }
    }
}

fn blob_path(objects_dir: &std::path::Path, key: &str) -> PathBuf {
    objects_dir.join(&key[..2]).join(&key[2..])
}

fn feed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
