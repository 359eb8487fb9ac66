//! Server-side store backing artifact bindings (C3): `store` hands over
//! ownership of a [`SamlObject`] under an [`Artifact`] key with a TTL;
//! `retrieve` is an atomic test-and-remove honoring single-use semantics,
//! recipient binding, and expiry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::artifact::Artifact;
use crate::error::ArtifactError;
use crate::xml::SamlObject;

const DEFAULT_BUCKET_COUNT: usize = 32;
const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct Entry {
    object: SamlObject,
    intended_recipient_entity_id: Option<String>,
    expires_at: Instant,
}

/// Striped in-memory artifact map. Entries are keyed by the artifact's full
/// wire-form bytes (type code, endpoint index where present, source ID, and
/// handle) rather than the handle alone, since two issuers can hand out the
/// same random handle under different source IDs. Buckets are chosen by a
/// hash of those same bytes so unrelated artifacts never contend on the same
/// mutex, the way the host application stripes its own ticket cache.
pub struct ArtifactMap {
    buckets: Vec<Mutex<HashMap<Vec<u8>, Entry>>>,
    ttl: Duration,
}

impl Default for ArtifactMap {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_COUNT, DEFAULT_TTL)
    }
}

impl ArtifactMap {
    pub fn new(bucket_count: usize, ttl: Duration) -> Self {
        let bucket_count = bucket_count.max(1);
        let mut buckets = Vec::with_capacity(bucket_count);
        for _ in 0..bucket_count {
            buckets.push(Mutex::new(HashMap::new()));
        }
        Self { buckets, ttl }
    }

    /// Takes ownership of `object`, keyed by `artifact`'s full
    /// `(type_code, source_id, handle)` identity. When
    /// `intended_recipient_entity_id` is set, `retrieve` will reject any
    /// other caller's entity ID with [`ArtifactError::WrongRecipient`].
    pub fn store(
        &self,
        object: SamlObject,
        artifact: &Artifact,
        intended_recipient_entity_id: Option<String>,
    ) {
        let key = artifact.to_bytes();
        let bucket = self.bucket_for(&key);
        let mut guard = bucket.lock().unwrap();
        guard.insert(
            key,
            Entry {
                object,
                intended_recipient_entity_id,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Atomically removes and returns the stored object, enforcing single
    /// use: a second call for the same artifact always sees
    /// [`ArtifactError::NotFound`], whether or not the first call succeeded.
    pub fn retrieve(
        &self,
        artifact: &Artifact,
        requesting_entity_id: &str,
    ) -> Result<SamlObject, ArtifactError> {
        let key = artifact.to_bytes();
        let bucket = self.bucket_for(&key);
        let mut guard = bucket.lock().unwrap();
        let entry = guard.remove(&key).ok_or(ArtifactError::NotFound)?;

        if entry.expires_at <= Instant::now() {
            return Err(ArtifactError::Expired);
        }
        if let Some(expected) = &entry.intended_recipient_entity_id {
            if expected != requesting_entity_id {
                return Err(ArtifactError::WrongRecipient);
            }
        }
        Ok(entry.object)
    }

    /// Drops expired entries across all buckets. Not required for
    /// correctness (`retrieve` checks expiry itself) but keeps long-running
    /// processes from accumulating never-claimed artifacts.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        for bucket in &self.buckets {
            bucket.lock().unwrap().retain(|_, entry| entry.expires_at > now);
        }
    }

    fn bucket_for(&self, key: &[u8]) -> &Mutex<HashMap<Vec<u8>, Entry>> {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in key {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        &self.buckets[(hash as usize) % self.buckets.len()]
    }
}
