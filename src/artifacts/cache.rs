use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{ArtifactKind, CircuitArtifacts};

/// In-memory artifact bundles keyed by circuit name.
///
/// An entry is only served while the published verification key still hashes
/// to the one it was stored with (see [`ArtifactCache::lookup`]). Each entry
/// remembers its content hash, so a refetch can tell whether the published
/// artifacts changed.
#[derive(Debug, Default)]
pub struct ArtifactCache {
    entries: Mutex<HashMap<String, Arc<CircuitArtifacts>>>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, circuit: &str) -> Option<Arc<CircuitArtifacts>> {
        self.entries.lock().get(circuit).cloned()
    }

    /// The cached bundle for `circuit`, provided `verification_key` is the key
    /// it was stored with. A new key means the circuit was republished.
    pub fn lookup(&self, circuit: &str, verification_key: &[u8]) -> Option<Arc<CircuitArtifacts>> {
        let cached = self.get(circuit)?;
        let digest: [u8; 32] = Sha256::digest(verification_key).into();
        if cached.digest(ArtifactKind::VerificationKey) == &digest {
            Some(cached)
        } else {
            debug!(circuit, "published verification key differs from the cached one");
            None
        }
    }

    /// Store a bundle, returning `true` when it replaced different content.
    pub fn insert(&self, artifacts: Arc<CircuitArtifacts>) -> bool {
        let circuit = artifacts.circuit_name().to_string();
        let hash = artifacts.content_hash();
        let previous = self.entries.lock().insert(circuit.clone(), artifacts);
        let changed = previous.is_some_and(|old| old.content_hash() != hash);
        debug!(circuit, content_hash = %hex::encode(hash), changed, "cached circuit artifacts");
        changed
    }

    pub fn invalidate(&self, circuit: &str) -> bool {
        self.entries.lock().remove(circuit).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
