//! Circuit artifacts and the sources they are retrieved from.
//!
//! Every circuit is published as three artifacts addressed by its name: the
//! witness-generation program (`wasm`), the Groth16 proving key (`zkey`) and the
//! verification key (`vkey`, JSON).

use std::{fmt, ops::Deref, sync::Arc};

use async_trait::async_trait;
use memmap2::Mmap;
use sha2::{Digest, Sha256};

use crate::errors::FetchCause;

pub mod cache;
pub mod dir;
pub mod http;

pub use cache::ArtifactCache;
pub use dir::DirArtifactSource;
pub use http::{HttpArtifactSource, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    WitnessProgram,
    ProvingKey,
    VerificationKey,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::WitnessProgram,
        ArtifactKind::ProvingKey,
        ArtifactKind::VerificationKey,
    ];

    /// Path segment used by the artifact host: `/circuit/{name}/{segment}`.
    pub fn path_segment(&self) -> &'static str {
        match self {
            ArtifactKind::WitnessProgram => "wasm",
            ArtifactKind::ProvingKey => "zkey",
            ArtifactKind::VerificationKey => "vkey",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::WitnessProgram => f.write_str("witness program"),
            ArtifactKind::ProvingKey => f.write_str("proving key"),
            ArtifactKind::VerificationKey => f.write_str("verification key"),
        }
    }
}

/// Artifact contents, either downloaded into memory or mapped from disk.
pub enum ArtifactBytes {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Deref for ArtifactBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            ArtifactBytes::Owned(bytes) => bytes,
            ArtifactBytes::Mapped(map) => map,
        }
    }
}

impl fmt::Debug for ArtifactBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactBytes::Owned(bytes) => write!(f, "Owned({} bytes)", bytes.len()),
            ArtifactBytes::Mapped(map) => write!(f, "Mapped({} bytes)", map.len()),
        }
    }
}

impl From<Vec<u8>> for ArtifactBytes {
    fn from(bytes: Vec<u8>) -> Self {
        ArtifactBytes::Owned(bytes)
    }
}

impl From<&[u8]> for ArtifactBytes {
    fn from(bytes: &[u8]) -> Self {
        ArtifactBytes::Owned(bytes.to_vec())
    }
}

/// The three artifacts of one circuit, with a SHA-256 digest of each.
#[derive(Debug)]
pub struct CircuitArtifacts {
    circuit_name: String,
    witness_program: ArtifactBytes,
    proving_key: ArtifactBytes,
    verification_key: ArtifactBytes,
    digests: [[u8; 32]; 3],
}

impl CircuitArtifacts {
    pub fn new(
        circuit_name: impl Into<String>,
        witness_program: impl Into<ArtifactBytes>,
        proving_key: impl Into<ArtifactBytes>,
        verification_key: impl Into<ArtifactBytes>,
    ) -> Self {
        let witness_program = witness_program.into();
        let proving_key = proving_key.into();
        let verification_key = verification_key.into();
        let digests: [[u8; 32]; 3] = [
            Sha256::digest(&*witness_program).into(),
            Sha256::digest(&*proving_key).into(),
            Sha256::digest(&*verification_key).into(),
        ];

        Self {
            circuit_name: circuit_name.into(),
            witness_program,
            proving_key,
            verification_key,
            digests,
        }
    }

    pub fn circuit_name(&self) -> &str {
        &self.circuit_name
    }

    pub fn witness_program(&self) -> &[u8] {
        &self.witness_program
    }

    pub fn proving_key(&self) -> &[u8] {
        &self.proving_key
    }

    /// Verification key as raw JSON text.
    pub fn verification_key(&self) -> &[u8] {
        &self.verification_key
    }

    pub fn get(&self, kind: ArtifactKind) -> &[u8] {
        match kind {
            ArtifactKind::WitnessProgram => self.witness_program(),
            ArtifactKind::ProvingKey => self.proving_key(),
            ArtifactKind::VerificationKey => self.verification_key(),
        }
    }

    pub fn digest(&self, kind: ArtifactKind) -> &[u8; 32] {
        match kind {
            ArtifactKind::WitnessProgram => &self.digests[0],
            ArtifactKind::ProvingKey => &self.digests[1],
            ArtifactKind::VerificationKey => &self.digests[2],
        }
    }

    /// Digest over the three artifact digests; changes when any artifact changes.
    pub fn content_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.circuit_name.as_bytes());
        for digest in &self.digests {
            hasher.update(digest);
        }
        hasher.finalize().into()
    }

    pub fn total_size(&self) -> u64 {
        ArtifactKind::ALL
            .iter()
            .map(|kind| self.get(*kind).len() as u64)
            .sum()
    }
}

/// Somewhere circuit artifacts can be read from by circuit name.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch(&self, circuit: &str, kind: ArtifactKind) -> Result<ArtifactBytes, FetchCause>;
}

#[async_trait]
impl<S: ArtifactSource + ?Sized> ArtifactSource for Arc<S> {
    async fn fetch(&self, circuit: &str, kind: ArtifactKind) -> Result<ArtifactBytes, FetchCause> {
        (**self).fetch(circuit, kind).await
    }
}

/// Circuit names end up in URLs and file paths, so only a conservative
/// character set is allowed and dot-only names are refused.
pub fn validate_circuit_name(circuit: &str) -> Result<(), FetchCause> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    if circuit.is_empty()
        || circuit.len() > 128
        || !circuit.chars().all(allowed)
        || circuit.chars().all(|c| c == '.')
    {
        return Err(FetchCause::InvalidCircuitName);
    }
    Ok(())
}
