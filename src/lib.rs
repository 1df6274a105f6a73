//! Groth16 proof generation and verification for circom circuits
//!
//! This library turns schema-typed form values into a zero-knowledge proof:
//! - Schema coercion of raw values into canonical circuit inputs
//! - Retrieval of circuit artifacts (witness program, proving key, verification key)
//! - Witness generation, proving and verification, with constraint violations
//!   reported as a normal result
//!
//! Proofs use Groth16 over BN254 with snarkjs-compatible keys and proof JSON.

use ark_bn254::{Bn254, Fr};

pub type E = Bn254;
pub type Scalar = Fr;

pub mod artifacts;
pub mod config;
pub mod errors;
pub mod pipeline;
pub mod prover;
pub mod schema;
pub mod snarkjs;
pub mod utils;
pub mod witness;

// Re-export commonly used types and functions
pub use artifacts::{
    ArtifactCache, ArtifactKind, ArtifactSource, CircuitArtifacts, DirArtifactSource,
    HttpArtifactSource, RetryPolicy,
};
pub use config::PipelineConfig;
pub use errors::{
    ArtifactFetchError, CoercionError, ConfigError, FetchCause, PipelineError, ProveError,
    SchemaError, VerificationError,
};
pub use pipeline::{ProofPipeline, ProofResult, ProveOutcome, CONSTRAINT_VIOLATION_MESSAGE};
pub use prover::{Groth16Backend, ProofOutput, ProvingBackend};
pub use schema::{coerce, CanonicalInputs, FieldKind, FieldSpec, InputSchema, RawInputs, RawValue};
