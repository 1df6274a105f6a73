use std::{fmt, io, time::Duration};

use thiserror::Error;

use crate::{artifacts::ArtifactKind, schema::FieldKind, witness::WitnessError};

/// Configuration bugs: the schema itself, or the schema/circuit pairing, is wrong.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("field `{field}` declares unknown kind `{kind}`")]
    UnknownKind { field: String, kind: String },
    #[error("field `{0}` is declared more than once")]
    DuplicateField(String),
    #[error("schema is not a JSON object of field definitions: {0}")]
    Malformed(String),
    #[error("circuit `{circuit}` has no input signal named `{signal}`")]
    CircuitMismatch { circuit: String, signal: String },
}

/// Raw caller input that cannot be turned into canonical circuit inputs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoercionError {
    #[error("missing value for field `{field}`")]
    MissingField { field: String },
    #[error("field `{field}` expects a {expected} value, got `{found}`")]
    TypeMismatch {
        field: String,
        expected: FieldKind,
        found: String,
    },
}

impl CoercionError {
    pub fn field(&self) -> &str {
        match self {
            CoercionError::MissingField { field } | CoercionError::TypeMismatch { field, .. } => {
                field
            }
        }
    }
}

/// Why a single artifact retrieval failed.
#[derive(Debug, Error)]
pub enum FetchCause {
    #[error("invalid circuit name")]
    InvalidCircuitName,
    #[error("artifact not found")]
    NotFound,
    #[error("artifact host answered with status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("timed out after {} ms", .0.as_millis())]
    TimedOut(Duration),
}

impl FetchCause {
    /// Transient causes worth another attempt against the same host.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchCause::Transport(_) | FetchCause::TimedOut(_) => true,
            FetchCause::Status(status) => *status >= 500 || *status == 429,
            FetchCause::InvalidCircuitName | FetchCause::NotFound | FetchCause::Io(_) => false,
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to fetch {artifact} for circuit `{circuit}`: {cause}")]
pub struct ArtifactFetchError {
    pub circuit: String,
    pub artifact: ArtifactKind,
    #[source]
    pub cause: FetchCause,
}

/// Failures reported by a proving backend.
///
/// `ConstraintViolation` is the expected "no" answer and is turned into a
/// [`ProofResult`](crate::pipeline::ProofResult) by the pipeline. Every other
/// variant is fatal.
#[derive(Debug, Error)]
pub enum ProveError {
    #[error("the inputs do not satisfy the circuit constraints")]
    ConstraintViolation,
    #[error("circuit has no input signal named `{0}`")]
    UnknownSignal(String),
    #[error("input `{signal}` is not a field element: `{value}`")]
    InputEncoding { signal: String, value: String },
    #[error("witness generation failed: {0}")]
    Witness(WitnessError),
    #[error("witness program computes over a different field (prime {0})")]
    FieldMismatch(String),
    #[error("malformed proving key: {0}")]
    ProvingKey(String),
    #[error("proof construction failed: {0}")]
    Synthesis(String),
}

impl From<WitnessError> for ProveError {
    fn from(err: WitnessError) -> Self {
        match err {
            WitnessError::Exit(exit) if exit.is_constraint_violation() => {
                ProveError::ConstraintViolation
            }
            WitnessError::UnknownSignal(signal) => ProveError::UnknownSignal(signal),
            other => ProveError::Witness(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("malformed verification key: {0}")]
    MalformedKey(String),
    #[error("malformed proof: {0}")]
    MalformedProof(String),
    #[error("malformed public signal `{0}`")]
    MalformedSignal(String),
    #[error("pairing check failed to run: {0}")]
    Pairing(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Which pipeline stage produced a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prove,
    Verify,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Prove => f.write_str("prove"),
            Stage::Verify => f.write_str("verify"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Coercion(#[from] CoercionError),
    #[error(transparent)]
    Fetch(#[from] ArtifactFetchError),
    #[error("proving circuit `{circuit}` failed: {source}")]
    Proving {
        circuit: String,
        #[source]
        source: ProveError,
    },
    #[error("verifying proof for circuit `{circuit}` failed: {source}")]
    Verification {
        circuit: String,
        #[source]
        source: VerificationError,
    },
    #[error("{stage} worker for circuit `{circuit}` did not complete: {message}")]
    Worker {
        circuit: String,
        stage: Stage,
        message: String,
    },
}

impl PipelineError {
    /// Errors a caller may retry unchanged; only artifact retrieval qualifies.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Fetch(err) if err.cause.is_transient())
    }

    /// Errors caused by the caller's inputs rather than by the deployment.
    pub fn is_input_error(&self) -> bool {
        matches!(self, PipelineError::Coercion(_))
    }
}
