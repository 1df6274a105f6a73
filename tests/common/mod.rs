#![allow(dead_code)]

use std::{
    collections::HashMap,
    net::SocketAddr,
    str::FromStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use circom_prover::{
    ArtifactKind, ArtifactSource, CanonicalInputs, CircuitArtifacts, FetchCause, ProofOutput,
    ProveError, ProvingBackend, VerificationError,
};
use circom_prover::artifacts::ArtifactBytes;
use num_bigint::BigInt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Artifacts for a `c === a * b` circuit whose keys are tagged with `key_id`.
pub fn multiply_artifacts(key_id: &str) -> [(ArtifactKind, Vec<u8>); 3] {
    [
        (ArtifactKind::WitnessProgram, b"\0asm multiply".to_vec()),
        (ArtifactKind::ProvingKey, key_id.as_bytes().to_vec()),
        (
            ArtifactKind::VerificationKey,
            json!({ "key": key_id }).to_string().into_bytes(),
        ),
    ]
}

/// Backend that proves `c == a * b`. Proofs name the proving key they came
/// from and only verify against a verification key with the same name.
#[derive(Debug, Default)]
pub struct MockBackend {
    pub prove_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
    pub prove_delay: Option<Duration>,
}

impl MockBackend {
    pub fn prove_calls(&self) -> usize {
        self.prove_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

fn signal(inputs: &CanonicalInputs, name: &str) -> Result<BigInt, ProveError> {
    let value = inputs
        .get(name)
        .ok_or_else(|| ProveError::Synthesis(format!("input `{name}` was not provided")))?;
    BigInt::from_str(value).map_err(|_| ProveError::InputEncoding {
        signal: name.to_string(),
        value: value.to_string(),
    })
}

impl ProvingBackend for MockBackend {
    fn prove(
        &self,
        artifacts: &CircuitArtifacts,
        inputs: &CanonicalInputs,
    ) -> Result<ProofOutput, ProveError> {
        self.prove_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.prove_delay {
            std::thread::sleep(delay);
        }

        if let Some((unknown, _)) = inputs.iter().find(|(name, _)| !["a", "b", "c"].contains(&name.as_str())) {
            return Err(ProveError::UnknownSignal(unknown.clone()));
        }
        let (a, b, c) = (signal(inputs, "a")?, signal(inputs, "b")?, signal(inputs, "c")?);
        if a * b != c {
            return Err(ProveError::ConstraintViolation);
        }

        let key = String::from_utf8_lossy(artifacts.proving_key()).into_owned();
        Ok(ProofOutput {
            proof: json!({ "key": key, "nonce": self.prove_calls() }).to_string(),
            public_signals: vec![c.to_string()],
        })
    }

    fn verify(
        &self,
        verification_key: &[u8],
        public_signals: &[String],
        proof: &str,
    ) -> Result<bool, VerificationError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let vkey: Value = serde_json::from_slice(verification_key)
            .map_err(|e| VerificationError::MalformedKey(e.to_string()))?;
        let proof: Value =
            serde_json::from_str(proof).map_err(|e| VerificationError::MalformedProof(e.to_string()))?;
        Ok(vkey["key"] == proof["key"] && public_signals.len() == 1)
    }
}

/// In-memory artifact source that counts fetches.
#[derive(Debug, Default)]
pub struct MemorySource {
    artifacts: Mutex<HashMap<(String, ArtifactKind), Vec<u8>>>,
    pub fetches: AtomicUsize,
    pub delay: Option<Duration>,
}

impl MemorySource {
    pub fn with_circuit(self, circuit: &str, artifacts: impl IntoIterator<Item = (ArtifactKind, Vec<u8>)>) -> Self {
        self.publish(circuit, artifacts);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn publish(&self, circuit: &str, artifacts: impl IntoIterator<Item = (ArtifactKind, Vec<u8>)>) {
        let mut stored = self.artifacts.lock();
        for (kind, bytes) in artifacts {
            stored.insert((circuit.to_string(), kind), bytes);
        }
    }

    pub fn remove(&self, circuit: &str, kind: ArtifactKind) {
        self.artifacts.lock().remove(&(circuit.to_string(), kind));
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactSource for MemorySource {
    async fn fetch(&self, circuit: &str, kind: ArtifactKind) -> Result<ArtifactBytes, FetchCause> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let bytes = self.artifacts.lock().get(&(circuit.to_string(), kind)).cloned();
        bytes.map(ArtifactBytes::Owned).ok_or(FetchCause::NotFound)
    }
}

/// State behind the in-process artifact host.
#[derive(Debug, Default)]
pub struct HostState {
    pub artifacts: Mutex<HashMap<(String, String), Vec<u8>>>,
    /// Requests still to be answered with 503 before serving normally.
    pub failures_left: AtomicUsize,
    pub retry_after: Mutex<Option<String>>,
    pub requests: AtomicUsize,
}

impl HostState {
    pub fn publish(&self, circuit: &str, artifacts: impl IntoIterator<Item = (ArtifactKind, Vec<u8>)>) {
        let mut stored = self.artifacts.lock();
        for (kind, bytes) in artifacts {
            stored.insert((circuit.to_string(), kind.path_segment().to_string()), bytes);
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

async fn serve_artifact(
    State(state): State<Arc<HostState>>,
    Path((circuit, artifact)): Path<(String, String)>,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let failing = state
        .failures_left
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok();
    if failing {
        return match state.retry_after.lock().clone() {
            Some(after) => (StatusCode::SERVICE_UNAVAILABLE, [(header::RETRY_AFTER, after)]).into_response(),
            None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        };
    }

    match state.artifacts.lock().get(&(circuit, artifact)) {
        Some(bytes) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn list_circuits(State(state): State<Arc<HostState>>) -> Json<Value> {
    let mut circuits: Vec<String> = state
        .artifacts
        .lock()
        .keys()
        .map(|(circuit, _)| circuit.clone())
        .collect();
    circuits.sort();
    circuits.dedup();
    Json(json!({ "circuits": circuits }))
}

/// Serve `state` under `/zkproof` on an ephemeral port; returns the base URL.
pub async fn spawn_artifact_host(state: Arc<HostState>) -> String {
    let app = Router::new()
        .route("/zkproof/circuit/:circuit/:artifact", get(serve_artifact))
        .route("/zkproof/circuits", get(list_circuits))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/zkproof")
}
