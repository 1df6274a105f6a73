//! Fetch → prove → verify for one named circuit.
//!
//! Each call is independent: the three artifacts are fetched concurrently and
//! joined before proving starts, proving and verification run on blocking
//! workers, and the outcome is a [`ProofResult`]. A constraint violation is an
//! ordinary result, not an error. Fetch failures and defects in the deployment
//! are returned as [`PipelineError`].

use std::{fmt, sync::Arc, time::Duration, time::Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    artifacts::{
        ArtifactBytes, ArtifactCache, ArtifactKind, ArtifactSource, CircuitArtifacts,
        HttpArtifactSource,
    },
    config::PipelineConfig,
    errors::{
        ArtifactFetchError, ConfigError, FetchCause, PipelineError, ProveError, SchemaError, Stage,
    },
    prover::{Groth16Backend, ProofOutput, ProvingBackend},
    schema::{coerce, CanonicalInputs, InputSchema, RawInputs},
    utils::format_size,
};

pub const CONSTRAINT_VIOLATION_MESSAGE: &str =
    "Proof generation failed: the inputs do not satisfy the circuit constraints";

/// Caller-facing outcome of one pipeline run.
///
/// When proving succeeded, `proof` and `public_signals` are always present and
/// `is_valid` carries the verification verdict. When the inputs violate the
/// circuit constraints both are absent, `is_valid` is false and `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofResult {
    pub proof: Option<String>,
    pub public_signals: Option<Vec<String>>,
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    unsatisfied: bool,
}

impl ProofResult {
    pub fn verified(output: ProofOutput, is_valid: bool) -> Self {
        Self {
            proof: Some(output.proof),
            public_signals: Some(output.public_signals),
            is_valid,
            error: None,
            unsatisfied: false,
        }
    }

    pub fn constraint_violation() -> Self {
        Self {
            proof: None,
            public_signals: None,
            is_valid: false,
            error: Some(CONSTRAINT_VIOLATION_MESSAGE.to_string()),
            unsatisfied: true,
        }
    }

    /// Artifacts could not be retrieved, so nothing was proved.
    pub fn artifacts_unavailable(err: &ArtifactFetchError) -> Self {
        Self {
            proof: None,
            public_signals: None,
            is_valid: false,
            error: Some(err.to_string()),
            unsatisfied: false,
        }
    }

    /// Set only by [`ProofResult::constraint_violation`]; not carried through
    /// serialisation.
    pub fn is_constraint_violation(&self) -> bool {
        self.unsatisfied
    }
}

/// Result of the prove step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProveOutcome {
    Proved(ProofOutput),
    Unsatisfied,
}

pub struct ProofPipeline<B = Groth16Backend> {
    source: Arc<dyn ArtifactSource>,
    backend: Arc<B>,
    cache: Option<Arc<ArtifactCache>>,
    fetch_deadline: Option<Duration>,
}

impl<B> Clone for ProofPipeline<B> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            backend: Arc::clone(&self.backend),
            cache: self.cache.clone(),
            fetch_deadline: self.fetch_deadline,
        }
    }
}

impl<B> fmt::Debug for ProofPipeline<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofPipeline")
            .field("cache", &self.cache.is_some())
            .field("fetch_deadline", &self.fetch_deadline)
            .finish_non_exhaustive()
    }
}

impl ProofPipeline<Groth16Backend> {
    /// HTTP artifact source and Groth16 backend, set up from `config`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let source = HttpArtifactSource::from_config(config)?;
        Self::with_source(Arc::new(source), config)
    }

    /// Groth16 backend over any artifact source, with the deadline, cache and
    /// sanity-check settings of `config`.
    pub fn with_source(
        source: Arc<dyn ArtifactSource>,
        config: &PipelineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let backend = Groth16Backend::new().with_sanity_check(config.sanity_check);
        let mut pipeline = Self::new(source, backend).with_fetch_deadline(config.fetch_deadline());
        if config.cache_artifacts {
            pipeline = pipeline.with_cache(Arc::new(ArtifactCache::new()));
        }
        Ok(pipeline)
    }
}

impl<B: ProvingBackend> ProofPipeline<B> {
    pub fn new(source: Arc<dyn ArtifactSource>, backend: B) -> Self {
        Self {
            source,
            backend: Arc::new(backend),
            cache: None,
            fetch_deadline: None,
        }
    }

    /// Reuse fetched artifacts across calls for the same circuit.
    pub fn with_cache(mut self, cache: Arc<ArtifactCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Give up on an artifact that has not arrived within `deadline`.
    pub fn with_fetch_deadline(mut self, deadline: Duration) -> Self {
        self.fetch_deadline = Some(deadline);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn cache(&self) -> Option<&ArtifactCache> {
        self.cache.as_deref()
    }

    /// Fetch all three artifacts concurrently. The first failure cancels the
    /// other fetches.
    ///
    /// With a cache, a cached circuit costs one verification key fetch: the
    /// bundle is reused while that key is unchanged, and refetched otherwise.
    pub async fn fetch_artifacts(
        &self,
        circuit: &str,
    ) -> Result<Arc<CircuitArtifacts>, ArtifactFetchError> {
        let Some(cache) = self.cache.as_ref().filter(|cache| cache.get(circuit).is_some()) else {
            return self.fetch_bundle(circuit, None).await;
        };

        let vkey = self.fetch_one(circuit, ArtifactKind::VerificationKey).await?;
        if let Some(artifacts) = cache.lookup(circuit, &vkey) {
            debug!(circuit, "artifact cache hit");
            return Ok(artifacts);
        }
        self.fetch_bundle(circuit, Some(vkey)).await
    }

    async fn fetch_bundle(
        &self,
        circuit: &str,
        known_vkey: Option<ArtifactBytes>,
    ) -> Result<Arc<CircuitArtifacts>, ArtifactFetchError> {
        let t0 = Instant::now();
        let vkey = async {
            match known_vkey {
                Some(bytes) => Ok(bytes),
                None => self.fetch_one(circuit, ArtifactKind::VerificationKey).await,
            }
        };
        let (wasm, zkey, vkey) = tokio::try_join!(
            self.fetch_one(circuit, ArtifactKind::WitnessProgram),
            self.fetch_one(circuit, ArtifactKind::ProvingKey),
            vkey,
        )?;
        let artifacts = Arc::new(CircuitArtifacts::new(circuit, wasm, zkey, vkey));
        info!(
            circuit,
            size = %format_size(artifacts.total_size()),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched artifacts"
        );

        if let Some(cache) = &self.cache {
            if cache.insert(Arc::clone(&artifacts)) {
                warn!(
                    circuit,
                    content_hash = %hex::encode(artifacts.content_hash()),
                    "published artifacts changed since last fetch"
                );
            }
        }
        Ok(artifacts)
    }

    async fn fetch_one(
        &self,
        circuit: &str,
        kind: ArtifactKind,
    ) -> Result<ArtifactBytes, ArtifactFetchError> {
        let fetch = self.source.fetch(circuit, kind);
        let result = match self.fetch_deadline {
            Some(deadline) => tokio::time::timeout(deadline, fetch)
                .await
                .unwrap_or(Err(FetchCause::TimedOut(deadline))),
            None => fetch.await,
        };

        match result {
            Ok(bytes) => {
                debug!(circuit, artifact = %kind, bytes = bytes.len(), "fetched artifact");
                Ok(bytes)
            }
            Err(cause) => Err(ArtifactFetchError {
                circuit: circuit.to_string(),
                artifact: kind,
                cause,
            }),
        }
    }

    /// Generate the witness and proof on a blocking worker.
    pub async fn prove(
        &self,
        artifacts: &Arc<CircuitArtifacts>,
        inputs: &CanonicalInputs,
    ) -> Result<ProveOutcome, PipelineError> {
        let circuit = artifacts.circuit_name().to_string();
        let backend = Arc::clone(&self.backend);
        let task_artifacts = Arc::clone(artifacts);
        let task_inputs = inputs.clone();

        let result =
            tokio::task::spawn_blocking(move || backend.prove(&task_artifacts, &task_inputs))
                .await
                .map_err(|err| PipelineError::Worker {
                    circuit: circuit.clone(),
                    stage: Stage::Prove,
                    message: err.to_string(),
                })?;

        match result {
            Ok(output) => Ok(ProveOutcome::Proved(output)),
            Err(ProveError::ConstraintViolation) => Ok(ProveOutcome::Unsatisfied),
            Err(ProveError::UnknownSignal(signal)) => {
                Err(SchemaError::CircuitMismatch { circuit, signal }.into())
            }
            Err(source) => Err(PipelineError::Proving { circuit, source }),
        }
    }

    /// Check `output` against the circuit's verification key on a blocking worker.
    pub async fn verify(
        &self,
        artifacts: &Arc<CircuitArtifacts>,
        output: &ProofOutput,
    ) -> Result<bool, PipelineError> {
        let circuit = artifacts.circuit_name().to_string();
        let backend = Arc::clone(&self.backend);
        let task_artifacts = Arc::clone(artifacts);
        let task_output = output.clone();

        tokio::task::spawn_blocking(move || {
            backend.verify(
                task_artifacts.verification_key(),
                &task_output.public_signals,
                &task_output.proof,
            )
        })
        .await
        .map_err(|err| PipelineError::Worker {
            circuit: circuit.clone(),
            stage: Stage::Verify,
            message: err.to_string(),
        })?
        .map_err(|source| PipelineError::Verification { circuit, source })
    }

    pub async fn generate_and_verify_proof(
        &self,
        circuit: &str,
        inputs: &CanonicalInputs,
    ) -> Result<ProofResult, PipelineError> {
        self.run(circuit, inputs)
            .instrument(info_span!("proof", circuit))
            .await
    }

    async fn run(
        &self,
        circuit: &str,
        inputs: &CanonicalInputs,
    ) -> Result<ProofResult, PipelineError> {
        let artifacts = self.fetch_artifacts(circuit).await?;
        self.prove_and_verify(&artifacts, inputs).await
    }

    /// Prove and verify against artifacts the caller already fetched.
    pub async fn prove_and_verify(
        &self,
        artifacts: &Arc<CircuitArtifacts>,
        inputs: &CanonicalInputs,
    ) -> Result<ProofResult, PipelineError> {
        let t0 = Instant::now();
        let output = match self.prove(artifacts, inputs).await? {
            ProveOutcome::Proved(output) => output,
            ProveOutcome::Unsatisfied => {
                info!(
                    elapsed_ms = t0.elapsed().as_millis() as u64,
                    "inputs do not satisfy the circuit constraints"
                );
                return Ok(ProofResult::constraint_violation());
            }
        };

        let is_valid = self.verify(artifacts, &output).await?;
        info!(
            is_valid,
            public_signals = output.public_signals.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Proof pipeline finished"
        );
        Ok(ProofResult::verified(output, is_valid))
    }

    /// Like [`generate_and_verify_proof`](Self::generate_and_verify_proof), but
    /// unreachable artifacts are reported in [`ProofResult::error`] as well. Only
    /// defects in the deployment remain errors.
    pub async fn generate_proof_result(
        &self,
        circuit: &str,
        inputs: &CanonicalInputs,
    ) -> Result<ProofResult, PipelineError> {
        match self.generate_and_verify_proof(circuit, inputs).await {
            Err(PipelineError::Fetch(err)) => {
                warn!(circuit, error = %err, "artifacts unavailable");
                Ok(ProofResult::artifacts_unavailable(&err))
            }
            other => other,
        }
    }

    /// Coerce raw form values against `schema`, then run the pipeline. Input
    /// errors surface before any artifact is fetched.
    pub async fn prove_with_schema(
        &self,
        circuit: &str,
        schema: &InputSchema,
        raw: &RawInputs,
    ) -> Result<ProofResult, PipelineError> {
        let inputs = coerce(schema, raw)?;
        self.generate_and_verify_proof(circuit, &inputs).await
    }
}
