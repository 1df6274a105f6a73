use std::{io::Cursor, str::FromStr, time::Instant};

use ark_circom::{read_zkey, CircomReduction};
use ark_ff::PrimeField;
use ark_groth16::{prepare_verifying_key, Groth16};
use ark_std::UniformRand;
use num_bigint::{BigInt, BigUint};
use tracing::{debug, info};

use crate::{
    artifacts::CircuitArtifacts,
    errors::{ProveError, VerificationError},
    schema::CanonicalInputs,
    snarkjs::{decode_proof, encode_proof, parse_public_signals, parse_verification_key, scalar_to_decimal},
    witness::WitnessCalculator,
    Scalar, E,
};

/// A proof in snarkjs JSON text and the circuit's public signals as decimal strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofOutput {
    pub proof: String,
    pub public_signals: Vec<String>,
}

/// The proving system behind the pipeline.
///
/// Implementations are synchronous and CPU bound; the pipeline runs them on a
/// blocking worker.
pub trait ProvingBackend: Send + Sync + 'static {
    /// Compute the witness and a proof. Inputs that do not satisfy the circuit
    /// must be reported as [`ProveError::ConstraintViolation`].
    fn prove(
        &self,
        artifacts: &CircuitArtifacts,
        inputs: &CanonicalInputs,
    ) -> Result<ProofOutput, ProveError>;

    /// Check a proof. A well-formed proof that does not verify is `Ok(false)`.
    fn verify(
        &self,
        verification_key: &[u8],
        public_signals: &[String],
        proof: &str,
    ) -> Result<bool, VerificationError>;
}

/// Groth16 over BN254 with circom witness programs and snarkjs keys.
#[derive(Debug, Clone, Copy)]
pub struct Groth16Backend {
    sanity_check: bool,
}

impl Groth16Backend {
    pub fn new() -> Self {
        Self { sanity_check: true }
    }

    /// Toggle the witness program's own constraint checks. With checks off a
    /// bad input yields a proof that fails verification instead of a
    /// constraint violation.
    pub fn with_sanity_check(mut self, enabled: bool) -> Self {
        self.sanity_check = enabled;
        self
    }

    pub fn sanity_check(&self) -> bool {
        self.sanity_check
    }
}

impl Default for Groth16Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvingBackend for Groth16Backend {
    fn prove(
        &self,
        artifacts: &CircuitArtifacts,
        inputs: &CanonicalInputs,
    ) -> Result<ProofOutput, ProveError> {
        let circuit = artifacts.circuit_name();
        let signals = witness_inputs(inputs)?;

        // WITNESS
        let t0 = Instant::now();
        let mut calculator = WitnessCalculator::from_bytes(artifacts.witness_program())?;
        if calculator.prime() != &BigUint::from(Scalar::MODULUS) {
            return Err(ProveError::FieldMismatch(calculator.prime().to_string()));
        }
        let witness = calculator.calculate(&signals, self.sanity_check)?;
        let witness_ms = t0.elapsed().as_millis();
        info!(circuit, elapsed_ms = witness_ms, "Witness generation");

        // LOAD KEY
        let t0 = Instant::now();
        let (pk, matrices) = read_zkey(&mut Cursor::new(artifacts.proving_key()))
            .map_err(|e| ProveError::ProvingKey(e.to_string()))?;
        let load_pk_ms = t0.elapsed().as_millis();
        info!(circuit, elapsed_ms = load_pk_ms, "Load proving key");

        let expected = matrices.num_instance_variables + matrices.num_witness_variables;
        if witness.len() != expected {
            return Err(ProveError::ProvingKey(format!(
                "witness has {} values but the proving key expects {}",
                witness.len(),
                expected
            )));
        }
        let full_assignment: Vec<Scalar> = witness.into_iter().map(Scalar::from).collect();

        // PROVE
        let t0 = Instant::now();
        let mut rng = rand::thread_rng();
        let r = Scalar::rand(&mut rng);
        let s = Scalar::rand(&mut rng);
        let proof = Groth16::<E, CircomReduction>::create_proof_with_reduction_and_matrices(
            &pk,
            r,
            s,
            &matrices,
            matrices.num_instance_variables,
            matrices.num_constraints,
            &full_assignment,
        )
        .map_err(|e| ProveError::Synthesis(e.to_string()))?;
        let prove_ms = t0.elapsed().as_millis();
        info!(circuit, elapsed_ms = prove_ms, "Groth16 prove");

        info!(
            "Groth16 SUMMARY {}, witness={} ms, load_pk={} ms, prove={} ms",
            circuit, witness_ms, load_pk_ms, prove_ms
        );

        let public_signals = full_assignment[1..matrices.num_instance_variables]
            .iter()
            .map(scalar_to_decimal)
            .collect();

        Ok(ProofOutput {
            proof: encode_proof(&proof),
            public_signals,
        })
    }

    fn verify(
        &self,
        verification_key: &[u8],
        public_signals: &[String],
        proof: &str,
    ) -> Result<bool, VerificationError> {
        let vk = parse_verification_key(verification_key)?;
        let proof = decode_proof(proof)?;

        let Some(inputs) = parse_public_signals(public_signals)? else {
            debug!("public signal outside the scalar field");
            return Ok(false);
        };
        if inputs.len() + 1 != vk.gamma_abc_g1.len() {
            debug!(
                signals = inputs.len(),
                expected = vk.gamma_abc_g1.len() - 1,
                "public signal count does not match the verification key"
            );
            return Ok(false);
        }

        let t0 = Instant::now();
        let pvk = prepare_verifying_key(&vk);
        let valid = Groth16::<E>::verify_proof(&pvk, &proof, &inputs)
            .map_err(|e| VerificationError::Pairing(e.to_string()))?;
        info!(elapsed_ms = t0.elapsed().as_millis() as u64, valid, "Groth16 verify");
        Ok(valid)
    }
}

/// Turn canonical inputs into single-valued witness signals.
pub fn witness_inputs(inputs: &CanonicalInputs) -> Result<Vec<(String, Vec<BigInt>)>, ProveError> {
    inputs
        .iter()
        .map(|(signal, value)| {
            let scalar = BigInt::from_str(value).map_err(|_| ProveError::InputEncoding {
                signal: signal.clone(),
                value: value.clone(),
            })?;
            Ok((signal.clone(), vec![scalar]))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snarkjs::verification_key_to_json;
    use ark_groth16::ProvingKey;
    use ark_relations::r1cs::{
        ConstraintSynthesizer, ConstraintSystemRef, LinearCombination, SynthesisError,
    };

    #[derive(Clone)]
    struct Multiply {
        a: Scalar,
        b: Scalar,
    }

    impl ConstraintSynthesizer<Scalar> for Multiply {
        fn generate_constraints(self, cs: ConstraintSystemRef<Scalar>) -> Result<(), SynthesisError> {
            let c = cs.new_input_variable(|| Ok(self.a * self.b))?;
            let a = cs.new_witness_variable(|| Ok(self.a))?;
            let b = cs.new_witness_variable(|| Ok(self.b))?;
            cs.enforce_constraint(
                LinearCombination::from(a),
                LinearCombination::from(b),
                LinearCombination::from(c),
            )
        }
    }

    fn setup() -> ProvingKey<E> {
        let mut rng = ark_std::test_rng();
        let circuit = Multiply {
            a: Scalar::from(0u8),
            b: Scalar::from(0u8),
        };
        Groth16::<E>::generate_random_parameters_with_reduction(circuit, &mut rng).unwrap()
    }

    fn prove(pk: &ProvingKey<E>, a: u64, b: u64) -> String {
        let mut rng = ark_std::test_rng();
        let circuit = Multiply {
            a: Scalar::from(a),
            b: Scalar::from(b),
        };
        let proof = Groth16::<E>::create_random_proof_with_reduction(circuit, pk, &mut rng).unwrap();
        encode_proof(&proof)
    }

    fn vkey_bytes(pk: &ProvingKey<E>) -> Vec<u8> {
        verification_key_to_json(&pk.vk).to_string().into_bytes()
    }

    #[test]
    fn verifies_snarkjs_encoded_proofs() {
        let pk = setup();
        let vkey = vkey_bytes(&pk);
        let proof = prove(&pk, 3, 4);
        let backend = Groth16Backend::new();

        assert!(backend.verify(&vkey, &["12".to_string()], &proof).unwrap());
        assert!(!backend.verify(&vkey, &["13".to_string()], &proof).unwrap());
    }

    #[test]
    fn key_for_another_circuit_rejects_without_error() {
        let pk = setup();
        let proof = prove(&pk, 3, 4);

        let mut rng = ark_std::test_rng();
        // Advance the rng so the second setup draws different toxic waste.
        let _ = Scalar::rand(&mut rng);
        let other = Groth16::<E>::generate_random_parameters_with_reduction(
            Multiply {
                a: Scalar::from(0u8),
                b: Scalar::from(0u8),
            },
            &mut rng,
        )
        .unwrap();

        let verdict = Groth16Backend::new().verify(&vkey_bytes(&other), &["12".to_string()], &proof);
        assert!(!verdict.unwrap());
    }

    #[test]
    fn signal_count_mismatch_is_invalid_not_fatal() {
        let pk = setup();
        let proof = prove(&pk, 3, 4);
        let signals = vec!["12".to_string(), "1".to_string()];
        assert!(!Groth16Backend::new().verify(&vkey_bytes(&pk), &signals, &proof).unwrap());
    }

    #[test]
    fn malformed_verification_inputs_are_errors() {
        let pk = setup();
        let proof = prove(&pk, 3, 4);
        let backend = Groth16Backend::new();

        assert!(matches!(
            backend.verify(b"{\"protocol\":", &["12".to_string()], &proof),
            Err(VerificationError::MalformedKey(_))
        ));
        assert!(matches!(
            backend.verify(&vkey_bytes(&pk), &["12".to_string()], "not a proof"),
            Err(VerificationError::MalformedProof(_))
        ));
        assert!(matches!(
            backend.verify(&vkey_bytes(&pk), &["twelve".to_string()], &proof),
            Err(VerificationError::MalformedSignal(_))
        ));
    }

    #[test]
    fn witness_programs_for_other_fields_are_refused() {
        let wasm = wat::parse_str(crate::witness::tests::MULTIPLY_WAT).unwrap();
        let artifacts = CircuitArtifacts::new("multiply", wasm, b"".to_vec(), b"{}".to_vec());
        let inputs: CanonicalInputs = [("a", "3"), ("b", "4"), ("c", "12")].into_iter().collect();

        let err = Groth16Backend::new().prove(&artifacts, &inputs).unwrap_err();
        assert!(matches!(err, ProveError::FieldMismatch(ref p) if p == "65521"), "{err}");
    }

    #[test]
    fn broken_witness_programs_are_fatal() {
        let artifacts = CircuitArtifacts::new("multiply", b"garbage".to_vec(), b"".to_vec(), b"{}".to_vec());
        let inputs: CanonicalInputs = [("a", "3")].into_iter().collect();
        assert!(matches!(
            Groth16Backend::new().prove(&artifacts, &inputs),
            Err(ProveError::Witness(_))
        ));
    }

    #[test]
    fn canonical_inputs_become_single_valued_signals() {
        let inputs: CanonicalInputs = [("a", "-3"), ("b", "4")].into_iter().collect();
        let signals = witness_inputs(&inputs).unwrap();
        assert_eq!(
            signals,
            vec![
                ("a".to_string(), vec![BigInt::from(-3)]),
                ("b".to_string(), vec![BigInt::from(4)]),
            ]
        );

        let bad: CanonicalInputs = [("a", "3.5")].into_iter().collect();
        assert!(matches!(
            witness_inputs(&bad),
            Err(ProveError::InputEncoding { ref signal, .. }) if signal == "a"
        ));
    }
}
