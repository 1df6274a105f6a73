//! The JSON formats snarkjs uses for Groth16 verification keys and proofs.
//!
//! Field elements are decimal strings. Points are projective triples: G1 as
//! `[x, y, z]`, G2 as `[[x.c0, x.c1], [y.c0, y.c1], [z.c0, z.c1]]`, with `z` equal
//! to one for affine points and zero for the point at infinity.

use std::str::FromStr;

use ark_bn254::{Fq, Fq2, G1Affine, G2Affine};
use ark_ff::PrimeField;
use ark_groth16::{Proof, VerifyingKey};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::{errors::VerificationError, Scalar, E};

pub const PROTOCOL: &str = "groth16";
pub const CURVE: &str = "bn128";

#[derive(Debug, Serialize, Deserialize)]
struct VerificationKeyJson {
    protocol: String,
    curve: String,
    #[serde(rename = "nPublic")]
    n_public: usize,
    vk_alpha_1: Vec<String>,
    vk_beta_2: Vec<Vec<String>>,
    vk_gamma_2: Vec<Vec<String>>,
    vk_delta_2: Vec<Vec<String>>,
    #[serde(rename = "IC")]
    ic: Vec<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProofJson {
    pi_a: Vec<String>,
    pi_b: Vec<Vec<String>>,
    pi_c: Vec<String>,
    #[serde(default = "default_protocol")]
    protocol: String,
    #[serde(default = "default_curve")]
    curve: String,
}

fn default_protocol() -> String {
    PROTOCOL.to_string()
}

fn default_curve() -> String {
    CURVE.to_string()
}

/// Parse a snarkjs `verification_key.json`.
pub fn parse_verification_key(json: &[u8]) -> Result<VerifyingKey<E>, VerificationError> {
    let malformed = VerificationError::MalformedKey;
    let vk: VerificationKeyJson =
        serde_json::from_slice(json).map_err(|err| malformed(err.to_string()))?;

    if vk.protocol != PROTOCOL || vk.curve != CURVE {
        return Err(malformed(format!(
            "expected a {PROTOCOL} key over {CURVE}, got {} over {}",
            vk.protocol, vk.curve
        )));
    }
    if vk.ic.len() != vk.n_public + 1 {
        return Err(malformed(format!(
            "nPublic is {} but IC holds {} points",
            vk.n_public,
            vk.ic.len()
        )));
    }

    let gamma_abc_g1 = vk
        .ic
        .iter()
        .map(|point| g1_from_json(point))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| malformed(format!("IC: {err}")))?;

    Ok(VerifyingKey {
        alpha_g1: g1_from_json(&vk.vk_alpha_1).map_err(|err| malformed(format!("vk_alpha_1: {err}")))?,
        beta_g2: g2_from_json(&vk.vk_beta_2).map_err(|err| malformed(format!("vk_beta_2: {err}")))?,
        gamma_g2: g2_from_json(&vk.vk_gamma_2).map_err(|err| malformed(format!("vk_gamma_2: {err}")))?,
        delta_g2: g2_from_json(&vk.vk_delta_2).map_err(|err| malformed(format!("vk_delta_2: {err}")))?,
        gamma_abc_g1,
    })
}

/// Render a verification key in snarkjs layout.
pub fn verification_key_to_json(vk: &VerifyingKey<E>) -> serde_json::Value {
    let json = VerificationKeyJson {
        protocol: PROTOCOL.to_string(),
        curve: CURVE.to_string(),
        n_public: vk.gamma_abc_g1.len().saturating_sub(1),
        vk_alpha_1: g1_to_json(&vk.alpha_g1),
        vk_beta_2: g2_to_json(&vk.beta_g2),
        vk_gamma_2: g2_to_json(&vk.gamma_g2),
        vk_delta_2: g2_to_json(&vk.delta_g2),
        ic: vk.gamma_abc_g1.iter().map(g1_to_json).collect(),
    };
    serde_json::json!(json)
}

/// Serialise a proof as snarkjs `proof.json` text.
pub fn encode_proof(proof: &Proof<E>) -> String {
    let json = ProofJson {
        pi_a: g1_to_json(&proof.a),
        pi_b: g2_to_json(&proof.b),
        pi_c: g1_to_json(&proof.c),
        protocol: default_protocol(),
        curve: default_curve(),
    };
    serde_json::json!(json).to_string()
}

pub fn decode_proof(text: &str) -> Result<Proof<E>, VerificationError> {
    let malformed = VerificationError::MalformedProof;
    let proof: ProofJson = serde_json::from_str(text).map_err(|err| malformed(err.to_string()))?;
    if proof.protocol != PROTOCOL || proof.curve != CURVE {
        return Err(malformed(format!(
            "expected a {PROTOCOL} proof over {CURVE}, got {} over {}",
            proof.protocol, proof.curve
        )));
    }

    Ok(Proof {
        a: g1_from_json(&proof.pi_a).map_err(|err| malformed(format!("pi_a: {err}")))?,
        b: g2_from_json(&proof.pi_b).map_err(|err| malformed(format!("pi_b: {err}")))?,
        c: g1_from_json(&proof.pi_c).map_err(|err| malformed(format!("pi_c: {err}")))?,
    })
}

pub fn scalar_to_decimal(value: &Scalar) -> String {
    BigUint::from(value.into_bigint()).to_string()
}

/// Parse public signals as scalars.
///
/// Text that is not a decimal number is malformed. A decimal at or above the
/// scalar modulus can never be a public signal, so it yields `Ok(None)` and the
/// caller treats the proof as not verifying.
pub fn parse_public_signals(signals: &[String]) -> Result<Option<Vec<Scalar>>, VerificationError> {
    let modulus = BigUint::from(Scalar::MODULUS);
    let mut scalars = Vec::with_capacity(signals.len());
    for signal in signals {
        let value = parse_decimal(signal)
            .ok_or_else(|| VerificationError::MalformedSignal(signal.clone()))?;
        if value >= modulus {
            return Ok(None);
        }
        scalars.push(Scalar::from(value));
    }
    Ok(Some(scalars))
}

fn parse_decimal(text: &str) -> Option<BigUint> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    BigUint::from_str(text).ok()
}

fn base_field(text: &str) -> Result<Fq, String> {
    let value = parse_decimal(text).ok_or_else(|| format!("`{text}` is not a decimal number"))?;
    if value >= BigUint::from(Fq::MODULUS) {
        return Err(format!("`{text}` is not a base field element"));
    }
    Ok(Fq::from(value))
}

fn base_field_to_decimal(value: &Fq) -> String {
    BigUint::from(value.into_bigint()).to_string()
}

fn g1_from_json(coords: &[String]) -> Result<G1Affine, String> {
    let [x, y, z] = coords else {
        return Err(format!("expected 3 coordinates, got {}", coords.len()));
    };
    let (x, y, z) = (base_field(x)?, base_field(y)?, base_field(z)?);
    if z == Fq::from(0u8) {
        return Ok(G1Affine::identity());
    }
    if z != Fq::from(1u8) {
        return Err("point is not in affine form".to_string());
    }

    let point = G1Affine::new_unchecked(x, y);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err("point is not in the G1 subgroup".to_string());
    }
    Ok(point)
}

fn g2_from_json(coords: &[Vec<String>]) -> Result<G2Affine, String> {
    let [x, y, z] = coords else {
        return Err(format!("expected 3 coordinates, got {}", coords.len()));
    };
    let (x, y, z) = (extension_field(x)?, extension_field(y)?, extension_field(z)?);
    if z == Fq2::new(Fq::from(0u8), Fq::from(0u8)) {
        return Ok(G2Affine::identity());
    }
    if z != Fq2::new(Fq::from(1u8), Fq::from(0u8)) {
        return Err("point is not in affine form".to_string());
    }

    let point = G2Affine::new_unchecked(x, y);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err("point is not in the G2 subgroup".to_string());
    }
    Ok(point)
}

fn extension_field(pair: &[String]) -> Result<Fq2, String> {
    let [c0, c1] = pair else {
        return Err(format!("expected 2 components, got {}", pair.len()));
    };
    Ok(Fq2::new(base_field(c0)?, base_field(c1)?))
}

fn g1_to_json(point: &G1Affine) -> Vec<String> {
    if point.infinity {
        return vec!["0".into(), "1".into(), "0".into()];
    }
    vec![
        base_field_to_decimal(&point.x),
        base_field_to_decimal(&point.y),
        "1".into(),
    ]
}

fn g2_to_json(point: &G2Affine) -> Vec<Vec<String>> {
    let pair = |value: &Fq2| vec![base_field_to_decimal(&value.c0), base_field_to_decimal(&value.c1)];
    if point.infinity {
        return vec![
            vec!["0".into(), "0".into()],
            vec!["1".into(), "0".into()],
            vec!["0".into(), "0".into()],
        ];
    }
    vec![pair(&point.x), pair(&point.y), vec!["1".into(), "0".into()]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ec::{AffineRepr, CurveGroup};

    fn sample_key() -> VerifyingKey<E> {
        let g1 = G1Affine::generator();
        let g2 = G2Affine::generator();
        VerifyingKey {
            alpha_g1: g1,
            beta_g2: g2,
            gamma_g2: (g2 * Scalar::from(2u8)).into_affine(),
            delta_g2: (g2 * Scalar::from(3u8)).into_affine(),
            gamma_abc_g1: vec![g1, (g1 * Scalar::from(5u8)).into_affine()],
        }
    }

    #[test]
    fn verification_key_survives_snarkjs_layout() {
        let vk = sample_key();
        let json = verification_key_to_json(&vk);
        assert_eq!(json["nPublic"], 1);
        assert_eq!(json["vk_alpha_1"], serde_json::json!(["1", "2", "1"]));

        let parsed = parse_verification_key(json.to_string().as_bytes()).unwrap();
        assert_eq!(parsed, vk);
    }

    #[test]
    fn rejects_keys_for_other_protocols_or_inconsistent_sizes() {
        let mut json = verification_key_to_json(&sample_key());
        json["protocol"] = "plonk".into();
        assert!(matches!(
            parse_verification_key(json.to_string().as_bytes()),
            Err(VerificationError::MalformedKey(_))
        ));

        let mut json = verification_key_to_json(&sample_key());
        json["nPublic"] = 4.into();
        assert!(matches!(
            parse_verification_key(json.to_string().as_bytes()),
            Err(VerificationError::MalformedKey(_))
        ));

        assert!(matches!(
            parse_verification_key(b"not json"),
            Err(VerificationError::MalformedKey(_))
        ));
    }

    #[test]
    fn rejects_points_off_the_curve() {
        let mut json = verification_key_to_json(&sample_key());
        json["vk_alpha_1"] = serde_json::json!(["1", "3", "1"]);
        let err = parse_verification_key(json.to_string().as_bytes()).unwrap_err();
        assert!(err.to_string().contains("vk_alpha_1"), "{err}");
    }

    #[test]
    fn proof_text_decodes_to_the_same_points() {
        let g1 = G1Affine::generator();
        let proof = Proof {
            a: g1,
            b: G2Affine::generator(),
            c: (g1 * Scalar::from(7u8)).into_affine(),
        };
        let text = encode_proof(&proof);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["protocol"], "groth16");
        assert_eq!(value["curve"], "bn128");
        assert_eq!(value["pi_b"][2], serde_json::json!(["1", "0"]));

        assert_eq!(decode_proof(&text).unwrap(), proof);
        assert!(matches!(decode_proof("{}"), Err(VerificationError::MalformedProof(_))));
    }

    #[test]
    fn point_at_infinity_is_encoded_with_zero_z() {
        let identity = G1Affine::identity();
        assert_eq!(g1_to_json(&identity), vec!["0", "1", "0"]);
        assert_eq!(g1_from_json(&g1_to_json(&identity)).unwrap(), identity);
    }

    #[test]
    fn public_signals_are_bounded_by_the_scalar_field() {
        let signals = vec!["12".to_string(), "0".to_string()];
        let parsed = parse_public_signals(&signals).unwrap().unwrap();
        assert_eq!(parsed, vec![Scalar::from(12u8), Scalar::from(0u8)]);
        assert_eq!(scalar_to_decimal(&parsed[0]), "12");

        let modulus = BigUint::from(Scalar::MODULUS).to_string();
        assert!(parse_public_signals(&[modulus]).unwrap().is_none());

        assert!(matches!(
            parse_public_signals(&["-1".to_string()]),
            Err(VerificationError::MalformedSignal(ref s)) if s == "-1"
        ));
    }
}
