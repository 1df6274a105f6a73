use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
    time::Instant,
};

use async_trait::async_trait;
use memmap2::MmapOptions;
use tracing::info;

use super::{validate_circuit_name, ArtifactBytes, ArtifactKind, ArtifactSource};
use crate::errors::FetchCause;

pub const VERIFICATION_KEY_FILE: &str = "verification_key.json";

/// Reads artifacts from a circuit build directory.
///
/// Layout, per circuit: `<root>/<name>/<name>.zkey`, `<root>/<name>/verification_key.json`
/// and the witness program at `<root>/<name>/<name>.wasm`, falling back to the
/// compiler's `<root>/<name>/<name>_js/<name>.wasm`.
#[derive(Debug, Clone)]
pub struct DirArtifactSource {
    root: PathBuf,
}

impl DirArtifactSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Candidate paths for an artifact, in lookup order.
    pub fn artifact_paths(&self, circuit: &str, kind: ArtifactKind) -> Vec<PathBuf> {
        let dir = self.root.join(circuit);
        match kind {
            ArtifactKind::WitnessProgram => vec![
                dir.join(format!("{circuit}.wasm")),
                dir.join(format!("{circuit}_js")).join(format!("{circuit}.wasm")),
            ],
            ArtifactKind::ProvingKey => vec![dir.join(format!("{circuit}.zkey"))],
            ArtifactKind::VerificationKey => vec![dir.join(VERIFICATION_KEY_FILE)],
        }
    }

    /// Circuits with a directory under the root, sorted by name.
    pub fn list_circuits(&self) -> io::Result<Vec<String>> {
        let mut circuits = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_circuit_name(name).is_ok() {
                    circuits.push(name.to_string());
                }
            }
        }
        circuits.sort();
        Ok(circuits)
    }
}

#[async_trait]
impl ArtifactSource for DirArtifactSource {
    async fn fetch(&self, circuit: &str, kind: ArtifactKind) -> Result<ArtifactBytes, FetchCause> {
        validate_circuit_name(circuit)?;
        let candidates = self.artifact_paths(circuit, kind);
        let path = candidates
            .into_iter()
            .find(|path| path.is_file())
            .ok_or(FetchCause::NotFound)?;

        let bytes = tokio::task::spawn_blocking(move || map_artifact(&path))
            .await
            .map_err(|err| FetchCause::Io(io::Error::new(io::ErrorKind::Other, err)))??;
        Ok(bytes)
    }
}

/// Memory-map an artifact file. Proving keys run to hundreds of megabytes, so
/// they are paged in by the prover instead of being read up front.
pub fn map_artifact(path: &Path) -> io::Result<ArtifactBytes> {
    let t0 = Instant::now();
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(ArtifactBytes::Owned(Vec::new()));
    }

    let map = unsafe { MmapOptions::new().map(&file)? };
    info!(
        path = %path.display(),
        bytes = len,
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "Mapped artifact"
    );
    Ok(ArtifactBytes::Mapped(map))
}
