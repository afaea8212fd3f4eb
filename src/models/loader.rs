//! Model artifact store and model set loader

use crate::error::{Result, ServingError};
use crate::models::aggregator::EnsembleWeights;
use crate::models::component::{Algorithm, AlgorithmKind, ModelComponent};
use crate::models::inference::EnsemblePredictor;
use crate::models::model_set::ModelSet;
use crate::types::features::FeatureSchema;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

/// One serialized component as fetched from the store
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentArtifact {
    pub id: String,
    pub algorithm: AlgorithmKind,
    pub schema: FeatureSchema,
    /// Opaque serialized parameters, decoded by [`Algorithm::decode`]
    pub parameters: Vec<u8>,
}

/// Everything needed to construct a model set
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactBundle {
    pub version: String,
    /// Alias the bundle was resolved through, if any
    pub alias: Option<String>,
    pub schema: FeatureSchema,
    pub weights: BTreeMap<String, f64>,
    pub components: Vec<ComponentArtifact>,
}

/// Registry metadata about one stored version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub version: String,
    pub created_at: Option<DateTime<Utc>>,
    pub metrics: BTreeMap<String, f64>,
    pub aliases: Vec<String>,
}

/// Read-only view of the model registry
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetch a bundle by explicit version or by alias
    async fn fetch(&self, version_or_alias: &str) -> Result<ArtifactBundle>;

    /// List stored versions, oldest first
    async fn list_versions(&self) -> Result<Vec<VersionMetadata>>;
}

/// On-disk manifest describing one version directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleManifest {
    pub version: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    pub schema: FeatureSchema,
    pub weights: BTreeMap<String, f64>,
    pub components: Vec<ComponentManifest>,
}

/// On-disk description of one component blob
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentManifest {
    pub id: String,
    pub algorithm: AlgorithmKind,
    pub schema: FeatureSchema,
    /// Blob file name, relative to the version directory
    pub artifact: String,
    /// Expected lowercase hex SHA-256 of the blob
    #[serde(default)]
    pub sha256: Option<String>,
}

const MANIFEST_FILE: &str = "manifest.json";
const ALIASES_FILE: &str = "aliases.json";

/// Directory-backed artifact store.
///
/// Layout:
/// ```text
/// <root>/aliases.json            {"production": "3"}
/// <root>/<version>/manifest.json BundleManifest
/// <root>/<version>/<artifact>    one serialized blob per component
/// ```
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read_aliases(&self) -> Result<HashMap<String, String>> {
        let path = self.root.join(ALIASES_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_manifest(&self, version: &str) -> Result<BundleManifest> {
        let path = self.root.join(version).join(MANIFEST_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ServingError::ArtifactNotFound(version.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let manifest: BundleManifest = serde_json::from_slice(&bytes).map_err(|e| {
            ServingError::Artifact(format!("invalid manifest {}: {}", path.display(), e))
        })?;

        if manifest.version != version {
            return Err(ServingError::Artifact(format!(
                "manifest in directory '{}' declares version '{}'",
                version, manifest.version
            )));
        }
        Ok(manifest)
    }
}

/// Reject identifiers that would escape the store root
fn check_identifier(id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
        return Err(ServingError::ArtifactNotFound(id.to_string()));
    }
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn fetch(&self, version_or_alias: &str) -> Result<ArtifactBundle> {
        check_identifier(version_or_alias)?;

        let aliases = self.read_aliases().await?;
        let (version, alias) = match aliases.get(version_or_alias) {
            Some(version) => (version.clone(), Some(version_or_alias.to_string())),
            None => (version_or_alias.to_string(), None),
        };
        check_identifier(&version)?;

        let manifest = self.read_manifest(&version).await?;
        let version_dir = self.root.join(&version);

        let mut components = Vec::with_capacity(manifest.components.len());
        for component in manifest.components {
            check_identifier(&component.artifact)?;
            let path = version_dir.join(&component.artifact);
            let parameters = tokio::fs::read(&path).await.map_err(|e| {
                ServingError::Artifact(format!("cannot read {}: {}", path.display(), e))
            })?;

            if let Some(expected) = &component.sha256 {
                let actual = sha256_hex(&parameters);
                if !actual.eq_ignore_ascii_case(expected) {
                    return Err(ServingError::Artifact(format!(
                        "digest mismatch for component '{}': expected {}, got {}",
                        component.id, expected, actual
                    )));
                }
            }

            components.push(ComponentArtifact {
                id: component.id,
                algorithm: component.algorithm,
                schema: component.schema,
                parameters,
            });
        }

        Ok(ArtifactBundle {
            version: manifest.version,
            alias,
            schema: manifest.schema,
            weights: manifest.weights,
            components,
        })
    }

    async fn list_versions(&self) -> Result<Vec<VersionMetadata>> {
        let aliases = self.read_aliases().await?;
        let mut versions = Vec::new();

        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            match self.read_manifest(&name).await {
                Ok(manifest) => versions.push(VersionMetadata {
                    aliases: aliases_for(&aliases, &manifest.version),
                    version: manifest.version,
                    created_at: manifest.created_at,
                    metrics: manifest.metrics,
                }),
                Err(e) => {
                    warn!(directory = %name, error = %e, "Skipping unreadable version directory");
                }
            }
        }

        sort_versions(&mut versions);
        Ok(versions)
    }
}

fn aliases_for(aliases: &HashMap<String, String>, version: &str) -> Vec<String> {
    let mut names: Vec<String> = aliases
        .iter()
        .filter(|(_, v)| v.as_str() == version)
        .map(|(alias, _)| alias.clone())
        .collect();
    names.sort();
    names
}

/// Numeric versions sort numerically, everything else lexicographically after
fn sort_versions(versions: &mut [VersionMetadata]) {
    versions.sort_by(|a, b| {
        match (a.version.parse::<u64>(), b.version.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => a.version.cmp(&b.version),
        }
    });
}

/// In-memory artifact store, used for embedding and tests
#[derive(Default)]
pub struct MemoryArtifactStore {
    bundles: RwLock<HashMap<String, ArtifactBundle>>,
    aliases: RwLock<HashMap<String, String>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bundle: ArtifactBundle) {
        if let Ok(mut bundles) = self.bundles.write() {
            bundles.insert(bundle.version.clone(), bundle);
        }
    }

    pub fn set_alias(&self, alias: &str, version: &str) {
        if let Ok(mut aliases) = self.aliases.write() {
            aliases.insert(alias.to_string(), version.to_string());
        }
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn fetch(&self, version_or_alias: &str) -> Result<ArtifactBundle> {
        let aliases = self
            .aliases
            .read()
            .map_err(|e| ServingError::Artifact(format!("Lock error: {}", e)))?;
        let (version, alias) = match aliases.get(version_or_alias) {
            Some(version) => (version.clone(), Some(version_or_alias.to_string())),
            None => (version_or_alias.to_string(), None),
        };

        let bundles = self
            .bundles
            .read()
            .map_err(|e| ServingError::Artifact(format!("Lock error: {}", e)))?;
        let mut bundle = bundles
            .get(&version)
            .cloned()
            .ok_or_else(|| ServingError::ArtifactNotFound(version_or_alias.to_string()))?;
        bundle.alias = alias;
        Ok(bundle)
    }

    async fn list_versions(&self) -> Result<Vec<VersionMetadata>> {
        let aliases = self
            .aliases
            .read()
            .map_err(|e| ServingError::Artifact(format!("Lock error: {}", e)))?;
        let bundles = self
            .bundles
            .read()
            .map_err(|e| ServingError::Artifact(format!("Lock error: {}", e)))?;

        let mut versions: Vec<VersionMetadata> = bundles
            .keys()
            .map(|version| VersionMetadata {
                version: version.clone(),
                created_at: None,
                metrics: BTreeMap::new(),
                aliases: aliases_for(&aliases, version),
            })
            .collect();
        sort_versions(&mut versions);
        Ok(versions)
    }
}

/// Builds model sets from fetched artifact bundles
#[derive(Debug, Clone, Default)]
pub struct ModelLoader {
    /// Operator-supplied weights replacing the bundle's weights
    weight_overrides: Option<HashMap<String, f64>>,
}

impl ModelLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weight_overrides(weight_overrides: Option<HashMap<String, f64>>) -> Self {
        Self { weight_overrides }
    }

    /// Decode every component and assemble an (unvalidated) model set.
    ///
    /// Structural compatibility is checked by the hot-reload manager at swap
    /// time; decoding problems and invalid weights fail here.
    pub fn build(&self, bundle: ArtifactBundle) -> Result<ModelSet> {
        let mut components = Vec::with_capacity(bundle.components.len());
        for artifact in &bundle.components {
            let algorithm = Algorithm::decode(artifact.algorithm, &artifact.parameters).map_err(
                |e| {
                    ServingError::Artifact(format!(
                        "cannot decode component '{}' ({:?}): {}",
                        artifact.id, artifact.algorithm, e
                    ))
                },
            )?;
            components.push(ModelComponent::new(
                &artifact.id,
                algorithm,
                artifact.schema.clone(),
            ));
        }

        let mut weights = EnsembleWeights::new(
            bundle
                .weights
                .iter()
                .map(|(id, w)| (id.clone(), *w))
                .collect(),
        )?;
        if let Some(overrides) = &self.weight_overrides {
            weights = weights.with_overrides(overrides)?;
        }

        let predictor = EnsemblePredictor::new(bundle.schema, components, weights);
        Ok(ModelSet::new(&bundle.version, predictor).with_alias(bundle.alias))
    }

    /// Fetch a bundle from the store and build it
    pub async fn load(&self, store: &dyn ArtifactStore, version_or_alias: &str) -> Result<ModelSet> {
        info!(model = %version_or_alias, "Fetching model bundle");

        let bundle = store.fetch(version_or_alias).await?;
        let model_set = self.build(bundle)?;

        info!(
            version = %model_set.version(),
            alias = ?model_set.alias(),
            components = ?model_set.predictor().component_ids(),
            "Model set loaded"
        );

        Ok(model_set)
    }
}
