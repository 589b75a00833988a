use flix_core::ProviderId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub const SCRIPT_KIND: &str = "script";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry read failed ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("manifest parse failed ({path}): {message}")]
    Parse { path: PathBuf, message: String },
    #[error("add-on {0} is not installed")]
    NotFound(ProviderId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonManifest {
    pub id: ProviderId,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Program launched with the four invocation tokens.
    #[serde(default)]
    pub exec: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_kind() -> String {
    SCRIPT_KIND.to_string()
}

fn default_enabled() -> bool {
    true
}

impl AddonManifest {
    pub fn script(id: impl Into<ProviderId>, exec: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: default_kind(),
            enabled: true,
            exec: exec.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledAddon {
    pub id: ProviderId,
    pub kind: String,
}

pub trait AddonRegistry: Send + Sync {
    fn manifests(&self) -> Result<Vec<AddonManifest>, RegistryError>;

    fn list_installed(
        &self,
        kind: &str,
        enabled_only: bool,
    ) -> Result<Vec<InstalledAddon>, RegistryError> {
        Ok(select(&self.manifests()?, kind, enabled_only))
    }

    fn manifest(&self, id: &ProviderId) -> Result<AddonManifest, RegistryError> {
        self.manifests()?
            .into_iter()
            .find(|manifest| &manifest.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }
}

fn select(manifests: &[AddonManifest], kind: &str, enabled_only: bool) -> Vec<InstalledAddon> {
    manifests
        .iter()
        .filter(|manifest| manifest.kind == kind && (manifest.enabled || !enabled_only))
        .map(|manifest| InstalledAddon {
            id: manifest.id.clone(),
            kind: manifest.kind.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    manifests: Vec<AddonManifest>,
}

impl MemoryRegistry {
    pub fn new(manifests: Vec<AddonManifest>) -> Self {
        Self { manifests }
    }
}

impl AddonRegistry for MemoryRegistry {
    fn manifests(&self) -> Result<Vec<AddonManifest>, RegistryError> {
        Ok(self.manifests.clone())
    }
}

/// One `*.toml` manifest per add-on in a directory, ordered by file name.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    dir: PathBuf,
}

impl FileRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load_all(&self) -> Result<Vec<AddonManifest>, RegistryError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(event = "registry_dir_missing", dir = %self.dir.display());
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(RegistryError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut paths = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("toml"))
            .collect::<Vec<_>>();
        paths.sort();

        let mut manifests = Vec::with_capacity(paths.len());
        for path in paths {
            match read_manifest(&path) {
                Ok(manifest) => manifests.push(manifest),
                Err(err) => warn!(event = "registry_manifest_skipped", error = %err),
            }
        }
        Ok(manifests)
    }
}

fn read_manifest(path: &Path) -> Result<AddonManifest, RegistryError> {
    let contents = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|err| RegistryError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

impl AddonRegistry for FileRegistry {
    fn manifests(&self) -> Result<Vec<AddonManifest>, RegistryError> {
        self.load_all()
    }
}

/// Provider lookup: enabled script add-ons carrying the provider prefix,
/// minus the coordinator itself.
#[derive(Clone)]
pub struct Discovery {
    registry: Arc<dyn AddonRegistry>,
    coordinator_id: ProviderId,
    prefix: String,
}

impl Discovery {
    pub fn new(
        registry: Arc<dyn AddonRegistry>,
        coordinator_id: ProviderId,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            coordinator_id,
            prefix: prefix.into(),
        }
    }

    pub fn registry(&self) -> &Arc<dyn AddonRegistry> {
        &self.registry
    }

    pub fn list_providers(&self) -> Result<Vec<ProviderId>, RegistryError> {
        let providers = self
            .registry
            .list_installed(SCRIPT_KIND, true)?
            .into_iter()
            .map(|addon| addon.id)
            .filter(|id| id.as_str().starts_with(&self.prefix) && id != &self.coordinator_id)
            .collect::<Vec<_>>();
        debug!(event = "providers_discovered", count = providers.len());
        Ok(providers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovery(registry: impl AddonRegistry + 'static) -> Discovery {
        Discovery::new(
            Arc::new(registry),
            ProviderId::new("plugin.video.flix"),
            "script.flix.",
        )
    }

    #[test]
    fn filters_by_prefix_kind_enabled_and_self() {
        let mut service = AddonManifest::script("script.flix.service", "/bin/true");
        service.kind = "service".to_string();
        let registry = MemoryRegistry::new(vec![
            AddonManifest::script("script.flix.zeta", "/bin/true"),
            AddonManifest::script("script.other.tool", "/bin/true"),
            AddonManifest::script("script.flix.off", "/bin/true").disabled(),
            service,
            AddonManifest::script("plugin.video.flix", "/bin/true"),
            AddonManifest::script("script.flix.alpha", "/bin/true"),
        ]);
        let ids = discovery(registry).list_providers().expect("list");
        assert_eq!(
            ids,
            vec![
                ProviderId::new("script.flix.zeta"),
                ProviderId::new("script.flix.alpha"),
            ]
        );
    }

    #[test]
    fn coordinator_is_excluded_even_with_matching_prefix() {
        let registry = MemoryRegistry::new(vec![AddonManifest::script(
            "script.flix.coordinator",
            "/bin/true",
        )]);
        let discovery = Discovery::new(
            Arc::new(registry),
            ProviderId::new("script.flix.coordinator"),
            "script.flix.",
        );
        assert!(discovery.list_providers().expect("list").is_empty());
    }

    #[test]
    fn file_registry_reads_manifests_in_file_name_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("20-beta.toml"),
            "id = \"script.flix.beta\"\nexec = \"/opt/beta\"\n[env]\nBETA_TOKEN = \"x\"\n",
        )
        .expect("write");
        std::fs::write(
            dir.path().join("10-alpha.toml"),
            "id = \"script.flix.alpha\"\nexec = \"/opt/alpha\"\n",
        )
        .expect("write");
        std::fs::write(dir.path().join("broken.toml"), "id = ").expect("write");
        std::fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

        let registry = FileRegistry::new(dir.path());
        let ids = discovery(registry.clone()).list_providers().expect("list");
        assert_eq!(
            ids,
            vec![
                ProviderId::new("script.flix.alpha"),
                ProviderId::new("script.flix.beta"),
            ]
        );
        let beta = registry
            .manifest(&ProviderId::new("script.flix.beta"))
            .expect("manifest");
        assert_eq!(beta.exec, "/opt/beta");
        assert_eq!(beta.env.get("BETA_TOKEN").map(String::as_str), Some("x"));
    }

    #[test]
    fn missing_registry_dir_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = FileRegistry::new(dir.path().join("nope"));
        assert!(registry
            .list_installed(SCRIPT_KIND, true)
            .expect("list")
            .is_empty());
        assert!(matches!(
            registry.manifest(&ProviderId::new("script.flix.x")),
            Err(RegistryError::NotFound(_))
        ));
    }
}
