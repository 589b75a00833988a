use crate::discovery::{AddonManifest, AddonRegistry, RegistryError};
use flix_bus::SOCKET_ENV;
use flix_core::ProviderId;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("add-on registry unavailable: {0}")]
    RegistryUnavailable(String),
    #[error("add-on {0} has no exec entry")]
    NoExec(ProviderId),
    #[error("spawn of {provider} failed: {source}")]
    Spawn {
        provider: ProviderId,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchArgs {
    pub requester: String,
    pub method: String,
    pub payload: String,
}

impl LaunchArgs {
    pub fn argv(&self, provider: &ProviderId) -> [String; 4] {
        [
            provider.to_string(),
            self.requester.clone(),
            self.method.clone(),
            self.payload.clone(),
        ]
    }
}

/// Fire-and-forget: implementations capture no output and never wait for
/// the child to exit.
pub trait ProcessLauncher: Send + Sync {
    fn spawn(&self, provider: &ProviderId, args: &LaunchArgs) -> Result<(), LaunchError>;

    fn spawn_all(
        &self,
        providers: &[ProviderId],
        args: &LaunchArgs,
    ) -> Vec<(ProviderId, LaunchError)> {
        providers
            .iter()
            .filter_map(|provider| {
                self.spawn(provider, args)
                    .err()
                    .map(|err| (provider.clone(), err))
            })
            .collect()
    }
}

pub struct CommandLauncher {
    registry: Arc<dyn AddonRegistry>,
    bus_socket: PathBuf,
}

impl CommandLauncher {
    pub fn new(registry: Arc<dyn AddonRegistry>, bus_socket: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            bus_socket: bus_socket.into(),
        }
    }
}

impl CommandLauncher {
    fn launch(
        &self,
        provider: &ProviderId,
        manifest: &AddonManifest,
        args: &LaunchArgs,
    ) -> Result<(), LaunchError> {
        if manifest.exec.trim().is_empty() {
            return Err(LaunchError::NoExec(provider.clone()));
        }
        let child = Command::new(&manifest.exec)
            .args(args.argv(provider))
            .envs(&manifest.env)
            .env(SOCKET_ENV, &self.bus_socket)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                provider: provider.clone(),
                source,
            })?;
        debug!(
            event = "provider_spawned",
            provider = %provider,
            method = %args.method,
            pid = child.id().unwrap_or_default()
        );
        Ok(())
    }
}

impl ProcessLauncher for CommandLauncher {
    fn spawn(&self, provider: &ProviderId, args: &LaunchArgs) -> Result<(), LaunchError> {
        let manifest = self.registry.manifest(provider)?;
        self.launch(provider, &manifest, args)
    }

    /// Reads the registry once for the whole batch.
    fn spawn_all(
        &self,
        providers: &[ProviderId],
        args: &LaunchArgs,
    ) -> Vec<(ProviderId, LaunchError)> {
        let manifests = match self.registry.manifests() {
            Ok(manifests) => manifests,
            Err(err) => {
                let reason = err.to_string();
                return providers
                    .iter()
                    .map(|provider| {
                        (provider.clone(), LaunchError::RegistryUnavailable(reason.clone()))
                    })
                    .collect();
            }
        };

        let mut failed = Vec::new();
        for provider in providers {
            let launched = match manifests.iter().find(|manifest| &manifest.id == provider) {
                Some(manifest) => self.launch(provider, manifest, args),
                None => Err(RegistryError::NotFound(provider.clone()).into()),
            };
            if let Err(err) = launched {
                failed.push((provider.clone(), err));
            }
        }
        failed
    }
}
