use crate::abort::AbortSignal;
use crate::config::ProtocolConfig;
use crate::discovery::{Discovery, RegistryError};
use crate::launcher::{LaunchArgs, ProcessLauncher};
use crate::listener::{ArrivalHook, ResponseListener, WaitOutcome};
use flix_bus::{Bus, BusError};
use flix_core::{encode_request, Channel, EncodeError, Method, ProviderId, RequestEnvelope};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("no lookup providers are installed")]
    NoProviders,
    #[error("provider {provider} did not answer the resolve request in time")]
    ResolveTimeout { provider: ProviderId },
    #[error("provider {provider} could not resolve the selection")]
    ResolveFailed { provider: ProviderId },
    #[error("wait aborted")]
    Aborted,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gathered {
    pub responses: IndexMap<ProviderId, Value>,
    pub outcome: WaitOutcome,
    /// Expected providers that stayed silent, in discovery order.
    pub missing: Vec<ProviderId>,
    pub elapsed: Duration,
}

pub struct Coordinator {
    config: ProtocolConfig,
    discovery: Discovery,
    launcher: Arc<dyn ProcessLauncher>,
    bus: Arc<dyn Bus>,
    abort: AbortSignal,
    on_arrival: Option<ArrivalHook>,
}

impl Coordinator {
    pub fn new(
        config: ProtocolConfig,
        discovery: Discovery,
        launcher: Arc<dyn ProcessLauncher>,
        bus: Arc<dyn Bus>,
    ) -> Self {
        Self {
            config,
            discovery,
            launcher,
            bus,
            abort: AbortSignal::never(),
            on_arrival: None,
        }
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn with_arrival_hook(mut self, hook: ArrivalHook) -> Self {
        self.on_arrival = Some(hook);
        self
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn providers(&self) -> Result<Vec<ProviderId>, ProtocolError> {
        Ok(self.discovery.list_providers()?)
    }

    pub async fn broadcast(
        &self,
        request: RequestEnvelope,
        timeout: Duration,
    ) -> Result<Gathered, ProtocolError> {
        let providers = self.providers()?;
        self.broadcast_to(providers, request, timeout).await
    }

    /// Asks exactly `providers`. A partial answer set is not an error.
    pub async fn broadcast_to(
        &self,
        providers: Vec<ProviderId>,
        request: RequestEnvelope,
        timeout: Duration,
    ) -> Result<Gathered, ProtocolError> {
        if providers.is_empty() {
            info!(event = "broadcast_no_providers", method = %request.method());
            return Err(ProtocolError::NoProviders);
        }

        let request = request.with_call_id(Uuid::new_v4().to_string());
        let channel = Channel::for_request(self.config.coordinator_id.as_str(), &request);
        let launch = LaunchArgs {
            requester: self.config.coordinator_id.to_string(),
            method: request.method().to_string(),
            payload: encode_request(&request)?,
        };

        let mut listener = ResponseListener::new(&channel, providers.iter().cloned());
        if let Some(hook) = &self.on_arrival {
            listener = listener.with_arrival_hook(hook.clone());
        }
        listener.subscribe(self.bus.as_ref()).await?;

        let started = Instant::now();
        info!(
            event = "broadcast_start",
            channel = %channel,
            providers = providers.len(),
            timeout_ms = timeout.as_millis() as u64
        );
        for (provider, err) in self.launcher.spawn_all(&providers, &launch) {
            warn!(event = "provider_spawn_failed", provider = %provider, error = %err);
            listener.forget(&provider);
        }

        let outcome = listener
            .wait(&self.abort, timeout, self.config.poll_interval)
            .await;
        listener.unsubscribe();
        let missing = listener.missing();
        let elapsed = started.elapsed();

        match outcome {
            WaitOutcome::Completed => debug!(event = "broadcast_complete", channel = %channel),
            WaitOutcome::TimedOut => warn!(
                event = "broadcast_timeout",
                channel = %channel,
                missing = %join_ids(&missing)
            ),
            WaitOutcome::Aborted => info!(event = "broadcast_aborted", channel = %channel),
        }

        let responses = listener.into_received();
        info!(
            event = "broadcast_done",
            channel = %channel,
            answered = responses.len(),
            elapsed_ms = elapsed.as_millis() as u64
        );
        Ok(Gathered {
            responses,
            outcome,
            missing,
            elapsed,
        })
    }

    pub async fn resolve(
        &self,
        provider: &ProviderId,
        provider_data: Value,
    ) -> Result<String, ProtocolError> {
        let request = RequestEnvelope::new(Method::Resolve.as_str())?.arg(provider_data);
        let gathered = self
            .broadcast_to(vec![provider.clone()], request, self.config.resolve_timeout)
            .await?;
        match gathered.responses.get(provider) {
            Some(Value::String(path)) if !path.trim().is_empty() => Ok(path.clone()),
            Some(other) => {
                warn!(event = "resolve_unusable", provider = %provider, answer = %other);
                Err(ProtocolError::ResolveFailed {
                    provider: provider.clone(),
                })
            }
            None if gathered.outcome == WaitOutcome::Aborted => Err(ProtocolError::Aborted),
            None => Err(ProtocolError::ResolveTimeout {
                provider: provider.clone(),
            }),
        }
    }

    pub async fn ping(&self) -> Result<Gathered, ProtocolError> {
        self.broadcast(
            RequestEnvelope::new(Method::Ping.as_str())?,
            self.config.providers_timeout,
        )
        .await
    }
}

fn join_ids(ids: &[ProviderId]) -> String {
    ids.iter()
        .map(ProviderId::as_str)
        .collect::<Vec<_>>()
        .join(",")
}
