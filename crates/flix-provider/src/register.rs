use crate::dispatch::{CallContext, DispatchTable};
use crate::provider::Provider;
use flix_bus::{Bus, BusError};
use flix_core::bus_ipc::{FrameError, Notification};
use flix_core::{
    decode_request, encode_response, CallPayload, Channel, EncodeError, Notice, ProviderId,
    UnknownMethod, UserNotifier,
};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// `<own id> <requester id> <method> <payload>`
pub const INVOCATION_ARGS: usize = 4;

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("invalid invocation: expected {expected} arguments, got {got}")]
    InvalidInvocation { expected: usize, got: usize },
    #[error(transparent)]
    UnknownMethod(#[from] UnknownMethod),
    #[error("response encoding failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("response publish failed: {0}")]
    Publish(#[from] BusError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub provider_id: ProviderId,
    pub requester: String,
    pub method: String,
    pub payload: String,
}

impl Invocation {
    pub fn from_args<I>(args: I) -> Result<Self, RegisterError>
    where
        I: IntoIterator<Item = String>,
    {
        let args = args.into_iter().collect::<Vec<_>>();
        let [provider_id, requester, method, payload]: [String; INVOCATION_ARGS] =
            args.try_into().map_err(|rest: Vec<String>| RegisterError::InvalidInvocation {
                expected: INVOCATION_ARGS,
                got: rest.len(),
            })?;
        Ok(Self {
            provider_id: ProviderId::new(provider_id),
            requester,
            method,
            payload,
        })
    }
}

/// Any failure inside the provider is answered with `null`. Only a malformed
/// command line or an unknown method publish nothing.
pub async fn register<P, I>(
    provider: Arc<P>,
    args: I,
    bus: &dyn Bus,
    notifier: &dyn UserNotifier,
) -> Result<Value, RegisterError>
where
    P: Provider,
    I: IntoIterator<Item = String>,
{
    let invocation = match Invocation::from_args(args) {
        Ok(invocation) => invocation,
        Err(err) => {
            if let RegisterError::InvalidInvocation { expected, got } = &err {
                error!(event = "provider_invalid_invocation", expected, got);
                notifier.notify(&Notice::InvalidInvocation {
                    expected: *expected,
                    got: *got,
                });
            }
            return Err(err);
        }
    };

    let table = DispatchTable::<P>::new();
    let entry = match table.lookup(&invocation.method) {
        Ok(entry) => entry,
        Err(err) => {
            error!(
                event = "provider_unknown_method",
                provider = %invocation.provider_id,
                method = %invocation.method
            );
            return Err(err.into());
        }
    };

    let mut channel = Channel::new(invocation.requester.clone(), entry.method().as_str());
    let answer = match decode_request(&invocation.payload) {
        Ok(payload) => {
            if let Some(call_id) = &payload.call_id {
                channel = channel.with_call_id(call_id.clone());
            }
            run_handler(provider, &invocation, entry, payload).await
        }
        Err(err) => {
            warn!(
                event = "provider_payload_invalid",
                provider = %invocation.provider_id,
                method = %invocation.method,
                error = %err
            );
            Value::Null
        }
    };

    let answer = match publish_answer(bus, &invocation, &channel, &answer).await {
        Ok(()) => answer,
        Err(RegisterError::Publish(BusError::Frame(FrameError::OversizedFrame { size, max })))
            if !answer.is_null() =>
        {
            warn!(
                event = "provider_answer_oversized",
                provider = %invocation.provider_id,
                channel = %channel,
                size,
                max
            );
            publish_answer(bus, &invocation, &channel, &Value::Null).await?;
            Value::Null
        }
        Err(err) => return Err(err),
    };
    info!(
        event = "provider_answer_published",
        provider = %invocation.provider_id,
        channel = %channel,
        null = answer.is_null()
    );
    Ok(answer)
}

async fn publish_answer(
    bus: &dyn Bus,
    invocation: &Invocation,
    channel: &Channel,
    answer: &Value,
) -> Result<(), RegisterError> {
    let token = encode_response(answer)?;
    bus.publish(Notification::new(
        invocation.provider_id.as_str(),
        channel.to_string(),
        token,
    ))
    .await?;
    Ok(())
}

async fn run_handler<P: Provider>(
    provider: Arc<P>,
    invocation: &Invocation,
    entry: crate::dispatch::Entry<P>,
    payload: CallPayload,
) -> Value {
    let ctx = CallContext {
        provider_id: invocation.provider_id.clone(),
    };
    debug!(
        event = "provider_invoke",
        provider = %ctx.provider_id,
        method = %entry.method(),
        args = payload.args.len(),
        kwargs = payload.kwargs.len()
    );
    let outcome =
        tokio::task::spawn_blocking(move || entry.invoke(provider.as_ref(), &ctx, &payload)).await;
    match outcome {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            warn!(
                event = "provider_method_failed",
                provider = %invocation.provider_id,
                method = %invocation.method,
                error = %err
            );
            Value::Null
        }
        Err(err) => {
            error!(
                event = "provider_method_panicked",
                provider = %invocation.provider_id,
                method = %invocation.method,
                error = %err
            );
            Value::Null
        }
    }
}
