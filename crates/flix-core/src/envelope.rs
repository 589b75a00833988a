use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("request method cannot be empty")]
    EmptyMethod,
    #[error("envelope serialization failed: {0}")]
    Json(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("envelope is not valid base64: {0}")]
    Base64(String),
    #[error("envelope is not valid json: {0}")]
    Json(String),
}

/// The part of a request that crosses the process boundary as one
/// command-line token. Empty `args`/`kwargs` are left out of the wire form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub kwargs: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    method: String,
    pub payload: CallPayload,
}

impl RequestEnvelope {
    pub fn new(method: impl Into<String>) -> Result<Self, EncodeError> {
        let method = method.into();
        if method.trim().is_empty() {
            return Err(EncodeError::EmptyMethod);
        }
        Ok(Self {
            method,
            payload: CallPayload::default(),
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn call_id(&self) -> Option<&str> {
        self.payload.call_id.as_deref()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.payload.args.push(value.into());
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.payload.args = args;
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.payload.kwargs = kwargs;
        self
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.payload.call_id = Some(call_id.into());
        self
    }
}

pub fn encode_request(request: &RequestEnvelope) -> Result<String, EncodeError> {
    encode_token(&request.payload)
}

pub fn decode_request(token: &str) -> Result<CallPayload, DecodeError> {
    decode_token(token)
}

pub fn encode_response(value: &Value) -> Result<String, EncodeError> {
    encode_token(value)
}

pub fn decode_response(token: &str) -> Result<Value, DecodeError> {
    decode_token(token)
}

fn encode_token<T: Serialize>(value: &T) -> Result<String, EncodeError> {
    let json = serde_json::to_vec(value).map_err(|err| EncodeError::Json(err.to_string()))?;
    Ok(STANDARD.encode(json))
}

fn decode_token<T: DeserializeOwned>(token: &str) -> Result<T, DecodeError> {
    let raw = STANDARD
        .decode(token.trim())
        .map_err(|err| DecodeError::Base64(err.to_string()))?;
    serde_json::from_slice(&raw).map_err(|err| DecodeError::Json(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_containers_are_omitted_from_wire_form() {
        let request = RequestEnvelope::new("ping").expect("request");
        let token = encode_request(&request).expect("encode");
        let raw = STANDARD.decode(&token).expect("base64");
        assert_eq!(raw, b"{}");
    }

    #[test]
    fn empty_method_is_rejected() {
        assert_eq!(RequestEnvelope::new("  "), Err(EncodeError::EmptyMethod));
    }

    #[test]
    fn request_survives_the_command_line_hop() {
        let request = RequestEnvelope::new("search_movie")
            .expect("request")
            .arg("603")
            .arg("The Matrix")
            .arg(json!({"pt": "Matrix", "us": "The Matrix"}))
            .kwarg("year", 1999)
            .kwarg("extra", json!([1.5, null, true, {"nested": ["x"]}]))
            .with_call_id("c-1");
        let token = encode_request(&request).expect("encode");

        assert!(!token.contains(char::is_whitespace));
        let decoded = decode_request(&token).expect("decode");
        assert_eq!(decoded, request.payload);
    }

    #[test]
    fn response_values_round_trip() {
        for value in [
            Value::Null,
            json!("/media/file.mkv"),
            json!([{"label": "a", "url": "u"}, {"provider_data": {"k": [1, 2]}}]),
        ] {
            let token = encode_response(&value).expect("encode");
            assert_eq!(decode_response(&token).expect("decode"), value);
        }
    }

    #[test]
    fn invalid_base64_is_a_decode_error() {
        let err = decode_response("not base64 !!").expect_err("must fail");
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn invalid_json_is_a_decode_error() {
        let token = STANDARD.encode(b"{\"args\": [");
        let err = decode_request(&token).expect_err("must fail");
        assert!(matches!(err, DecodeError::Json(_)));
    }
}
