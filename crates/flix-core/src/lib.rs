use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;

pub mod bus_ipc;
pub mod channel;
pub mod envelope;
pub mod logging;
pub mod method;
pub mod notice;

pub use channel::Channel;
pub use envelope::{
    decode_request, decode_response, encode_request, encode_response, CallPayload, DecodeError,
    EncodeError, RequestEnvelope,
};
pub use method::{Method, UnknownMethod};
pub use notice::{Notice, StderrNotifier, UserNotifier};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ProviderId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for ProviderId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Usable only with a `url` or a `provider_data` token for `resolve`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_data: Option<Value>,
}

impl ProviderResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_label2(mut self, label2: impl Into<String>) -> Self {
        self.label2 = Some(label2.into());
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_provider_data(mut self, data: Value) -> Self {
        self.provider_data = Some(data);
        self
    }

    pub fn is_usable(&self) -> bool {
        self.url.is_some() || self.provider_data.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemClass {
    Movie,
    Show,
    Season,
    Episode,
    Search,
}

impl ItemClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemClass::Movie => "movie",
            ItemClass::Show => "show",
            ItemClass::Season => "season",
            ItemClass::Episode => "episode",
            ItemClass::Search => "search",
        }
    }
}

impl fmt::Display for ItemClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_requires_url_or_provider_data() {
        assert!(!ProviderResult::new().with_label("only a label").is_usable());
        assert!(ProviderResult::new().with_url("http://a/b.mp4").is_usable());
        assert!(ProviderResult::new()
            .with_provider_data(serde_json::json!({"token": 3}))
            .is_usable());
    }

    #[test]
    fn null_provider_data_counts_as_absent() {
        let parsed: ProviderResult =
            serde_json::from_str(r#"{"label":"x","provider_data":null}"#).expect("parse");
        assert!(!parsed.is_usable());
    }

    #[test]
    fn result_serializes_only_present_keys() {
        let encoded = serde_json::to_value(ProviderResult::new().with_url("u")).expect("encode");
        assert_eq!(encoded, serde_json::json!({"url": "u"}));
    }
}
