use crate::envelope::RequestEnvelope;
use std::fmt;

/// Bus topic a provider answers on: `<requester>.<method>`, suffixed with
/// `#<call_id>` when the request carried a correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    requester: String,
    method: String,
    call_id: Option<String>,
}

impl Channel {
    pub fn new(requester: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            requester: requester.into(),
            method: method.into(),
            call_id: None,
        }
    }

    pub fn for_request(requester: impl Into<String>, request: &RequestEnvelope) -> Self {
        let channel = Self::new(requester, request.method());
        match request.call_id() {
            Some(call_id) => channel.with_call_id(call_id),
            None => channel,
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn requester(&self) -> &str {
        &self.requester
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.to_string() == topic
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.requester, self.method)?;
        if let Some(call_id) = &self.call_id {
            write!(f, "#{call_id}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_channel_is_requester_dot_method() {
        let channel = Channel::new("plugin.video.flix", "search_movie");
        assert_eq!(channel.to_string(), "plugin.video.flix.search_movie");
    }

    #[test]
    fn call_id_separates_concurrent_calls() {
        let request = RequestEnvelope::new("search")
            .expect("request")
            .with_call_id("0b7e");
        let first = Channel::for_request("plugin.video.flix", &request);
        let second = Channel::new("plugin.video.flix", "search").with_call_id("91aa");

        assert_eq!(first.to_string(), "plugin.video.flix.search#0b7e");
        assert!(first.matches("plugin.video.flix.search#0b7e"));
        assert!(!first.matches(&second.to_string()));
        assert!(!first.matches("plugin.video.flix.search"));
    }
}
