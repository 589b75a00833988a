use flix_core::{ProviderId, ProviderResult};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub provider: ProviderId,
    pub result: ProviderResult,
}

impl Candidate {
    /// `label`, then `label2` when present, falling back to the provider id.
    pub fn display_label(&self) -> String {
        let label = self
            .result
            .label
            .clone()
            .unwrap_or_else(|| self.provider.to_string());
        match &self.result.label2 {
            Some(label2) => format!("{label} [{label2}]"),
            None => label,
        }
    }
}

/// Flattens a broadcast's answers into candidates, keeping provider
/// arrival order. Anything that is not a list of usable results is
/// dropped per entry; one bad provider never hides another's results.
pub fn collect_results(responses: &IndexMap<ProviderId, Value>) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for (provider, answer) in responses {
        let items = match answer {
            Value::Array(items) => items,
            Value::Null => {
                debug!(event = "provider_answer_null", provider = %provider);
                continue;
            }
            other => {
                warn!(
                    event = "provider_answer_invalid",
                    provider = %provider,
                    kind = json_kind(other)
                );
                continue;
            }
        };

        for (index, item) in items.iter().enumerate() {
            match serde_json::from_value::<ProviderResult>(item.clone()) {
                Ok(result) if result.is_usable() => candidates.push(Candidate {
                    provider: provider.clone(),
                    result,
                }),
                Ok(_) => warn!(
                    event = "provider_result_unusable",
                    provider = %provider,
                    index
                ),
                Err(err) => warn!(
                    event = "provider_result_invalid",
                    provider = %provider,
                    index,
                    error = %err
                ),
            }
        }
    }
    candidates
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub trait Chooser: Send + Sync {
    fn choose(&self, candidates: &[Candidate]) -> Option<usize>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AutoChooser;

impl Chooser for AutoChooser {
    fn choose(&self, candidates: &[Candidate]) -> Option<usize> {
        if candidates.is_empty() {
            None
        } else {
            Some(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn responses(entries: Vec<(&str, Value)>) -> IndexMap<ProviderId, Value> {
        entries
            .into_iter()
            .map(|(id, value)| (ProviderId::new(id), value))
            .collect()
    }

    #[test]
    fn keeps_arrival_order_across_providers() {
        let gathered = responses(vec![
            ("script.flix.late", json!([{"label": "b", "provider_data": "b"}])),
            ("script.flix.early", json!([{"label": "a", "url": "a"}])),
        ]);
        let candidates = collect_results(&gathered);
        let labels = candidates
            .iter()
            .map(|c| c.result.label.clone().unwrap_or_default())
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["b", "a"]);
        assert_eq!(candidates[0].provider, ProviderId::new("script.flix.late"));
    }

    #[test]
    fn invalid_entries_are_dropped_per_item() {
        let gathered = responses(vec![
            (
                "script.flix.mixed",
                json!([
                    {"label": "no target"},
                    "not an object",
                    {"label": 5, "url": "x"},
                    {"label": "ok", "url": "/media/ok.mkv"}
                ]),
            ),
            ("script.flix.failed", Value::Null),
            ("script.flix.odd", json!({"url": "not in a list"})),
        ]);
        let candidates = collect_results(&gathered);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].result.url.as_deref(), Some("/media/ok.mkv"));
    }

    #[test]
    fn auto_chooser_takes_first_arrival() {
        let candidate = Candidate {
            provider: ProviderId::new("script.flix.a"),
            result: ProviderResult::new().with_url("a"),
        };
        assert_eq!(AutoChooser.choose(&[]), None);
        assert_eq!(AutoChooser.choose(&[candidate.clone(), candidate]), Some(0));
    }

    #[test]
    fn display_label_falls_back_to_provider() {
        let bare = Candidate {
            provider: ProviderId::new("script.flix.a"),
            result: ProviderResult::new().with_url("a"),
        };
        assert_eq!(bare.display_label(), "script.flix.a");
        let labelled = Candidate {
            provider: ProviderId::new("script.flix.a"),
            result: ProviderResult::new()
                .with_label("Movie 1080p")
                .with_label2("4.2 GB")
                .with_url("a"),
        };
        assert_eq!(labelled.display_label(), "Movie 1080p [4.2 GB]");
    }
}
