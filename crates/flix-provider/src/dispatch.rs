use crate::provider::{EpisodeQuery, MovieQuery, Provider, SeasonQuery, ShowQuery};
use crate::ProviderError;
use flix_core::{CallPayload, Method, ProviderId, ProviderResult, UnknownMethod};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct CallContext {
    pub provider_id: ProviderId,
}

pub type Handler<P> = fn(&P, &CallContext, Map<String, Value>) -> Result<Value, ProviderError>;

pub struct Entry<P> {
    method: Method,
    handler: Handler<P>,
}

impl<P> Clone for Entry<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for Entry<P> {}

impl<P: Provider> Entry<P> {
    pub fn method(&self) -> Method {
        self.method
    }

    pub fn invoke(
        &self,
        provider: &P,
        ctx: &CallContext,
        payload: &CallPayload,
    ) -> Result<Value, ProviderError> {
        let bound = bind_arguments(self.method, payload)?;
        (self.handler)(provider, ctx, bound)
    }
}

pub struct DispatchTable<P> {
    entries: BTreeMap<&'static str, Entry<P>>,
}

impl<P: Provider> Default for DispatchTable<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Provider> DispatchTable<P> {
    pub fn new() -> Self {
        let handlers: [(Method, Handler<P>); 7] = [
            (Method::Search, handle_search::<P>),
            (Method::SearchMovie, handle_search_movie::<P>),
            (Method::SearchShow, handle_search_show::<P>),
            (Method::SearchSeason, handle_search_season::<P>),
            (Method::SearchEpisode, handle_search_episode::<P>),
            (Method::Resolve, handle_resolve::<P>),
            (Method::Ping, handle_ping::<P>),
        ];
        let entries = handlers
            .into_iter()
            .map(|(method, handler)| (method.as_str(), Entry { method, handler }))
            .collect();
        Self { entries }
    }

    pub fn lookup(&self, name: &str) -> Result<Entry<P>, UnknownMethod> {
        self.entries
            .get(name)
            .copied()
            .ok_or_else(|| UnknownMethod(name.to_string()))
    }

    pub fn methods(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }
}

/// Positional args take the leading parameter names, keyword args fill the
/// rest. Extra positionals, unknown keywords and double bindings are errors.
pub fn bind_arguments(
    method: Method,
    payload: &CallPayload,
) -> Result<Map<String, Value>, ProviderError> {
    let params = method.params();
    if payload.args.len() > params.len() {
        return Err(ProviderError::InvalidArguments {
            method: method.as_str(),
            reason: format!(
                "takes {} positional arguments but {} were given",
                params.len(),
                payload.args.len()
            ),
        });
    }

    let mut bound = params
        .iter()
        .zip(payload.args.iter())
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect::<Map<String, Value>>();

    for (key, value) in &payload.kwargs {
        if !params.contains(&key.as_str()) {
            return Err(ProviderError::InvalidArguments {
                method: method.as_str(),
                reason: format!("unexpected keyword argument '{key}'"),
            });
        }
        if bound.contains_key(key) {
            return Err(ProviderError::InvalidArguments {
                method: method.as_str(),
                reason: format!("got multiple values for argument '{key}'"),
            });
        }
        bound.insert(key.clone(), value.clone());
    }
    Ok(bound)
}

fn bind<T: DeserializeOwned>(method: Method, args: Map<String, Value>) -> Result<T, ProviderError> {
    serde_json::from_value(Value::Object(args)).map_err(|err| ProviderError::InvalidArguments {
        method: method.as_str(),
        reason: err.to_string(),
    })
}

fn results(results: Vec<ProviderResult>) -> Result<Value, ProviderError> {
    serde_json::to_value(results).map_err(|err| ProviderError::Failed(err.to_string()))
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

#[derive(Deserialize)]
struct ResolveArgs {
    provider_data: Value,
}

fn handle_search<P: Provider>(
    provider: &P,
    _ctx: &CallContext,
    args: Map<String, Value>,
) -> Result<Value, ProviderError> {
    let SearchArgs { query } = bind(Method::Search, args)?;
    results(provider.search(&query)?)
}

fn handle_search_movie<P: Provider>(
    provider: &P,
    _ctx: &CallContext,
    args: Map<String, Value>,
) -> Result<Value, ProviderError> {
    let query: MovieQuery = bind(Method::SearchMovie, args)?;
    results(provider.search_movie(&query)?)
}

fn handle_search_show<P: Provider>(
    provider: &P,
    _ctx: &CallContext,
    args: Map<String, Value>,
) -> Result<Value, ProviderError> {
    let query: ShowQuery = bind(Method::SearchShow, args)?;
    results(provider.search_show(&query)?)
}

fn handle_search_season<P: Provider>(
    provider: &P,
    _ctx: &CallContext,
    args: Map<String, Value>,
) -> Result<Value, ProviderError> {
    let query: SeasonQuery = bind(Method::SearchSeason, args)?;
    results(provider.search_season(&query)?)
}

fn handle_search_episode<P: Provider>(
    provider: &P,
    _ctx: &CallContext,
    args: Map<String, Value>,
) -> Result<Value, ProviderError> {
    let query: EpisodeQuery = bind(Method::SearchEpisode, args)?;
    results(provider.search_episode(&query)?)
}

fn handle_resolve<P: Provider>(
    provider: &P,
    _ctx: &CallContext,
    args: Map<String, Value>,
) -> Result<Value, ProviderError> {
    let ResolveArgs { provider_data } = bind(Method::Resolve, args)?;
    provider.resolve(&provider_data).map(Value::String)
}

fn handle_ping<P: Provider>(
    _provider: &P,
    ctx: &CallContext,
    _args: Map<String, Value>,
) -> Result<Value, ProviderError> {
    Ok(Value::String(ctx.provider_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl Provider for Echo {
        fn search(&self, query: &str) -> Result<Vec<ProviderResult>, ProviderError> {
            Ok(vec![ProviderResult::new().with_label(query).with_url("http://a")])
        }

        fn search_movie(&self, query: &MovieQuery) -> Result<Vec<ProviderResult>, ProviderError> {
            Ok(vec![ProviderResult::new()
                .with_label(query.search_text())
                .with_provider_data(json!(query.tmdb_id))])
        }

        fn search_episode(&self, _query: &EpisodeQuery) -> Result<Vec<ProviderResult>, ProviderError> {
            Err(ProviderError::Failed("site down".to_string()))
        }
    }

    fn ctx() -> CallContext {
        CallContext {
            provider_id: ProviderId::new("script.flix.echo"),
        }
    }

    fn payload(args: Vec<Value>, kwargs: Value) -> CallPayload {
        CallPayload {
            call_id: None,
            args,
            kwargs: kwargs.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn table_covers_every_method_and_nothing_else() {
        let table = DispatchTable::<Echo>::new();
        let names = table.methods().collect::<Vec<_>>();
        assert_eq!(names.len(), Method::ALL.len());
        assert!(table.lookup("register").is_err());
        assert!(table.lookup("search_movie").is_ok());
    }

    #[test]
    fn positional_and_keyword_arguments_bind_together() {
        let table = DispatchTable::<Echo>::new();
        let entry = table.lookup("search_movie").expect("entry");
        let value = entry
            .invoke(
                &Echo,
                &ctx(),
                &payload(
                    vec![json!(603), json!("The Matrix")],
                    json!({"titles": {"pt": "Matrix"}, "year": 1999}),
                ),
            )
            .expect("invoke");
        assert_eq!(
            value,
            json!([{"label": "The Matrix 1999", "provider_data": 603}])
        );
    }

    #[test]
    fn optional_year_may_be_omitted() {
        let entry = DispatchTable::<Echo>::new()
            .lookup("search_movie")
            .expect("entry");
        let value = entry
            .invoke(
                &Echo,
                &ctx(),
                &payload(vec![json!(603), json!("The Matrix"), json!({})], Value::Null),
            )
            .expect("invoke");
        assert_eq!(value[0]["label"], "The Matrix");
    }

    #[test]
    fn binding_errors_are_reported() {
        let duplicate = bind_arguments(
            Method::Search,
            &payload(vec![json!("a")], json!({"query": "b"})),
        );
        assert!(matches!(duplicate, Err(ProviderError::InvalidArguments { .. })));

        let extra = bind_arguments(Method::Ping, &payload(vec![json!(1)], Value::Null));
        assert!(matches!(extra, Err(ProviderError::InvalidArguments { .. })));

        let unknown = bind_arguments(Method::Search, &payload(vec![], json!({"q": "x"})));
        assert!(matches!(unknown, Err(ProviderError::InvalidArguments { .. })));
    }

    #[test]
    fn ping_answers_with_own_id_and_resolve_defaults_to_unsupported() {
        let table = DispatchTable::<Echo>::new();
        let ping = table.lookup("ping").expect("ping");
        assert_eq!(
            ping.invoke(&Echo, &ctx(), &CallPayload::default()).expect("ping"),
            json!("script.flix.echo")
        );

        let resolve = table.lookup("resolve").expect("resolve");
        let result = resolve.invoke(&Echo, &ctx(), &payload(vec![json!("token")], Value::Null));
        assert!(matches!(result, Err(ProviderError::Unsupported("resolve"))));
    }

    #[test]
    fn provider_failures_surface_as_errors() {
        let entry = DispatchTable::<Echo>::new()
            .lookup("search_episode")
            .expect("entry");
        let result = entry.invoke(
            &Echo,
            &ctx(),
            &payload(
                vec![json!(1), json!("Dark"), json!(1), json!(1), json!({})],
                Value::Null,
            ),
        );
        assert!(matches!(result, Err(ProviderError::Failed(_))));
    }
}
