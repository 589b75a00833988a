use crate::listener::WaitOutcome;
use crate::protocol::{Coordinator, ProtocolError};
use crate::replay::ReplayCache;
use crate::selection::{collect_results, AutoChooser, Candidate, Chooser};
use flix_core::{EncodeError, ItemClass, Method, Notice, RequestEnvelope, UserNotifier};
use flix_storage::StorageError;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("no results found")]
    NoResults,
    #[error("playback cancelled")]
    Cancelled,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl PlaybackError {
    pub fn notice(&self) -> Option<Notice> {
        match self {
            PlaybackError::Protocol(ProtocolError::NoProviders) => Some(Notice::NoProviders),
            PlaybackError::NoResults => Some(Notice::NoResults),
            PlaybackError::Protocol(ProtocolError::ResolveTimeout { provider }) => {
                Some(Notice::ResolveTimeout {
                    provider: provider.to_string(),
                })
            }
            PlaybackError::Protocol(ProtocolError::ResolveFailed { provider }) => {
                Some(Notice::ResolveFailed {
                    provider: provider.to_string(),
                })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayableRef {
    pub class: ItemClass,
    pub identity: String,
    pub path: String,
    pub replayed: bool,
}

pub trait PlayableItem: Send + Sync {
    fn class(&self) -> ItemClass;

    fn identity(&self) -> String;

    fn request(&self) -> Result<RequestEnvelope, EncodeError>;

    fn to_playable(&self, path: &str) -> PlayableRef {
        PlayableRef {
            class: self.class(),
            identity: self.identity(),
            path: path.to_string(),
            replayed: false,
        }
    }
}

pub type Titles = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieItem {
    pub tmdb_id: i64,
    pub title: String,
    pub titles: Titles,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowItem {
    pub tmdb_id: i64,
    pub show_title: String,
    pub titles: Titles,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonItem {
    pub tmdb_id: i64,
    pub show_title: String,
    pub season_number: u32,
    pub titles: Titles,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeItem {
    pub tmdb_id: i64,
    pub show_title: String,
    pub season_number: u32,
    pub episode_number: u32,
    pub titles: Titles,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchItem {
    pub query: String,
}

impl PlayableItem for MovieItem {
    fn class(&self) -> ItemClass {
        ItemClass::Movie
    }

    fn identity(&self) -> String {
        format!("movie:{}", self.tmdb_id)
    }

    fn request(&self) -> Result<RequestEnvelope, EncodeError> {
        Ok(RequestEnvelope::new(Method::SearchMovie.as_str())?.with_args(vec![
            json!(self.tmdb_id),
            json!(self.title),
            json!(self.titles),
            json!(self.year),
        ]))
    }
}

impl PlayableItem for ShowItem {
    fn class(&self) -> ItemClass {
        ItemClass::Show
    }

    fn identity(&self) -> String {
        format!("show:{}", self.tmdb_id)
    }

    fn request(&self) -> Result<RequestEnvelope, EncodeError> {
        Ok(RequestEnvelope::new(Method::SearchShow.as_str())?.with_args(vec![
            json!(self.tmdb_id),
            json!(self.show_title),
            json!(self.titles),
            json!(self.year),
        ]))
    }
}

impl PlayableItem for SeasonItem {
    fn class(&self) -> ItemClass {
        ItemClass::Season
    }

    fn identity(&self) -> String {
        format!("season:{}:{}", self.tmdb_id, self.season_number)
    }

    fn request(&self) -> Result<RequestEnvelope, EncodeError> {
        Ok(RequestEnvelope::new(Method::SearchSeason.as_str())?.with_args(vec![
            json!(self.tmdb_id),
            json!(self.show_title),
            json!(self.season_number),
            json!(self.titles),
        ]))
    }
}

impl PlayableItem for EpisodeItem {
    fn class(&self) -> ItemClass {
        ItemClass::Episode
    }

    fn identity(&self) -> String {
        format!(
            "episode:{}:{}:{}",
            self.tmdb_id, self.season_number, self.episode_number
        )
    }

    fn request(&self) -> Result<RequestEnvelope, EncodeError> {
        Ok(RequestEnvelope::new(Method::SearchEpisode.as_str())?.with_args(vec![
            json!(self.tmdb_id),
            json!(self.show_title),
            json!(self.season_number),
            json!(self.episode_number),
            json!(self.titles),
        ]))
    }
}

impl PlayableItem for SearchItem {
    fn class(&self) -> ItemClass {
        ItemClass::Search
    }

    fn identity(&self) -> String {
        format!("search:{}", self.query)
    }

    fn request(&self) -> Result<RequestEnvelope, EncodeError> {
        Ok(RequestEnvelope::new(Method::Search.as_str())?.arg(self.query.clone()))
    }
}

pub trait ReplayPrompt: Send + Sync {
    fn confirm(&self, identity: &str, path: &str) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct FixedPrompt(pub bool);

impl ReplayPrompt for FixedPrompt {
    fn confirm(&self, _identity: &str, _path: &str) -> bool {
        self.0
    }
}

pub struct PlaybackFlow {
    coordinator: Coordinator,
    replay: Option<ReplayCache>,
    chooser: Arc<dyn Chooser>,
    prompt: Arc<dyn ReplayPrompt>,
    notifier: Arc<dyn UserNotifier>,
}

impl PlaybackFlow {
    pub fn new(coordinator: Coordinator, notifier: Arc<dyn UserNotifier>) -> Self {
        Self {
            coordinator,
            replay: None,
            chooser: Arc::new(AutoChooser),
            prompt: Arc::new(FixedPrompt(false)),
            notifier,
        }
    }

    pub fn with_replay(mut self, replay: ReplayCache) -> Self {
        self.replay = Some(replay);
        self
    }

    pub fn with_chooser(mut self, chooser: Arc<dyn Chooser>) -> Self {
        self.chooser = chooser;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn ReplayPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub async fn play(&self, item: &dyn PlayableItem) -> Result<PlayableRef, PlaybackError> {
        let result = self.play_inner(item).await;
        if let Err(err) = &result {
            warn!(event = "playback_failed", identity = %item.identity(), error = %err);
            if let Some(notice) = err.notice() {
                self.notifier.notify(&notice);
            }
        }
        result
    }

    async fn play_inner(&self, item: &dyn PlayableItem) -> Result<PlayableRef, PlaybackError> {
        let class = item.class();
        let identity = item.identity();

        if let Some(path) = self.replay_hit(class, &identity)? {
            self.remember(class, &identity, &path);
            info!(event = "playback_replayed", identity = %identity);
            return Ok(PlayableRef {
                replayed: true,
                ..item.to_playable(&path)
            });
        }

        let config = self.coordinator.config();
        let gathered = self
            .coordinator
            .broadcast(item.request()?, config.providers_timeout)
            .await?;
        if gathered.outcome == WaitOutcome::Aborted {
            return Err(PlaybackError::Cancelled);
        }

        let candidates = collect_results(&gathered.responses);
        if candidates.is_empty() {
            return Err(PlaybackError::NoResults);
        }
        let choice = if config.auto_choose {
            AutoChooser.choose(&candidates)
        } else {
            self.chooser.choose(&candidates)
        };
        let candidate = choice
            .and_then(|index| candidates.get(index))
            .ok_or(PlaybackError::Cancelled)?;

        let path = self.path_for(candidate).await?;
        self.remember(class, &identity, &path);
        info!(
            event = "playback_resolved",
            identity = %identity,
            provider = %candidate.provider
        );
        Ok(item.to_playable(&path))
    }

    fn replay_hit(&self, class: ItemClass, identity: &str) -> Result<Option<String>, PlaybackError> {
        let Some(cache) = self.replay_cache() else {
            return Ok(None);
        };
        let Some(path) = cache.check(class, identity)? else {
            return Ok(None);
        };
        Ok(self.prompt.confirm(identity, &path).then_some(path))
    }

    fn replay_cache(&self) -> Option<&ReplayCache> {
        self.replay
            .as_ref()
            .filter(|_| self.coordinator.config().replay_enabled)
    }

    async fn path_for(&self, candidate: &Candidate) -> Result<String, PlaybackError> {
        if let Some(url) = &candidate.result.url {
            return Ok(url.clone());
        }
        let provider_data = candidate
            .result
            .provider_data
            .clone()
            .unwrap_or(Value::Null);
        match self
            .coordinator
            .resolve(&candidate.provider, provider_data)
            .await
        {
            Err(ProtocolError::Aborted) => Err(PlaybackError::Cancelled),
            other => Ok(other?),
        }
    }

    fn remember(&self, class: ItemClass, identity: &str, path: &str) {
        let Some(cache) = self.replay_cache() else {
            return;
        };
        if let Err(err) = cache.record(class, identity, path) {
            warn!(event = "replay_record_failed", identity, error = %err);
        }
    }
}
