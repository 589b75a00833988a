use crate::ProviderError;
use flix_core::ProviderResult;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub type Titles = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieQuery {
    #[serde(deserialize_with = "tmdb_id")]
    pub tmdb_id: i64,
    pub title: String,
    #[serde(default)]
    pub titles: Titles,
    #[serde(default)]
    pub year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowQuery {
    #[serde(deserialize_with = "tmdb_id")]
    pub tmdb_id: i64,
    pub show_title: String,
    #[serde(default)]
    pub titles: Titles,
    #[serde(default)]
    pub year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonQuery {
    #[serde(deserialize_with = "tmdb_id")]
    pub tmdb_id: i64,
    pub show_title: String,
    pub season_number: u32,
    #[serde(default)]
    pub titles: Titles,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeQuery {
    #[serde(deserialize_with = "tmdb_id")]
    pub tmdb_id: i64,
    pub show_title: String,
    pub season_number: u32,
    pub episode_number: u32,
    #[serde(default)]
    pub titles: Titles,
}

impl MovieQuery {
    pub fn search_text(&self) -> String {
        with_year(&self.title, self.year)
    }
}

impl ShowQuery {
    pub fn search_text(&self) -> String {
        with_year(&self.show_title, self.year)
    }
}

impl SeasonQuery {
    pub fn search_text(&self) -> String {
        format!("{} S{:02}", self.show_title, self.season_number)
    }
}

impl EpisodeQuery {
    pub fn search_text(&self) -> String {
        format!(
            "{} S{:02}E{:02}",
            self.show_title, self.season_number, self.episode_number
        )
    }
}

/// Media centers hand the id over as text as often as as a number.
fn tmdb_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| de::Error::custom(format!("tmdb_id out of range: {n}"))),
        Value::String(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("tmdb_id is not numeric: {text:?}"))),
        other => Err(de::Error::custom(format!(
            "expected string or number for tmdb_id, got {other}"
        ))),
    }
}

fn with_year(title: &str, year: Option<i32>) -> String {
    match year {
        Some(year) => format!("{title} {year}"),
        None => title.to_string(),
    }
}

/// Implementations run on a blocking thread and may do synchronous I/O.
pub trait Provider: Send + Sync + 'static {
    fn search(&self, query: &str) -> Result<Vec<ProviderResult>, ProviderError>;

    fn search_movie(&self, query: &MovieQuery) -> Result<Vec<ProviderResult>, ProviderError>;

    fn search_show(&self, query: &ShowQuery) -> Result<Vec<ProviderResult>, ProviderError> {
        self.search(&query.search_text())
    }

    fn search_season(&self, query: &SeasonQuery) -> Result<Vec<ProviderResult>, ProviderError> {
        self.search(&query.search_text())
    }

    fn search_episode(&self, query: &EpisodeQuery) -> Result<Vec<ProviderResult>, ProviderError>;

    fn resolve(&self, _provider_data: &Value) -> Result<String, ProviderError> {
        Err(ProviderError::Unsupported("resolve"))
    }
}
