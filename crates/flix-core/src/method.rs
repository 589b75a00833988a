use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    Search,
    SearchMovie,
    SearchShow,
    SearchSeason,
    SearchEpisode,
    Resolve,
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown provider method: {0}")]
pub struct UnknownMethod(pub String);

impl Method {
    pub const ALL: [Method; 7] = [
        Method::Search,
        Method::SearchMovie,
        Method::SearchShow,
        Method::SearchSeason,
        Method::SearchEpisode,
        Method::Resolve,
        Method::Ping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Search => "search",
            Method::SearchMovie => "search_movie",
            Method::SearchShow => "search_show",
            Method::SearchSeason => "search_season",
            Method::SearchEpisode => "search_episode",
            Method::Resolve => "resolve",
            Method::Ping => "ping",
        }
    }

    /// Parameter names in positional order. Positional args bind first,
    /// keyword args fill the rest by name.
    pub fn params(&self) -> &'static [&'static str] {
        match self {
            Method::Search => &["query"],
            Method::SearchMovie => &["tmdb_id", "title", "titles", "year"],
            Method::SearchShow => &["tmdb_id", "show_title", "titles", "year"],
            Method::SearchSeason => &["tmdb_id", "show_title", "season_number", "titles"],
            Method::SearchEpisode => &[
                "tmdb_id",
                "show_title",
                "season_number",
                "episode_number",
                "titles",
            ],
            Method::Resolve => &["provider_data"],
            Method::Ping => &[],
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|method| method.as_str() == input)
            .ok_or_else(|| UnknownMethod(input.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_back() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>(), Ok(method));
        }
    }

    #[test]
    fn dispatch_entry_point_is_not_a_method() {
        assert_eq!(
            "register".parse::<Method>(),
            Err(UnknownMethod("register".to_string()))
        );
        assert!("Search".parse::<Method>().is_err());
    }
}
