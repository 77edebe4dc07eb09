use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::models::{Cast, Genre, Movie, MovieDetails, Paged, Video};

pub const TMDB_BASE: &str = "https://api.themoviedb.org/3";

#[async_trait]
pub trait TmdbApi: Send + Sync {
    async fn trending(&self, page: u32) -> Result<Paged<Movie>>;
    async fn popular(&self, page: u32) -> Result<Paged<Movie>>;
    async fn discover(&self, query: &DiscoverQuery) -> Result<Paged<Movie>>;
    async fn search(&self, query: &str, page: u32) -> Result<Paged<Movie>>;
    async fn details(&self, id: i32) -> Result<MovieDetails>;
    async fn credits(&self, id: i32) -> Result<Vec<Cast>>;
    async fn videos(&self, id: i32) -> Result<Vec<Video>>;
    async fn similar(&self, id: i32, page: u32) -> Result<Paged<Movie>>;
    async fn recommendations(&self, id: i32) -> Result<Paged<Movie>>;
    async fn genres(&self) -> Result<Vec<Genre>>;
    async fn configuration(&self) -> Result<()>;
}

/// Filters accepted by `/discover/movie`. Unset fields are left off the query string.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DiscoverQuery {
    pub page: Option<u32>,
    pub sort_by: Option<String>,
    pub primary_release_year: Option<String>,
    pub with_genres: Option<String>,
    pub with_cast: Option<String>,
    pub with_people: Option<String>,
    pub with_original_language: Option<String>,
    #[serde(rename = "vote_count.gte")]
    pub min_vote_count: Option<u32>,
}

impl DiscoverQuery {
    pub fn to_query_string(&self) -> String {
        let mut params = vec![
            format!("page={}", self.page.unwrap_or(1)),
            "include_adult=false".to_string(),
            "include_video=false".to_string(),
        ];
        let optional = [
            ("sort_by", self.sort_by.as_deref()),
            ("primary_release_year", self.primary_release_year.as_deref()),
            ("with_genres", self.with_genres.as_deref()),
            ("with_cast", self.with_cast.as_deref()),
            ("with_people", self.with_people.as_deref()),
            (
                "with_original_language",
                self.with_original_language.as_deref(),
            ),
        ];
        for (key, value) in optional {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                params.push(format!("{key}={}", urlencoding::encode(v)));
            }
        }
        if let Some(min) = self.min_vote_count {
            params.push(format!("vote_count.gte={min}"));
        }
        params.join("&")
    }
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl TmdbClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let user_agent = format!("moviesprix/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()
            .context("Failed to build TMDB HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}{path}?api_key={}", self.base_url, self.api_key)
        } else {
            format!("{}{path}?{query}&api_key={}", self.base_url, self.api_key)
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str, query: &str) -> Result<T> {
        let url = self.url(path, query);
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("TMDB request to {path} failed"))?;
        let status = res.status();
        let text = res.text().await.context("reading body failed")?;
        if !status.is_success() {
            return Err(anyhow!("{} -> {} {}", path, status, text));
        }
        let parsed: T = serde_json::from_str(&text)
            .with_context(|| format!("JSON parse failed for {path}"))?;
        Ok(parsed)
    }
}

#[async_trait]
impl TmdbApi for TmdbClient {
    async fn trending(&self, page: u32) -> Result<Paged<Movie>> {
        self.get_json("/trending/movie/week", &format!("page={page}"))
            .await
    }

    async fn popular(&self, page: u32) -> Result<Paged<Movie>> {
        self.get_json("/movie/popular", &format!("page={page}"))
            .await
    }

    async fn discover(&self, query: &DiscoverQuery) -> Result<Paged<Movie>> {
        self.get_json("/discover/movie", &query.to_query_string())
            .await
    }

    async fn search(&self, query: &str, page: u32) -> Result<Paged<Movie>> {
        let qs = format!(
            "query={}&page={page}&include_adult=false",
            urlencoding::encode(query)
        );
        self.get_json("/search/movie", &qs).await
    }

    async fn details(&self, id: i32) -> Result<MovieDetails> {
        self.get_json(&format!("/movie/{id}"), "language=en-US")
            .await
    }

    async fn credits(&self, id: i32) -> Result<Vec<Cast>> {
        #[derive(Deserialize)]
        struct Credits {
            cast: Vec<Cast>,
        }

        let data: Credits = self
            .get_json(&format!("/movie/{id}/credits"), "language=en-US")
            .await?;
        Ok(data.cast)
    }

    async fn videos(&self, id: i32) -> Result<Vec<Video>> {
        #[derive(Deserialize)]
        struct Videos {
            #[serde(default)]
            results: Vec<Video>,
        }

        let data: Videos = self
            .get_json(&format!("/movie/{id}/videos"), "language=en-US")
            .await?;
        Ok(data.results)
    }

    async fn similar(&self, id: i32, page: u32) -> Result<Paged<Movie>> {
        self.get_json(
            &format!("/movie/{id}/similar"),
            &format!("page={page}&language=en-US"),
        )
        .await
    }

    async fn recommendations(&self, id: i32) -> Result<Paged<Movie>> {
        self.get_json(&format!("/movie/{id}/recommendations"), "")
            .await
    }

    async fn genres(&self) -> Result<Vec<Genre>> {
        #[derive(Deserialize)]
        struct GenreList {
            genres: Vec<Genre>,
        }

        let data: GenreList = self.get_json("/genre/movie/list", "").await?;
        Ok(data.genres)
    }

    async fn configuration(&self) -> Result<()> {
        let _: serde_json::Value = self.get_json("/configuration", "").await?;
        Ok(())
    }
}
