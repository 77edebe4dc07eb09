//! Error-swallowing boundary over [`TmdbApi`].
//!
//! Every lookup here logs upstream failures and hands back empty data, so
//! callers only ever see an empty list (or `None` for a detail page).

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::{Cast, Genre, Movie, MovieInfo, Paged, Video};
use crate::tmdb::{DiscoverQuery, TmdbApi};

const INFO_CAST_LIMIT: usize = 20;
const INFO_SIMILAR_LIMIT: usize = 12;
const INFO_TRAILER_LIMIT: usize = 3;
const RECOMMENDED_LIMIT: usize = 20;
const GENRE_MIN_VOTES: u32 = 100;

#[derive(Clone)]
pub struct Catalog {
    tmdb: Arc<dyn TmdbApi>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HomeRow {
    pub title: &'static str,
    pub description: &'static str,
    pub movies: Vec<Movie>,
}

struct RowSpec {
    title: &'static str,
    description: &'static str,
    source: RowSource,
}

enum RowSource {
    Trending,
    Discover {
        sort_by: &'static str,
        with_genres: Option<&'static str>,
        with_people: Option<&'static str>,
        with_original_language: Option<&'static str>,
    },
}

const fn discover(
    sort_by: &'static str,
    with_genres: Option<&'static str>,
    with_people: Option<&'static str>,
    with_original_language: Option<&'static str>,
) -> RowSource {
    RowSource::Discover {
        sort_by,
        with_genres,
        with_people,
        with_original_language,
    }
}

const HOME_ROWS: &[RowSpec] = &[
    RowSpec {
        title: "Trending Now",
        description: "What's hot and trending this week",
        source: RowSource::Trending,
    },
    RowSpec {
        title: "Popular Worldwide",
        description: "Discover the most popular movies right now",
        source: discover("popularity.desc", None, None, None),
    },
    RowSpec {
        title: "Action & Adventure",
        description: "Adrenaline-pumping action and thrilling adventures",
        source: discover("vote_count.desc", Some("28"), None, None),
    },
    RowSpec {
        title: "Comedy Gold",
        description: "Laugh out loud with these comedy masterpieces",
        source: discover("vote_average.desc", Some("35"), None, None),
    },
    RowSpec {
        title: "Sci-Fi Wonders",
        description: "Explore futuristic worlds and mind-bending stories",
        source: discover("vote_count.desc", Some("878"), None, None),
    },
    RowSpec {
        title: "Horror Nightmares",
        description: "Spine-chilling thrills that will keep you awake",
        source: discover("vote_average.desc", Some("27"), None, None),
    },
    RowSpec {
        title: "Leonardo DiCaprio Collection",
        description: "Masterful performances from the Oscar winner",
        source: discover("vote_count.desc", None, Some("6194"), None),
    },
    RowSpec {
        title: "Tom Cruise Action",
        description: "High-octane adventures with the Mission Impossible star",
        source: discover("popularity.desc", None, Some("500"), None),
    },
    RowSpec {
        title: "Bollywood Blockbusters",
        description: "The best of Indian cinema and entertainment",
        source: discover("vote_count.desc", None, None, Some("hi")),
    },
];

impl Catalog {
    pub fn new(tmdb: Arc<dyn TmdbApi>) -> Self {
        Self { tmdb }
    }

    pub async fn trending(&self, page: u32) -> Paged<Movie> {
        self.tmdb.trending(page).await.unwrap_or_else(|e| {
            warn!("trending lookup failed: {:#}", e);
            Paged::empty()
        })
    }

    pub async fn popular(&self, page: u32) -> Paged<Movie> {
        self.tmdb.popular(page).await.unwrap_or_else(|e| {
            warn!("popular lookup failed: {:#}", e);
            Paged::empty()
        })
    }

    pub async fn discover(&self, query: &DiscoverQuery) -> Vec<Movie> {
        match self.tmdb.discover(query).await {
            Ok(page) => page.results,
            Err(e) => {
                warn!("discover lookup failed: {:#}", e);
                Vec::new()
            }
        }
    }

    pub async fn search(&self, query: &str, page: u32) -> Paged<Movie> {
        let query = query.trim();
        if query.is_empty() {
            return Paged::empty();
        }
        debug!("Searching TMDB for '{}' (page {})", query, page);
        self.tmdb.search(query, page).await.unwrap_or_else(|e| {
            warn!("search for '{}' failed: {:#}", query, e);
            Paged::empty()
        })
    }

    pub async fn movie_info(&self, id: i32) -> Option<MovieInfo> {
        let (details, similar, cast, videos) = tokio::join!(
            self.tmdb.details(id),
            self.tmdb.similar(id, 1),
            self.tmdb.credits(id),
            self.tmdb.videos(id),
        );
        let fetched = details.and_then(|d| Ok((d, similar?, cast?, videos?)));
        match fetched {
            Ok((details, similar, mut cast, videos)) => {
                cast.truncate(INFO_CAST_LIMIT);
                let mut similar_movies = similar.results;
                similar_movies.truncate(INFO_SIMILAR_LIMIT);
                let trailers = videos
                    .into_iter()
                    .filter(Video::is_trailer)
                    .take(INFO_TRAILER_LIMIT)
                    .collect();
                Some(MovieInfo {
                    details,
                    cast,
                    similar_movies,
                    trailers,
                })
            }
            Err(e) => {
                warn!("movie info for {} failed: {:#}", id, e);
                None
            }
        }
    }

    pub async fn cast(&self, id: i32) -> Vec<Cast> {
        self.tmdb.credits(id).await.unwrap_or_else(|e| {
            warn!("cast lookup for {} failed: {:#}", id, e);
            Vec::new()
        })
    }

    pub async fn trailers(&self, id: i32) -> Vec<Video> {
        match self.tmdb.videos(id).await {
            Ok(videos) => videos.into_iter().filter(Video::is_trailer).collect(),
            Err(e) => {
                warn!("video lookup for {} failed: {:#}", id, e);
                Vec::new()
            }
        }
    }

    pub async fn similar(&self, id: i32, page: u32) -> Paged<Movie> {
        self.tmdb.similar(id, page).await.unwrap_or_else(|e| {
            warn!("similar lookup for {} failed: {:#}", id, e);
            Paged::empty()
        })
    }

    pub async fn recommended(&self, id: i32) -> Vec<Movie> {
        match self.tmdb.recommendations(id).await {
            Ok(page) => page.results.into_iter().take(RECOMMENDED_LIMIT).collect(),
            Err(e) => {
                warn!("recommendation lookup for {} failed: {:#}", id, e);
                Vec::new()
            }
        }
    }

    pub async fn genres(&self) -> Vec<Genre> {
        self.tmdb.genres().await.unwrap_or_else(|e| {
            warn!("genre list lookup failed: {:#}", e);
            Vec::new()
        })
    }

    /// Highest rated titles of a genre, ignoring titles with too few votes to be meaningful.
    pub async fn movies_by_genre(&self, genre_id: i32, page: u32) -> Vec<Movie> {
        let query = DiscoverQuery {
            page: Some(page),
            with_genres: Some(genre_id.to_string()),
            sort_by: Some("vote_average.desc".to_string()),
            min_vote_count: Some(GENRE_MIN_VOTES),
            ..Default::default()
        };
        match self.tmdb.discover(&query).await {
            Ok(page) => page.results,
            Err(e) => {
                warn!("genre {} lookup failed: {:#}", genre_id, e);
                Vec::new()
            }
        }
    }

    pub async fn home_rows(&self) -> Vec<HomeRow> {
        let rows = join_all(HOME_ROWS.iter().map(|spec| async move {
            let movies = match &spec.source {
                RowSource::Trending => self.trending(1).await.results,
                RowSource::Discover {
                    sort_by,
                    with_genres,
                    with_people,
                    with_original_language,
                } => {
                    let query = DiscoverQuery {
                        sort_by: Some(sort_by.to_string()),
                        with_genres: with_genres.map(str::to_string),
                        with_people: with_people.map(str::to_string),
                        with_original_language: with_original_language.map(str::to_string),
                        ..Default::default()
                    };
                    self.discover(&query).await
                }
            };
            HomeRow {
                title: spec.title,
                description: spec.description,
                movies,
            }
        }))
        .await;
        rows.into_iter().filter(|r| !r.movies.is_empty()).collect()
    }

    pub async fn test_connection(&self) -> bool {
        match self.tmdb.configuration().await {
            Ok(()) => true,
            Err(e) => {
                warn!("TMDB connection check failed: {:#}", e);
                false
            }
        }
    }
}
