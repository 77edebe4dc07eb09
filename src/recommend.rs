//! Taste-profile inference and recommendation buckets built from a user's favorites.

use futures::future::join_all;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::models::Movie;

const TOP_GENRES: usize = 5;
const TOP_DECADES: usize = 3;
const GENRES_QUERIED: usize = 3;
const PER_GENRE: usize = 8;
const POOL_SIZE: usize = 20;

pub const BECAUSE_YOU_LIKED: &str = "Because You Liked";
pub const MORE_LIKE_THIS: &str = "More Like This";
pub const POPULAR_PICKS: &str = "Popular Picks";

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct TasteProfile {
    pub favorite_genres: Vec<i32>,
    pub average_rating: f64,
    pub preferred_decades: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Category {
    pub name: &'static str,
    pub movies: Vec<Movie>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct RecommendationData {
    pub profile: TasteProfile,
    pub personalized: Vec<Movie>,
    pub similar: Vec<Movie>,
    pub trending: Vec<Movie>,
    pub categories: Vec<Category>,
}

/// Counts keys while remembering the order each key was first seen in.
struct Tally<K> {
    entries: Vec<(K, usize)>,
}

impl<K: PartialEq> Tally<K> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn add(&mut self, key: K) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, count)) => *count += 1,
            None => self.entries.push((key, 1)),
        }
    }

    /// Most frequent first. The sort is stable, so equal counts keep first-seen order.
    fn top(mut self, n: usize) -> Vec<K> {
        self.entries.sort_by(|a, b| b.1.cmp(&a.1));
        self.entries.into_iter().take(n).map(|(k, _)| k).collect()
    }
}

pub fn decade_label(year: i32) -> String {
    format!("{}s", year.div_euclid(10) * 10)
}

pub fn analyze_preferences(favorites: &[Movie]) -> TasteProfile {
    if favorites.is_empty() {
        return TasteProfile::default();
    }

    let mut genres = Tally::new();
    let mut decades = Tally::new();
    let mut total_rating = 0.0;

    for movie in favorites {
        for genre in &movie.genre_ids {
            genres.add(*genre);
        }
        if let Some(year) = movie.release_year() {
            decades.add(decade_label(year));
        }
        total_rating += movie.vote_average.unwrap_or(0.0);
    }

    TasteProfile {
        favorite_genres: genres.top(TOP_GENRES),
        average_rating: total_rating / favorites.len() as f64,
        preferred_decades: decades.top(TOP_DECADES),
    }
}

/// Up to two short explanations for why `movie` was suggested.
pub fn recommendation_reasons(movie: &Movie, profile: &TasteProfile) -> Vec<String> {
    let mut reasons = Vec::new();

    if movie
        .genre_ids
        .iter()
        .any(|g| profile.favorite_genres.contains(g))
    {
        reasons.push("Matches your favorite genres".to_string());
    }

    if let Some(rating) = movie.vote_average.filter(|r| *r > 0.0) {
        if rating >= profile.average_rating {
            reasons.push("Highly rated".to_string());
        }
    }

    if let Some(year) = movie.release_year() {
        let decade = decade_label(year);
        if profile.preferred_decades.contains(&decade) {
            reasons.push(format!("From your favorite decade ({decade})"));
        }
    }

    if reasons.is_empty() {
        if movie.popularity.is_some_and(|p| p > 50.0) {
            reasons.push("Popular choice".to_string());
        }
        if movie.vote_average.is_some_and(|r| r > 7.0) {
            reasons.push("Critics favorite".to_string());
        }
    }

    reasons.truncate(2);
    reasons
}

/// Keeps the first occurrence of each id and drops anything in `exclude`.
pub fn merge_unique(batches: Vec<Vec<Movie>>, exclude: &HashSet<i32>) -> Vec<Movie> {
    let mut seen = HashSet::new();
    batches
        .into_iter()
        .flatten()
        .filter(|m| !exclude.contains(&m.id) && seen.insert(m.id))
        .collect()
}

/// Candidate pool for the personalized buckets.
///
/// With no genre signal this is the popular list. Otherwise the best rated
/// titles of the top genres are fetched concurrently, merged without
/// duplicates, shuffled and truncated.
pub async fn personalized_pool<R: Rng + Send>(
    catalog: &Catalog,
    genres: &[i32],
    exclude: &HashSet<i32>,
    rng: &mut R,
) -> Vec<Movie> {
    if genres.is_empty() {
        debug!("No genre preferences, falling back to popular movies");
        let popular = catalog.popular(1).await.results;
        return merge_unique(vec![popular], exclude);
    }

    let batches: Vec<Vec<Movie>> = join_all(
        genres
            .iter()
            .take(GENRES_QUERIED)
            .map(|genre| catalog.movies_by_genre(*genre, 1)),
    )
    .await
    .into_iter()
    .map(|batch| {
        batch
            .into_iter()
            .filter(|m| !exclude.contains(&m.id))
            .take(PER_GENRE)
            .collect()
    })
    .collect();

    let mut pool = merge_unique(batches, exclude);
    pool.shuffle(rng);
    pool.truncate(POOL_SIZE);
    pool
}

fn window(movies: &[Movie], start: usize, end: usize) -> Vec<Movie> {
    let end = end.min(movies.len());
    let start = start.min(end);
    movies[start..end].to_vec()
}

pub async fn generate_recommendations<R: Rng + Send>(
    catalog: &Catalog,
    favorites: &[Movie],
    current_movie: Option<i32>,
    rng: &mut R,
) -> RecommendationData {
    let profile = analyze_preferences(favorites);
    let mut exclude: HashSet<i32> = favorites.iter().map(|m| m.id).collect();
    if let Some(id) = current_movie {
        exclude.insert(id);
    }

    let similar_fut = async {
        match current_movie {
            Some(id) => catalog.similar(id, 1).await.results,
            None => Vec::new(),
        }
    };
    let (pool, similar) = tokio::join!(
        personalized_pool(catalog, &profile.favorite_genres, &exclude, rng),
        similar_fut,
    );

    let has_favorites = !favorites.is_empty();
    let because_you_liked = if has_favorites {
        window(&pool, 0, 10)
    } else {
        Vec::new()
    };
    let popular_picks = if has_favorites {
        window(&pool, 10, 18)
    } else {
        window(&pool, 0, 8)
    };
    let similar = window(&similar, 0, 8);

    let categories: Vec<Category> = [
        (BECAUSE_YOU_LIKED, because_you_liked),
        (MORE_LIKE_THIS, similar.clone()),
        (POPULAR_PICKS, popular_picks),
    ]
    .into_iter()
    .filter(|(_, movies)| !movies.is_empty())
    .map(|(name, movies)| Category { name, movies })
    .collect();

    info!(
        "Generated recommendations: {} favorites, pool of {}, {} categories",
        favorites.len(),
        pool.len(),
        categories.len()
    );

    RecommendationData {
        personalized: window(&pool, 0, 12),
        trending: window(&pool, 0, 6),
        similar,
        categories,
        profile,
    }
}
