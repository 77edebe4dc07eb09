use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::Movie;
use crate::store::KvStore;

/// Per-user favorites, stored as one JSON array of movies per user.
///
/// Mutations read, edit and write back the whole array while holding
/// `writes`, so concurrent requests never overwrite each other.
#[derive(Clone)]
pub struct FavoritesService {
    store: Arc<dyn KvStore>,
    writes: Arc<Mutex<()>>,
}

fn favorites_key(user_id: &str) -> String {
    format!("moviesprix-favorites-{user_id}")
}

impl FavoritesService {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            writes: Arc::new(Mutex::new(())),
        }
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Movie>> {
        let raw = self
            .store
            .get(&favorites_key(user_id))
            .await
            .context("Failed to read favorites")?;
        let Some(raw) = raw else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(movies) => Ok(movies),
            Err(e) => {
                warn!("Error parsing favorites for {}: {}", user_id, e);
                Ok(Vec::new())
            }
        }
    }

    async fn save(&self, user_id: &str, movies: &[Movie]) -> Result<()> {
        let body = serde_json::to_string(movies).context("Failed to encode favorites")?;
        self.store
            .set(&favorites_key(user_id), body)
            .await
            .context("Failed to store favorites")?;
        debug!("Saved {} favorites for {}", movies.len(), user_id);
        Ok(())
    }

    /// Appends `movie` unless a movie with the same id is already present.
    pub async fn add(&self, user_id: &str, movie: Movie) -> Result<Vec<Movie>> {
        let _writing = self.writes.lock().await;
        let mut movies = self.list(user_id).await?;
        if !movies.iter().any(|m| m.id == movie.id) {
            movies.push(movie);
            self.save(user_id, &movies).await?;
        }
        Ok(movies)
    }

    pub async fn remove(&self, user_id: &str, movie_id: i32) -> Result<Vec<Movie>> {
        let _writing = self.writes.lock().await;
        let mut movies = self.list(user_id).await?;
        let before = movies.len();
        movies.retain(|m| m.id != movie_id);
        if movies.len() != before {
            self.save(user_id, &movies).await?;
        }
        Ok(movies)
    }

    /// Returns whether the movie is a favorite after the toggle.
    pub async fn toggle(&self, user_id: &str, movie: Movie) -> Result<bool> {
        let _writing = self.writes.lock().await;
        let mut movies = self.list(user_id).await?;
        let now_favorited = match movies.iter().position(|m| m.id == movie.id) {
            Some(idx) => {
                movies.remove(idx);
                false
            }
            None => {
                movies.push(movie);
                true
            }
        };
        self.save(user_id, &movies).await?;
        Ok(now_favorited)
    }

    pub async fn is_favorited(&self, user_id: &str, movie_id: i32) -> Result<bool> {
        Ok(self.list(user_id).await?.iter().any(|m| m.id == movie_id))
    }

    pub async fn count(&self, user_id: &str) -> Result<usize> {
        Ok(self.list(user_id).await?.len())
    }

    pub async fn clear(&self, user_id: &str) -> Result<()> {
        let _writing = self.writes.lock().await;
        self.store
            .remove(&favorites_key(user_id))
            .await
            .context("Failed to clear favorites")
    }
}
