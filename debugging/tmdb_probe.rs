//! Check TMDB connectivity and print what the API layer would serve for a movie.
//! Usage:
//!   cargo run --bin tmdb_probe -- status
//!   cargo run --bin tmdb_probe -- movie <tmdb_id>
//!   cargo run --bin tmdb_probe -- search <query...>
//! Requires TMDB_API_KEY in the environment (.env supported).

use anyhow::{Context, Result};
use dotenvy::dotenv;
use moviesprix::catalog::Catalog;
use moviesprix::models::{image_url, ImageSize};
use moviesprix::tmdb::{TmdbApi, TmdbClient, TMDB_BASE};
use serde_json::json;
use std::env;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Probe {
    Status,
    Movie,
    Search,
}

impl FromStr for Probe {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "status" => Ok(Probe::Status),
            "movie" => Ok(Probe::Movie),
            "search" => Ok(Probe::Search),
            _ => Err(anyhow::anyhow!("probe must be 'status', 'movie' or 'search'")),
        }
    }
}

fn usage() -> ! {
    eprintln!("Usage: cargo run --bin tmdb_probe -- status");
    eprintln!("       cargo run --bin tmdb_probe -- movie <tmdb_id>");
    eprintln!("       cargo run --bin tmdb_probe -- search <query...>");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage();
    }
    let probe = Probe::from_str(&args[1])?;

    let api_key = env::var("TMDB_API_KEY").context("TMDB_API_KEY not set")?;
    let base = env::var("TMDB_BASE_URL").unwrap_or_else(|_| TMDB_BASE.to_string());
    let tmdb: Arc<dyn TmdbApi> = Arc::new(TmdbClient::new(api_key, base)?);
    let catalog = Catalog::new(tmdb);

    match probe {
        Probe::Status => {
            let ok = catalog.test_connection().await;
            println!("{}", json!({ "tmdb": ok }));
            if !ok {
                std::process::exit(2);
            }
        }
        Probe::Movie => {
            let id: i32 = args
                .get(2)
                .unwrap_or_else(|| usage())
                .parse()
                .context("tmdb_id must be an integer")?;
            let Some(info) = catalog.movie_info(id).await else {
                anyhow::bail!("movie {} not found", id);
            };
            let out = json!({
                "poster": image_url(info.details.poster_path.as_deref(), ImageSize::W500),
                "backdrop": image_url(info.details.backdrop_path.as_deref(), ImageSize::Original),
                "info": info,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Probe::Search => {
            let query = args[2..].join(" ");
            let page = catalog.search(&query, 1).await;
            for movie in &page.results {
                println!(
                    "{:>8}  {}  ({})",
                    movie.id,
                    movie.title,
                    movie.release_year().map(|y| y.to_string()).unwrap_or_default()
                );
            }
            println!("{} results over {} pages", page.total_results, page.total_pages);
        }
    }

    Ok(())
}
