use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use moviesprix::app::{build_router, AppState};
use moviesprix::models::{Cast, Genre, Movie, MovieDetails, Paged, Video};
use moviesprix::search::SearchGate;
use moviesprix::store::MemoryStore;
use moviesprix::tmdb::{DiscoverQuery, TmdbApi};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::util::ServiceExt;

const SECRET: &str = "test-session-secret";

struct FakeTmdb {
    calls: Mutex<Vec<String>>,
}

fn movie(id: i32, genres: &[i32], date: &str) -> Movie {
    Movie {
        id,
        title: format!("Movie {id}"),
        genre_ids: genres.to_vec(),
        release_date: Some(date.to_string()),
        vote_average: Some(7.5),
        ..Default::default()
    }
}

fn paged(results: Vec<Movie>) -> Paged<Movie> {
    Paged {
        total_results: results.len() as u32,
        results,
        page: 1,
        total_pages: 1,
    }
}

impl FakeTmdb {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TmdbApi for FakeTmdb {
    async fn trending(&self, page: u32) -> anyhow::Result<Paged<Movie>> {
        self.record(format!("trending:{page}"));
        Ok(paged(vec![movie(1, &[28], "2024-05-01"), movie(2, &[35], "2023-01-01")]))
    }

    async fn popular(&self, page: u32) -> anyhow::Result<Paged<Movie>> {
        self.record(format!("popular:{page}"));
        Ok(paged((500..520).map(|id| movie(id, &[18], "2010-01-01")).collect()))
    }

    async fn discover(&self, query: &DiscoverQuery) -> anyhow::Result<Paged<Movie>> {
        self.record(format!("discover:{}", query.to_query_string()));
        if query.with_original_language.as_deref() == Some("hi") {
            anyhow::bail!("/discover/movie -> 503 Service Unavailable");
        }
        let genre: i32 = match query.with_genres.as_deref() {
            Some(g) => g.parse()?,
            None => return Ok(paged(vec![movie(3, &[12], "2001-01-01")])),
        };
        if genre == 27 {
            return Ok(paged(Vec::new()));
        }
        Ok(paged(
            (0..10)
                .map(|i| movie(genre * 100 + i, &[genre], "1998-01-01"))
                .collect(),
        ))
    }

    async fn search(&self, query: &str, page: u32) -> anyhow::Result<Paged<Movie>> {
        self.record(format!("search:{query}:{page}"));
        Ok(paged((0..12).map(|i| movie(700 + i, &[], "2000-01-01")).collect()))
    }

    async fn details(&self, id: i32) -> anyhow::Result<MovieDetails> {
        if id == 404 {
            anyhow::bail!("/movie/404 -> 404 Not Found");
        }
        Ok(MovieDetails {
            id,
            title: "Heat".to_string(),
            original_title: None,
            overview: "A group of professional bank robbers".to_string(),
            tagline: None,
            status: Some("Released".to_string()),
            poster_path: Some("/heat.jpg".to_string()),
            backdrop_path: None,
            release_date: Some("1995-12-15".to_string()),
            runtime: Some(170),
            vote_average: Some(7.9),
            vote_count: Some(7000),
            popularity: Some(40.0),
            original_language: Some("en".to_string()),
            genres: vec![Genre {
                id: 80,
                name: "Crime".to_string(),
            }],
            homepage: None,
            imdb_id: Some("tt0113277".to_string()),
            budget: None,
            revenue: None,
        })
    }

    async fn credits(&self, _id: i32) -> anyhow::Result<Vec<Cast>> {
        Ok((0..30)
            .map(|i| Cast {
                id: i,
                name: format!("Actor {i}"),
                character: None,
                profile_path: None,
            })
            .collect())
    }

    async fn videos(&self, _id: i32) -> anyhow::Result<Vec<Video>> {
        let video = |key: &str, site: &str, kind: &str| Video {
            id: key.to_string(),
            key: key.to_string(),
            name: key.to_string(),
            site: site.to_string(),
            video_type: kind.to_string(),
        };
        Ok(vec![
            video("t1", "YouTube", "Trailer"),
            video("teaser", "YouTube", "Teaser"),
            video("v1", "Vimeo", "Trailer"),
            video("t2", "YouTube", "Trailer"),
        ])
    }

    async fn similar(&self, id: i32, _page: u32) -> anyhow::Result<Paged<Movie>> {
        Ok(paged(
            (0..15).map(|i| movie(id * 1000 + i, &[80], "1990-01-01")).collect(),
        ))
    }

    async fn recommendations(&self, _id: i32) -> anyhow::Result<Paged<Movie>> {
        anyhow::bail!("rate limited")
    }

    async fn genres(&self) -> anyhow::Result<Vec<Genre>> {
        Ok(vec![Genre {
            id: 28,
            name: "Action".to_string(),
        }])
    }

    async fn configuration(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn app_with_fake(debounce: Duration) -> (Router, Arc<FakeTmdb>) {
    let tmdb = Arc::new(FakeTmdb::new());
    let state = AppState::new(
        tmdb.clone(),
        Arc::new(MemoryStore::new()),
        SECRET,
        SearchGate::new(debounce),
    );
    (build_router(state), tmdb)
}

fn app() -> (Router, Arc<FakeTmdb>) {
    app_with_fake(Duration::from_millis(0))
}

async fn body_json(res: axum::response::Response) -> Value {
    let bytes = to_bytes(res.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    serde_json::from_slice(&bytes).expect("body is not JSON")
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(t) = token {
        builder = builder.header("authorization", format!("Bearer {t}"));
    }
    builder.body(Body::empty()).expect("failed to build request")
}

fn send_json(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(t) = token {
        builder = builder.header("authorization", format!("Bearer {t}"));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("failed to build request")
}

async fn login(app: &Router, email: &str) -> String {
    let res = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/auth/login",
            None,
            json!({ "email": email, "password": "popcorn" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await["token"]
        .as_str()
        .expect("token missing")
        .to_string()
}

fn ids(value: &Value) -> Vec<i64> {
    value
        .as_array()
        .map(|a| a.iter().filter_map(|m| m["id"].as_i64()).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn health_and_unknown_routes() {
    let (app, _) = app();
    let res = app.clone().oneshot(get("/health", None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app.oneshot(get("/nowhere", None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body = body_json(res).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Not found");
}

#[tokio::test]
async fn trending_passes_page_through() {
    let (app, tmdb) = app();
    let res = app
        .oneshot(get("/api/movies/trending?page=3", None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(ids(&body["results"]), vec![1, 2]);
    assert_eq!(tmdb.calls(), vec!["trending:3".to_string()]);
}

#[tokio::test]
async fn movie_info_limits_cast_and_keeps_youtube_trailers() {
    let (app, _) = app();
    let res = app.oneshot(get("/api/movies/949", None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["title"], "Heat");
    assert_eq!(body["cast"].as_array().unwrap().len(), 20);
    assert_eq!(body["similar_movies"].as_array().unwrap().len(), 12);
    let trailer_keys: Vec<&str> = body["trailers"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v["key"].as_str())
        .collect();
    assert_eq!(trailer_keys, vec!["t1", "t2"]);
}

#[tokio::test]
async fn missing_movie_is_not_found() {
    let (app, _) = app();
    let res = app.oneshot(get("/api/movies/404", None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upstream_failure_degrades_to_empty_list() {
    let (app, _) = app();
    let res = app
        .oneshot(get("/api/movies/7/recommendations", None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await, json!([]));
}

#[tokio::test]
async fn blank_search_skips_upstream() {
    let (app, tmdb) = app();
    let res = app
        .clone()
        .oneshot(get("/api/search?query=%20%20", None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["total_pages"], 0);
    assert!(tmdb.calls().is_empty());

    let res = app
        .oneshot(get("/api/search?query=%20heat%20&page=2", None))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["results"].as_array().unwrap().len(), 12);
    assert_eq!(tmdb.calls(), vec!["search:heat:2".to_string()]);
}

#[tokio::test]
async fn suggestions_are_capped() {
    let (app, _) = app();
    let res = app
        .oneshot(get("/api/search/suggest?query=heat", None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["results"].as_array().unwrap().len(), 8);
}

#[tokio::test(start_paused = true)]
async fn newer_suggestion_supersedes_older() {
    let (app, tmdb) = app_with_fake(Duration::from_millis(300));
    let first = tokio::spawn(
        app.clone()
            .oneshot(get("/api/search/suggest?query=he", Some("tok"))),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = app
        .oneshot(get("/api/search/suggest?query=heat", Some("tok")))
        .await
        .unwrap();

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status(), StatusCode::NO_CONTENT);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(tmdb.calls(), vec!["search:heat:1".to_string()]);
}

#[tokio::test]
async fn signup_validation_messages() {
    let (app, _) = app();
    let res = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/auth/signup",
            None,
            json!({ "email": "a@b.c" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(res).await["message"],
        "Email and password are required"
    );

    let res = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/auth/signup",
            None,
            json!({ "email": "a@b.c", "password": "123" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(res).await["message"],
        "Password must be at least 6 characters"
    );

    let res = app
        .oneshot(send_json(
            "POST",
            "/api/auth/signup",
            None,
            json!({ "email": "a@b.c", "password": "123456", "full_name": "Ada" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body = body_json(res).await;
    assert_eq!(body["user"]["id"], "a_b_c");
    assert_eq!(body["user"]["user_metadata"]["full_name"], "Ada");
}

#[tokio::test]
async fn protected_routes_require_a_session() {
    let (app, _) = app();
    let res = app
        .clone()
        .oneshot(get("/api/favorites", None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = app
        .oneshot(get("/api/profile", Some("someone.1.deadbeef")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_invalidates_token() {
    let (app, _) = app();
    let token = login(&app, "leaving@example.com").await;

    let res = app
        .clone()
        .oneshot(get("/api/profile", Some(&token)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["email"], "leaving@example.com");

    let res = app
        .clone()
        .oneshot(send_json("POST", "/api/auth/logout", Some(&token), json!({})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = app.oneshot(get("/api/profile", Some(&token))).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn favorites_flow() {
    let (app, _) = app();
    let token = login(&app, "fan@example.com").await;
    let heat = json!({ "id": 949, "title": "Heat", "genre_ids": [80], "release_date": "1995-12-15" });

    for _ in 0..2 {
        let res = app
            .clone()
            .oneshot(send_json("POST", "/api/favorites", Some(&token), heat.clone()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["count"], 1);
    }

    let res = app
        .clone()
        .oneshot(get("/api/favorites/949", Some(&token)))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["favorited"], true);

    let res = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/favorites/toggle",
            Some(&token),
            heat.clone(),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["favorited"], false);

    let other = login(&app, "other@example.com").await;
    app.clone()
        .oneshot(send_json("POST", "/api/favorites", Some(&other), heat))
        .await
        .unwrap();

    let res = app
        .clone()
        .oneshot(get("/api/favorites", Some(&token)))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["count"], 0);

    let res = app
        .clone()
        .oneshot(send_json("DELETE", "/api/favorites/949", Some(&other), json!({})))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["count"], 0);
}

#[tokio::test]
async fn recommendations_without_favorites_fall_back_to_popular() {
    let (app, tmdb) = app();
    let token = login(&app, "new@example.com").await;
    let res = app
        .oneshot(get("/api/recommendations", Some(&token)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    let categories = body["categories"].as_array().unwrap();
    assert_eq!(categories.len(), 1);
    assert_eq!(categories[0]["name"], "Popular Picks");
    assert!(tmdb.calls().contains(&"popular:1".to_string()));
}

#[tokio::test]
async fn recommendations_exclude_favorites_and_current_movie() {
    let (app, _) = app();
    let token = login(&app, "action@example.com").await;
    for (id, date) in [(2800, "1991-07-03"), (2801, "1994-06-10"), (2802, "1999-03-31")] {
        app.clone()
            .oneshot(send_json(
                "POST",
                "/api/favorites",
                Some(&token),
                json!({ "id": id, "title": "Action", "genre_ids": [28], "release_date": date, "vote_average": 7.0 }),
            ))
            .await
            .unwrap();
    }

    let res = app
        .oneshot(get("/api/recommendations?current=2803", Some(&token)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;

    assert_eq!(body["profile"]["favorite_genres"], json!([28]));
    assert_eq!(body["profile"]["preferred_decades"], json!(["1990s"]));

    let pool = ids(&body["personalized"]);
    let unique: HashSet<i64> = pool.iter().copied().collect();
    assert_eq!(unique.len(), pool.len());
    for excluded in [2800, 2801, 2802, 2803] {
        assert!(!unique.contains(&excluded), "{excluded} was recommended");
    }
    assert_eq!(ids(&body["similar"]).len(), 8);

    let names: Vec<&str> = body["categories"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Because You Liked", "More Like This"]);
    let first = pool[0].to_string();
    assert!(body["reasons"][first.as_str()]
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r == "Matches your favorite genres"));
}

#[tokio::test]
async fn home_drops_empty_and_failed_rows() {
    let (app, tmdb) = app();
    let res = app.oneshot(get("/api/home", None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    let titles: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|row| row["title"].as_str())
        .collect();
    assert_eq!(
        titles,
        vec![
            "Trending Now",
            "Popular Worldwide",
            "Action & Adventure",
            "Comedy Gold",
            "Sci-Fi Wonders",
            "Leonardo DiCaprio Collection",
            "Tom Cruise Action",
        ]
    );
    assert_eq!(ids(&body[2]["movies"])[0], 2800);

    let calls = tmdb.calls();
    assert!(calls.contains(&"trending:1".to_string()));
    assert!(calls
        .iter()
        .any(|c| c.starts_with("discover:") && c.contains("with_genres=27")));
    assert_eq!(calls.iter().filter(|c| c.starts_with("discover:")).count(), 8);
}

#[tokio::test]
async fn discover_forwards_filters() {
    let (app, tmdb) = app();
    let res = app
        .oneshot(get(
            "/api/movies?with_genres=28&vote_count.gte=50&page=2&sort_by=vote_average.desc",
            None,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(ids(&body), (2800..2810).collect::<Vec<i64>>());
    assert_eq!(
        tmdb.calls(),
        vec![
            "discover:page=2&include_adult=false&include_video=false&sort_by=vote_average.desc&with_genres=28&vote_count.gte=50"
                .to_string()
        ]
    );
}

#[tokio::test]
async fn discover_without_filters_uses_first_page() {
    let (app, tmdb) = app();
    let res = app.oneshot(get("/api/movies", None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(ids(&body_json(res).await), vec![3]);
    assert_eq!(
        tmdb.calls(),
        vec!["discover:page=1&include_adult=false&include_video=false".to_string()]
    );
}

#[tokio::test]
async fn genre_list_is_served() {
    let (app, _) = app();
    let res = app.oneshot(get("/api/genres", None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await, json!([{ "id": 28, "name": "Action" }]));
}

#[tokio::test]
async fn google_sign_in_opens_a_session() {
    let (app, _) = app();
    let res = app
        .clone()
        .oneshot(send_json("POST", "/api/auth/google", None, json!({})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["user"]["id"], "demo_google_com");
    assert_eq!(body["user"]["email"], "demo@google.com");
    assert_eq!(body["user"]["app_metadata"]["provider"], "google");
    let token = body["token"].as_str().unwrap().to_string();

    let res = app
        .oneshot(get("/api/profile", Some(&token)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["user_metadata"]["full_name"], "Demo User");
}

#[tokio::test]
async fn profile_update_is_persisted() {
    let (app, _) = app();
    let res = app
        .clone()
        .oneshot(send_json(
            "PATCH",
            "/api/profile",
            None,
            json!({ "full_name": "Nobody" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let token = login(&app, "neo@example.com").await;
    let res = app
        .clone()
        .oneshot(send_json(
            "PATCH",
            "/api/profile",
            Some(&token),
            json!({ "full_name": "Thomas Anderson" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["user_metadata"]["full_name"], "Thomas Anderson");

    let res = app
        .oneshot(get("/api/profile", Some(&token)))
        .await
        .unwrap();
    let body = body_json(res).await;
    assert_eq!(body["id"], "neo_example_com");
    assert_eq!(body["user_metadata"]["full_name"], "Thomas Anderson");
}

#[tokio::test]
async fn non_numeric_movie_id_is_a_json_validation_error() {
    let (app, tmdb) = app();
    for uri in ["/api/movies/heat", "/api/movies/heat/cast", "/api/movies/1.5/similar"] {
        let res = app.clone().oneshot(get(uri, None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{uri}");
        let body = body_json(res).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Movie id must be an integer");
    }
    assert!(tmdb.calls().is_empty());

    let token = login(&app, "ids@example.com").await;
    let res = app
        .oneshot(get("/api/favorites/abc", Some(&token)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["status"], "error");
}
