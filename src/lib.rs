pub mod app;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod favorites;
pub mod models;
pub mod recommend;
pub mod search;
pub mod store;
pub mod tmdb;
