// Common library for the menu notifier: scraping, storage, scheduling and delivery

pub mod bootstrap;
pub mod channel;
pub mod civil;
pub mod clock;
pub mod config;
pub mod db;
pub mod errors;
pub mod feed;
pub mod freshness;
pub mod models;
pub mod notifier;
pub mod schedule;
pub mod scheduler;
pub mod scraper;
pub mod telemetry;
