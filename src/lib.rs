//! Extracts structured affiliate deals from Telegram chat messages and stores
//! them as rows in a SQLite table.

pub mod config;
pub mod database;
pub mod deal_bot;
pub mod extractor;
pub mod keywords;
pub mod models;
pub mod telegram;
pub mod traits;
