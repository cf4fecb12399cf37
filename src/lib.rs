pub mod config;
pub mod db;
pub mod models;
pub mod schema;
pub mod line;
pub mod contacts;
pub mod menus;
pub mod steps;
pub mod broadcast;
pub mod webhook;
pub mod metrics;
pub mod api;

#[macro_use]
extern crate diesel;
