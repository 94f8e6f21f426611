//! Newzlettr backend: a thin aggregation layer over a Tautulli server that
//! feeds the newsletter editor with play totals, recent additions and the
//! recipient list.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod images;
pub mod media;
pub mod routes;
pub mod settings;
pub mod stats;
