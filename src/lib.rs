//! Reverie feed engine: social graph, interest profiles, ranked and cached
//! home feeds.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
