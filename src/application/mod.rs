//! Application services: social graph, interest profiles, candidate
//! generation, ranking and feed orchestration.

pub mod candidates;
pub mod engine;
pub mod error;
pub mod feed;
pub mod interests;
pub mod pagination;
pub mod ranking;
pub mod repos;
pub mod social;
