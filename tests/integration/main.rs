//! Integration tests for the chart gateway.
//!
//! Everything runs in-process against the sample dataset in `data/`, with the
//! in-memory cache and broker standing in for Redis.
//! Run with: `cargo test --test integration`

mod common;
mod graphql_test;
mod pipeline_test;
mod rest_api_test;
