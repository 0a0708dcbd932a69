//! Yahoo Finance options adapter.
//!
//! Implements [`QuoteSource`](crate::source::QuoteSource) over the public
//! `v7/finance/options` and `v8/finance/chart` endpoints.

pub mod client;
pub mod errors;
pub mod types;

pub use client::YahooClient;
pub use errors::YahooError;
