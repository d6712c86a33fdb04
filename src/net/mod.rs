//! Request/response model and the network seam.
//!
//! Everything the engine sends upstream goes through a [`Fetcher`], so the
//! strategies can be exercised against a scripted network in tests and a
//! `reqwest` client in production.

pub mod client;
pub mod types;

pub use client::{Fetcher, HttpClient};
pub use types::{Destination, Headers, Method, Request, Response, ResponseSource};
