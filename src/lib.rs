//! Offline caching and background sync engine.
//!
//! The [`engine::Engine`] sits between an application and the network: it
//! routes every outbound request to a cache strategy, keeps versioned cache
//! partitions, queues failed mutations for replay and routes push
//! notifications to application windows.

pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod event;
pub mod host;
pub mod lifecycle;
pub mod net;
pub mod notification;
pub mod router;
pub mod strategy;
pub mod sync;

#[cfg(test)]
mod testing;
