//! # Infrastructure Layer
//!
//! Implementations of the external-facing seams: broker transport,
//! PostgreSQL repositories, Redis cache, outbound mail and object
//! uploads.

pub mod broker;
pub mod cache;
pub mod database;
pub mod mail;
pub mod objects;
pub mod repositories;
