//! # Say Hi Server
//!
//! Backend for a two-party chat application, organized as four logical
//! services (gateway, auth/user, chat, mail) that communicate over a
//! message broker with a request/reply convention, plus a real-time
//! layer for message delivery and read receipts.
//!
//! ## Module Structure
//!
//! ```text
//! sayhi_server/
//! +-- config/         Configuration management
//! +-- domain/         Entities and repository traits
//! +-- application/    Business services and DTOs
//! +-- infrastructure/ Broker, database, cache, mail, uploads
//! +-- realtime/       Presence registry and event shapes
//! +-- presentation/   HTTP routes and the WebSocket endpoint
//! +-- shared/         Common utilities (errors)
//! ```

// Configuration module
pub mod config;

// Domain layer - entities and repository traits
pub mod domain;

// Application layer - business services
pub mod application;

// Infrastructure layer - external implementations
pub mod infrastructure;

// Real-time layer - presence and events
pub mod realtime;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
