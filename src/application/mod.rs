//! # Application Layer
//!
//! Business services of the four logical backends (auth/user, chat,
//! mail) plus the request/response DTOs of the gateway surface.

pub mod dto;
pub mod services;
