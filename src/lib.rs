//! Library crate for maiqueue-back, exposing modules for binaries and integration tests.

pub mod config;
/// Entities, storage abstraction and transactions.
pub mod dao;
mod dto;
mod error;
/// HTTP routers.
pub mod routes;
/// Admission engine and background tasks.
pub mod services;
/// Shared application state.
pub mod state;
