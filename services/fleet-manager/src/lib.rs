//! Stream fleet manager service.
//!
//! This crate primarily ships a `fleet-manager` binary, but exposes its
//! library surface to enable integration testing against in-memory
//! collaborators.

pub mod acl;
pub mod api;
pub mod catalogue;
pub mod config;
pub mod db;
pub mod lifecycle;
pub mod metrics;
pub mod model;
pub mod quota;
pub mod services;
pub mod state;
