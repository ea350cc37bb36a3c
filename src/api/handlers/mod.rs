//! API handlers for Janua.
//!
//! This module organizes the service's route handlers: the authentication
//! core under `auth` plus health and root endpoints.

pub mod auth;
pub mod health;
pub mod root;
