//! Library crate for spotlight-back: the round engine, submission coordinator,
//! notification bus and storage layers behind the HTTP surface.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod lock;
pub mod routes;
pub mod services;
pub mod state;
