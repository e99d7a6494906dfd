//! Barterly Backend Library
//!
//! This library exports the core modules for the Barterly backend server: a
//! marketplace where users list second-hand items and swap them through
//! negotiated trades.

pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod listing;
pub mod middleware;
pub mod models;
pub mod profile;
pub mod routes;
pub mod session;
pub mod state;
pub mod storage;
pub mod store;
pub mod trade;
pub mod websocket;
