//! Chat service: consumes property and appointment events and keeps the
//! affected conversations informed with system messages.

pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
