//! API gateway: one HTTP query endpoint resolved against the user, property
//! and appointment services.

pub mod config;
pub mod resolvers;
pub mod routes;
pub mod startup;
