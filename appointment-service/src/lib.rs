//! Appointment service: booking validation, per-agent conflict checks and the
//! appointment lifecycle, published as events on `appointment-events`.

pub mod config;
pub mod grpc;
pub mod migrations;
pub mod models;
pub mod services;
pub mod startup;
pub mod workers;
pub mod workflow;
