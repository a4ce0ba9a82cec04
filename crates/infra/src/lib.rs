//! Infrastructure layer: stores, stock engine, alerts, sweeper, config.

pub mod alerts;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod store;
pub mod sweeper;

mod integration_tests;
