pub mod config;
pub mod counts;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod notifier;
pub mod queue;
pub mod rules;
pub mod simulator;
pub mod store;
pub mod strategies;
pub mod validation;
pub mod webhook;
pub mod worker;
