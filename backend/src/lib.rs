//! Home Automation Backend Library
//!
//! This library provides the core functionality for the home-automation
//! platform, including:
//! - Switch and sensor management with discovery-based access control
//! - Automation rules with multi-condition triggers
//! - Electricity price fetching from the Nord Pool day-ahead market
//! - MQTT credential provisioning and command publishing
//! - User authentication and role management

pub mod api;
pub mod db;
pub mod integrations;
pub mod models;
pub mod schema;
pub mod services;
