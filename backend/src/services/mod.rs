pub mod access;
pub mod auth;
pub mod automation_engine;
pub mod price_fetcher;
pub mod rule_validation;
pub mod webhooks;
