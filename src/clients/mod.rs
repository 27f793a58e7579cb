pub mod circuit_breaker;
pub mod database;
pub mod health;
pub mod kafka;
pub mod redis;
pub mod vendor;
