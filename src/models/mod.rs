pub mod channel;
pub mod circuit_breaker;
pub mod delivery;
pub mod health;
pub mod notification;
pub mod priority;
pub mod request;
pub mod response;
pub mod retry;
pub mod status;
pub mod template;
pub mod validation;
