pub mod delivery;
pub mod failure;
pub mod pacer;
pub mod ports;
pub mod processor;
pub mod resolver;
pub mod router;
pub mod scheduler;
