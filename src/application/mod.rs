//! Application services: strategies, lifecycle, outbox and message routing.

pub mod error;
pub mod lifecycle;
pub mod messages;
pub mod network;
pub mod notify;
pub mod outbox;
pub mod repos;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testing;
