//! Services
//!
//! - `EventBus` - broadcast fan-out of committed events, per-container
//!   subscriptions and background listeners
//! - `OutlineService` - the façade transports use: submit commands, subscribe
//!   to events, read trees and the audit log

pub mod event_bus;
pub mod outline_service;

pub use event_bus::{ContainerSubscription, EventBus, EventListener};
pub use outline_service::OutlineService;
