#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod backend;
pub mod checker;
pub mod identity;
mod policy;
pub mod profile;
pub mod service;
pub mod template;
pub mod username;

pub use checker::{Availability, AvailabilityChecker, AvailabilityCheckerBuilder};
pub use policy::{Policy, DEFAULT_INTERVAL, DEFAULT_MAX_REQUESTS};
pub use service::HeaderCompatibleOutput;
