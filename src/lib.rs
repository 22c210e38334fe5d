pub mod capability;
pub mod cli;
pub mod collection;
pub mod completions;
pub mod config;
pub mod context;
pub mod db;
pub mod engine;
pub mod entities;
pub mod events;
pub mod filters;
pub mod identity;
pub mod locks;
pub mod normalize;
pub mod notifications;
pub mod reactive;
pub mod store;
pub mod timeline;

pub use engine::{Engine, EngineError, EngineOptions};

#[cfg(test)]
mod test_support;
