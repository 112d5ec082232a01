//! Alert strategy dispatch engine.
//!
//! Strategy templates are reusable alert rule definitions bound to a named
//! query template. [`dispatcher::StrategyDispatcher`] turns a template into
//! one remote alert rule per service: it resolves the services
//! ([`entity_set::EntitySet`]), merges overrides ([`config`]), lets the
//! template's system decorate each config ([`enricher`]), builds the payload
//! ([`builder`]) and reconciles it with what was dispatched before, using
//! content hashes ([`hash`]) and same-origin families ([`lineage`]).
//! [`handler::StrategyTemplateHandler`] adds the template-level operations
//! (apply, unapply, clone, batch edit, compare, auto-apply sweeps).

pub mod builder;
pub mod config;
pub mod dispatcher;
pub mod enricher;
pub mod entity_set;
pub mod error;
pub mod filter;
pub mod handler;
pub mod hash;
pub mod lineage;
pub mod provider;
pub mod settings;

#[cfg(test)]
mod tests;

pub use dispatcher::{DispatchOptions, DispatchOutcome, StrategyDispatcher};
pub use error::{DispatchError, Result};
pub use handler::StrategyTemplateHandler;
pub use settings::DispatchSettings;
