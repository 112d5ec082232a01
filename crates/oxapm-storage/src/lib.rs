//! Persistence for strategy templates and their dispatch instances.
//!
//! [`store::StrategyStore`] wraps a SeaORM connection (SQLite by default) and
//! exposes one async method per query shape the dispatch engine needs:
//! filter-by-keys, bulk create / update and delete-by-id, with the instance
//! changes of one dispatch applied inside a single transaction.

pub mod entities;
pub mod error;
pub mod store;


pub use store::{
    redact_url, InstanceChangeSet, Page, StrategyInstanceFilter, StrategyInstanceRow,
    StrategyStore, StrategyTemplateFilter, StrategyTemplateRow, TemplateOrder, TemplateOrderField,
    TemplatePage,
};
