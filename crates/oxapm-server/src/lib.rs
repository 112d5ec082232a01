//! Operational entry points of oxapm: configuration loading and builtin
//! template seeding. The dispatch engine itself lives in `oxapm-dispatch`.

pub mod config;
pub mod template_seed;
