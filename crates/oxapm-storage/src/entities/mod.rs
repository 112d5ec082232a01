pub mod strategy_instance;
pub mod strategy_template;
