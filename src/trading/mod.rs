//! Trading logic: symbol rules, strategies, agents and bot definitions.

mod agent;
mod config;
mod strategy;
mod symbol_registry;

pub use agent::{Agent, AgentStatus, StepOutcome};
pub use config::{
    load_definitions, AgentConfig, BotDefinition, OrchestratorConfig, INVESTMENT_RANGE,
    MAX_SYMBOLS_RANGE, PROFIT_TARGET_RANGE, STOP_LOSS_RANGE, TRAILING_STOP_RANGE,
};
pub use strategy::{RiskParams, StrategyKind};
pub use symbol_registry::{quantize_at_price, SymbolRegistry};
