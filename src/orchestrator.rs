//! Orchestrator: owns the agents and drives their decision cycles.
//!
//! Handles:
//! - Agent registration and removal
//! - Periodic cycles stepping every running agent concurrently
//! - Isolation of per-agent errors and panics
//! - Periodic portfolio valuation and symbol rule refresh
//! - Synchronous shutdown
//!
//! A single mutex guards the agent registry. Cycles, registry mutation and
//! status reads all take it, so a step never observes a half-applied
//! add/remove and `stop` can wait for the in-flight cycle to drain.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use rust_decimal::Decimal;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::api::MarketGateway;
use crate::error::{BotError, Result};
use crate::portfolio::PortfolioAggregator;
use crate::trading::{Agent, AgentStatus, OrchestratorConfig, StepOutcome, SymbolRegistry};

/// Result of one agent's step within a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentResult {
    Completed(StepOutcome),
    Failed(String),
    Panicked(String),
}

impl AgentResult {
    pub fn is_failure(&self) -> bool {
        !matches!(self, AgentResult::Completed(_))
    }
}

/// Per-symbol results of one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub results: BTreeMap<String, AgentResult>,
}

impl CycleReport {
    pub fn stepped(&self) -> usize {
        self.results.len()
    }

    pub fn failures(&self) -> usize {
        self.results.values().filter(|r| r.is_failure()).count()
    }

    pub fn get(&self, symbol: &str) -> Option<&AgentResult> {
        self.results.get(symbol)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// State shared between the orchestrator handle and its background task.
#[derive(Clone)]
struct Shared {
    gateway: Arc<dyn MarketGateway>,
    registry: Arc<SymbolRegistry>,
    agents: Arc<Mutex<BTreeMap<String, Agent>>>,
    portfolio: Option<Arc<PortfolioAggregator>>,
}

impl Shared {
    async fn run_cycle(&self) -> CycleReport {
        let mut agents = self.agents.lock().await;
        let gateway = self.gateway.as_ref();
        let registry = self.registry.as_ref();

        let steps = agents
            .values_mut()
            .filter(|agent| agent.is_running())
            .map(|agent| async move {
                let symbol = agent.symbol().to_string();
                let outcome = AssertUnwindSafe(agent.step(gateway, registry))
                    .catch_unwind()
                    .await;

                let result = match outcome {
                    Ok(Ok(outcome)) => AgentResult::Completed(outcome),
                    Ok(Err(e)) => {
                        warn!(symbol = %symbol, error = %e, "Agent step failed");
                        AgentResult::Failed(e.to_string())
                    }
                    Err(payload) => {
                        let msg = panic_message(payload.as_ref());
                        error!(symbol = %symbol, panic = %msg, "Agent step panicked");
                        AgentResult::Panicked(msg)
                    }
                };
                (symbol, result)
            });

        let report = CycleReport {
            results: join_all(steps).await.into_iter().collect(),
        };

        debug!(
            stepped = report.stepped(),
            failures = report.failures(),
            "Cycle complete"
        );
        report
    }

    async fn value_portfolio(&self) {
        let Some(portfolio) = &self.portfolio else {
            return;
        };

        match portfolio.value_portfolio().await {
            Ok(snapshot) => {
                info!(
                    total = %snapshot.total_value.round_dp(2),
                    quote = %snapshot.quote_balance.round_dp(2),
                    holdings = snapshot.holdings.len(),
                    quote_asset = portfolio.quote_asset(),
                    "Portfolio valued"
                );
                if let Some(change) = portfolio.daily_change().await {
                    info!("{}", change);
                }
                portfolio.maybe_rebalance().await;
            }
            Err(e) => warn!(error = %e, "Portfolio valuation failed"),
        }
    }

    async fn refresh_symbols(&self) {
        if let Err(e) = self.registry.refresh(self.gateway.as_ref()).await {
            warn!(error = %e, "Symbol refresh failed");
        }
    }
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

async fn tick_optional(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run_loop(shared: Shared, config: OrchestratorConfig, mut shutdown: watch::Receiver<bool>) {
    let mut cycle = interval(config.cycle_interval);
    cycle.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut valuation = config.portfolio_interval.filter(|_| shared.portfolio.is_some()).map(|period| {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    });

    let mut refresh = config.symbol_refresh_interval.map(|period| {
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    });

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,
            _ = cycle.tick() => {
                shared.run_cycle().await;
            }
            _ = tick_optional(&mut valuation) => {
                shared.value_portfolio().await;
            }
            _ = tick_optional(&mut refresh) => {
                shared.refresh_symbols().await;
            }
        }
    }

    debug!("Orchestrator loop exited");
}

/// Registry of agents plus the background task that steps them.
pub struct Orchestrator {
    shared: Shared,
    config: OrchestratorConfig,
    running: AtomicBool,
    worker: Mutex<Option<Worker>>,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn MarketGateway>,
        registry: Arc<SymbolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            shared: Shared {
                gateway,
                registry,
                agents: Arc::new(Mutex::new(BTreeMap::new())),
                portfolio: None,
            },
            config,
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Value the portfolio periodically while running.
    pub fn with_portfolio(mut self, portfolio: Arc<PortfolioAggregator>) -> Self {
        self.shared.portfolio = Some(portfolio);
        self
    }

    pub fn portfolio(&self) -> Option<&Arc<PortfolioAggregator>> {
        self.shared.portfolio.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register an agent. One agent per symbol; the symbol must be known
    /// when the registry is loaded.
    pub async fn add_agent(&self, mut agent: Agent) -> Result<()> {
        let registry = &self.shared.registry;
        if !registry.is_empty() && !registry.validate_symbol(agent.symbol()) {
            return Err(BotError::UnknownSymbol(agent.symbol().to_string()));
        }

        let mut agents = self.shared.agents.lock().await;
        if agents.contains_key(agent.symbol()) {
            return Err(BotError::DuplicateSymbol(agent.symbol().to_string()));
        }

        if self.is_running() {
            agent.set_running(true);
        }

        info!(symbol = %agent.symbol(), agent = %agent.name(), strategy = agent.strategy_name(), "Agent added");
        agents.insert(agent.symbol().to_string(), agent);
        Ok(())
    }

    pub async fn remove_agent(&self, symbol: &str) -> Result<Agent> {
        let mut agents = self.shared.agents.lock().await;
        let agent = agents
            .remove(symbol)
            .ok_or_else(|| BotError::UnknownSymbol(symbol.to_string()))?;
        info!(symbol = %symbol, "Agent removed");
        Ok(agent)
    }

    pub async fn set_agent_running(&self, symbol: &str, running: bool) -> Result<()> {
        let mut agents = self.shared.agents.lock().await;
        let agent = agents
            .get_mut(symbol)
            .ok_or_else(|| BotError::UnknownSymbol(symbol.to_string()))?;
        agent.set_running(running);
        Ok(())
    }

    pub async fn agent_count(&self) -> usize {
        self.shared.agents.lock().await.len()
    }

    pub async fn symbols(&self) -> Vec<String> {
        self.shared.agents.lock().await.keys().cloned().collect()
    }

    /// Split `total_funds` equally across running agents. Returns the
    /// per-agent budget, or `None` when no agent is running.
    pub async fn allocate_equally(&self, total_funds: Decimal) -> Option<Decimal> {
        let mut agents = self.shared.agents.lock().await;
        let running: Vec<&mut Agent> = agents.values_mut().filter(|a| a.is_running()).collect();
        if running.is_empty() {
            return None;
        }

        let per_agent = (total_funds / Decimal::from(running.len())).round_dp(8);
        info!(per_agent = %per_agent.round_dp(2), agents = running.len(), "Allocating funds equally");
        for agent in running {
            agent.set_investment_amount(per_agent);
        }
        Some(per_agent)
    }

    /// Step every running agent once. Failures are isolated per agent.
    pub async fn run_cycle(&self) -> CycleReport {
        self.shared.run_cycle().await
    }

    /// Status of every agent, ordered by symbol.
    pub async fn statuses(&self) -> Vec<AgentStatus> {
        let agents = self.shared.agents.lock().await;
        let gateway = self.shared.gateway.as_ref();
        join_all(agents.values().map(|agent| agent.status(gateway))).await
    }

    /// Mark all agents running and spawn the cycle task. No-op when already started.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            debug!("Orchestrator already running");
            return;
        }

        for agent in self.shared.agents.lock().await.values_mut() {
            agent.set_running(true);
        }
        self.running.store(true, Ordering::SeqCst);

        let (shutdown, receiver) = watch::channel(false);
        let handle = tokio::spawn(run_loop(self.shared.clone(), self.config.clone(), receiver));
        *worker = Some(Worker { shutdown, handle });

        let count = self.agent_count().await;
        info!(
            agents = count,
            interval_secs = self.config.cycle_interval.as_secs_f64(),
            "Orchestrator started"
        );
    }

    /// Signal the cycle task and wait for it. When this returns no further
    /// step runs.
    pub async fn stop(&self) {
        // Held until the task has exited so a concurrent `start` cannot
        // spawn a second loop in between.
        let mut slot = self.worker.lock().await;
        self.running.store(false, Ordering::SeqCst);

        let Some(worker) = slot.take() else {
            return;
        };

        let _ = worker.shutdown.send(true);
        if let Err(e) = worker.handle.await {
            error!(error = %e, "Orchestrator task ended abnormally");
        }

        for agent in self.shared.agents.lock().await.values_mut() {
            agent.set_running(false);
        }
        drop(slot);

        info!("Orchestrator stopped");
    }

    pub fn cycle_interval(&self) -> Duration {
        self.config.cycle_interval
    }
}
