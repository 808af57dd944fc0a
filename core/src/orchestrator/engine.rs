//! The simulation kernel: one orchestrator owns the whole world and
//! advances it one tick at a time.
//!
//! # Tick phases
//!
//! A tick runs these phases in fixed order and nothing else:
//!
//! ```text
//! 1. Arrivals                  (generator / scenario / buffered submissions)
//! 2. Policy on arrivals        (bank tree, collateral tree, then payment tree)
//! 3. Policy on Queue 1         (carried-over obligations; Q2 withdraw sub-phase)
//! 4. RTGS immediate settlement (priority-ordered gross settlement)
//! 5. LSM                       (bilateral offsets, multilateral cycles)
//! 6. Cost accrual              (overdue marking, delay/overdraft/collateral)
//! 7. Deferred credits          (buffered credits land on receiver balances)
//! 8. End of day                (EOD penalties, daily resets, marker event)
//! ```
//!
//! The phase order is a contract: the event log's within-tick ordering is
//! exactly this sequence, and replay consumers depend on it.

use crate::arrivals::{cap_deadline, ArrivalGenerator, ScenarioSchedule, TxIdSource};
use crate::clock::SimClock;
use crate::costs::{self, CostAccumulator, CostBreakdown};
use crate::models::event::{Event, EventLog, EventRecord};
use crate::models::state::SimulationState;
use crate::models::transaction::{Transaction, TxStatus};
use crate::models::Agent;
use crate::orchestrator::config::{
    AgentConfig, OrchestratorConfig, PolicySpec, SimulationError,
};
use crate::policy::tree::eval::{
    bank_decision, collateral_decision, evaluate_tree, payment_decision,
};
use crate::policy::tree::{policy_schema_json, EvalContext};
use crate::policy::{
    validate_policy, BankDecision, CollateralDecision, PaymentDecision, PolicyBundle,
    ScenarioConstraints, ValidationResult,
};
use crate::settlement::{lsm, rtgs, DeferredLedger};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{info, warn};

/// Wall-clock timings for one tick (microseconds). Diagnostics only;
/// excluded from determinism and replay comparison.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickTiming {
    pub arrivals_micros: u64,
    pub policy_micros: u64,
    pub rtgs_micros: u64,
    pub lsm_micros: u64,
    pub costs_micros: u64,
    pub total_micros: u64,
}

/// Result of one `tick()` call.
#[derive(Debug, Clone, Default)]
pub struct TickResult {
    pub tick: usize,
    pub num_arrivals: usize,
    pub num_settlements: usize,
    pub num_lsm_releases: usize,
    /// Cost accrued across all agents this tick (cents)
    pub total_cost: i64,
    pub timing: TickTiming,
}

/// System-wide counters for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMetrics {
    pub total_arrivals: usize,
    pub total_settlements: usize,
    pub total_lsm_releases: usize,
    /// Fully settled obligations / arrivals, 0.0 when nothing arrived
    pub settlement_rate: f64,
}

/// Self-contained obligation view for external queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub amount: i64,
    pub remaining_amount: i64,
    pub arrival_tick: usize,
    pub deadline_tick: usize,
    pub priority: u8,
    pub declared_priority: u8,
    pub is_divisible: bool,
    pub status: String,
    pub overdue_since: Option<usize>,
    pub parent_id: Option<String>,
}

impl TransactionRecord {
    fn from_tx(tx: &Transaction) -> Self {
        let status = match tx.status() {
            TxStatus::Pending => "pending".to_string(),
            TxStatus::Settled { tick } => format!("settled@{}", tick),
            TxStatus::Cancelled { tick } => format!("cancelled@{}", tick),
            TxStatus::Replaced { .. } => "replaced".to_string(),
        };
        Self {
            id: tx.id().to_string(),
            sender_id: tx.sender_id().to_string(),
            receiver_id: tx.receiver_id().to_string(),
            amount: tx.amount(),
            remaining_amount: tx.remaining_amount(),
            arrival_tick: tx.arrival_tick(),
            deadline_tick: tx.deadline_tick(),
            priority: tx.priority(),
            declared_priority: tx.declared_priority(),
            is_divisible: tx.is_divisible(),
            status,
            overdue_since: tx.overdue_since(),
            parent_id: tx.parent_id().map(|p| p.to_string()),
        }
    }
}

/// The simulation kernel. Owns all state; nothing outside `tick()` may
/// mutate it. Multiple orchestrators coexist without interference.
#[derive(Debug)]
pub struct Orchestrator {
    pub(crate) config: OrchestratorConfig,
    pub(crate) state: SimulationState,
    pub(crate) clock: SimClock,
    pub(crate) rng: crate::rng::RngManager,
    pub(crate) policies: BTreeMap<String, PolicyBundle>,
    pub(crate) arrival_generator: Option<ArrivalGenerator>,
    pub(crate) scenario: Option<ScenarioSchedule>,
    pub(crate) tx_ids: TxIdSource,
    pub(crate) accumulated_costs: BTreeMap<String, CostAccumulator>,
    pub(crate) event_log: EventLog,
    /// Externally submitted obligations awaiting their arrival-phase
    /// policy evaluation
    pub(crate) pending_arrivals: Vec<(String, String)>,
    pub(crate) total_arrivals: usize,
    pub(crate) total_lsm_releases: usize,
    /// Sum of opening balances; conserved across every tick
    pub(crate) opening_total_balance: i64,
}

impl Orchestrator {
    /// Build a kernel from configuration.
    ///
    /// Validates the configuration and every agent's policy before any
    /// state exists; both failure kinds are fatal.
    pub fn new(config: OrchestratorConfig) -> Result<Self, SimulationError> {
        config.validate()?;

        let constraints = config
            .scenario_constraints
            .clone()
            .unwrap_or_default();

        let mut policies = BTreeMap::new();
        for agent_config in &config.agent_configs {
            let bundle = agent_config.policy.resolve()?;
            let result = validate_policy(&bundle, &constraints);
            if !result.is_valid() {
                return Err(SimulationError::PolicyInvalid {
                    agent_id: agent_config.id.clone(),
                    violations: result.violations,
                });
            }
            policies.insert(agent_config.id.clone(), bundle);
        }

        let agents: Vec<Agent> = config.agent_configs.iter().map(build_agent).collect();
        let opening_total_balance = agents.iter().map(|a| a.balance()).sum();
        let state = SimulationState::new(agents);

        let clock = SimClock::new(config.ticks_per_day, config.num_days);
        let horizon = clock.horizon();

        let arrival_configs: BTreeMap<String, crate::arrivals::ArrivalConfig> = config
            .agent_configs
            .iter()
            .filter_map(|a| a.arrival_config.clone().map(|c| (a.id.clone(), c)))
            .collect();
        let arrival_generator = if arrival_configs.is_empty() {
            None
        } else {
            Some(ArrivalGenerator::new(
                arrival_configs,
                config.agent_configs.iter().map(|a| a.id.clone()).collect(),
                horizon,
                config.ticks_per_day,
                config.flags.deadline_cap_at_eod,
            ))
        };

        let scenario = config
            .scenario_schedule
            .clone()
            .map(ScenarioSchedule::new);

        let accumulated_costs = config
            .agent_configs
            .iter()
            .map(|a| (a.id.clone(), CostAccumulator::new()))
            .collect();

        info!(
            agents = config.agent_configs.len(),
            ticks_per_day = config.ticks_per_day,
            num_days = config.num_days,
            seed = config.rng_seed,
            "orchestrator constructed"
        );

        Ok(Self {
            rng: crate::rng::RngManager::new(config.rng_seed),
            clock,
            state,
            policies,
            arrival_generator,
            scenario,
            tx_ids: TxIdSource::new(),
            accumulated_costs,
            event_log: EventLog::new(),
            pending_arrivals: Vec::new(),
            total_arrivals: 0,
            total_lsm_releases: 0,
            opening_total_balance,
            config,
        })
    }

    // ==================================================================
    // Tick loop
    // ==================================================================

    /// Advance the simulation by one tick.
    ///
    /// Ticking past the horizon is a no-op returning a zero result.
    pub fn tick(&mut self) -> Result<TickResult, SimulationError> {
        if self.clock.is_finished() {
            return Ok(TickResult {
                tick: self.clock.current_tick(),
                ..Default::default()
            });
        }

        let tick_start = Instant::now();
        let mut timing = TickTiming::default();
        let tick = self.clock.current_tick();

        let mut deferred = if self.config.flags.deferred_crediting {
            Some(DeferredLedger::new())
        } else {
            None
        };

        // PHASE 1: ARRIVALS
        let arrivals_start = Instant::now();
        let mut arrived: Vec<(String, String)> = std::mem::take(&mut self.pending_arrivals);
        self.inject_scenario_arrivals(tick, &mut arrived);
        self.generate_stochastic_arrivals(tick, &mut arrived);
        let num_arrivals = arrived.len();
        timing.arrivals_micros = arrivals_start.elapsed().as_micros() as u64;

        // PHASES 2-3: POLICY EVALUATION
        let policy_start = Instant::now();
        self.evaluate_bank_trees(tick);
        self.evaluate_collateral_trees(tick);

        let mut decided: BTreeSet<String> = BTreeSet::new();
        for (agent_id, tx_id) in &arrived {
            self.evaluate_payment_tree(agent_id, tx_id, tick);
            decided.insert(tx_id.clone());
        }
        self.evaluate_internal_queues(tick, &mut decided);
        self.evaluate_rtgs_withdrawals(tick);
        timing.policy_micros = policy_start.elapsed().as_micros() as u64;

        // PHASE 4: RTGS IMMEDIATE SETTLEMENT
        let rtgs_start = Instant::now();
        let rtgs_result = rtgs::process_queue(&mut self.state, tick, deferred.as_mut());
        for settled in &rtgs_result.settlements {
            self.event_log.log(Event::RtgsImmediateSettlement {
                tick,
                tx_id: settled.tx_id.clone(),
                sender_id: settled.sender_id.clone(),
                receiver_id: settled.receiver_id.clone(),
                amount: settled.amount,
                sender_balance_before: settled.sender_balance_before,
                sender_balance_after: settled.sender_balance_after,
            });
        }
        let mut num_settlements = rtgs_result.settlements.len();
        timing.rtgs_micros = rtgs_start.elapsed().as_micros() as u64;

        // PHASE 5: LSM
        let lsm_start = Instant::now();
        let mut num_lsm_releases = 0;
        if self.config.lsm_config.enable_bilateral || self.config.lsm_config.enable_cycles {
            let mut deferred_ref = deferred.as_mut();
            let lsm_result = lsm::run_lsm_pass(
                &mut self.state,
                &self.config.lsm_config,
                tick,
                &mut deferred_ref,
            );
            for event in lsm_result.events {
                self.event_log.log(event);
            }
            num_lsm_releases = lsm_result.bilateral_offsets + lsm_result.cycles_settled;
            num_settlements += num_lsm_releases;
            self.total_lsm_releases += num_lsm_releases;
        }
        timing.lsm_micros = lsm_start.elapsed().as_micros() as u64;

        // PHASE 6: COST ACCRUAL
        let costs_start = Instant::now();
        let mut total_cost = self.accrue_costs(tick);
        timing.costs_micros = costs_start.elapsed().as_micros() as u64;

        // PHASE 7: DEFERRED CREDIT APPLICATION
        if let Some(ledger) = deferred.as_mut() {
            for event in ledger.apply_all(&mut self.state, tick) {
                self.event_log.log(event);
            }
        }

        // Value conservation: settlements are double-entry, so the system
        // balance must return to its opening total once credits land.
        if self.state.total_balance() != self.opening_total_balance {
            tracing::error!(
                tick,
                expected = self.opening_total_balance,
                actual = self.state.total_balance(),
                "balance conservation violated"
            );
            return Err(SimulationError::InvariantViolated(format!(
                "balance conservation violated at tick {}: expected {}, got {}",
                tick,
                self.opening_total_balance,
                self.state.total_balance()
            )));
        }

        // PHASE 8: END OF DAY
        if self.clock.is_end_of_day() {
            total_cost += self.handle_end_of_day(tick);
        }

        self.clock.advance();
        timing.total_micros = tick_start.elapsed().as_micros() as u64;

        Ok(TickResult {
            tick,
            num_arrivals,
            num_settlements,
            num_lsm_releases,
            total_cost,
            timing,
        })
    }

    // ------------------------------------------------------------------
    // Phase 1 helpers
    // ------------------------------------------------------------------

    fn inject_scenario_arrivals(&mut self, tick: usize, arrived: &mut Vec<(String, String)>) {
        let due = match self.scenario.as_mut() {
            Some(schedule) => schedule.take_due(tick),
            None => return,
        };
        for entry in due {
            // Scenario replay keeps going past bad entries.
            if !self.state.agents().contains_key(&entry.sender)
                || !self.state.agents().contains_key(&entry.receiver)
            {
                warn!(tick, sender = %entry.sender, receiver = %entry.receiver,
                    "scenario entry references unknown agent, skipped");
                continue;
            }
            if entry.amount <= 0 || entry.deadline_tick <= tick {
                warn!(tick, amount = entry.amount, deadline = entry.deadline_tick,
                    "scenario entry invalid, skipped");
                continue;
            }
            let deadline = cap_deadline(
                tick,
                entry.deadline_tick,
                self.clock.horizon(),
                self.config.ticks_per_day,
                self.config.flags.deadline_cap_at_eod,
            );
            let mut tx = Transaction::new(
                self.tx_ids.next_id(),
                entry.sender.clone(),
                entry.receiver.clone(),
                entry.amount,
                tick,
                deadline,
            )
            .with_priority(entry.priority);
            if entry.divisible {
                tx = tx.divisible();
            }
            self.admit_arrival(tx, tick, arrived);
        }
    }

    fn generate_stochastic_arrivals(&mut self, tick: usize, arrived: &mut Vec<(String, String)>) {
        let generator = match self.arrival_generator.take() {
            Some(g) => g,
            None => return,
        };
        let mut new_txs = Vec::new();
        for agent_id in self.state.agent_ids() {
            if generator.has_config(&agent_id) {
                new_txs.extend(generator.generate_for_agent(
                    &agent_id,
                    tick,
                    &mut self.rng,
                    &mut self.tx_ids,
                ));
            }
        }
        self.arrival_generator = Some(generator);
        for tx in new_txs {
            self.admit_arrival(tx, tick, arrived);
        }
    }

    /// Store a new obligation, queue it in the sender's Q1, and record
    /// the arrival.
    fn admit_arrival(&mut self, tx: Transaction, tick: usize, arrived: &mut Vec<(String, String)>) {
        let tx_id = tx.id().to_string();
        let sender_id = tx.sender_id().to_string();
        self.event_log.log(Event::Arrival {
            tick,
            tx_id: tx_id.clone(),
            sender_id: sender_id.clone(),
            receiver_id: tx.receiver_id().to_string(),
            amount: tx.amount(),
            deadline_tick: tx.deadline_tick(),
            priority: tx.priority(),
            is_divisible: tx.is_divisible(),
        });
        self.state.add_transaction(tx);
        if let Some(agent) = self.state.get_agent_mut(&sender_id) {
            agent.queue_outgoing(tx_id.clone());
        }
        arrived.push((sender_id, tx_id));
        self.total_arrivals += 1;
    }

    // ------------------------------------------------------------------
    // Phases 2-3: policy evaluation
    // ------------------------------------------------------------------

    fn evaluate_bank_trees(&mut self, tick: usize) {
        for agent_id in self.state.agent_ids() {
            let decision = {
                let bundle = &self.policies[&agent_id];
                let tree = match &bundle.bank_tree {
                    Some(tree) => tree,
                    None => continue,
                };
                let agent = self.state.get_agent(&agent_id).expect("agent exists");
                let ctx = EvalContext::for_agent(agent, &self.state, &self.clock);
                evaluate_tree(tree, &ctx, &bundle.parameters).and_then(|e| bank_decision(&e))
            };
            match decision {
                Ok(decision) => {
                    self.event_log.log(Event::PolicyDecision {
                        tick,
                        agent_id: agent_id.clone(),
                        tx_id: None,
                        decision: decision.name().to_string(),
                    });
                    match decision {
                        BankDecision::NoAction => {}
                        BankDecision::PostCollateral { amount } => {
                            self.apply_collateral_post(&agent_id, amount, tick);
                        }
                        BankDecision::ReleaseCollateral { amount } => {
                            self.apply_collateral_release(&agent_id, amount, tick);
                        }
                    }
                }
                Err(e) => warn!(tick, %agent_id, error = %e, "bank tree evaluation failed"),
            }
        }
    }

    fn evaluate_collateral_trees(&mut self, tick: usize) {
        for agent_id in self.state.agent_ids() {
            let decision = {
                let bundle = &self.policies[&agent_id];
                let tree = match &bundle.collateral_tree {
                    Some(tree) => tree,
                    None => continue,
                };
                let agent = self.state.get_agent(&agent_id).expect("agent exists");
                let ctx = EvalContext::for_agent(agent, &self.state, &self.clock);
                evaluate_tree(tree, &ctx, &bundle.parameters).and_then(|e| collateral_decision(&e))
            };
            match decision {
                Ok(decision) => {
                    self.event_log.log(Event::PolicyDecision {
                        tick,
                        agent_id: agent_id.clone(),
                        tx_id: None,
                        decision: decision.name().to_string(),
                    });
                    if let CollateralDecision::PostCollateral { amount } = decision {
                        self.apply_collateral_post(&agent_id, amount, tick);
                    }
                }
                Err(e) => warn!(tick, %agent_id, error = %e, "collateral tree evaluation failed"),
            }
        }
    }

    fn apply_collateral_post(&mut self, agent_id: &str, amount: i64, tick: usize) {
        if amount <= 0 {
            return;
        }
        let (posted, new_total) = {
            let agent = self.state.get_agent_mut(agent_id).expect("agent exists");
            let posted = agent.post_collateral(amount);
            (posted, agent.posted_collateral())
        };
        if posted > 0 {
            self.event_log.log(Event::CollateralPosted {
                tick,
                agent_id: agent_id.to_string(),
                amount: posted,
                new_total,
            });
        }
    }

    fn apply_collateral_release(&mut self, agent_id: &str, amount: i64, tick: usize) {
        if amount <= 0 {
            return;
        }
        let (released, new_total) = {
            let agent = self.state.get_agent_mut(agent_id).expect("agent exists");
            let released = agent.release_collateral(amount);
            (released, agent.posted_collateral())
        };
        if released > 0 {
            self.event_log.log(Event::CollateralReleased {
                tick,
                agent_id: agent_id.to_string(),
                amount: released,
                new_total,
            });
        }
    }

    /// Phase 3: re-evaluate every carried-over Q1 obligation, ordered by
    /// (priority desc, deadline asc, tx id). Obligations already decided
    /// this tick (phase 2 arrivals) are skipped.
    fn evaluate_internal_queues(&mut self, tick: usize, decided: &mut BTreeSet<String>) {
        for agent_id in self.state.agents_with_queued_transactions() {
            let mut queue: Vec<(u8, usize, String)> = self
                .state
                .get_agent(&agent_id)
                .expect("agent exists")
                .outgoing_queue()
                .iter()
                .filter_map(|id| self.state.get_transaction(id))
                .map(|tx| (tx.priority(), tx.deadline_tick(), tx.id().to_string()))
                .collect();
            queue.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

            for (_, _, tx_id) in queue {
                if decided.contains(&tx_id) {
                    continue;
                }
                self.evaluate_payment_tree(&agent_id, &tx_id, tick);
                decided.insert(tx_id);
            }
        }
    }

    /// Q2 withdraw sub-phase: evaluate the payment tree over each agent's
    /// queued-in-RTGS obligations; only withdraw-family actions apply
    /// there, anything else is a no-op.
    fn evaluate_rtgs_withdrawals(&mut self, tick: usize) {
        for agent_id in self.state.agent_ids() {
            if self.policies[&agent_id].payment_tree.is_none() {
                continue;
            }
            let mut queued: Vec<String> = self
                .state
                .rtgs_queue()
                .iter()
                .filter_map(|id| self.state.get_transaction(id))
                .filter(|tx| tx.sender_id() == agent_id)
                .map(|tx| tx.id().to_string())
                .collect();
            queued.sort();

            for tx_id in queued {
                let decision = match self.run_payment_tree(&agent_id, &tx_id) {
                    Some(Ok(decision)) => decision,
                    Some(Err(e)) => {
                        warn!(tick, %agent_id, %tx_id, error = %e, "payment tree evaluation failed");
                        continue;
                    }
                    None => continue,
                };
                match decision {
                    PaymentDecision::WithdrawFromRtgs { tx_id } => {
                        self.event_log.log(Event::PolicyDecision {
                            tick,
                            agent_id: agent_id.clone(),
                            tx_id: Some(tx_id.clone()),
                            decision: "WithdrawFromRtgs".to_string(),
                        });
                        self.withdraw_from_rtgs(&agent_id, &tx_id);
                    }
                    PaymentDecision::ResubmitToRtgs {
                        tx_id,
                        new_priority,
                    } => {
                        self.event_log.log(Event::PolicyDecision {
                            tick,
                            agent_id: agent_id.clone(),
                            tx_id: Some(tx_id.clone()),
                            decision: "ResubmitToRtgs".to_string(),
                        });
                        if self.withdraw_from_rtgs(&agent_id, &tx_id) {
                            self.release_to_rtgs(&agent_id, &tx_id, Some(new_priority), tick);
                        }
                    }
                    // Release/Hold/Split make no sense for an obligation
                    // already in the central queue.
                    _ => {}
                }
            }
        }
    }

    /// Run the payment tree for one obligation; `None` when the agent has
    /// no payment tree (treated as FIFO release by the caller).
    fn run_payment_tree(
        &self,
        agent_id: &str,
        tx_id: &str,
    ) -> Option<Result<PaymentDecision, crate::policy::PolicyError>> {
        let bundle = &self.policies[agent_id];
        let tree = bundle.payment_tree.as_ref()?;
        let tx = self.state.get_transaction(tx_id)?;
        let agent = self.state.get_agent(agent_id)?;
        let ctx = EvalContext::for_transaction(tx, agent, &self.state, &self.clock);
        Some(
            evaluate_tree(tree, &ctx, &bundle.parameters)
                .and_then(|e| payment_decision(&e, tx_id)),
        )
    }

    /// Evaluate and apply the payment tree for one Q1 obligation.
    fn evaluate_payment_tree(&mut self, agent_id: &str, tx_id: &str, tick: usize) {
        let decision = match self.run_payment_tree(agent_id, tx_id) {
            Some(Ok(decision)) => decision,
            Some(Err(e)) => {
                warn!(tick, %agent_id, %tx_id, error = %e, "payment tree evaluation failed");
                return;
            }
            // No payment tree: release immediately (FIFO baseline).
            None => PaymentDecision::Release {
                tx_id: tx_id.to_string(),
                declared_priority: None,
            },
        };

        self.event_log.log(Event::PolicyDecision {
            tick,
            agent_id: agent_id.to_string(),
            tx_id: Some(tx_id.to_string()),
            decision: decision.name().to_string(),
        });

        match decision {
            PaymentDecision::Release {
                tx_id,
                declared_priority,
            } => {
                self.release_to_rtgs(agent_id, &tx_id, declared_priority, tick);
            }
            PaymentDecision::Hold { .. } => {}
            PaymentDecision::Split { tx_id, parts } => {
                self.split_transaction(agent_id, &tx_id, parts, tick);
            }
            PaymentDecision::WithdrawFromRtgs { tx_id } => {
                // Q1 obligations are not in the central queue; nothing to
                // withdraw. Keep holding.
                warn!(tick, %agent_id, %tx_id, "WithdrawFromRtgs on an internal-queue obligation ignored");
            }
            PaymentDecision::ResubmitToRtgs {
                tx_id,
                new_priority,
            } => {
                // From Q1 this is a release with an explicit declared
                // priority.
                self.release_to_rtgs(agent_id, &tx_id, Some(new_priority), tick);
            }
        }
    }

    /// Move an obligation from the agent's Q1 into the central queue.
    fn release_to_rtgs(
        &mut self,
        agent_id: &str,
        tx_id: &str,
        declared_priority: Option<u8>,
        tick: usize,
    ) {
        if let Some(agent) = self.state.get_agent_mut(agent_id) {
            agent.remove_from_queue(tx_id);
        }
        let (receiver_id, amount, declared) = {
            let tx = match self.state.get_transaction_mut(tx_id) {
                Some(tx) => tx,
                None => return,
            };
            tx.mark_submitted(declared_priority, tick);
            (
                tx.receiver_id().to_string(),
                tx.remaining_amount(),
                tx.declared_priority(),
            )
        };
        self.state.queue_in_rtgs(tx_id.to_string());
        self.event_log.log(Event::QueuedInRtgs {
            tick,
            tx_id: tx_id.to_string(),
            sender_id: agent_id.to_string(),
            receiver_id,
            amount,
            declared_priority: declared,
        });
    }

    /// Pull an obligation out of the central queue back into Q1.
    fn withdraw_from_rtgs(&mut self, agent_id: &str, tx_id: &str) -> bool {
        if !self.state.remove_from_rtgs_queue(tx_id) {
            return false;
        }
        if let Some(tx) = self.state.get_transaction_mut(tx_id) {
            tx.clear_submission();
        }
        if let Some(agent) = self.state.get_agent_mut(agent_id) {
            agent.queue_outgoing(tx_id.to_string());
        }
        true
    }

    /// Replace a divisible obligation with `parts` children, release the
    /// children to the central queue, and charge the split friction.
    fn split_transaction(&mut self, agent_id: &str, tx_id: &str, parts: usize, tick: usize) {
        let parent = match self.state.get_transaction(tx_id) {
            Some(tx) => tx.clone(),
            None => return,
        };
        if !parent.is_divisible() {
            warn!(tick, %agent_id, %tx_id, "split requested on indivisible obligation, holding");
            return;
        }
        if parts < 2 {
            return;
        }

        if let Some(agent) = self.state.get_agent_mut(agent_id) {
            agent.remove_from_queue(tx_id);
        }

        // Equal shares by floor division, remainder to the last child.
        let total = parent.remaining_amount();
        let base = total / parts as i64;
        let remainder = total % parts as i64;

        let mut child_ids = Vec::with_capacity(parts);
        let mut child_amounts = Vec::with_capacity(parts);
        for i in 0..parts {
            let amount = if i == parts - 1 { base + remainder } else { base };
            let child_id = TxIdSource::child_id(tx_id, i);
            let child = Transaction::new_child(child_id.clone(), &parent, amount, tick);

            self.event_log.log(Event::Arrival {
                tick,
                tx_id: child_id.clone(),
                sender_id: child.sender_id().to_string(),
                receiver_id: child.receiver_id().to_string(),
                amount,
                deadline_tick: child.deadline_tick(),
                priority: child.priority(),
                is_divisible: false,
            });
            self.state.add_transaction(child);
            self.total_arrivals += 1;
            child_ids.push(child_id);
            child_amounts.push(amount);
        }

        if let Some(tx) = self.state.get_transaction_mut(tx_id) {
            tx.mark_replaced(child_ids.clone());
        }

        // One-off friction per split event.
        let friction = self.config.cost_rates.split_friction_cost;
        if friction > 0 {
            if let Some(acc) = self.accumulated_costs.get_mut(agent_id) {
                acc.split_friction_cost += friction;
            }
            self.event_log.log(Event::CostAccrual {
                tick,
                agent_id: agent_id.to_string(),
                costs: CostBreakdown {
                    split_friction_cost: friction,
                    ..Default::default()
                },
            });
        }

        self.event_log.log(Event::Split {
            tick,
            agent_id: agent_id.to_string(),
            parent_id: tx_id.to_string(),
            child_ids: child_ids.clone(),
            child_amounts,
            friction_cost: friction,
        });

        // Children go straight to the central queue under the parent's
        // declared priority.
        let declared = parent.declared_priority();
        for child_id in child_ids {
            let receiver_id = {
                let tx = self
                    .state
                    .get_transaction_mut(&child_id)
                    .expect("child just added");
                tx.mark_submitted(Some(declared), tick);
                tx.receiver_id().to_string()
            };
            let amount = self
                .state
                .get_transaction(&child_id)
                .expect("child just added")
                .remaining_amount();
            self.state.queue_in_rtgs(child_id.clone());
            self.event_log.log(Event::QueuedInRtgs {
                tick,
                tx_id: child_id,
                sender_id: agent_id.to_string(),
                receiver_id,
                amount,
                declared_priority: declared,
            });
        }
    }

    // ------------------------------------------------------------------
    // Phase 6: cost accrual
    // ------------------------------------------------------------------

    fn accrue_costs(&mut self, tick: usize) -> i64 {
        let mut total_cost = 0;

        for agent_id in self.state.agent_ids() {
            // Newly overdue obligations across both queues.
            let newly_overdue: Vec<String> = {
                let agent = self.state.get_agent(&agent_id).expect("agent exists");
                let q1 = agent.outgoing_queue().iter();
                let q2 = self
                    .state
                    .rtgs_queue()
                    .iter()
                    .filter(|id| {
                        self.state
                            .get_transaction(id)
                            .map(|tx| tx.sender_id() == agent_id)
                            .unwrap_or(false)
                    });
                let mut ids: Vec<String> = q1
                    .chain(q2)
                    .filter(|id| {
                        self.state
                            .get_transaction(id)
                            .map(|tx| tx.is_past_deadline(tick) && !tx.is_overdue())
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                ids.sort();
                ids.dedup();
                ids
            };

            for tx_id in &newly_overdue {
                let (sender_id, receiver_id, amount, remaining, deadline) = {
                    let tx = self
                        .state
                        .get_transaction_mut(tx_id)
                        .expect("queued transaction exists");
                    tx.mark_overdue(tick);
                    (
                        tx.sender_id().to_string(),
                        tx.receiver_id().to_string(),
                        tx.amount(),
                        tx.remaining_amount(),
                        tx.deadline_tick(),
                    )
                };
                self.event_log.log(Event::TransactionWentOverdue {
                    tick,
                    tx_id: tx_id.clone(),
                    sender_id,
                    receiver_id,
                    amount,
                    remaining_amount: remaining,
                    deadline_tick: deadline,
                    deadline_penalty: self.config.cost_rates.deadline_penalty,
                });
            }
            let deadline_penalty =
                newly_overdue.len() as i64 * self.config.cost_rates.deadline_penalty;

            let (balance, posted_collateral) = {
                let agent = self.state.get_agent(&agent_id).expect("agent exists");
                (agent.balance(), agent.posted_collateral())
            };

            let delay_cost = self.agent_delay_cost(&agent_id);
            let breakdown = CostBreakdown {
                delay_cost,
                overdraft_cost: costs::overdraft_cost(balance, &self.config.cost_rates),
                collateral_cost: costs::collateral_cost(
                    posted_collateral,
                    &self.config.cost_rates,
                ),
                deadline_penalty,
                ..Default::default()
            };

            if let Some(acc) = self.accumulated_costs.get_mut(&agent_id) {
                acc.add(&breakdown);
                acc.update_peak_debit(balance);
            }
            total_cost += breakdown.total();

            if breakdown.total() > 0 {
                self.event_log.log(Event::CostAccrual {
                    tick,
                    agent_id,
                    costs: breakdown,
                });
            }
        }

        total_cost
    }

    /// One tick of delay cost over everything the agent still owes, in
    /// both queues.
    fn agent_delay_cost(&self, agent_id: &str) -> i64 {
        let agent = match self.state.get_agent(agent_id) {
            Some(a) => a,
            None => return 0,
        };
        let q1 = agent
            .outgoing_queue()
            .iter()
            .filter_map(|id| self.state.get_transaction(id));
        let q2 = self
            .state
            .rtgs_queue()
            .iter()
            .filter_map(|id| self.state.get_transaction(id))
            .filter(|tx| tx.sender_id() == agent_id);

        q1.chain(q2)
            .map(|tx| {
                costs::delay_cost(
                    tx.remaining_amount(),
                    tx.priority(),
                    tx.is_overdue(),
                    &self.config.cost_rates,
                )
            })
            .sum()
    }

    // ------------------------------------------------------------------
    // Phase 8: end of day
    // ------------------------------------------------------------------

    fn handle_end_of_day(&mut self, tick: usize) -> i64 {
        let day = self.clock.current_day();
        let mut total_penalties = 0;

        for agent_id in self.state.agent_ids() {
            let queued = {
                let agent = self.state.get_agent(&agent_id).expect("agent exists");
                agent.outgoing_queue_size() + self.state.agent_rtgs_queue_count(&agent_id)
            };
            if queued == 0 {
                continue;
            }
            let penalty = queued as i64 * self.config.cost_rates.eod_penalty_per_transaction;
            total_penalties += penalty;
            if let Some(acc) = self.accumulated_costs.get_mut(&agent_id) {
                acc.eod_penalty += penalty;
            }
            if penalty > 0 {
                self.event_log.log(Event::CostAccrual {
                    tick,
                    agent_id,
                    costs: CostBreakdown {
                        eod_penalty: penalty,
                        ..Default::default()
                    },
                });
            }
        }

        for agent_id in self.state.agent_ids() {
            self.state
                .get_agent_mut(&agent_id)
                .expect("agent exists")
                .reset_daily_outflows();
        }

        let unsettled_count =
            self.state.rtgs_queue_size() + self.state.total_internal_queue_size();
        self.event_log.log(Event::EndOfDay {
            tick,
            day,
            unsettled_count,
            total_penalties,
        });

        total_penalties
    }

    // ==================================================================
    // External operations
    // ==================================================================

    /// Submit an obligation from outside the generator (scenario drivers,
    /// API callers). It enters the sender's internal queue and receives
    /// its policy evaluation in the next tick's arrival phase.
    pub fn submit_transaction(
        &mut self,
        sender: &str,
        receiver: &str,
        amount: i64,
        deadline_tick: usize,
        priority: u8,
        divisible: bool,
    ) -> Result<String, SimulationError> {
        if !self.state.agents().contains_key(sender) {
            return Err(SimulationError::TransactionInvalid(format!(
                "unknown sender {}",
                sender
            )));
        }
        if !self.state.agents().contains_key(receiver) {
            return Err(SimulationError::TransactionInvalid(format!(
                "unknown receiver {}",
                receiver
            )));
        }
        if sender == receiver {
            return Err(SimulationError::TransactionInvalid(
                "sender and receiver must differ".to_string(),
            ));
        }
        if amount <= 0 {
            return Err(SimulationError::TransactionInvalid(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        let tick = self.clock.current_tick();
        if deadline_tick <= tick {
            return Err(SimulationError::TransactionInvalid(format!(
                "deadline {} must be after current tick {}",
                deadline_tick, tick
            )));
        }

        let deadline = cap_deadline(
            tick,
            deadline_tick,
            self.clock.horizon(),
            self.config.ticks_per_day,
            self.config.flags.deadline_cap_at_eod,
        );
        let mut tx = Transaction::new(
            self.tx_ids.next_id(),
            sender.to_string(),
            receiver.to_string(),
            amount,
            tick,
            deadline,
        )
        .with_priority(priority);
        if divisible {
            tx = tx.divisible();
        }

        let tx_id = tx.id().to_string();
        // Enters Q1 now; policy sees it in the upcoming tick's phase 2.
        let mut arrived = Vec::new();
        self.admit_arrival(tx, tick, &mut arrived);
        self.pending_arrivals.extend(arrived);
        Ok(tx_id)
    }

    /// Cancel a pending obligation, removing it from whichever queue
    /// holds it.
    pub fn cancel_transaction(&mut self, tx_id: &str) -> Result<(), SimulationError> {
        let tick = self.clock.current_tick();
        let sender_id = {
            let tx = self.state.get_transaction(tx_id).ok_or_else(|| {
                SimulationError::OperationInvalid(format!("unknown transaction {}", tx_id))
            })?;
            if !tx.is_pending() {
                return Err(SimulationError::OperationInvalid(format!(
                    "transaction {} is not cancellable",
                    tx_id
                )));
            }
            tx.sender_id().to_string()
        };

        if let Some(agent) = self.state.get_agent_mut(&sender_id) {
            agent.remove_from_queue(tx_id);
        }
        self.state.remove_from_rtgs_queue(tx_id);
        self.pending_arrivals.retain(|(_, id)| id != tx_id);
        self.state
            .get_transaction_mut(tx_id)
            .expect("existence checked above")
            .cancel(tick);

        self.event_log.log(Event::TransactionCancelled {
            tick,
            tx_id: tx_id.to_string(),
            sender_id,
            reason: "cancelled by caller".to_string(),
        });
        Ok(())
    }

    // ==================================================================
    // Read-only queries
    // ==================================================================

    pub fn current_tick(&self) -> usize {
        self.clock.current_tick()
    }

    pub fn current_day(&self) -> usize {
        self.clock.current_day()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn get_tick_events(&self, tick: usize) -> &[EventRecord] {
        self.event_log.records_for_tick(tick)
    }

    pub fn get_all_events(&self) -> &[EventRecord] {
        self.event_log.records()
    }

    pub fn get_agent_balance(&self, agent_id: &str) -> Result<i64, SimulationError> {
        self.state
            .get_agent(agent_id)
            .map(|a| a.balance())
            .ok_or_else(|| {
                SimulationError::OperationInvalid(format!("unknown agent {}", agent_id))
            })
    }

    pub fn get_agent_unsecured_cap(&self, agent_id: &str) -> Result<i64, SimulationError> {
        self.state
            .get_agent(agent_id)
            .map(|a| a.unsecured_cap())
            .ok_or_else(|| {
                SimulationError::OperationInvalid(format!("unknown agent {}", agent_id))
            })
    }

    pub fn get_queue1_size(&self, agent_id: &str) -> Result<usize, SimulationError> {
        self.state
            .get_agent(agent_id)
            .map(|a| a.outgoing_queue_size())
            .ok_or_else(|| {
                SimulationError::OperationInvalid(format!("unknown agent {}", agent_id))
            })
    }

    pub fn get_rtgs_queue_contents(&self) -> Vec<String> {
        self.state.rtgs_queue().to_vec()
    }

    pub fn get_transaction_details(
        &self,
        tx_id: &str,
    ) -> Result<TransactionRecord, SimulationError> {
        self.state
            .get_transaction(tx_id)
            .map(TransactionRecord::from_tx)
            .ok_or_else(|| {
                SimulationError::OperationInvalid(format!("unknown transaction {}", tx_id))
            })
    }

    /// All overdue, still-unsettled obligations, sorted by id.
    pub fn get_overdue_transactions(&self) -> Vec<TransactionRecord> {
        self.state
            .transactions()
            .values()
            .filter(|tx| tx.is_pending() && tx.is_overdue())
            .map(TransactionRecord::from_tx)
            .collect()
    }

    /// Queued obligations whose deadline falls within `within_ticks` of
    /// the current tick.
    pub fn get_transactions_near_deadline(&self, within_ticks: usize) -> Vec<TransactionRecord> {
        let tick = self.clock.current_tick();
        self.state
            .all_queued_tx_ids()
            .iter()
            .filter_map(|id| self.state.get_transaction(id))
            .filter(|tx| {
                tx.is_pending() && tx.deadline_tick().saturating_sub(tick) <= within_ticks
            })
            .map(TransactionRecord::from_tx)
            .collect()
    }

    pub fn get_system_metrics(&self) -> SystemMetrics {
        let total_settlements = self
            .state
            .transactions()
            .values()
            .filter(|tx| tx.is_fully_settled())
            .count();
        let settlement_rate = if self.total_arrivals > 0 {
            total_settlements as f64 / self.total_arrivals as f64
        } else {
            0.0
        };
        SystemMetrics {
            total_arrivals: self.total_arrivals,
            total_settlements,
            total_lsm_releases: self.total_lsm_releases,
            settlement_rate,
        }
    }

    pub fn get_costs(&self, agent_id: &str) -> Option<&CostAccumulator> {
        self.accumulated_costs.get(agent_id)
    }

    pub fn all_costs(&self) -> &BTreeMap<String, CostAccumulator> {
        &self.accumulated_costs
    }

    /// Machine-readable description of the policy DSL.
    pub fn get_policy_schema() -> Vec<u8> {
        policy_schema_json().into_bytes()
    }

    /// Static policy validation against scenario constraints; pure.
    pub fn validate_policy(
        policy: &PolicyBundle,
        constraints: &ScenarioConstraints,
    ) -> ValidationResult {
        validate_policy(policy, constraints)
    }
}

fn build_agent(config: &AgentConfig) -> Agent {
    let mut agent = Agent::new(config.id.clone(), config.opening_balance, config.unsecured_cap);
    if let Some(posted) = config.posted_collateral {
        agent.set_posted_collateral(posted);
    }
    if let Some(haircut) = config.collateral_haircut {
        agent.set_collateral_haircut(haircut);
    }
    agent.set_max_collateral_capacity(config.max_collateral_capacity);
    if let Some(limits) = &config.limits {
        agent.set_bilateral_limits(limits.bilateral_limits.clone());
        agent.set_multilateral_limit(limits.multilateral_limit);
    }
    agent
}

// Checkpoint save/load lives in `checkpoint.rs`; it reaches the private
// fields through pub(crate) access.
