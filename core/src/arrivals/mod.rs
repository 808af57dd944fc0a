//! Transaction generation: stochastic arrivals and scenario schedules.
//!
//! Two mutually exclusive modes feed phase 1 of each tick:
//! - **Stochastic**: per-agent Poisson counts with configured amount,
//!   counterparty, deadline and priority distributions.
//! - **Scenario**: a pre-built schedule of obligations injected verbatim.
//!
//! All randomness flows through named [`crate::rng::RngManager`] streams
//! (`arrival_count`, `amount`, `counterparty`, `deadline`, `priority` per
//! agent), so arrival generation for one agent never perturbs another's
//! draws.

use crate::models::Transaction;
use crate::rng::RngManager;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Amount distribution for generated obligations (cents).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AmountDistribution {
    /// Uniform in `[min, max]` inclusive
    Uniform { min: i64, max: i64 },

    /// Normal with mean and standard deviation in cents, clamped ≥ 1
    Normal { mean: i64, std_dev: i64 },

    /// Log-normal over the exponent (heavy-tailed amounts)
    LogNormal { mean: f64, std_dev: f64 },

    /// Exponential with the given rate, clamped ≥ 1
    Exponential { rate: f64 },
}

/// Priority assignment for generated obligations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PriorityDistribution {
    /// Every obligation gets the same priority
    Fixed { value: u8 },

    /// Uniform integer in `[min, max]` inclusive, capped at 10
    Uniform { min: u8, max: u8 },
}

impl Default for PriorityDistribution {
    fn default() -> Self {
        PriorityDistribution::Fixed { value: 5 }
    }
}

/// Stochastic arrival configuration for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrivalConfig {
    /// Poisson λ: expected arrivals per tick
    pub rate_per_tick: f64,

    pub amount_distribution: AmountDistribution,

    /// Counterparty weights (agent id → weight); empty = uniform over all
    /// other agents
    #[serde(default)]
    pub counterparty_weights: BTreeMap<String, f64>,

    /// Deadline offset from the arrival tick, uniform in `[min, max]`
    pub deadline_range: (usize, usize),

    #[serde(default)]
    pub priority_distribution: PriorityDistribution,

    /// Whether generated obligations may be split by policy
    #[serde(default)]
    pub divisible: bool,
}

/// One pre-scheduled obligation for scenario mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledArrival {
    pub tick: usize,
    pub sender: String,
    pub receiver: String,
    pub amount: i64,
    /// Absolute deadline tick
    pub deadline_tick: usize,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub divisible: bool,
}

fn default_priority() -> u8 {
    5
}

/// Allocates deterministic obligation ids from a monotone counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxIdSource {
    next: u64,
}

impl TxIdSource {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    pub fn next_id(&mut self) -> String {
        let id = format!("tx_{:08}", self.next);
        self.next += 1;
        id
    }

    /// Child ids extend the parent id, keeping lineage visible and the
    /// lexicographic tie-break stable.
    pub fn child_id(parent_id: &str, index: usize) -> String {
        format!("{}.s{}", parent_id, index)
    }
}

impl Default for TxIdSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Deadline capping shared by every arrival path.
///
/// Deadlines are capped at the episode end, optionally at the current
/// day's last tick, and always pushed to at least `arrival + 1` so the
/// obligation invariant (deadline > arrival) holds even at the horizon.
pub fn cap_deadline(
    arrival_tick: usize,
    raw_deadline: usize,
    episode_end_tick: usize,
    ticks_per_day: usize,
    deadline_cap_at_eod: bool,
) -> usize {
    let capped = raw_deadline.min(episode_end_tick);
    let capped = if deadline_cap_at_eod {
        let day = arrival_tick / ticks_per_day;
        let day_last_tick = (day + 1) * ticks_per_day - 1;
        capped.min(day_last_tick)
    } else {
        capped
    };
    capped.max(arrival_tick + 1)
}

/// Stochastic arrival generator across all configured agents.
#[derive(Debug)]
pub struct ArrivalGenerator {
    configs: BTreeMap<String, ArrivalConfig>,
    /// All agent ids, sorted, for counterparty selection
    all_agent_ids: Vec<String>,
    episode_end_tick: usize,
    ticks_per_day: usize,
    deadline_cap_at_eod: bool,
}

impl ArrivalGenerator {
    pub fn new(
        configs: BTreeMap<String, ArrivalConfig>,
        mut all_agent_ids: Vec<String>,
        episode_end_tick: usize,
        ticks_per_day: usize,
        deadline_cap_at_eod: bool,
    ) -> Self {
        all_agent_ids.sort();
        Self {
            configs,
            all_agent_ids,
            episode_end_tick,
            ticks_per_day,
            deadline_cap_at_eod,
        }
    }

    pub fn has_config(&self, agent_id: &str) -> bool {
        self.configs.contains_key(agent_id)
    }

    /// Generate this tick's arrivals for one agent.
    pub fn generate_for_agent(
        &self,
        agent_id: &str,
        tick: usize,
        rng: &mut RngManager,
        ids: &mut TxIdSource,
    ) -> Vec<Transaction> {
        let config = match self.configs.get(agent_id) {
            Some(c) => c.clone(),
            None => return Vec::new(),
        };

        let count = rng.stream("arrival_count", agent_id).poisson(config.rate_per_tick);
        let mut out = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let amount = self.sample_amount(&config.amount_distribution, agent_id, rng);
            let receiver = self.select_counterparty(agent_id, &config.counterparty_weights, rng);
            let deadline = self.sample_deadline(agent_id, tick, config.deadline_range, rng);
            let priority = self.sample_priority(agent_id, &config.priority_distribution, rng);

            let mut tx = Transaction::new(
                ids.next_id(),
                agent_id.to_string(),
                receiver,
                amount,
                tick,
                deadline,
            )
            .with_priority(priority);
            if config.divisible {
                tx = tx.divisible();
            }
            out.push(tx);
        }

        out
    }

    fn sample_amount(
        &self,
        distribution: &AmountDistribution,
        agent_id: &str,
        rng: &mut RngManager,
    ) -> i64 {
        let stream = rng.stream("amount", agent_id);
        match distribution {
            AmountDistribution::Uniform { min, max } => stream.range(*min, *max + 1),
            AmountDistribution::Normal { mean, std_dev } => {
                let z = stream.standard_normal();
                (*mean + ((*std_dev as f64) * z) as i64).max(1)
            }
            AmountDistribution::LogNormal { mean, std_dev } => {
                let z = stream.standard_normal();
                ((mean + std_dev * z).exp() as i64).max(1)
            }
            AmountDistribution::Exponential { rate } => {
                let u = stream.next_f64().max(f64::MIN_POSITIVE);
                ((-u.ln() / rate) as i64).max(1)
            }
        }
    }

    fn select_counterparty(
        &self,
        sender_id: &str,
        weights: &BTreeMap<String, f64>,
        rng: &mut RngManager,
    ) -> String {
        let candidates: Vec<&String> = self
            .all_agent_ids
            .iter()
            .filter(|id| id.as_str() != sender_id)
            .collect();
        assert!(
            !candidates.is_empty(),
            "cannot generate arrivals with a single agent"
        );

        let stream = rng.stream("counterparty", sender_id);
        if weights.is_empty() {
            let idx = stream.range(0, candidates.len() as i64) as usize;
            return candidates[idx].clone();
        }

        let total: f64 = candidates
            .iter()
            .map(|id| weights.get(id.as_str()).copied().unwrap_or(1.0))
            .sum();
        let mut target = stream.next_f64() * total;
        for id in &candidates {
            target -= weights.get(id.as_str()).copied().unwrap_or(1.0);
            if target <= 0.0 {
                return (*id).clone();
            }
        }
        candidates
            .last()
            .map(|id| (*id).clone())
            .expect("candidates checked non-empty")
    }

    fn sample_deadline(
        &self,
        agent_id: &str,
        arrival_tick: usize,
        range: (usize, usize),
        rng: &mut RngManager,
    ) -> usize {
        let (min_offset, max_offset) = range;
        let offset = rng
            .stream("deadline", agent_id)
            .range(min_offset as i64, max_offset as i64 + 1) as usize;
        cap_deadline(
            arrival_tick,
            arrival_tick + offset,
            self.episode_end_tick,
            self.ticks_per_day,
            self.deadline_cap_at_eod,
        )
    }

    fn sample_priority(
        &self,
        agent_id: &str,
        distribution: &PriorityDistribution,
        rng: &mut RngManager,
    ) -> u8 {
        match distribution {
            PriorityDistribution::Fixed { value } => (*value).min(10),
            PriorityDistribution::Uniform { min, max } => {
                let stream = rng.stream("priority", agent_id);
                (stream.range(*min as i64, *max as i64 + 1) as u8).min(10)
            }
        }
    }
}

/// A scenario-mode schedule with a persistent cursor.
///
/// Entries are sorted by (tick, insertion order) at construction; the
/// cursor position survives checkpointing so a resumed run injects
/// exactly the entries the original would have.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSchedule {
    entries: Vec<ScheduledArrival>,
    cursor: usize,
}

impl ScenarioSchedule {
    pub fn new(mut entries: Vec<ScheduledArrival>) -> Self {
        entries.sort_by_key(|e| e.tick);
        Self { entries, cursor: 0 }
    }

    pub(crate) fn restore(entries: Vec<ScheduledArrival>, cursor: usize) -> Self {
        Self { entries, cursor }
    }

    pub fn entries(&self) -> &[ScheduledArrival] {
        &self.entries
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Pop every entry scheduled at or before `tick`.
    pub fn take_due(&mut self, tick: usize) -> Vec<ScheduledArrival> {
        let start = self.cursor;
        while self.cursor < self.entries.len() && self.entries[self.cursor].tick <= tick {
            self.cursor += 1;
        }
        self.entries[start..self.cursor].to_vec()
    }
}
