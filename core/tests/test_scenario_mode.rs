//! Scenario-mode generation: pre-built schedules injected verbatim, bad
//! entries skipped, and EOD deadline capping.

use clearsim_core::{
    AgentConfig, CostRates, Event, FeatureFlags, LsmConfig, Orchestrator, OrchestratorConfig,
    PolicySpec, ScheduledArrival,
};

fn agent(id: &str, balance: i64) -> AgentConfig {
    AgentConfig {
        id: id.to_string(),
        opening_balance: balance,
        unsecured_cap: 0,
        policy: PolicySpec::Fifo,
        arrival_config: None,
        posted_collateral: None,
        collateral_haircut: None,
        max_collateral_capacity: None,
        limits: None,
    }
}

fn entry(tick: usize, sender: &str, receiver: &str, amount: i64, deadline: usize) -> ScheduledArrival {
    ScheduledArrival {
        tick,
        sender: sender.to_string(),
        receiver: receiver.to_string(),
        amount,
        deadline_tick: deadline,
        priority: 5,
        divisible: false,
    }
}

fn config(schedule: Vec<ScheduledArrival>, cap_at_eod: bool) -> OrchestratorConfig {
    OrchestratorConfig {
        ticks_per_day: 10,
        num_days: 2,
        rng_seed: 1,
        agent_configs: vec![agent("BANK_A", 1_000_000), agent("BANK_B", 1_000_000)],
        lsm_config: LsmConfig::default(),
        cost_rates: CostRates::default(),
        scenario_schedule: Some(schedule),
        scenario_constraints: None,
        flags: FeatureFlags {
            deferred_crediting: true,
            deadline_cap_at_eod: cap_at_eod,
        },
    }
}

#[test]
fn test_schedule_injected_at_configured_ticks() {
    let mut orch = Orchestrator::new(config(
        vec![
            entry(0, "BANK_A", "BANK_B", 100_000, 8),
            entry(3, "BANK_B", "BANK_A", 50_000, 9),
            entry(3, "BANK_A", "BANK_B", 25_000, 9),
        ],
        false,
    ))
    .unwrap();

    let r0 = orch.tick().unwrap();
    assert_eq!(r0.num_arrivals, 1);
    let r1 = orch.tick().unwrap();
    assert_eq!(r1.num_arrivals, 0);
    orch.tick().unwrap();
    let r3 = orch.tick().unwrap();
    assert_eq!(r3.num_arrivals, 2);

    assert_eq!(orch.get_system_metrics().total_arrivals, 3);
}

#[test]
fn test_bad_entries_skipped_run_continues() {
    let mut orch = Orchestrator::new(config(
        vec![
            entry(0, "BANK_X", "BANK_B", 100_000, 8), // unknown sender
            entry(0, "BANK_A", "BANK_B", -5, 8),      // bad amount
            entry(0, "BANK_A", "BANK_B", 100_000, 0), // deadline not in future
            entry(1, "BANK_A", "BANK_B", 100_000, 8), // fine
        ],
        false,
    ))
    .unwrap();

    let r0 = orch.tick().unwrap();
    assert_eq!(r0.num_arrivals, 0);
    let r1 = orch.tick().unwrap();
    assert_eq!(r1.num_arrivals, 1);
    assert_eq!(r1.num_settlements, 1);
}

#[test]
fn test_deadline_capped_at_eod_when_enabled() {
    let mut orch = Orchestrator::new(config(
        vec![entry(2, "BANK_A", "BANK_B", 100_000, 18)],
        true,
    ))
    .unwrap();

    for _ in 0..3 {
        orch.tick().unwrap();
    }

    let deadline = orch
        .get_all_events()
        .iter()
        .find_map(|r| match &r.event {
            Event::Arrival { deadline_tick, .. } => Some(*deadline_tick),
            _ => None,
        })
        .unwrap();
    // Day 0 of a 10-tick day ends at tick 9.
    assert_eq!(deadline, 9);
}

#[test]
fn test_deadline_not_capped_by_default() {
    let mut orch = Orchestrator::new(config(
        vec![entry(2, "BANK_A", "BANK_B", 100_000, 18)],
        false,
    ))
    .unwrap();

    for _ in 0..3 {
        orch.tick().unwrap();
    }

    let deadline = orch
        .get_all_events()
        .iter()
        .find_map(|r| match &r.event {
            Event::Arrival { deadline_tick, .. } => Some(*deadline_tick),
            _ => None,
        })
        .unwrap();
    assert_eq!(deadline, 18);
}
