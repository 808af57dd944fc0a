//! RTGS immediate settlement through the public orchestrator API.

use clearsim_core::{
    AgentConfig, CostRates, Event, FeatureFlags, LsmConfig, Orchestrator, OrchestratorConfig,
    PolicySpec,
};

fn agent(id: &str, balance: i64, unsecured_cap: i64) -> AgentConfig {
    AgentConfig {
        id: id.to_string(),
        opening_balance: balance,
        unsecured_cap,
        policy: PolicySpec::Fifo,
        arrival_config: None,
        posted_collateral: None,
        collateral_haircut: None,
        max_collateral_capacity: None,
        limits: None,
    }
}

fn config(agents: Vec<AgentConfig>) -> OrchestratorConfig {
    OrchestratorConfig {
        ticks_per_day: 20,
        num_days: 1,
        rng_seed: 1,
        agent_configs: agents,
        lsm_config: LsmConfig {
            enable_bilateral: false,
            enable_cycles: false,
            ..Default::default()
        },
        cost_rates: CostRates::default(),
        scenario_schedule: None,
        scenario_constraints: None,
        flags: FeatureFlags::default(),
    }
}

#[test]
fn test_gross_settlement_debits_and_credits() {
    let mut orch = Orchestrator::new(config(vec![
        agent("BANK_A", 1_000_000, 0),
        agent("BANK_B", 0, 0),
    ]))
    .unwrap();

    orch.submit_transaction("BANK_A", "BANK_B", 600_000, 10, 5, false)
        .unwrap();
    let result = orch.tick().unwrap();

    assert_eq!(result.num_settlements, 1);
    assert_eq!(orch.get_agent_balance("BANK_A").unwrap(), 400_000);
    assert_eq!(orch.get_agent_balance("BANK_B").unwrap(), 600_000);

    let settlements: Vec<_> = orch
        .get_all_events()
        .iter()
        .filter_map(|r| match &r.event {
            Event::RtgsImmediateSettlement {
                amount,
                sender_balance_before,
                sender_balance_after,
                ..
            } => Some((*amount, *sender_balance_before, *sender_balance_after)),
            _ => None,
        })
        .collect();
    assert_eq!(settlements, vec![(600_000, 1_000_000, 400_000)]);
}

#[test]
fn test_unsecured_cap_extends_liquidity() {
    let mut orch = Orchestrator::new(config(vec![
        agent("BANK_A", 300_000, 500_000),
        agent("BANK_B", 0, 0),
    ]))
    .unwrap();

    orch.submit_transaction("BANK_A", "BANK_B", 600_000, 10, 5, false)
        .unwrap();
    orch.tick().unwrap();

    assert_eq!(orch.get_agent_balance("BANK_A").unwrap(), -300_000);
    assert_eq!(orch.get_agent_balance("BANK_B").unwrap(), 600_000);
}

#[test]
fn test_collateral_backing_extends_liquidity() {
    let mut cfg = config(vec![agent("BANK_A", 10_000, 20_000), agent("BANK_B", 0, 0)]);
    cfg.agent_configs[0].posted_collateral = Some(100_000);
    // 2% haircut: backing = 98_000; available = 10_000 + 20_000 + 98_000.
    let mut orch = Orchestrator::new(cfg).unwrap();

    orch.submit_transaction("BANK_A", "BANK_B", 120_000, 10, 5, false)
        .unwrap();
    orch.tick().unwrap();

    assert_eq!(orch.get_agent_balance("BANK_A").unwrap(), -110_000);
    assert_eq!(orch.get_agent_balance("BANK_B").unwrap(), 120_000);
}

#[test]
fn test_underfunded_obligation_waits_in_queue() {
    let mut orch = Orchestrator::new(config(vec![
        agent("BANK_A", 100_000, 0),
        agent("BANK_B", 0, 0),
    ]))
    .unwrap();

    let tx_id = orch
        .submit_transaction("BANK_A", "BANK_B", 500_000, 15, 5, false)
        .unwrap();
    orch.tick().unwrap();

    assert_eq!(orch.get_rtgs_queue_contents(), vec![tx_id.clone()]);
    assert_eq!(
        orch.get_transaction_details(&tx_id).unwrap().status,
        "pending"
    );
}

#[test]
fn test_queued_obligation_settles_when_liquidity_arrives() {
    let mut orch = Orchestrator::new(config(vec![
        agent("BANK_A", 0, 0),
        agent("BANK_B", 1_000_000, 0),
    ]))
    .unwrap();

    // A's payment waits; B's payment funds A. With deferred crediting the
    // credit lands at end of tick 0, so A settles in tick 1.
    let blocked = orch
        .submit_transaction("BANK_A", "BANK_B", 300_000, 15, 5, false)
        .unwrap();
    orch.submit_transaction("BANK_B", "BANK_A", 400_000, 15, 5, false)
        .unwrap();

    let r0 = orch.tick().unwrap();
    assert_eq!(r0.num_settlements, 1, "only B's payment settles in tick 0");
    assert!(orch.get_rtgs_queue_contents().contains(&blocked));

    let r1 = orch.tick().unwrap();
    assert_eq!(r1.num_settlements, 1, "A settles from the applied credit");
    assert!(orch.get_rtgs_queue_contents().is_empty());
    assert_eq!(orch.get_agent_balance("BANK_A").unwrap(), 100_000);
    assert_eq!(orch.get_agent_balance("BANK_B").unwrap(), 900_000);
}

#[test]
fn test_declared_priority_orders_queue() {
    let mut orch = Orchestrator::new(config(vec![
        agent("BANK_A", 100_000, 0),
        agent("BANK_B", 0, 0),
    ]))
    .unwrap();

    // Both fit individually but not together: the higher declared
    // priority wins the scan.
    let low = orch
        .submit_transaction("BANK_A", "BANK_B", 90_000, 15, 2, false)
        .unwrap();
    let high = orch
        .submit_transaction("BANK_A", "BANK_B", 80_000, 15, 9, false)
        .unwrap();

    orch.tick().unwrap();

    assert!(orch
        .get_transaction_details(&high)
        .unwrap()
        .status
        .starts_with("settled"));
    assert_eq!(
        orch.get_transaction_details(&low).unwrap().status,
        "pending"
    );
    assert_eq!(orch.get_rtgs_queue_contents(), vec![low]);
}
