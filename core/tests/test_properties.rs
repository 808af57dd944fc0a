//! Property-based checks over randomized configurations: determinism and
//! value conservation must hold for every seed and liquidity profile.

use clearsim_core::{
    AgentConfig, AmountDistribution, ArrivalConfig, CostRates, FeatureFlags, LsmConfig,
    Orchestrator, OrchestratorConfig, PolicySpec, PriorityDistribution,
};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn build_config(seed: u64, balances: [i64; 3], rate: f64, deferred: bool) -> OrchestratorConfig {
    let agent = |id: &str, balance: i64| AgentConfig {
        id: id.to_string(),
        opening_balance: balance,
        unsecured_cap: 100_000,
        policy: PolicySpec::Deadline {
            urgency_threshold: 4,
        },
        arrival_config: Some(ArrivalConfig {
            rate_per_tick: rate,
            amount_distribution: AmountDistribution::Uniform {
                min: 1_000,
                max: 150_000,
            },
            counterparty_weights: BTreeMap::new(),
            deadline_range: (2, 10),
            priority_distribution: PriorityDistribution::Uniform { min: 0, max: 10 },
            divisible: false,
        }),
        posted_collateral: None,
        collateral_haircut: None,
        max_collateral_capacity: None,
        limits: None,
    };
    OrchestratorConfig {
        ticks_per_day: 10,
        num_days: 2,
        rng_seed: seed,
        agent_configs: vec![
            agent("BANK_A", balances[0]),
            agent("BANK_B", balances[1]),
            agent("BANK_C", balances[2]),
        ],
        lsm_config: LsmConfig::default(),
        cost_rates: CostRates::default(),
        scenario_schedule: None,
        scenario_constraints: None,
        flags: FeatureFlags {
            deferred_crediting: deferred,
            deadline_cap_at_eod: false,
        },
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_determinism(
        seed in any::<u64>(),
        balances in prop::array::uniform3(0i64..5_000_000),
        rate in 0.0f64..3.0,
    ) {
        let run = |_| {
            let mut orch =
                Orchestrator::new(build_config(seed, balances, rate, true)).unwrap();
            for _ in 0..20 {
                orch.tick().unwrap();
            }
            orch.get_all_events()
                .iter()
                .map(|r| serde_json::to_string(r).unwrap())
                .collect::<Vec<_>>()
        };
        prop_assert_eq!(run(0), run(1));
    }

    #[test]
    fn prop_value_conservation(
        seed in any::<u64>(),
        balances in prop::array::uniform3(0i64..5_000_000),
        rate in 0.0f64..3.0,
        deferred in any::<bool>(),
    ) {
        let opening: i64 = balances.iter().sum();
        let mut orch =
            Orchestrator::new(build_config(seed, balances, rate, deferred)).unwrap();
        for _ in 0..20 {
            orch.tick().unwrap();
            prop_assert_eq!(orch.state().total_balance(), opening);
        }
    }

    #[test]
    fn prop_lsm_iterations_bounded(
        seed in any::<u64>(),
        balances in prop::array::uniform3(0i64..1_000_000),
    ) {
        // LSM activity never hangs the tick: every tick() call returns,
        // and settled obligations never exceed arrivals.
        let mut orch =
            Orchestrator::new(build_config(seed, balances, 2.0, true)).unwrap();
        for _ in 0..20 {
            orch.tick().unwrap();
        }
        let metrics = orch.get_system_metrics();
        prop_assert!(metrics.total_settlements <= metrics.total_arrivals);
    }

    #[test]
    fn prop_costs_monotone(
        seed in any::<u64>(),
        balances in prop::array::uniform3(0i64..2_000_000),
    ) {
        let mut orch =
            Orchestrator::new(build_config(seed, balances, 1.5, true)).unwrap();
        let mut previous: BTreeMap<String, i64> = BTreeMap::new();
        for _ in 0..20 {
            orch.tick().unwrap();
            for id in ["BANK_A", "BANK_B", "BANK_C"] {
                let total = orch.get_costs(id).unwrap().total();
                let before = previous.insert(id.to_string(), total).unwrap_or(0);
                prop_assert!(total >= before);
            }
        }
    }
}
