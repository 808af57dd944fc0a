//! Cost model: rates, per-tick breakdowns, and accrual arithmetic.
//!
//! All accrual is integer arithmetic over i64 cents. Rates expressed in
//! basis points are applied as `cents × bps / 10_000` with u128
//! intermediates and floor division; fractional rates are scaled to
//! integers before the multiply so no float ever touches a balance.

use serde::{Deserialize, Serialize};

/// Priority band for delay-cost differentiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityBand {
    /// Priority 8-10: time-critical payments
    Urgent,
    /// Priority 4-7: standard payments
    Normal,
    /// Priority 0-3: discretionary payments
    Low,
}

/// Map a 0-10 priority to its band.
pub fn priority_band(priority: u8) -> PriorityBand {
    match priority {
        8..=10 => PriorityBand::Urgent,
        4..=7 => PriorityBand::Normal,
        _ => PriorityBand::Low,
    }
}

/// Per-band delay cost multipliers.
///
/// Lets a scenario make urgent payments hurt more per tick of delay than
/// low-priority ones. All bands default to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityDelayMultipliers {
    pub urgent_multiplier: f64,
    pub normal_multiplier: f64,
    pub low_multiplier: f64,
}

impl Default for PriorityDelayMultipliers {
    fn default() -> Self {
        Self {
            urgent_multiplier: 1.0,
            normal_multiplier: 1.0,
            low_multiplier: 1.0,
        }
    }
}

impl PriorityDelayMultipliers {
    pub fn for_priority(&self, priority: u8) -> f64 {
        match priority_band(priority) {
            PriorityBand::Urgent => self.urgent_multiplier,
            PriorityBand::Normal => self.normal_multiplier,
            PriorityBand::Low => self.low_multiplier,
        }
    }
}

/// Cost rate configuration. All fixed penalties in cents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRates {
    /// Overdraft cost in basis points per tick on the negative balance
    pub overdraft_bps_per_tick: f64,

    /// Delay cost per tick as a fraction of each queued cent
    /// (0.0001 = 1 bp per tick)
    pub delay_cost_per_tick_per_cent: f64,

    /// Collateral opportunity cost in basis points per tick on posted
    /// collateral
    pub collateral_cost_per_tick_bps: f64,

    /// One-off penalty at the first tick past an obligation's deadline
    pub deadline_penalty: i64,

    /// Flat friction charged once per split event, regardless of fan-out
    pub split_friction_cost: i64,

    /// Penalty per obligation still queued at end of day
    pub eod_penalty_per_transaction: i64,

    /// Delay multiplier once an obligation is overdue
    pub overdue_delay_multiplier: f64,

    /// Optional per-band delay multipliers
    #[serde(default)]
    pub priority_delay_multipliers: Option<PriorityDelayMultipliers>,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            overdraft_bps_per_tick: 0.001,        // 1 milli-bp/tick
            delay_cost_per_tick_per_cent: 0.0001, // 0.1 bp/tick
            collateral_cost_per_tick_bps: 0.0002,
            deadline_penalty: 50_000,            // $500
            split_friction_cost: 1_000,          // $10 per split
            eod_penalty_per_transaction: 10_000, // $100
            overdue_delay_multiplier: 5.0,
            priority_delay_multipliers: None,
        }
    }
}

impl CostRates {
    /// Reject negative or non-finite rates at construction time.
    pub fn validate(&self) -> Result<(), String> {
        let named = [
            ("overdraft_bps_per_tick", self.overdraft_bps_per_tick),
            (
                "delay_cost_per_tick_per_cent",
                self.delay_cost_per_tick_per_cent,
            ),
            (
                "collateral_cost_per_tick_bps",
                self.collateral_cost_per_tick_bps,
            ),
            ("overdue_delay_multiplier", self.overdue_delay_multiplier),
        ];
        for (name, rate) in named {
            if !rate.is_finite() || rate < 0.0 {
                return Err(format!("cost rate {} must be finite and non-negative", name));
            }
        }
        let cents = [
            ("deadline_penalty", self.deadline_penalty),
            ("split_friction_cost", self.split_friction_cost),
            (
                "eod_penalty_per_transaction",
                self.eod_penalty_per_transaction,
            ),
        ];
        for (name, value) in cents {
            if value < 0 {
                return Err(format!("cost rate {} must be non-negative", name));
            }
        }
        Ok(())
    }
}

/// Costs accrued in one tick for one agent, by category (cents).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub delay_cost: i64,
    pub overdraft_cost: i64,
    pub collateral_cost: i64,
    pub deadline_penalty: i64,
    pub split_friction_cost: i64,
    pub eod_penalty: i64,
}

impl CostBreakdown {
    pub fn total(&self) -> i64 {
        self.delay_cost
            + self.overdraft_cost
            + self.collateral_cost
            + self.deadline_penalty
            + self.split_friction_cost
            + self.eod_penalty
    }
}

/// Run-lifetime cost accumulators for one agent. Every category is
/// monotonically non-decreasing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostAccumulator {
    pub delay_cost: i64,
    pub overdraft_cost: i64,
    pub collateral_cost: i64,
    pub deadline_penalty: i64,
    pub split_friction_cost: i64,
    pub eod_penalty: i64,
    /// Most negative balance observed (diagnostic, not a cost)
    pub peak_net_debit: i64,
}

impl CostAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, costs: &CostBreakdown) {
        self.delay_cost += costs.delay_cost;
        self.overdraft_cost += costs.overdraft_cost;
        self.collateral_cost += costs.collateral_cost;
        self.deadline_penalty += costs.deadline_penalty;
        self.split_friction_cost += costs.split_friction_cost;
        self.eod_penalty += costs.eod_penalty;
    }

    pub fn update_peak_debit(&mut self, balance: i64) {
        if balance < 0 {
            self.peak_net_debit = self.peak_net_debit.min(balance);
        }
    }

    pub fn total(&self) -> i64 {
        self.delay_cost
            + self.overdraft_cost
            + self.collateral_cost
            + self.deadline_penalty
            + self.split_friction_cost
            + self.eod_penalty
    }
}

// ----------------------------------------------------------------------
// Accrual arithmetic
// ----------------------------------------------------------------------

/// Scale for fractional bps rates: 0.001 bp resolution.
const BPS_SCALE: u128 = 1_000;

/// Scale for per-cent fractional rates and multipliers.
const RATE_SCALE: u128 = 1_000_000;
const MULT_SCALE: u128 = 1_000;

/// Convert a non-negative finite f64 rate to a scaled integer; invalid
/// rates (guarded at config validation) degrade to zero rather than
/// poisoning an integer cast.
fn scale_rate(rate: f64, scale: u128) -> u128 {
    if rate.is_finite() && rate >= 0.0 {
        (rate * scale as f64).round() as u128
    } else {
        0
    }
}

/// Overdraft cost for a balance: `max(0, −balance) × bps / 10_000`,
/// floor division.
pub fn overdraft_cost(balance: i64, rates: &CostRates) -> i64 {
    if balance >= 0 {
        return 0;
    }
    let bps_scaled = scale_rate(rates.overdraft_bps_per_tick, BPS_SCALE);
    if bps_scaled == 0 {
        return 0;
    }
    let overdraft = (-balance) as u128;
    let result = overdraft * bps_scaled / (10_000 * BPS_SCALE);
    result.min(i64::MAX as u128) as i64
}

/// Collateral opportunity cost: `posted × bps / 10_000`, floor division.
pub fn collateral_cost(posted_collateral: i64, rates: &CostRates) -> i64 {
    if posted_collateral <= 0 {
        return 0;
    }
    let bps_scaled = scale_rate(rates.collateral_cost_per_tick_bps, BPS_SCALE);
    if bps_scaled == 0 {
        return 0;
    }
    let amount = posted_collateral as u128;
    let result = amount * bps_scaled / (10_000 * BPS_SCALE);
    result.min(i64::MAX as u128) as i64
}

/// One tick of delay cost for a single queued obligation.
///
/// `remaining × rate`, scaled by the overdue multiplier when overdue and
/// by the obligation's priority-band multiplier when configured. Floor
/// division throughout; u128 intermediates keep multi-day runs clear of
/// overflow.
pub fn delay_cost(remaining_amount: i64, priority: u8, is_overdue: bool, rates: &CostRates) -> i64 {
    let rate_scaled = scale_rate(rates.delay_cost_per_tick_per_cent, RATE_SCALE);
    if rate_scaled == 0 || remaining_amount <= 0 {
        return 0;
    }

    let overdue_mult = if is_overdue {
        let scaled = scale_rate(rates.overdue_delay_multiplier, MULT_SCALE);
        if scaled == 0 {
            MULT_SCALE
        } else {
            scaled
        }
    } else {
        MULT_SCALE
    };

    let priority_mult = rates
        .priority_delay_multipliers
        .as_ref()
        .map(|m| {
            let scaled = scale_rate(m.for_priority(priority), MULT_SCALE);
            if scaled == 0 && m.for_priority(priority) > 0.0 {
                MULT_SCALE
            } else {
                scaled
            }
        })
        .unwrap_or(MULT_SCALE);

    let amount = remaining_amount as u128;
    let numerator = amount * rate_scaled * overdue_mult * priority_mult;
    let divisor = RATE_SCALE * MULT_SCALE * MULT_SCALE;
    (numerator / divisor).min(i64::MAX as u128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overdraft_cost_floor() {
        let rates = CostRates {
            overdraft_bps_per_tick: 1.0, // 1 bp
            ..Default::default()
        };
        // 500_000 × 1 / 10_000 = 50
        assert_eq!(overdraft_cost(-500_000, &rates), 50);
        // 9_999 × 1 / 10_000 = 0 (floor)
        assert_eq!(overdraft_cost(-9_999, &rates), 0);
        assert_eq!(overdraft_cost(500_000, &rates), 0);
    }

    #[test]
    fn test_fractional_bps() {
        let rates = CostRates {
            overdraft_bps_per_tick: 0.8,
            ..Default::default()
        };
        // 11_767_926 × 0.8 / 10_000 = 941.43… → 941
        assert_eq!(overdraft_cost(-11_767_926, &rates), 941);
    }

    #[test]
    fn test_collateral_cost() {
        let rates = CostRates {
            collateral_cost_per_tick_bps: 2.0,
            ..Default::default()
        };
        // $1M = 100_000_000 cents × 2 / 10_000 = 20_000
        assert_eq!(collateral_cost(100_000_000, &rates), 20_000);
        assert_eq!(collateral_cost(0, &rates), 0);
    }

    #[test]
    fn test_delay_cost_base() {
        let rates = CostRates {
            delay_cost_per_tick_per_cent: 0.0001,
            ..Default::default()
        };
        // 1_000_000 × 0.0001 = 100
        assert_eq!(delay_cost(1_000_000, 5, false, &rates), 100);
    }

    #[test]
    fn test_delay_cost_overdue_multiplier() {
        let rates = CostRates {
            delay_cost_per_tick_per_cent: 0.0001,
            overdue_delay_multiplier: 5.0,
            ..Default::default()
        };
        assert_eq!(delay_cost(1_000_000, 5, true, &rates), 500);
    }

    #[test]
    fn test_delay_cost_priority_bands() {
        let rates = CostRates {
            delay_cost_per_tick_per_cent: 0.0001,
            priority_delay_multipliers: Some(PriorityDelayMultipliers {
                urgent_multiplier: 2.0,
                normal_multiplier: 1.0,
                low_multiplier: 0.5,
            }),
            ..Default::default()
        };
        assert_eq!(delay_cost(1_000_000, 9, false, &rates), 200);
        assert_eq!(delay_cost(1_000_000, 5, false, &rates), 100);
        assert_eq!(delay_cost(1_000_000, 1, false, &rates), 50);
    }

    #[test]
    fn test_large_amounts_do_not_overflow() {
        let rates = CostRates {
            delay_cost_per_tick_per_cent: 0.01,
            overdue_delay_multiplier: 10.0,
            ..Default::default()
        };
        // Near-i64-max queue value must not panic.
        let cost = delay_cost(i64::MAX / 2, 5, true, &rates);
        assert!(cost > 0);
    }

    #[test]
    fn test_breakdown_total() {
        let b = CostBreakdown {
            delay_cost: 1,
            overdraft_cost: 2,
            collateral_cost: 3,
            deadline_penalty: 4,
            split_friction_cost: 5,
            eod_penalty: 6,
        };
        assert_eq!(b.total(), 21);
    }

    #[test]
    fn test_accumulator_is_monotone() {
        let mut acc = CostAccumulator::new();
        acc.add(&CostBreakdown {
            delay_cost: 10,
            ..Default::default()
        });
        acc.add(&CostBreakdown {
            overdraft_cost: 7,
            ..Default::default()
        });
        assert_eq!(acc.delay_cost, 10);
        assert_eq!(acc.overdraft_cost, 7);
        assert_eq!(acc.total(), 17);
    }

    #[test]
    fn test_validate_rejects_negative_rates() {
        let rates = CostRates {
            deadline_penalty: -1,
            ..Default::default()
        };
        assert!(rates.validate().is_err());

        let rates = CostRates {
            overdraft_bps_per_tick: f64::NAN,
            ..Default::default()
        };
        assert!(rates.validate().is_err());
    }
}
