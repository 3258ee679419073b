//! Progressive averaging-down.
//!
//! Each trigger is relative to the most recent fill, not the original
//! entry, so a continued slide keeps adding in steps. Sizing grows
//! geometrically with each addition and is capped by available capital and
//! the configured addition limit.

use crate::config::StrategyConfig;
use crate::execution::Position;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AddDecision {
    /// Add to the position with this quote-currency notional
    Add { notional: f64 },
    NoAction,
}

/// Decide whether the latest price justifies averaging into `position`.
///
/// `available_quote` is the spendable quote balance before the configured
/// reserve is held back.
pub fn should_average(
    position: &Position,
    latest_price: f64,
    config: &StrategyConfig,
    available_quote: f64,
) -> AddDecision {
    if position.additions >= config.max_position_additions {
        return AddDecision::NoAction;
    }

    let trigger = position.last_fill_price * (1.0 - config.averaging_trigger_pct);
    if latest_price > trigger {
        return AddDecision::NoAction;
    }

    let spendable = available_quote * (1.0 - config.capital_reserve_pct);
    let notional = config.base_order_notional
        * config
            .averaging_size_growth
            .powi(position.additions as i32);
    let notional = notional.min(spendable);

    if notional < config.min_order_notional {
        tracing::debug!(
            "averaging trigger hit for {} but only {:.2} spendable; holding",
            position.symbol,
            spendable
        );
        return AddDecision::NoAction;
    }

    AddDecision::Add { notional }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{Position, PositionState};
    use chrono::Utc;
    use uuid::Uuid;

    fn position(last_fill_price: f64, additions: u32) -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: "BTC-USDT".to_string(),
            quantity: 0.01,
            cost_basis: last_fill_price * 1.001,
            entry_fees: 0.1,
            additions,
            last_fill_price,
            state: PositionState::Open,
            opened_at: Utc::now(),
            pending_sell: None,
            exit_price: None,
            closed_at: None,
            realized_pnl: None,
        }
    }

    fn config() -> StrategyConfig {
        StrategyConfig {
            averaging_trigger_pct: 0.005,
            averaging_size_growth: 1.5,
            max_position_additions: 3,
            base_order_notional: 100.0,
            min_order_notional: 10.0,
            capital_reserve_pct: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_trigger_is_exact_at_boundary() {
        let pos = position(100.0, 0);
        let config = config();

        // Exactly 0.5% below the last fill triggers
        let decision = should_average(&pos, 99.5, &config, 10_000.0);
        assert!(matches!(decision, AddDecision::Add { .. }));

        // One cent above the trigger does not
        let decision = should_average(&pos, 99.51, &config, 10_000.0);
        assert_eq!(decision, AddDecision::NoAction);
    }

    #[test]
    fn test_trigger_relative_to_last_fill_not_entry() {
        // Position averaged down to a last fill at 95; a drop measured from
        // the original 100 entry must not trigger on its own
        let pos = position(95.0, 1);
        let config = config();

        let decision = should_average(&pos, 94.9, &config, 10_000.0);
        assert_eq!(decision, AddDecision::NoAction);

        let decision = should_average(&pos, 95.0 * 0.995, &config, 10_000.0);
        assert!(matches!(decision, AddDecision::Add { .. }));
    }

    #[test]
    fn test_geometric_sizing_sequence() {
        let config = config();
        let expected = [100.0, 150.0, 225.0];

        for (additions, &want) in expected.iter().enumerate() {
            let pos = position(100.0, additions as u32);
            match should_average(&pos, 99.0, &config, 1_000_000.0) {
                AddDecision::Add { notional } => {
                    assert!(
                        (notional - want).abs() < 1e-9,
                        "addition {} expected {} got {}",
                        additions,
                        want,
                        notional
                    );
                }
                AddDecision::NoAction => panic!("addition {} should trigger", additions),
            }
        }

        // Fourth trigger: addition cap reached, wait for recovery instead
        let pos = position(100.0, 3);
        assert_eq!(should_average(&pos, 90.0, &config, 1_000_000.0), AddDecision::NoAction);
    }

    #[test]
    fn test_capital_cap_shrinks_addition() {
        let pos = position(100.0, 2); // wants 225
        let decision = should_average(&pos, 99.0, &config(), 80.0);
        assert_eq!(decision, AddDecision::Add { notional: 80.0 });
    }

    #[test]
    fn test_no_action_below_min_order() {
        let pos = position(100.0, 0);
        let decision = should_average(&pos, 99.0, &config(), 5.0);
        assert_eq!(decision, AddDecision::NoAction);
    }

    #[test]
    fn test_reserve_held_back() {
        let mut config = config();
        config.capital_reserve_pct = 0.05;
        let pos = position(100.0, 2); // wants 225, spendable = 200 * 0.95 = 190
        let decision = should_average(&pos, 99.0, &config, 200.0);
        assert_eq!(decision, AddDecision::Add { notional: 190.0 });
    }
}
