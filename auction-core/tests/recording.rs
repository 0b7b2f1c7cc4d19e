//! Structured market events land in the recorder's tables.
#![cfg(feature = "instrument")]

use auction_core::instrument::{self, MarketSubscriber};
use auction_core::{
    Agent, Bid, MarketConfig, MarketSession, Offer, PricingRule, StepSubmissions,
};
use polars::prelude::*;
use tracing::subscriber::with_default;

fn run_two_steps(rule: PricingRule) -> MarketSession {
    let config = MarketConfig::default()
        .with_pricing_rule(rule)
        .with_num_steps(2);
    let mut session = MarketSession::new(config).unwrap();
    for id in ["H1", "H2", "H3", "H4"] {
        session.register(Agent::household(id)).unwrap();
    }

    session
        .submit_step(StepSubmissions::new(
            vec![Bid::new(0.30, 10.0, "H1"), Bid::new(0.25, 5.0, "H2")],
            vec![Offer::new(0.10, 8.0, "H3"), Offer::new(0.20, 10.0, "H4")],
        ))
        .unwrap();
    session
        .submit_step(StepSubmissions::new(
            vec![Bid::new(0.05, 10.0, "H1")],
            vec![Offer::new(0.20, 10.0, "H2")],
        ))
        .unwrap();
    session
}

#[test]
fn session_events_fill_tables() {
    instrument::clear();
    with_default(MarketSubscriber, || {
        run_two_steps(PricingRule::PayAsClear);
    });
    let recorder = instrument::drain();

    assert_eq!(recorder.rows("submissions"), 2);
    assert_eq!(recorder.rows("clearing"), 1);
    assert_eq!(recorder.rows("trade"), 3);
    assert_eq!(recorder.rows("settlement"), 3);
    assert_eq!(recorder.rows("no_trade"), 1);

    let clearing = recorder.table("clearing").unwrap();
    assert_eq!(clearing.f64s("quantity"), Some(&[15.0][..]));
    assert_eq!(clearing.f64s("price"), Some(&[0.25][..]));
    assert_eq!(clearing.strs("rule").unwrap()[0], "pac");

    let no_trade = recorder.table("no_trade").unwrap();
    assert_eq!(no_trade.u64s("step"), Some(&[1][..]));
    assert_eq!(no_trade.strs("reason").unwrap()[0], "curves_do_not_cross");
}

#[test]
fn trade_table_aggregates_in_polars() {
    instrument::clear();
    with_default(MarketSubscriber, || {
        run_two_steps(PricingRule::PayAsClear);
    });
    let dfs = instrument::drain_to_dataframes();

    let volume = dfs["trade"]
        .clone()
        .lazy()
        .group_by([col("buyer")])
        .agg([col("quantity").sum().alias("bought")])
        .sort(["buyer"], Default::default())
        .collect()
        .unwrap();

    let bought: Vec<f64> = volume
        .column("bought")
        .unwrap()
        .f64()
        .unwrap()
        .into_no_null_iter()
        .collect();
    assert_eq!(bought, vec![10.0, 5.0]);
}

#[test]
fn mcafee_trades_record_residual() {
    instrument::clear();
    with_default(MarketSubscriber, || {
        run_two_steps(PricingRule::McAfee);
    });
    let recorder = instrument::drain();

    let residual: f64 = recorder
        .table("settlement")
        .and_then(|t| t.f64s("residual"))
        .unwrap()
        .iter()
        .sum();
    assert!((residual - 0.5).abs() < 1e-9);
}
