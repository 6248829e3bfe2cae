//! Market-impact pricing through the public API

use interbank_network_core_rs::exchange::{execute_sale, Exchange};
use interbank_network_core_rs::{RngManager, StateFabric};

#[test]
fn test_sale_serialization_within_a_tick() {
    let mut fabric = StateFabric::in_memory();

    let first = execute_sale(&mut fabric, 3, "illiquid_asset", 12.0, true, 0.3, 50.0).unwrap();
    let second = execute_sale(&mut fabric, 3, "illiquid_asset", 7.0, true, 0.3, 50.0).unwrap();
    let third = execute_sale(&mut fabric, 3, "illiquid_asset", 1.0, true, 0.3, 50.0).unwrap();

    // the k-th seller observes exactly the sum of the first k-1 quantities
    assert_eq!(first.cumulative_before, 0.0);
    assert!((second.cumulative_before - 12.0).abs() < 1e-12);
    assert!((third.cumulative_before - 19.0).abs() < 1e-12);
    assert!(second.cumulative_before > first.cumulative_before);
    assert!(third.cumulative_before > second.cumulative_before);
}

#[test]
fn test_every_sale_prices_below_base() {
    let mut fabric = StateFabric::in_memory();
    for tick in 1..=10 {
        let sale =
            execute_sale(&mut fabric, tick, "liquid_bond", 5.0, false, 0.2, 100.0).unwrap();
        assert!(sale.unit_price < sale.base_price);
        assert!(sale.unit_price >= 0.05);
    }
}

#[test]
fn test_crowded_book_halves_the_price() {
    // a thin market under heavy fire-sale pressure caps out the impact
    let mut fabric = StateFabric::in_memory();
    for _ in 0..10 {
        execute_sale(&mut fabric, 5, "illiquid_asset", 60.0, true, 0.5, 50.0).unwrap();
    }
    let late = execute_sale(&mut fabric, 5, "illiquid_asset", 60.0, true, 0.5, 50.0).unwrap();
    assert!((late.total_impact - 0.5).abs() < 1e-12);
    assert!(late.unit_price < 0.5 * late.base_price + 1e-12);
}

#[test]
fn test_pressure_decays_outside_lookback() {
    let mut fabric = StateFabric::in_memory();
    execute_sale(&mut fabric, 1, "x", 100.0, true, 0.3, 50.0).unwrap();

    // inside the 3-tick window the old volume still weighs on the price
    let near = execute_sale(&mut fabric, 3, "x", 1.0, true, 0.3, 50.0).unwrap();
    // far outside the window the same sale prices cleanly
    let far = execute_sale(&mut fabric, 30, "x", 1.0, true, 0.3, 50.0).unwrap();
    assert!(near.unit_price < far.unit_price);
}

#[test]
fn test_exchange_run_stays_in_bounds() {
    let mut fabric = StateFabric::in_memory();
    let mut rng = RngManager::new(17);
    let mut exchange = Exchange::new(0.5, Some(10));

    for tick in 1..=40 {
        let snap = exchange.step(tick, &mut rng, &mut fabric).unwrap();
        assert!((0.05..=0.80).contains(&snap.new_volatility));
        assert!(snap.price_change_signal.abs() <= 0.15);
    }
}
