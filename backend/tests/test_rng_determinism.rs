//! RNG determinism across the public API

use interbank_network_core_rs::RngManager;

#[test]
fn test_same_seed_same_sequence() {
    let mut a = RngManager::new(12345);
    let mut b = RngManager::new(12345);

    for _ in 0..1000 {
        assert_eq!(a.next(), b.next());
    }
}

#[test]
fn test_same_seed_same_continuous_draws() {
    let mut a = RngManager::new(99);
    let mut b = RngManager::new(99);

    for _ in 0..200 {
        assert_eq!(a.uniform(5.0, 30.0), b.uniform(5.0, 30.0));
        assert_eq!(a.normal(-0.01, 0.03), b.normal(-0.01, 0.03));
        assert_eq!(a.chance(0.35), b.chance(0.35));
        assert_eq!(a.choice(7), b.choice(7));
    }
}

#[test]
fn test_different_seeds_diverge() {
    let mut a = RngManager::new(1);
    let mut b = RngManager::new(2);

    let a_draws: Vec<u64> = (0..10).map(|_| a.next()).collect();
    let b_draws: Vec<u64> = (0..10).map(|_| b.next()).collect();
    assert_ne!(a_draws, b_draws);
}

#[test]
fn test_state_round_trip() {
    let mut a = RngManager::new(7);
    for _ in 0..10 {
        a.next();
    }
    // a fresh RNG seeded from the saved state replays the continuation
    let mut b = RngManager::new(a.get_state());
    for _ in 0..10 {
        assert_eq!(a.next(), b.next());
    }
}
