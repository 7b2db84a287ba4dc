//! Failure propagation: a panicking user callback must surface as an error
//! on the root result without stranding the schedulers, and the instance
//! must stay usable afterwards.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rustdac::{dac::ComputeError, Dac, Policy};

fn sum_dac_with_poison(poison: u64) -> Dac<Vec<u64>, u64> {
    Dac::new(
        |values: &Vec<u64>| {
            let mid = values.len() / 2;
            vec![values[..mid].to_vec(), values[mid..].to_vec()]
        },
        |parts: Vec<u64>| parts.into_iter().sum(),
        |values: &Vec<u64>| values.len() <= 4,
        move |values: &Vec<u64>| {
            if values.contains(&poison) {
                panic!("hit the poisoned element");
            }
            values.iter().sum()
        },
    )
}

#[test]
fn test_base_case_panic_surfaces_as_error() {
    let dac = sum_dac_with_poison(500);

    for workers in [1, 4] {
        let result = dac.compute((1..=1000).collect(), workers);
        match result {
            Err(ComputeError::CallbackPanicked { message }) => {
                assert!(
                    message.contains("poisoned"),
                    "unexpected panic message: {}",
                    message
                );
            }
            other => panic!("expected CallbackPanicked, got {:?}", other.map(|_| ())),
        }
    }
}

#[test]
fn test_instance_recovers_after_a_panic() {
    let dac = sum_dac_with_poison(500);

    assert!(dac.compute((1..=1000).collect(), 4).is_err());

    // The poisoned element is absent this time; counters were reset, so the
    // run must complete normally.
    let total = dac.compute((501..=1000).collect(), 4).expect("compute failed");
    assert_eq!(total, (501..=1000u64).sum::<u64>());
}

#[test]
fn test_conquer_panic_surfaces_as_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();

    let dac: Dac<Vec<u64>, u64> = Dac::new(
        |values: &Vec<u64>| {
            let mid = values.len() / 2;
            vec![values[..mid].to_vec(), values[mid..].to_vec()]
        },
        move |parts: Vec<u64>| {
            if calls_clone.fetch_add(1, Ordering::SeqCst) == 2 {
                panic!("conquer blew up");
            }
            parts.into_iter().sum()
        },
        |values: &Vec<u64>| values.len() <= 4,
        |values: &Vec<u64>| values.iter().sum(),
    );

    let result = dac.compute((1..=1000).collect(), 2);
    match result {
        Err(ComputeError::CallbackPanicked { message }) => {
            assert!(message.contains("conquer blew up"));
        }
        other => panic!("expected CallbackPanicked, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_divide_panic_surfaces_as_error() {
    let dac: Dac<Vec<u64>, u64> = Dac::new(
        |values: &Vec<u64>| {
            if values.len() < 100 {
                panic!("divide refused the input");
            }
            let mid = values.len() / 2;
            vec![values[..mid].to_vec(), values[mid..].to_vec()]
        },
        |parts: Vec<u64>| parts.into_iter().sum(),
        |values: &Vec<u64>| values.len() <= 4,
        |values: &Vec<u64>| values.iter().sum(),
    );

    let result = dac.compute((1..=1000).collect(), 4);
    assert!(matches!(
        result,
        Err(ComputeError::CallbackPanicked { .. })
    ));
}
