use std::time::Duration;

use memoflight_service::caching::{CacheError, KeyState};

use crate::{Squares, coordinator};

#[tokio::test(start_paused = true)]
async fn test_failure_reaches_every_caller() {
    memoflight_test::setup();

    let squares = Squares::new(Duration::from_millis(100)).failing(&[13]);
    let coordinator = coordinator(&squares);

    let (first, second) = futures::join!(coordinator.get(13), coordinator.get(13));
    let err = first.clone().unwrap_err();

    insta::assert_snapshot!(err, @"computation failed: computation for key 13 failed");
    assert_eq!(first, second);
    assert_eq!(squares.counter.total(), 1);

    // failures are not stored, the next caller tries again
    assert_eq!(coordinator.state(&13), KeyState::Idle);
    assert!(coordinator.get(13).await.is_err());
    assert_eq!(squares.counter.for_key(13), 2);
    assert_eq!(coordinator.entry_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failure_does_not_affect_other_keys() {
    memoflight_test::setup();

    let squares = Squares::new(Duration::from_millis(100)).failing(&[13]);
    let coordinator = coordinator(&squares);

    let (failed, succeeded) = futures::join!(coordinator.get(13), coordinator.get(12));

    assert!(matches!(failed, Err(CacheError::ComputationFailed(_))));
    assert_eq!(succeeded, Ok(144));
    assert_eq!(coordinator.state(&12), KeyState::Cached);
}

#[tokio::test]
async fn test_overflow() {
    memoflight_test::setup();

    let squares = Squares::new(Duration::ZERO);
    let coordinator = coordinator(&squares);

    let err = coordinator.get(u64::MAX).await.unwrap_err();
    insta::assert_snapshot!(err, @"computation failed: square of 18446744073709551615 overflows");
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_wait_is_local() {
    memoflight_test::setup();

    let squares = Squares::new(Duration::from_secs(1));
    let coordinator = coordinator(&squares);

    let (leader, impatient, patient) = futures::join!(
        coordinator.get(4),
        coordinator.get_with_timeout(4, Duration::from_millis(100)),
        coordinator.get_with_timeout(4, Duration::from_secs(10)),
    );

    let err = impatient.unwrap_err();
    insta::assert_snapshot!(err, @"gave up waiting for computation after 100ms");
    assert_eq!(leader, Ok(16));
    assert_eq!(patient, Ok(16));
    assert_eq!(squares.counter.total(), 1);
}
