use core_logic::{
    classify_error_message, with_policy, Attempt, FailureClass, RetryDecision, RetryError,
    RetryPolicy,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[test]
fn test_rate_limited_curve_doubles_from_five_seconds() {
    let policy = RetryPolicy::for_auth();
    let expected = [5, 10, 20, 40, 80];
    for (n, secs) in expected.iter().enumerate() {
        assert_eq!(
            policy.delay(n as u32, FailureClass::RateLimited),
            Duration::from_secs(*secs)
        );
    }
}

#[test]
fn test_transient_delay_is_fixed() {
    let policy = RetryPolicy::for_onchain();
    for n in 0..5 {
        assert_eq!(
            policy.delay(n, FailureClass::Transient),
            Duration::from_secs(2)
        );
    }
}

#[test]
fn test_next_delay_stops_at_cap() {
    let auth = RetryPolicy::for_auth();
    for n in 0..4 {
        assert!(matches!(
            auth.next_delay(n, FailureClass::RateLimited),
            RetryDecision::Wait(_)
        ));
    }
    assert_eq!(auth.next_delay(4, FailureClass::RateLimited), RetryDecision::Stop);

    let onchain = RetryPolicy::for_onchain();
    assert!(matches!(
        onchain.next_delay(1, FailureClass::Transient),
        RetryDecision::Wait(_)
    ));
    assert_eq!(onchain.next_delay(2, FailureClass::Transient), RetryDecision::Stop);
}

#[test]
fn test_huge_attempt_does_not_overflow() {
    let policy = RetryPolicy::for_auth();
    let d = policy.delay(200, FailureClass::RateLimited);
    assert!(d >= Duration::from_secs(80));
}

#[tokio::test(start_paused = true)]
async fn test_with_policy_success_first_try() {
    let counter = Arc::new(AtomicU32::new(0));
    let cancel = CancellationToken::new();

    let result = with_policy(&RetryPolicy::for_auth(), "op", &cancel, |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Attempt::Done("ok")
        }
    })
    .await;

    assert_eq!(result, Ok("ok"));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_with_policy_waits_rate_limit_curve() {
    let cancel = CancellationToken::new();
    let start = tokio::time::Instant::now();

    let result = with_policy(&RetryPolicy::for_auth(), "login", &cancel, |attempt| async move {
        if attempt < 2 {
            Attempt::rate_limited("429")
        } else {
            Attempt::Done(attempt)
        }
    })
    .await;

    assert_eq!(result, Ok(2));
    assert!(start.elapsed() >= Duration::from_secs(15));
    assert!(start.elapsed() < Duration::from_secs(16));
}

#[tokio::test(start_paused = true)]
async fn test_with_policy_never_exceeds_cap() {
    let counter = Arc::new(AtomicU32::new(0));
    let cancel = CancellationToken::new();

    let result: Result<(), RetryError> =
        with_policy(&RetryPolicy::for_auth(), "login", &cancel, |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Attempt::transient("connection reset")
            }
        })
        .await;

    assert_eq!(counter.load(Ordering::SeqCst), 5);
    match result {
        Err(RetryError::Exhausted {
            attempts,
            last_error,
            ..
        }) => {
            assert_eq!(attempts, 5);
            assert_eq!(last_error, "connection reset");
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_with_policy_honours_cancellation_during_backoff() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let result: Result<(), RetryError> =
        with_policy(&RetryPolicy::for_auth(), "login", &cancel, |_| async {
            Attempt::rate_limited("429")
        })
        .await;

    let err = result.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.attempts(), 1);
}

#[test]
fn test_rpc_error_classification() {
    assert_eq!(
        classify_error_message("Request too fast, please slow down"),
        Some(FailureClass::RateLimited)
    );
    assert_eq!(
        classify_error_message("HTTP 429 Too Many Requests"),
        Some(FailureClass::RateLimited)
    );
    assert_eq!(
        classify_error_message("(code: -32000, message: TX_REPLAY_ATTACK)"),
        Some(FailureClass::Transient)
    );
    assert_eq!(
        classify_error_message("operation timed out"),
        Some(FailureClass::Transient)
    );
    assert_eq!(classify_error_message("execution reverted: STF"), None);
}

#[test]
fn test_429_inside_a_hash_is_not_rate_limiting() {
    assert_eq!(
        classify_error_message(
            "swap reverted in 0x8a3f4290c1d2e5b6a7980f1e2d3c4b5a69788796a5b4c3d2e1f0a9b8c7d6e5f4"
        ),
        None
    );
    assert_eq!(
        classify_error_message("approve to 0x4290000000000000000000000000000000000001 failed"),
        None
    );
    assert_eq!(
        classify_error_message("HTTP status client error (429 Too Many Requests) for url"),
        Some(FailureClass::RateLimited)
    );
    assert_eq!(
        classify_error_message("server returned an error response: error code 429"),
        Some(FailureClass::RateLimited)
    );
}
