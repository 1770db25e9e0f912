// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The retry/backoff attempt loop (C5, §4.5).

use crate::cancel::CancelSignal;
use crate::error::{EngineError, Result};
use crate::step::{Backoff, Policy};
use std::future::Future;
use std::time::Duration;

/// Backoff is capped at 60s regardless of `retry_delay_ms` and attempt
/// count, per §4.5.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Outcome of a full attempt loop: the final result plus how many times the
/// body actually ran (§8.1 invariant 4: `attempts` equals actual invocation
/// count).
pub struct Outcome<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

/// Runs `body` under `policy`, retrying with backoff on failure.
///
/// `body(attempt)` is the per-attempt function (0-indexed attempt number).
/// Cancellation is never retried — it propagates on the first attempt it's
/// observed, whether surfaced as an `EngineError::Cancelled` from the body or
/// noticed between attempts.
pub async fn run_with_policy<T, F, Fut>(policy: &Policy, cancel: &CancelSignal, mut body: F) -> Outcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_retries = policy.max_retries();
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Outcome {
                result: Err(EngineError::Cancelled {
                    reason: cancel.reason().unwrap_or_default(),
                }),
                attempts: attempt,
            };
        }

        let result = body(attempt).await;
        attempt += 1;

        match result {
            Ok(value) => {
                return Outcome {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(err) if err.is_cancelled() => {
                return Outcome {
                    result: Err(err),
                    attempts: attempt,
                }
            }
            Err(err) => {
                if attempt - 1 >= max_retries {
                    return Outcome {
                        result: Err(err),
                        attempts: attempt,
                    };
                }
                if let Policy::Retry {
                    retry_delay_ms,
                    backoff,
                    ..
                } = policy
                {
                    let delay = backoff_delay(*retry_delay_ms, *backoff, attempt - 1);
                    if sleep_cancellable(delay, cancel).await.is_err() {
                        return Outcome {
                            result: Err(EngineError::Cancelled {
                                reason: cancel.reason().unwrap_or_default(),
                            }),
                            attempts: attempt,
                        };
                    }
                }
                // `stop` retries (max_retries > 0 with action: stop) reuse the
                // same counting but without a backoff sleep between attempts.
            }
        }
    }
}

fn backoff_delay(retry_delay_ms: u64, backoff: Backoff, attempt_index: u32) -> Duration {
    let computed = match backoff {
        Backoff::Fixed => Duration::from_millis(retry_delay_ms),
        Backoff::Exponential => {
            let factor = 2u64.saturating_pow(attempt_index);
            Duration::from_millis(retry_delay_ms.saturating_mul(factor))
        }
    };
    computed.min(MAX_BACKOFF)
}

/// Sleeps for `duration`, waking early if cancelled. Returns `Err` if
/// cancellation won the race.
async fn sleep_cancellable(duration: Duration, cancel: &CancelSignal) -> std::result::Result<(), ()> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(()),
    }
}
