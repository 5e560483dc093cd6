//! Polling until a device reaches an expected condition
//!
//! Drives signal state transitions by changing their status replies,
//! so most operations are "command, then poll until the status looks
//! right". The poller repeats a query at a fixed frequency and hands
//! back either the first accepted reply or the last reply seen when
//! the deadline passes.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::error::StageError;
use crate::protocol::telegram::Telegram;

/// Why a poll finished without an accepted reply.
#[derive(Debug)]
pub enum PollFailure<R> {
    /// The deadline passed. Carries the last reply for diagnostics.
    TimedOut {
        /// Time spent polling.
        elapsed: Duration,
        /// Last reply received before the deadline.
        last: R,
    },
    /// The query itself failed.
    Session(StageError),
}

/// Repeats a query until a predicate accepts the reply.
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    /// Queries per second.
    pub frequency_hz: f64,
    /// Give up after this long.
    pub timeout: Duration,
}

impl Poller {
    /// New poller with the given rate and deadline.
    pub fn new(frequency_hz: f64, timeout: Duration) -> Self {
        Poller {
            frequency_hz,
            timeout,
        }
    }

    /// Run `query` at the configured frequency until `accept` returns
    /// true for a reply or the deadline passes.
    ///
    /// The first query is issued immediately, and the deadline is
    /// checked after every reply, so a poll can never give up before
    /// the timeout nor keep going more than one period past it.
    pub async fn run<R, Q, Fut, A>(&self, mut query: Q, accept: A) -> Result<R, PollFailure<R>>
    where
        Q: FnMut() -> Fut,
        Fut: Future<Output = Result<R, StageError>>,
        A: Fn(&R) -> bool,
        R: std::fmt::Debug,
    {
        let start = Instant::now();
        let period = Duration::from_secs_f64(1.0 / self.frequency_hz);
        loop {
            let reply = query().await.map_err(PollFailure::Session)?;
            if accept(&reply) {
                return Ok(reply);
            }
            let elapsed = start.elapsed();
            trace!(?reply, ?elapsed, "reply not accepted yet");
            if elapsed >= self.timeout {
                return Err(PollFailure::TimedOut {
                    elapsed,
                    last: reply,
                });
            }
            tokio::time::sleep(period).await;
        }
    }
}

/// One acceptable status telegram, matched by required bits.
///
/// The frame prefix, bytes 0 through 17, must match the target
/// exactly. Bytes 19 and 20 are checked bit-wise: every bit of the
/// mask must be set in the reply, extra bits are tolerated. With no
/// explicit mask the target's own byte value is the mask.
#[derive(Debug, Clone)]
pub struct PollTarget {
    telegram: Telegram,
    byte19_mask: Option<u8>,
    byte20_mask: Option<u8>,
}

impl PollTarget {
    /// Target matched with the telegram's own data bytes as masks.
    pub fn new(telegram: Telegram) -> Self {
        PollTarget {
            telegram,
            byte19_mask: None,
            byte20_mask: None,
        }
    }

    /// Target with explicit bit masks for bytes 19 and 20.
    pub fn with_masks(telegram: Telegram, byte19_mask: u8, byte20_mask: u8) -> Self {
        PollTarget {
            telegram,
            byte19_mask: Some(byte19_mask),
            byte20_mask: Some(byte20_mask),
        }
    }

    /// The target telegram.
    pub fn telegram(&self) -> &Telegram {
        &self.telegram
    }

    /// Whether `reply` satisfies this target.
    pub fn matches(&self, reply: &Telegram) -> bool {
        let want = self.telegram.as_bytes();
        let got = reply.as_bytes();
        // Byte 18 is the declared length and can differ between a
        // command and its data-carrying reply.
        if got.len() < 18 || got[..18] != want[..18] {
            return false;
        }
        for (index, mask) in [(19, self.byte19_mask), (20, self.byte20_mask)] {
            if let Some(want_byte) = self.telegram.byte(index) {
                let mask = mask.unwrap_or(want_byte);
                match reply.byte(index) {
                    Some(got_byte) if got_byte & mask == mask => {}
                    _ => return false,
                }
            }
        }
        true
    }
}

/// First target in `targets` that `reply` satisfies, in caller order.
pub fn first_match<'a>(targets: &'a [PollTarget], reply: &Telegram) -> Option<&'a PollTarget> {
    targets.iter().find(|t| t.matches(reply))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::protocol::registers;
    use crate::protocol::telegram::Telegram;

    #[test]
    fn exact_reply_matches() {
        let target = PollTarget::new(registers::operation_enabled());
        assert!(target.matches(&registers::operation_enabled()));
    }

    #[test]
    fn extra_bits_in_the_reply_are_tolerated() {
        // Target reached sets all the operation enabled bits plus more.
        let target = PollTarget::new(registers::operation_enabled());
        assert!(target.matches(&registers::target_reached()));
    }

    #[test]
    fn missing_required_bits_do_not_match() {
        let target = PollTarget::new(registers::operation_enabled());
        assert!(!target.matches(&registers::switched_on()));
        assert!(!target.matches(&registers::switch_on_disabled()));
    }

    #[test]
    fn prefix_mismatch_never_matches() {
        let target = PollTarget::new(registers::operation_enabled());
        assert!(!target.matches(&registers::mode_reply(39)));
    }

    #[test]
    fn explicit_masks_override_data_bytes() {
        // Accept any reply that has the fault bit set, whatever else is going on.
        let fault = PollTarget::with_masks(
            Telegram::response(registers::STATUS_WORD, 0, &[8, 0]),
            8,
            0,
        );
        assert!(fault.matches(&Telegram::response(registers::STATUS_WORD, 0, &[40, 6])));
        assert!(!fault.matches(&registers::operation_enabled()));
    }

    #[test]
    fn first_match_respects_caller_order() {
        let targets = vec![
            PollTarget::new(registers::operation_enabled()),
            PollTarget::new(registers::target_reached()),
        ];
        let hit = first_match(&targets, &registers::target_reached()).unwrap();
        // Target reached satisfies both; the first listed wins.
        assert_eq!(hit.telegram(), &registers::operation_enabled());
    }

    #[tokio::test]
    async fn poller_returns_first_accepted_reply() {
        let poller = Poller::new(100.0, Duration::from_secs(1));
        let mut count = 0;
        let result = poller
            .run(
                || {
                    count += 1;
                    let n = count;
                    async move { Ok(n) }
                },
                |n| *n >= 3,
            )
            .await
            .unwrap();
        assert_eq!(result, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_times_out_at_the_deadline_with_the_last_reply() {
        let poller = Poller::new(2.0, Duration::from_secs(2));
        let failure = poller
            .run(|| async { Ok(41) }, |n| *n == 42)
            .await
            .unwrap_err();
        match failure {
            PollFailure::TimedOut { elapsed, last } => {
                assert_eq!(last, 41);
                assert!(elapsed >= Duration::from_secs(2));
                assert!(elapsed < Duration::from_secs(3));
            }
            PollFailure::Session(e) => panic!("unexpected session error: {e}"),
        }
    }

    #[tokio::test]
    async fn poller_propagates_query_errors() {
        let poller = Poller::new(2.0, Duration::from_secs(2));
        let failure = poller
            .run(
                || async { Err::<u32, _>(StageError::NotConnected) },
                |_| true,
            )
            .await
            .unwrap_err();
        assert!(matches!(failure, PollFailure::Session(StageError::NotConnected)));
    }
}
