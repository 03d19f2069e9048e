//! Waiting for a queued request's turn.
//!
//! A waiter wakes up on every bar event and checks its entry: gone means the
//! request was withdrawn, current and collision-free means it may play now,
//! anything else means another bar of waiting.

use std::future::Future;

use tokio::sync::broadcast::error::RecvError;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::queue::{Lane, RequestQueue, Turn};
use crate::state::SharedState;

/// Where a queued turn stands at a bar boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// Current on its lane and not colliding with the other lane.
    Ready,
    /// Still queued behind other turns or yielding to the other lane.
    Waiting,
    /// The entry no longer exists.
    Withdrawn,
}

/// Classify a turn against the queue.
pub fn turn_status(queue: &RequestQueue, lane: Lane, turn: Turn) -> TurnStatus {
    if !queue.is_in_queue(lane, turn) {
        TurnStatus::Withdrawn
    } else if queue.current_turn(lane) == turn && queue.is_collision_free(lane) {
        TurnStatus::Ready
    } else {
        TurnStatus::Waiting
    }
}

/// Wait until `(lane, turn)` may play.
///
/// The bar subscription is taken when this function is called, not when the
/// returned future is first polled, so no bar between the call and the first
/// poll is missed. On success the entry becomes the now-playing entry.
///
/// Fails with [`Error::RequestWithdrawn`] if the entry disappears first; the
/// caller still has to `forward` the lane in that case.
pub fn wait_for_turn(
    state: SharedState,
    clock: &Clock,
    lane: Lane,
    turn: Turn,
) -> impl Future<Output = Result<()>> + Send + 'static {
    let mut bars = clock.subscribe();
    async move {
        loop {
            match bars.recv().await {
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    log::debug!("[TURN] {} turn {} missed {} bar events", lane, turn, missed);
                }
                Err(RecvError::Closed) => return Err(Error::ClockClosed),
            }

            let status = state.with_write(|s| {
                let status = turn_status(&s.queue, lane, turn);
                if status == TurnStatus::Ready {
                    if let Some(payload) = s.queue.payload(lane, turn).map(str::to_owned) {
                        s.queue.set_now_playing(lane, turn, &payload);
                    }
                }
                status
            });

            match status {
                TurnStatus::Ready => return Ok(()),
                TurnStatus::Withdrawn => {
                    log::warn!("Request {} on {} was withdrawn before playing", turn, lane);
                    return Err(Error::RequestWithdrawn { lane, turn });
                }
                TurnStatus::Waiting => {
                    log::trace!("[TURN] {} turn {} keeps waiting", lane, turn);
                }
            }
        }
    }
}
