//! Turn-lifecycle notifications for external observers (display, LEDs).
//!
//! Events travel on a broadcast channel: emitting never waits for a
//! subscriber, and a subscriber that falls behind receives
//! `RecvError::Lagged` instead of stalling the emitter.
//!
//! Delivery is at least once only for subscribers that keep up. After a
//! `Lagged(n)` the oldest `n` events are gone, and a consumer that tracks
//! turn state must resynchronise from the next event it receives.

use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "detail", rename_all = "snake_case")]
pub enum TurnEvent {
    /// The remote agent considers the user's spoken input complete.
    EndOfUtterance,
    /// Playback went quiet for the idle timeout. Can fire more than once per
    /// turn when the response has pauses in it.
    PlaybackDone,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct StatusSignal {
    tx: broadcast::Sender<TurnEvent>,
}

impl StatusSignal {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: TurnEvent) {
        log::debug!("Status event: {:?}", event);
        if self.tx.send(event).is_err() {
            log::trace!("No status subscribers");
        }
    }
}
