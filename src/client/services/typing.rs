//! Outgoing typing indicator.
//!
//! Two states per open conversation. The first keystroke publishes a start,
//! further keystrokes only push the inactivity deadline forward, and the
//! stop goes out either when the deadline passes or when the message is sent.

use crate::client::services::websocket_client::IntentPublisher;
use crate::common::models::ChatId;
use crate::common::protocol::Intent;
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingState {
    Idle,
    Active,
}

struct Slot {
    state: TypingState,
    chat_id: Option<ChatId>,
    timer: Option<JoinHandle<()>>,
    // bumped on every re-arm, a timer that wakes with an old value is stale
    generation: u64,
}

impl Slot {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
    }

    /// Leaves the current conversation. Returns the stop to publish, if any.
    fn leave(&mut self) -> Option<Intent> {
        self.cancel_timer();
        let stop = match (self.state, self.chat_id) {
            (TypingState::Active, Some(chat_id)) => Some(Intent::Typing { chat_id, is_typing: false }),
            _ => None,
        };
        self.state = TypingState::Idle;
        self.chat_id = None;
        stop
    }
}

#[derive(Clone)]
pub struct TypingEmitter {
    slot: Arc<Mutex<Slot>>,
    publisher: Arc<dyn IntentPublisher>,
    idle_after: Duration,
}

impl TypingEmitter {
    pub fn new(publisher: Arc<dyn IntentPublisher>, idle_after: Duration) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                state: TypingState::Idle,
                chat_id: None,
                timer: None,
                generation: 0,
            })),
            publisher,
            idle_after,
        }
    }

    pub fn state(&self) -> TypingState {
        self.slot.lock().state
    }

    /// Must be called from inside a tokio runtime: it arms the idle timer.
    pub fn keystroke(&self, chat_id: ChatId) {
        let mut outgoing = Vec::with_capacity(2);
        {
            let mut slot = self.slot.lock();
            if slot.chat_id != Some(chat_id) {
                outgoing.extend(slot.leave());
                slot.chat_id = Some(chat_id);
            }
            if slot.state == TypingState::Idle {
                slot.state = TypingState::Active;
                outgoing.push(Intent::Typing { chat_id, is_typing: true });
            }
            self.arm(&mut slot, chat_id);
        }
        for intent in outgoing {
            self.publisher.publish(intent);
        }
    }

    /// The message for `chat_id` went out: stop immediately.
    pub fn message_sent(&self, chat_id: ChatId) {
        let stop = {
            let mut slot = self.slot.lock();
            if slot.chat_id != Some(chat_id) || slot.state != TypingState::Active {
                return;
            }
            slot.cancel_timer();
            slot.state = TypingState::Idle;
            Intent::Typing { chat_id, is_typing: false }
        };
        debug!("[TYPING] Stop on send for chat {}", chat_id);
        self.publisher.publish(stop);
    }

    /// Conversation switch or teardown.
    pub fn reset(&self) {
        let stop = self.slot.lock().leave();
        if let Some(stop) = stop {
            debug!("[TYPING] Stop on leave for chat {}", stop.chat_id());
            self.publisher.publish(stop);
        }
    }

    fn arm(&self, slot: &mut Slot, chat_id: ChatId) {
        slot.cancel_timer();
        let generation = slot.generation;
        let weak = Arc::downgrade(&self.slot);
        let publisher = Arc::clone(&self.publisher);
        let idle_after = self.idle_after;

        slot.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(idle_after).await;
            let Some(slot) = weak.upgrade() else {
                return;
            };
            {
                let mut slot = slot.lock();
                if slot.generation != generation || slot.state != TypingState::Active {
                    return;
                }
                slot.state = TypingState::Idle;
                slot.timer = None;
            }
            debug!("[TYPING] Idle for {:?}, stop for chat {}", idle_after, chat_id);
            publisher.publish(Intent::Typing { chat_id, is_typing: false });
        }));
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::services::in_memory::RecordingPublisher;
    use tokio::time::sleep;

    fn emitter() -> (TypingEmitter, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::new());
        (TypingEmitter::new(publisher.clone(), Duration::from_millis(2000)), publisher)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_emits_one_start_and_one_stop() {
        let (typing, publisher) = emitter();
        for _ in 0..5 {
            typing.keystroke(42);
            sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(publisher.typing_flags(), vec![true]);

        // last keystroke was 500ms ago
        sleep(Duration::from_millis(1499)).await;
        assert_eq!(publisher.typing_flags(), vec![true]);
        assert_eq!(typing.state(), TypingState::Active);

        sleep(Duration::from_millis(2)).await;
        assert_eq!(publisher.typing_flags(), vec![true, false]);
        assert_eq!(typing.state(), TypingState::Idle);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(publisher.typing_flags().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sending_cancels_the_timer() {
        let (typing, publisher) = emitter();
        typing.keystroke(42);
        typing.message_sent(42);
        assert_eq!(publisher.typing_flags(), vec![true, false]);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(publisher.typing_flags(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_idle_emits_nothing() {
        let (typing, publisher) = emitter();
        typing.message_sent(42);
        assert!(publisher.intents().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn switching_conversation_stops_the_old_one() {
        let (typing, publisher) = emitter();
        typing.keystroke(1);
        typing.keystroke(2);
        assert_eq!(
            publisher.intents(),
            vec![
                Intent::Typing { chat_id: 1, is_typing: true },
                Intent::Typing { chat_id: 1, is_typing: false },
                Intent::Typing { chat_id: 2, is_typing: true },
            ]
        );

        sleep(Duration::from_millis(2001)).await;
        assert_eq!(publisher.intents().last(), Some(&Intent::Typing { chat_id: 2, is_typing: false }));
        assert_eq!(publisher.intents().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_pending_stop() {
        let (typing, publisher) = emitter();
        typing.keystroke(7);
        typing.reset();
        typing.reset();
        assert_eq!(publisher.typing_flags(), vec![true, false]);

        sleep(Duration::from_secs(3)).await;
        assert_eq!(publisher.typing_flags(), vec![true, false]);
        assert_eq!(typing.state(), TypingState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_again_after_stop_starts_again() {
        let (typing, publisher) = emitter();
        typing.keystroke(3);
        sleep(Duration::from_millis(2100)).await;
        typing.keystroke(3);
        assert_eq!(publisher.typing_flags(), vec![true, false, true]);
    }
}
