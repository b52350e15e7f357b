/// Lifecycle of one conversation turn.
///
/// ```text
/// Init -> Streaming -> AwaitingEnd -> Closing -> Done
///   \         \             \            \-> Error
///    \---------\-------------\-> Closing (on error or deadline)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Obtaining credentials and opening the stream
    Init,
    /// Config sent, capture and receive running concurrently
    Streaming,
    /// End of utterance received, waiting for the agent to finish
    AwaitingEnd,
    /// Stopping capture and shutting the connection down
    Closing,
    Done,
    Error,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Done | TurnState::Error)
    }

    pub fn can_transition_to(self, next: TurnState) -> bool {
        use TurnState::*;
        matches!(
            (self, next),
            (Init, Streaming)
                | (Init, Closing)
                | (Streaming, AwaitingEnd)
                | (Streaming, Closing)
                | (AwaitingEnd, Closing)
                | (Closing, Done)
                | (Closing, Error)
        )
    }
}
