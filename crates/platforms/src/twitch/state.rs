/// Live state of the monitored channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelState {
    #[default]
    Offline,
    Live,
}

/// Inputs that can move the channel between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSignal {
    /// Push `stream-up`, or a poll that found renditions.
    WentLive,
    /// Push `stream-down`.
    WentOffline,
    /// A manifest fetch returned zero renditions.
    NoRenditions,
}

/// A state change produced by [`ChannelState::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    CameOnline,
    WentOffline,
}

impl ChannelState {
    /// Apply `signal`. Returns the transition only when the state changed, so
    /// repeated signals are absorbed.
    pub fn apply(&mut self, signal: ChannelSignal) -> Option<Transition> {
        let (next, transition) = match (*self, signal) {
            (ChannelState::Offline, ChannelSignal::WentLive) => {
                (ChannelState::Live, Some(Transition::CameOnline))
            }
            (ChannelState::Live, ChannelSignal::WentOffline | ChannelSignal::NoRenditions) => {
                (ChannelState::Offline, Some(Transition::WentOffline))
            }
            (state, _) => (state, None),
        };
        *self = next;
        transition
    }

    pub fn is_live(&self) -> bool {
        matches!(self, ChannelState::Live)
    }
}
