/// Transport session lifecycle. `Open` strictly means the server accepted
/// the stream (or the first poll tick is scheduled) — a session that is
/// still connecting is `Connecting`, never optimistically `Open`. `Closed`
/// is terminal and only reached by explicit release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closed,
    Error,
}

/// Published on a `watch` channel by every transport session. `error`
/// carries the last surfaced transport failure and clears on recovery.
#[derive(Debug, Clone, Default)]
pub struct SessionStatus {
    pub state: ConnState,
    pub error: Option<String>,
}

impl SessionStatus {
    pub fn is_open(&self) -> bool {
        self.state == ConnState::Open
    }
}
