//! Session lifecycle states
//!
//! The state ids are carried verbatim in `ExitingState` messages, so the
//! discriminants are part of the wire protocol and must not be reordered.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SessionState {
    /// Waiting for the peer's version message.
    AwaitingVersion = 0,
    /// Version accepted; exchanging change logs.
    SendTree = 1,
    /// Both logs present; merging and resolving conflicts.
    ResolvingConflicts = 2,
    /// Merge done; waiting for the user's go-ahead.
    SyncUserWait = 3,
    /// Worker pool executing the operation set.
    SyncingFiles = 4,
    /// Local sync done; waiting for the peer's completion notice.
    Finished = 5,
    /// Persist, tear down, return.
    Exiting = 6,
}

impl SessionState {
    pub fn to_wire(self) -> i32 {
        self as i32
    }

    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(SessionState::AwaitingVersion),
            1 => Some(SessionState::SendTree),
            2 => Some(SessionState::ResolvingConflicts),
            3 => Some(SessionState::SyncUserWait),
            4 => Some(SessionState::SyncingFiles),
            5 => Some(SessionState::Finished),
            6 => Some(SessionState::Exiting),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::AwaitingVersion => "AwaitingVersion",
            SessionState::SendTree => "SendTree",
            SessionState::ResolvingConflicts => "ResolvingConflicts",
            SessionState::SyncUserWait => "SyncUserWait",
            SessionState::SyncingFiles => "SyncingFiles",
            SessionState::Finished => "Finished",
            SessionState::Exiting => "Exiting",
        };
        write!(f, "{}", name)
    }
}
