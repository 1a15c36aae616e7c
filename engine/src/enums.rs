use strum::Display;

/// Lifecycle state of the hub session, as exposed on the health surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    #[default]
    Idle = 0,
    Connecting = 1,
    Authenticating = 2,
    Subscribing = 3,
    Active = 4,
    Closed = 5,
}

impl SessionState {
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Authenticating,
            3 => Self::Subscribing,
            4 => Self::Active,
            5 => Self::Closed,
            _ => Self::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_roundtrip() {
        for state in [
            SessionState::Idle,
            SessionState::Connecting,
            SessionState::Authenticating,
            SessionState::Subscribing,
            SessionState::Active,
            SessionState::Closed,
        ] {
            assert_eq!(SessionState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Active.to_string(), "active");
        assert_eq!(SessionState::Connecting.to_string(), "connecting");
    }
}
