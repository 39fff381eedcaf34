use thiserror::Error;

/// Every failure a remote call can report.
///
/// Registry and routing errors come first, then interpreter errors, then the
/// per-instance semantic errors that the dispatcher passes through untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("no sim running for controller token")]
    NoSimForToken,
    #[error("controller token is not signed on to this sim")]
    UnknownToken,
    #[error("controller token has already been issued")]
    TokenReused,
    #[error("{0}: a sim with that name already exists")]
    DuplicateName(String),
    #[error("controller position {0} is already occupied")]
    PositionOccupied(String),
    #[error("no sim named {0:?}")]
    UnknownSimulation(String),
    #[error("no configuration named {0:?}")]
    UnknownConfiguration(String),
    #[error("invalid command syntax")]
    InvalidCommandSyntax,
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    #[error("{cause}{}", remaining_suffix(.remaining))]
    CommandExecution {
        #[source]
        cause: Box<SimError>,
        remaining: Vec<String>,
    },
    #[error("no controller position {0}")]
    NoController(String),
    #[error("no aircraft with callsign {0}")]
    NoAircraft(String),
    #[error("{0} is tracked by another controller")]
    OtherControllerHasTrack(String),
    #[error("{0} is not tracked by you")]
    NotTrackedByMe(String),
    #[error("{0} is not being handed off to you")]
    NotBeingHandedOffToMe(String),
    #[error("no handoff in progress for {0}")]
    NoHandoffInProgress(String),
    #[error("cannot hand off or point out to {0}")]
    InvalidHandoffTarget(String),
    #[error("no fix named {0:?}")]
    UnknownFix(String),
    #[error("unknown approach {0:?}")]
    UnknownApproach(String),
    #[error("invalid altitude {0}")]
    InvalidAltitude(i32),
    #[error("invalid heading {0}")]
    InvalidHeading(i32),
    #[error("invalid speed {0}")]
    InvalidSpeed(i32),
    #[error("invalid sim rate {0}")]
    InvalidSimRate(f32),
    #[error("launch control is held by {0}")]
    LaunchControlHeld(String),
    #[error("aircraft {0} already exists")]
    DuplicateCallsign(String),
    #[error("malformed request: {0}")]
    MalformedRequest(String),
}

impl SimError {
    /// Wraps a failure from the free-text path together with the tokens the
    /// operator still has to resubmit.
    pub fn command_execution(cause: SimError, remaining: Vec<String>) -> Self {
        SimError::CommandExecution {
            cause: Box::new(cause),
            remaining,
        }
    }

    /// Tokens left unexecuted by a failed command string; empty otherwise.
    pub fn remaining(&self) -> &[String] {
        match self {
            SimError::CommandExecution { remaining, .. } => remaining,
            _ => &[],
        }
    }

    /// True when the caller has to sign on again before retrying.
    pub fn requires_sign_on(&self) -> bool {
        matches!(self, SimError::NoSimForToken | SimError::UnknownToken)
    }
}

fn remaining_suffix(remaining: &[String]) -> String {
    if remaining.is_empty() {
        String::new()
    } else {
        format!(" remaining: {}", remaining.join(" "))
    }
}
