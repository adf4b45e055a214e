use core::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Reply codes a remote server commonly hands back for a delivery attempt
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
pub enum Status {
    Ok,
    WillForward,
    Unavailable,
    MailboxBusy,
    ActionUnavailable,
    InsufficientStorage,
    Error,
    UserNotLocal,
    ExceededStorage,
    MailboxNameNotAllowed,
    TransactionFailed,
    Unknown(u32),
}

impl Status {
    #[must_use]
    pub fn classification(self) -> Classification {
        Classification::of(&self.to_string())
    }

    /// Checks if the status is a permanent rejection
    #[must_use]
    pub fn is_permanent(self) -> bool {
        self.classification() == Classification::PermanentFailure
    }

    /// Checks if the status is a temporary rejection
    #[must_use]
    pub fn is_temporary(self) -> bool {
        self.classification().is_transient()
    }
}

impl From<u32> for Status {
    fn from(value: u32) -> Self {
        match value {
            250 => Self::Ok,
            251 => Self::WillForward,
            421 => Self::Unavailable,
            450 => Self::MailboxBusy,
            451 => Self::ActionUnavailable,
            452 => Self::InsufficientStorage,
            550 => Self::Error,
            551 => Self::UserNotLocal,
            552 => Self::ExceededStorage,
            553 => Self::MailboxNameNotAllowed,
            554 => Self::TransactionFailed,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Status> for u32 {
    fn from(value: Status) -> Self {
        match value {
            Status::Ok => 250,
            Status::WillForward => 251,
            Status::Unavailable => 421,
            Status::MailboxBusy => 450,
            Status::ActionUnavailable => 451,
            Status::InsufficientStorage => 452,
            Status::Error => 550,
            Status::UserNotLocal => 551,
            Status::ExceededStorage => 552,
            Status::MailboxNameNotAllowed => 553,
            Status::TransactionFailed => 554,
            Status::Unknown(v) => v,
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", u32::from(*self))
    }
}

/// How a delivery attempt ended, derived once from the reply code the
/// transmission engine reports.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Classification {
    Success,
    TransientFailure,
    PermanentFailure,
    Unknown,
}

impl Classification {
    /// Classify a reply code by its leading character: `2` is success,
    /// `4` transient, `5` permanent. Anything else (including an empty
    /// code) is unknown.
    #[must_use]
    pub fn of(code: &str) -> Self {
        match code.trim_start().as_bytes().first() {
            Some(b'2') => Self::Success,
            Some(b'4') => Self::TransientFailure,
            Some(b'5') => Self::PermanentFailure,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::TransientFailure)
    }
}

impl Display for Classification {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        fmt.write_str(match self {
            Self::Success => "success",
            Self::TransientFailure => "transient-failure",
            Self::PermanentFailure => "permanent-failure",
            Self::Unknown => "unknown",
        })
    }
}

/// The outcome of a single delivery attempt: the raw code as reported, and
/// its classification.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OutcomeCode {
    code: String,
    classification: Classification,
}

impl OutcomeCode {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        let code = code.into();
        let classification = Classification::of(&code);
        Self {
            code,
            classification,
        }
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub const fn classification(&self) -> Classification {
        self.classification
    }
}

impl From<Status> for OutcomeCode {
    fn from(value: Status) -> Self {
        Self::new(value.to_string())
    }
}

impl From<&str> for OutcomeCode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Display for OutcomeCode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{} ({})", self.code, self.classification)
    }
}
