//! # Status
//!
//! Reply codes defined by RFC 959 (and the extensions this crate speaks),
//! plus the code-group model used to validate replies.

use thiserror::Error;

#[derive(Debug, Copy, Clone, Error, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
/// Ftp status returned after command execution
pub enum Status {
    // 1xx: Positive Preliminary Reply
    #[error("restart marker reply")]
    RestartMarker = 110,
    #[error("service ready in (n) minutes")]
    ReadyMinute = 120,
    #[error("data connection already open, transfer starting")]
    AlreadyOpen = 125,
    #[error("file status okay, about to open data connection")]
    AboutToSend = 150,
    // 2xx: Positive Completion Reply
    #[error("command okay")]
    CommandOk = 200,
    #[error("command not implemented")]
    CommandNotImplemented = 202,
    #[error("system status, or system help reply")]
    System = 211,
    #[error("directory status")]
    Directory = 212,
    #[error("file status")]
    File = 213,
    #[error("help message")]
    Help = 214,
    #[error("NAME system type")]
    Name = 215,
    #[error("service ready for new user")]
    Ready = 220,
    #[error("service closing control connection")]
    Closing = 221,
    #[error("data connection open; no transfer in progress")]
    DataConnectionOpen = 225,
    #[error("closing data connection")]
    ClosingDataConnection = 226,
    #[error("entering passive mode")]
    PassiveMode = 227,
    #[error("entering extended passive mode")]
    ExtendedPassiveMode = 229,
    #[error("user logged in, proceed")]
    LoggedIn = 230,
    #[error("server accepts the authentication mechanism specified by the client")]
    AuthOk = 234,
    #[error("requested file action okay")]
    RequestedFileActionOk = 250,
    #[error("pathname created")]
    PathCreated = 257,
    // 3xx: Positive Intermediate Reply
    #[error("user name okay, need password")]
    NeedPassword = 331,
    #[error("need account for login")]
    NeedAccount = 332,
    #[error("requested file action pending further information")]
    RequestFilePending = 350,
    // 4xx: Transient Negative Completion Reply
    #[error("service not available, closing control connection")]
    NotAvailable = 421,
    #[error("can't open data connection")]
    CannotOpenDataConnection = 425,
    #[error("connection closed; transfer aborted")]
    TransferAborted = 426,
    #[error("requested file action not taken")]
    RequestFileActionIgnored = 450,
    #[error("requested action aborted; local error in processing")]
    ActionAborted = 451,
    #[error("requested action not taken; insufficient storage")]
    RequestedActionNotTaken = 452,
    // 5xx: Permanent Negative Completion Reply
    #[error("syntax error, command unrecognized")]
    BadCommand = 500,
    #[error("syntax error in parameters or arguments")]
    BadArguments = 501,
    #[error("command not implemented")]
    NotImplemented = 502,
    #[error("bad sequence of commands")]
    BadSequence = 503,
    #[error("command not implemented for that parameter")]
    NotImplementedParameter = 504,
    #[error("user not logged in")]
    NotLoggedIn = 530,
    #[error("need account for storing files")]
    StoringNeedAccount = 532,
    #[error("requested action not taken; file unavailable")]
    FileUnavailable = 550,
    #[error("requested action aborted; page type unknown")]
    PageTypeUnknown = 551,
    #[error("requested file action aborted; exceeded storage allocation")]
    ExceededStorage = 552,
    #[error("requested action not taken; file name not allowed")]
    BadFilename = 553,
    #[error("unknown status code")]
    Unknown = 0,
}

impl Status {
    /// Get status code
    pub fn code(&self) -> u32 {
        *self as u32
    }

    /// Get status description
    pub fn desc(&self) -> String {
        self.to_string()
    }
}

impl From<u32> for Status {
    fn from(code: u32) -> Self {
        match code {
            110 => Self::RestartMarker,
            120 => Self::ReadyMinute,
            125 => Self::AlreadyOpen,
            150 => Self::AboutToSend,
            200 => Self::CommandOk,
            202 => Self::CommandNotImplemented,
            211 => Self::System,
            212 => Self::Directory,
            213 => Self::File,
            214 => Self::Help,
            215 => Self::Name,
            220 => Self::Ready,
            221 => Self::Closing,
            225 => Self::DataConnectionOpen,
            226 => Self::ClosingDataConnection,
            227 => Self::PassiveMode,
            229 => Self::ExtendedPassiveMode,
            230 => Self::LoggedIn,
            234 => Self::AuthOk,
            250 => Self::RequestedFileActionOk,
            257 => Self::PathCreated,
            331 => Self::NeedPassword,
            332 => Self::NeedAccount,
            350 => Self::RequestFilePending,
            421 => Self::NotAvailable,
            425 => Self::CannotOpenDataConnection,
            426 => Self::TransferAborted,
            450 => Self::RequestFileActionIgnored,
            451 => Self::ActionAborted,
            452 => Self::RequestedActionNotTaken,
            500 => Self::BadCommand,
            501 => Self::BadArguments,
            502 => Self::NotImplemented,
            503 => Self::BadSequence,
            504 => Self::NotImplementedParameter,
            530 => Self::NotLoggedIn,
            532 => Self::StoringNeedAccount,
            550 => Self::FileUnavailable,
            551 => Self::PageTypeUnknown,
            552 => Self::ExceededStorage,
            553 => Self::BadFilename,
            _ => Self::Unknown,
        }
    }
}

/// Reply code group, i.e. the first digit of a reply code (RFC 959 §4.2).
/// Intermediate (3xx) and permanent-negative (5xx) replies are always
/// matched by exact code, so only the groups below are named.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ReplyGroup {
    /// 1xx, the requested action is being initiated
    Preliminary,
    /// 2xx, the requested action has completed
    Completion,
    /// 4xx, transient failure; the command may be reattempted
    Transient,
}

impl ReplyGroup {
    fn digit(self) -> u32 {
        match self {
            Self::Preliminary => 1,
            Self::Completion => 2,
            Self::Transient => 4,
        }
    }
}

/// What reply a command expects: a single exact code or a whole code group.
/// Exactly one of these checks is applied per call site; call sites that
/// accept any reply read the response without an expectation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Expect {
    Exact(Status),
    Group(ReplyGroup),
}

impl Expect {
    pub(crate) fn matches(self, code: u32) -> bool {
        match self {
            Self::Exact(status) => status.code() == code,
            Self::Group(group) => code / 100 == group.digit(),
        }
    }
}

pub(crate) fn is_positive_completion(code: u32) -> bool {
    Expect::Group(ReplyGroup::Completion).matches(code)
}

pub(crate) fn is_transient_negative(code: u32) -> bool {
    Expect::Group(ReplyGroup::Transient).matches(code)
}

#[cfg(test)]
mod test {

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn should_return_code_for_status() {
        assert_eq!(Status::BadFilename.code(), 553);
        assert_eq!(Status::Ready.code(), 220);
    }

    #[test]
    fn should_return_desc_for_status() {
        assert_eq!(
            Status::BadArguments.desc().as_str(),
            "syntax error in parameters or arguments"
        );
    }

    #[test]
    fn should_convert_u32_to_status() {
        assert_eq!(Status::from(150), Status::AboutToSend);
        assert_eq!(Status::from(220), Status::Ready);
        assert_eq!(Status::from(227), Status::PassiveMode);
        assert_eq!(Status::from(229), Status::ExtendedPassiveMode);
        assert_eq!(Status::from(234), Status::AuthOk);
        assert_eq!(Status::from(331), Status::NeedPassword);
        assert_eq!(Status::from(350), Status::RequestFilePending);
        assert_eq!(Status::from(550), Status::FileUnavailable);
        assert_eq!(Status::from(999), Status::Unknown);
    }

    #[test]
    fn should_match_expected_code_or_group() {
        assert!(Expect::Exact(Status::Ready).matches(220));
        assert!(!Expect::Exact(Status::Ready).matches(230));
        assert!(Expect::Group(ReplyGroup::Preliminary).matches(150));
        assert!(Expect::Group(ReplyGroup::Preliminary).matches(125));
        assert!(!Expect::Group(ReplyGroup::Preliminary).matches(250));
        assert!(Expect::Group(ReplyGroup::Completion).matches(226));
        assert!(Expect::Group(ReplyGroup::Transient).matches(421));
        assert!(!Expect::Group(ReplyGroup::Transient).matches(550));
    }

    #[test]
    fn should_classify_code_groups() {
        assert!(is_positive_completion(200));
        assert!(is_positive_completion(257));
        assert!(!is_positive_completion(150));
        assert!(is_transient_negative(450));
        assert!(!is_transient_negative(550));
    }
}
