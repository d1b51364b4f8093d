//! Wire-level result codes.
//!
//! Every reply message carries a status: non-negative on success
//! (usually a byte count), or one of these codes as a negative `i32`.
//! The same codes are returned by the IPC and grant primitives
//! themselves, so one taxonomy covers transport, grant, and
//! operation-level failures.

use core::fmt;

/// Result code carried in replies and returned by the primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Destination or source endpoint is invalid, stale, or gone.
    DeadEndpoint,
    /// Completing the call would block both parties forever.
    Deadlock,
    /// Non-blocking send found no ready receiver.
    WouldBlock,
    /// Malformed or oversized request.
    Invalid,
    /// Conflicting state, e.g. an inode that is already a mount point.
    Busy,
    /// Operation requires a directory.
    NotDir,
    /// Operation is not valid on a directory.
    IsDir,
    /// No such file or directory entry.
    NoEntry,
    /// File or entry already exists.
    Exists,
    /// The server does not implement this operation.
    NoSys,
    /// Unknown device control request.
    NoTty,
    /// Caller is not permitted this access.
    Perm,
    /// Backing store is read-only.
    ReadOnly,
    /// A table or device is out of room.
    NoSpace,
    /// Underlying I/O failed.
    IoError,
    /// Unrecognized code received from a peer.
    Unknown(i32),
}

impl ErrorCode {
    /// Convert to the negative wire representation.
    pub fn to_code(self) -> i32 {
        match self {
            ErrorCode::DeadEndpoint => -1,
            ErrorCode::Deadlock => -2,
            ErrorCode::WouldBlock => -3,
            ErrorCode::Invalid => -4,
            ErrorCode::Busy => -5,
            ErrorCode::NotDir => -6,
            ErrorCode::IsDir => -7,
            ErrorCode::NoEntry => -8,
            ErrorCode::Exists => -9,
            ErrorCode::NoSys => -10,
            ErrorCode::NoTty => -11,
            ErrorCode::Perm => -12,
            ErrorCode::ReadOnly => -13,
            ErrorCode::NoSpace => -14,
            ErrorCode::IoError => -15,
            ErrorCode::Unknown(code) => code,
        }
    }

    /// Rebuild from a negative wire code.
    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => ErrorCode::DeadEndpoint,
            -2 => ErrorCode::Deadlock,
            -3 => ErrorCode::WouldBlock,
            -4 => ErrorCode::Invalid,
            -5 => ErrorCode::Busy,
            -6 => ErrorCode::NotDir,
            -7 => ErrorCode::IsDir,
            -8 => ErrorCode::NoEntry,
            -9 => ErrorCode::Exists,
            -10 => ErrorCode::NoSys,
            -11 => ErrorCode::NoTty,
            -12 => ErrorCode::Perm,
            -13 => ErrorCode::ReadOnly,
            -14 => ErrorCode::NoSpace,
            -15 => ErrorCode::IoError,
            other => ErrorCode::Unknown(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::DeadEndpoint => write!(f, "dead endpoint"),
            ErrorCode::Deadlock => write!(f, "deadlock"),
            ErrorCode::WouldBlock => write!(f, "would block"),
            ErrorCode::Invalid => write!(f, "invalid request"),
            ErrorCode::Busy => write!(f, "busy"),
            ErrorCode::NotDir => write!(f, "not a directory"),
            ErrorCode::IsDir => write!(f, "is a directory"),
            ErrorCode::NoEntry => write!(f, "no such entry"),
            ErrorCode::Exists => write!(f, "already exists"),
            ErrorCode::NoSys => write!(f, "operation not implemented"),
            ErrorCode::NoTty => write!(f, "unknown control request"),
            ErrorCode::Perm => write!(f, "permission denied"),
            ErrorCode::ReadOnly => write!(f, "read-only"),
            ErrorCode::NoSpace => write!(f, "no space"),
            ErrorCode::IoError => write!(f, "I/O error"),
            ErrorCode::Unknown(code) => write!(f, "unknown error ({})", code),
        }
    }
}

/// Fold a `Result` carrying a byte count into a wire status value.
pub fn status_from(result: Result<usize, ErrorCode>) -> i64 {
    match result {
        Ok(n) => n as i64,
        Err(e) => e.to_code() as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        let all = [
            ErrorCode::DeadEndpoint,
            ErrorCode::Deadlock,
            ErrorCode::WouldBlock,
            ErrorCode::Invalid,
            ErrorCode::Busy,
            ErrorCode::NotDir,
            ErrorCode::IsDir,
            ErrorCode::NoEntry,
            ErrorCode::Exists,
            ErrorCode::NoSys,
            ErrorCode::NoTty,
            ErrorCode::Perm,
            ErrorCode::ReadOnly,
            ErrorCode::NoSpace,
            ErrorCode::IoError,
        ];
        for code in all {
            assert_eq!(ErrorCode::from_code(code.to_code()), code);
            assert!(code.to_code() < 0);
        }
    }

    #[test]
    fn unrecognized_codes_are_preserved() {
        assert_eq!(ErrorCode::from_code(-999), ErrorCode::Unknown(-999));
        assert_eq!(ErrorCode::Unknown(-999).to_code(), -999);
    }
}
