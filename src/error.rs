//! Closed error taxonomy shared by every layer of the core.
//!
//! One enumerated kind covers both validation failures returned synchronously
//! from an operation's entry point and outcomes delivered later through an
//! observer callback. There is no boxed/dynamic error type here: the set of
//! failures this crate can produce is known up front, so `ErrorKind` is it.

use std::fmt;

/// A single closed enumeration of everything that can go wrong in this crate.
///
/// Named after the condition, not the syscall that produced it, so the same
/// value can originate on any platform. Platform backends translate raw
/// error codes into this set through a static table (see `sys::*::errno_to_kind`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Ok,
    Cancelled,
    Eof,
    Internal,
    State,
    Syntax,
    /// A delegate (a stacked transport) reported a domain-specific failure
    /// that does not map onto any other variant here.
    Dep,

    Again,
    Already,
    AddrInUse,
    AddrNotAvail,
    AfNoSupport,
    ConnAborted,
    ConnRefused,
    ConnReset,
    HostUnreach,
    NetDown,
    NetReset,
    NetUnreach,
    NoBufs,
    NoMem,
    NotConn,
    PermDenied,
    TimedOut,
    Overflow,
    Range,
    Invalid,
    ProtoType,
    ProtoNoSupport,

    TooBig,
    Access,
    Busy,
    ChildProcess,
    Deadlock,
    DestAddrReq,
    Domain,
    DiskQuota,
    Exist,
    Fault,
    FileTooBig,
    HostDown,
    IdRemoved,
    IllegalSeq,
    InProgress,
    Interrupted,
    IsConn,
    IsDir,
    SymlinkLoop,
    TooManyFiles,
    TooManyFilesOpen,
    TooManyLinks,
    NameTooLong,
    TooManyFilesInSystem,
    NoDevice,
    NoEntry,
    NoExec,
    NoLocks,
    NoLink,
    NoMsg,
    NoSpace,
    NoStreamResources,
    NotADirectory,
    NotEmpty,
    NotRecoverable,
    NotSocket,
    NoSuchDevice,
    NotSupported,
    OwnerDead,
    ProtoFamilyNoSupport,
    BrokenPipe,
    Proto,
    ReadOnlyFs,
    Shutdown,
    SocketTypeNoSupport,
    Spipe,
    NoSuchProcess,
    Stale,
    TooManyRefs,
    TextBusy,
    TooManyUsers,
    CrossDevice,

    /// A platform code this crate has no mapping for. Carries the raw value
    /// so the fallback `Display` impl can still show something useful.
    Unmapped(i32),
}

impl ErrorKind {
    /// Short, stable, human-facing label. `None` for `Unmapped`, whose
    /// `Display` impl formats the raw code instead.
    pub const fn label(self) -> Option<&'static str> {
        use ErrorKind::*;
        Some(match self {
            Ok => "ok",
            Cancelled => "cancelled",
            Eof => "end of file",
            Internal => "internal error",
            State => "invalid state for operation",
            Syntax => "syntax error",
            Dep => "delegate error",
            Again => "resource temporarily unavailable",
            Already => "operation already in progress",
            AddrInUse => "address in use",
            AddrNotAvail => "address not available",
            AfNoSupport => "address family not supported",
            ConnAborted => "connection aborted",
            ConnRefused => "connection refused",
            ConnReset => "connection reset",
            HostUnreach => "host unreachable",
            NetDown => "network down",
            NetReset => "network reset",
            NetUnreach => "network unreachable",
            NoBufs => "no buffer space available",
            NoMem => "out of memory",
            NotConn => "not connected",
            PermDenied => "permission denied",
            TimedOut => "timed out",
            Overflow => "buffer overflow",
            Range => "value out of range",
            Invalid => "invalid argument",
            ProtoType => "wrong protocol type",
            ProtoNoSupport => "protocol not supported",
            TooBig => "argument list too long",
            Access => "access denied",
            Busy => "resource busy",
            ChildProcess => "no child processes",
            Deadlock => "resource deadlock avoided",
            DestAddrReq => "destination address required",
            Domain => "argument outside of domain",
            DiskQuota => "disk quota exceeded",
            Exist => "file exists",
            Fault => "bad address",
            FileTooBig => "file too large",
            HostDown => "host is down",
            IdRemoved => "identifier removed",
            IllegalSeq => "illegal byte sequence",
            InProgress => "operation in progress",
            Interrupted => "interrupted",
            IsConn => "already connected",
            IsDir => "is a directory",
            SymlinkLoop => "too many levels of symbolic links",
            TooManyFiles => "too many open files",
            TooManyFilesOpen => "too many open files",
            TooManyLinks => "too many links",
            NameTooLong => "file name too long",
            TooManyFilesInSystem => "too many files open in system",
            NoDevice => "no such device",
            NoEntry => "no such file or directory",
            NoExec => "exec format error",
            NoLocks => "no locks available",
            NoLink => "link severed",
            NoMsg => "no message of desired type",
            NoSpace => "no space left on device",
            NotADirectory => "not a directory",
            NotEmpty => "directory not empty",
            NotRecoverable => "state not recoverable",
            NotSocket => "not a socket",
            NoSuchDevice => "no such device or address",
            NotSupported => "operation not supported",
            OwnerDead => "owner died",
            ProtoFamilyNoSupport => "protocol family not supported",
            BrokenPipe => "broken pipe",
            Proto => "protocol error",
            ReadOnlyFs => "read-only file system",
            Shutdown => "socket is shut down",
            SocketTypeNoSupport => "socket type not supported",
            Spipe => "illegal seek",
            NoSuchProcess => "no such process",
            Stale => "stale handle",
            TooManyRefs => "too many references",
            TextBusy => "text file busy",
            TooManyUsers => "too many users",
            CrossDevice => "cross-device link",
            NoStreamResources => "out of streams resources",
            Unmapped(_) => return None,
        })
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, ErrorKind::Ok)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(s) => f.write_str(s),
            None => match *self {
                ErrorKind::Unmapped(code) => write!(f, "ERR[{code}]"),
                _ => unreachable!(),
            },
        }
    }
}

impl std::error::Error for ErrorKind {}

pub type Result<T> = std::result::Result<T, ErrorKind>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_variants_never_allocate_on_display() {
        assert_eq!(ErrorKind::Eof.to_string(), "end of file");
        assert_eq!(ErrorKind::NoMem.to_string(), "out of memory");
    }

    #[test]
    fn unmapped_falls_back_to_code() {
        assert_eq!(ErrorKind::Unmapped(61).to_string(), "ERR[61]");
    }

    #[test]
    fn ok_is_ok() {
        assert!(ErrorKind::Ok.is_ok());
        assert!(!ErrorKind::Eof.is_ok());
    }
}
