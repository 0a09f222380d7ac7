//! Maps POSIX `errno` values to the crate's closed `ErrorKind` set.
//!
//! Grounded in `include/ah/err.h` / `platform/Darwin/include/ahp/err.h`:
//! the same names, just carried as enum variants instead of `#define`d
//! integers layered on top of libc's own numbering.

use crate::error::ErrorKind;

pub fn errno_to_kind(errno: i32) -> ErrorKind {
    use ErrorKind::*;
    match errno {
        0 => Ok,
        libc::EAGAIN => Again,
        libc::EALREADY => Already,
        libc::EADDRINUSE => AddrInUse,
        libc::EADDRNOTAVAIL => AddrNotAvail,
        libc::EAFNOSUPPORT => AfNoSupport,
        libc::ECONNABORTED => ConnAborted,
        libc::ECONNREFUSED => ConnRefused,
        libc::ECONNRESET => ConnReset,
        libc::EHOSTUNREACH => HostUnreach,
        libc::ENETDOWN => NetDown,
        libc::ENETRESET => NetReset,
        libc::ENETUNREACH => NetUnreach,
        libc::ENOBUFS => NoBufs,
        libc::ENOMEM => NoMem,
        libc::ENOTCONN => NotConn,
        libc::EACCES => PermDenied,
        libc::ETIMEDOUT => TimedOut,
        libc::EOVERFLOW => Overflow,
        libc::ERANGE => Range,
        libc::EINVAL => Invalid,
        libc::EPROTOTYPE => ProtoType,
        libc::EPROTONOSUPPORT => ProtoNoSupport,
        libc::E2BIG => TooBig,
        libc::EBUSY => Busy,
        libc::ECHILD => ChildProcess,
        libc::EDEADLK => Deadlock,
        libc::EDESTADDRREQ => DestAddrReq,
        libc::EDOM => Domain,
        libc::EDQUOT => DiskQuota,
        libc::EEXIST => Exist,
        libc::EFAULT => Fault,
        libc::EFBIG => FileTooBig,
        libc::EHOSTDOWN => HostDown,
        libc::EIDRM => IdRemoved,
        libc::EILSEQ => IllegalSeq,
        libc::EINPROGRESS => InProgress,
        libc::EINTR => Interrupted,
        libc::EISCONN => IsConn,
        libc::EISDIR => IsDir,
        libc::ELOOP => SymlinkLoop,
        libc::EMFILE => TooManyFilesOpen,
        libc::EMLINK => TooManyLinks,
        libc::ENAMETOOLONG => NameTooLong,
        libc::ENFILE => TooManyFilesInSystem,
        libc::ENODEV => NoDevice,
        libc::ENOENT => NoEntry,
        libc::ENOEXEC => NoExec,
        libc::ENOLCK => NoLocks,
        libc::ENOLINK => NoLink,
        libc::ENOMSG => NoMsg,
        libc::ENOSPC => NoSpace,
        libc::ENOTDIR => NotADirectory,
        libc::ENOTEMPTY => NotEmpty,
        libc::ENOTRECOVERABLE => NotRecoverable,
        libc::ENOTSOCK => NotSocket,
        libc::ENXIO => NoSuchDevice,
        libc::ENOTSUP => NotSupported,
        libc::EOWNERDEAD => OwnerDead,
        libc::EPFNOSUPPORT => ProtoFamilyNoSupport,
        libc::EPIPE => BrokenPipe,
        libc::EPROTO => Proto,
        libc::EROFS => ReadOnlyFs,
        libc::ESHUTDOWN => Shutdown,
        libc::ESOCKTNOSUPPORT => SocketTypeNoSupport,
        libc::ESPIPE => Spipe,
        libc::ESRCH => NoSuchProcess,
        libc::ESTALE => Stale,
        libc::ETOOMANYREFS => TooManyRefs,
        libc::ETXTBSY => TextBusy,
        libc::EUSERS => TooManyUsers,
        libc::EXDEV => CrossDevice,
        other => Unmapped(other),
    }
}

pub fn last_os_error_kind() -> ErrorKind {
    errno_to_kind(std::io::Error::last_os_error().raw_os_error().unwrap_or(-1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_codes() {
        assert_eq!(errno_to_kind(libc::ECONNRESET), ErrorKind::ConnReset);
        assert_eq!(errno_to_kind(0), ErrorKind::Ok);
    }

    #[test]
    fn falls_back_on_unknown_codes() {
        assert_eq!(errno_to_kind(i32::MAX), ErrorKind::Unmapped(i32::MAX));
    }
}
