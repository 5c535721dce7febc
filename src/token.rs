use std::os::unix::io::RawFd;

/// Identifies an interest registration with the poller. For this crate a
/// token is always the raw file descriptor it was registered with, so the
/// poll callback can hand the fd straight to the caller without a lookup
/// table of its own.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub usize);

impl From<RawFd> for Token {
    #[inline]
    fn from(fd: RawFd) -> Token {
        Token(fd as usize)
    }
}

impl From<Token> for RawFd {
    #[inline]
    fn from(token: Token) -> RawFd {
        token.0 as RawFd
    }
}
