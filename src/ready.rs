use std::ops;

/// A set of interest/readiness flags, modeled as a small bitset.
///
/// The same type is used both to describe what a caller is interested in
/// (`Interest::readable()`) and what the poller observed (`error`/`hup` are
/// only ever produced by the OS, never requested).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Ready(u8);

const READABLE: u8 = 0b0001;
const WRITABLE: u8 = 0b0010;
const ERROR: u8 = 0b0100;
const HUP: u8 = 0b1000;

impl Ready {
    #[inline]
    pub fn empty() -> Ready {
        Ready(0)
    }

    #[inline]
    pub fn readable() -> Ready {
        Ready(READABLE)
    }

    #[inline]
    pub fn writable() -> Ready {
        Ready(WRITABLE)
    }

    #[inline]
    pub fn error() -> Ready {
        Ready(ERROR)
    }

    #[inline]
    pub fn hup() -> Ready {
        Ready(HUP)
    }

    #[inline]
    pub fn read_write() -> Ready {
        Ready(READABLE | WRITABLE)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_readable(self) -> bool {
        self.contains(Ready::readable())
    }

    #[inline]
    pub fn is_writable(self) -> bool {
        self.contains(Ready::writable())
    }

    #[inline]
    pub fn is_error(self) -> bool {
        self.contains(Ready::error())
    }

    #[inline]
    pub fn is_hup(self) -> bool {
        self.contains(Ready::hup())
    }

    /// True for anything epoll reports alongside OUT that the original
    /// treats as "try to flush, then probably close": EPOLLERR/EPOLLHUP/EPOLLRDHUP/EPOLLOUT.
    #[inline]
    pub fn is_out_events(self) -> bool {
        self.contains(Ready::writable()) || self.contains(Ready::error()) || self.contains(Ready::hup())
    }

    /// EPOLLPRI/EPOLLIN plus the same exceptional bits, per the original's `InEvents` mask.
    #[inline]
    pub fn is_in_events(self) -> bool {
        self.contains(Ready::readable()) || self.contains(Ready::error()) || self.contains(Ready::hup())
    }

    #[inline]
    pub fn contains(self, other: Ready) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Ready) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Ready) {
        self.0 &= !other.0;
    }
}

impl ops::BitOr for Ready {
    type Output = Ready;

    #[inline]
    fn bitor(self, other: Ready) -> Ready {
        Ready(self.0 | other.0)
    }
}

impl ops::BitOrAssign for Ready {
    #[inline]
    fn bitor_assign(&mut self, other: Ready) {
        self.0 |= other.0;
    }
}

impl ops::BitAnd for Ready {
    type Output = Ready;

    #[inline]
    fn bitand(self, other: Ready) -> Ready {
        Ready(self.0 & other.0)
    }
}

#[cfg(test)]
mod test {
    use super::Ready;

    #[test]
    fn combine_and_query() {
        let r = Ready::readable() | Ready::writable();
        assert!(r.is_readable());
        assert!(r.is_writable());
        assert!(!r.is_hup());
    }

    #[test]
    fn out_events_include_exceptional_bits() {
        assert!(Ready::error().is_out_events());
        assert!(Ready::hup().is_out_events());
        assert!(!Ready::readable().is_out_events());
    }
}
