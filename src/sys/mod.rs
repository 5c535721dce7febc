pub mod epoll;
pub mod eventfd;
pub mod fd;
pub mod socket;

/// Retries a raw syscall on `EINTR`, mirroring the teacher's `syscall!` macro use.
macro_rules! cvt {
    ($e:expr) => {{
        loop {
            let res = unsafe { $e };
            if res == -1 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                break Err(err);
            }
            break Ok(res);
        }
    }};
}

pub(crate) use cvt;
