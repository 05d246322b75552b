//! 薄いシステムコールラッパー。
//!
//! 戻り値 `-1` を [`cerr`] で `io::Error` に変換するだけで、ポリシーは持たない。
//! [`fork`] の子側で使う関数（[`setpgid`], [`dup2`], [`close`], [`write_raw`], [`_exit`]）は
//! async-signal-safe なシステムコールのみを呼ぶ。

use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

pub type ProcessId = libc::pid_t;
pub type SignalNumber = libc::c_int;

/// `-1` を `errno` 由来の `io::Error` に変換する。
pub fn cerr<Int: Copy + TryInto<libc::c_long>>(res: Int) -> io::Result<Int> {
    match res.try_into() {
        Ok(-1) => Err(io::Error::last_os_error()),
        _ => Ok(res),
    }
}

pub enum ForkResult {
    /// 親プロセス側。子の PID を持つ。
    Parent(ProcessId),
    Child,
}

/// 子プロセスを作成する。
///
/// 子側では `exec` するまで async-signal-safe な関数だけを呼ぶこと。
pub fn fork() -> io::Result<ForkResult> {
    let pid = cerr(unsafe { libc::fork() })?;
    if pid == 0 {
        Ok(ForkResult::Child)
    } else {
        Ok(ForkResult::Parent(pid))
    }
}

pub fn setpgid(pid: ProcessId, pgid: ProcessId) -> io::Result<()> {
    cerr(unsafe { libc::setpgid(pid, pgid) }).map(|_| ())
}

pub fn getpgid(pid: ProcessId) -> io::Result<ProcessId> {
    cerr(unsafe { libc::getpgid(pid) })
}

pub fn killpg(pgid: ProcessId, signal: SignalNumber) -> io::Result<()> {
    cerr(unsafe { libc::killpg(pgid, signal) }).map(|_| ())
}

/// パイプを作成し `(read, write)` を返す。どちらも drop で close される。
pub fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [-1 as RawFd; 2];
    cerr(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    // SAFETY: pipe(2) が成功したので両端とも所有権を持つ有効な fd。
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

pub fn dup2(fd: RawFd, target: RawFd) -> io::Result<()> {
    cerr(unsafe { libc::dup2(fd, target) }).map(|_| ())
}

pub fn close(fd: RawFd) -> io::Result<()> {
    cerr(unsafe { libc::close(fd) }).map(|_| ())
}

/// `fd` から読む。EINTR は再試行する。0 は EOF。
pub fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match cerr(unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) }) {
            Ok(n) => return Ok(n as usize),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

/// バッファを `fd` に書く。fork 後の子から診断を出すために使う（アロケーションなし）。
pub fn write_raw(fd: RawFd, buf: &[u8]) {
    let mut written = 0;
    while written < buf.len() {
        let rest = &buf[written..];
        let n = unsafe { libc::write(fd, rest.as_ptr().cast(), rest.len()) };
        if n <= 0 {
            if n < 0 && io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return;
        }
        written += n as usize;
    }
}

pub fn _exit(status: libc::c_int) -> ! {
    unsafe { libc::_exit(status) }
}

/// `fds` のいずれかが読み取り可能になるまで待つ。
///
/// 戻り値は各 fd が読み取り可能かどうか。シグナル割り込み（EINTR）は
/// 「何も準備できていない」として `Ok` で返す。`timeout` が `None` なら無期限。
pub fn poll_readable<const N: usize>(
    fds: [RawFd; N],
    timeout: Option<Duration>,
) -> io::Result<[bool; N]> {
    let mut pollfds = fds.map(|fd| libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    });
    let timeout_ms = match timeout {
        Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        None => -1,
    };

    match cerr(unsafe { libc::poll(pollfds.as_mut_ptr(), N as libc::nfds_t, timeout_ms) }) {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok([false; N]),
        Err(err) => return Err(err),
    }

    Ok(pollfds.map(|p| p.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0))
}
