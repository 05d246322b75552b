//! 子プロセスの状態変化の取得。
//!
//! [`ChildStatusSource`] は reaper が状態変化を引き出す境界。本番では [`WaitAny`]
//! （`waitpid(-1, WNOHANG | WUNTRACED)`）を使い、テストでは台本どおりの状態列を差し込む。

use std::io;

use crate::sys::{cerr, ProcessId, SignalNumber};

/// `waitpid` が報告した 1 プロセスの状態変化。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildEvent {
    /// `exit` で正常終了した。引数は終了コード。
    Exited(i32),
    /// シグナルで強制終了した。
    Signaled(SignalNumber),
    /// SIGTSTP / SIGSTOP 等で停止した。
    Stopped(SignalNumber),
    /// SIGCONT で再開した。
    Continued,
}

impl ChildEvent {
    /// `waitpid` の raw status を解釈する。どれにも当たらなければ `None`。
    pub fn from_raw(status: libc::c_int) -> Option<Self> {
        if libc::WIFEXITED(status) {
            Some(Self::Exited(libc::WEXITSTATUS(status)))
        } else if libc::WIFSIGNALED(status) {
            Some(Self::Signaled(libc::WTERMSIG(status)))
        } else if libc::WIFSTOPPED(status) {
            Some(Self::Stopped(libc::WSTOPSIG(status)))
        } else if libc::WIFCONTINUED(status) {
            Some(Self::Continued)
        } else {
            None
        }
    }

    /// プロセスが消滅した（exit またはシグナル終了）なら `true`。
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exited(_) | Self::Signaled(_))
    }
}

pub trait ChildStatusSource {
    /// 今すぐ取得できる次の状態変化を返す。なければ `Ok(None)`。ブロックしない。
    fn next_change(&mut self) -> io::Result<Option<(ProcessId, ChildEvent)>>;
}

/// 任意の子プロセスを非ブロッキングで待つ。
pub struct WaitAny;

impl ChildStatusSource for WaitAny {
    fn next_change(&mut self) -> io::Result<Option<(ProcessId, ChildEvent)>> {
        loop {
            let mut status: libc::c_int = 0;
            let pid = match cerr(unsafe {
                libc::waitpid(-1, &mut status, libc::WNOHANG | libc::WUNTRACED)
            }) {
                Ok(pid) => pid,
                Err(err) if err.raw_os_error() == Some(libc::ECHILD) => return Ok(None),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };

            if pid == 0 {
                return Ok(None);
            }
            match ChildEvent::from_raw(status) {
                Some(event) => return Ok(Some((pid, event))),
                None => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::sys;

    #[test]
    fn decode_raw_statuses() {
        // Linux の wait status エンコーディング。
        assert_eq!(ChildEvent::from_raw(0), Some(ChildEvent::Exited(0)));
        assert_eq!(ChildEvent::from_raw(42 << 8), Some(ChildEvent::Exited(42)));
        assert_eq!(
            ChildEvent::from_raw(libc::SIGKILL),
            Some(ChildEvent::Signaled(libc::SIGKILL))
        );
        assert_eq!(
            ChildEvent::from_raw((libc::SIGTSTP << 8) | 0x7f),
            Some(ChildEvent::Stopped(libc::SIGTSTP))
        );
        assert_eq!(ChildEvent::from_raw(0xffff), Some(ChildEvent::Continued));
    }

    #[test]
    fn terminal_events() {
        assert!(ChildEvent::Exited(1).is_terminal());
        assert!(ChildEvent::Signaled(libc::SIGINT).is_terminal());
        assert!(!ChildEvent::Stopped(libc::SIGSTOP).is_terminal());
        assert!(!ChildEvent::Continued.is_terminal());
    }

    #[test]
    fn wait_any_reports_exit_code() {
        let _guard = crate::testing::process_lock();

        let pid = match sys::fork().unwrap() {
            sys::ForkResult::Child => sys::_exit(7),
            sys::ForkResult::Parent(pid) => pid,
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut source = WaitAny;
        loop {
            if let Some((reaped, event)) = source.next_change().unwrap() {
                assert_eq!(reaped, pid);
                assert_eq!(event, ChildEvent::Exited(7));
                break;
            }
            assert!(Instant::now() < deadline, "child was never reaped");
            std::thread::sleep(Duration::from_millis(5));
        }

        // 子が残っていなければ None。
        assert_eq!(source.next_change().unwrap(), None);
    }
}
