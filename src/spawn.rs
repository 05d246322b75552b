//! パイプライン 1 ステージ分の fork 後処理（子側）。
//!
//! fork した子はマルチスレッド環境でも安全なよう、exec までアロケーションを一切しない。
//! そのため argv と exec 失敗時の診断メッセージは [`Stage::new`] で fork 前に組み立てておく。
//!
//! ## 構成
//!
//! | 型 | 役割 |
//! |-----|------|
//! | [`CStringVec`] | argv 用の NULL 終端ポインタ配列 |
//! | [`ExecFailure`] | exec 失敗の種類と終了ステータス |
//! | [`Stage`] | 1 ステージの argv と事前に描画した診断 |

use std::ffi::CString;
use std::fmt;
use std::os::fd::RawFd;

use crate::signal::{self, SignalSet};
use crate::sys::{self, ProcessId};

// ── エラー型 ──────────────────────────────────────────────────────

/// `execvp` の失敗。子プロセスの中だけで扱われ、シェル本体には伝播しない。
pub struct ExecFailure<'a> {
    pub errno: i32,
    pub command: &'a str,
}

impl fmt::Display for ExecFailure<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self.errno {
            libc::ENOENT => "command not found",
            libc::EACCES => "permission denied",
            _ => "cannot execute",
        };
        writeln!(f, "ush: {}: {}", self.command, msg)
    }
}

impl ExecFailure<'_> {
    /// 127 = command not found, 126 = permission denied, 1 = その他。
    pub fn exit_status(&self) -> i32 {
        match self.errno {
            libc::ENOENT => 127,
            libc::EACCES => 126,
            _ => 1,
        }
    }
}

// ── CStringVec ────────────────────────────────────────────────────

/// argv 用の CString ベクタ。NULL 終端のポインタ配列を構築する。
pub struct CStringVec {
    _strings: Vec<CString>,
    ptrs: Vec<*const libc::c_char>,
}

impl CStringVec {
    /// 内部に NUL を含む引数は空文字列になる。
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Self {
        let strings: Vec<CString> = args
            .iter()
            .map(|s| CString::new(s.as_ref()).unwrap_or_default())
            .collect();
        let mut ptrs: Vec<*const libc::c_char> = strings.iter().map(|s| s.as_ptr()).collect();
        ptrs.push(std::ptr::null()); // NULL 終端
        Self {
            _strings: strings,
            ptrs,
        }
    }

    fn as_ptr(&self) -> *const *const libc::c_char {
        self.ptrs.as_ptr()
    }

    fn program(&self) -> *const libc::c_char {
        self.ptrs[0]
    }
}

// ── Stage ─────────────────────────────────────────────────────────

/// exec 失敗時のメッセージ。errno ごとに fork 前に描画しておく。
struct Diagnostics {
    not_found: Vec<u8>,
    denied: Vec<u8>,
    other: Vec<u8>,
}

impl Diagnostics {
    fn new(command: &str) -> Self {
        let render = |errno| ExecFailure { errno, command }.to_string().into_bytes();
        Self {
            not_found: render(libc::ENOENT),
            denied: render(libc::EACCES),
            other: render(0),
        }
    }

    fn for_errno(&self, errno: i32) -> &[u8] {
        match errno {
            libc::ENOENT => &self.not_found,
            libc::EACCES => &self.denied,
            _ => &self.other,
        }
    }
}

/// fork 前に準備を済ませた 1 ステージ。
pub struct Stage {
    argv: CStringVec,
    diagnostics: Diagnostics,
}

/// 子プロセスの配線。
pub struct Wiring<'a> {
    /// 0 ならこのプロセスが新しいグループのリーダーになる。
    pub pgid: ProcessId,
    pub stdin: Option<RawFd>,
    pub stdout: Option<RawFd>,
    /// 子で閉じる全パイプ fd（他ステージの分も含む）。
    pub pipe_fds: &'a [RawFd],
    /// exec 前に戻すシグナルマスク。
    pub mask: &'a SignalSet,
}

impl Stage {
    /// `args` は空でないこと。
    pub fn new<S: AsRef<str>>(args: &[S]) -> Self {
        let command = args.first().map(|s| s.as_ref()).unwrap_or_default();
        Self {
            argv: CStringVec::from_args(args),
            diagnostics: Diagnostics::new(command),
        }
    }

    /// fork 直後の子で呼ぶ。プロセスグループ・シグナル・fd を整えて exec し、戻らない。
    ///
    /// ここでは async-signal-safe なシステムコールだけを使う。
    pub fn exec_child(&self, wiring: Wiring<'_>) -> ! {
        // 親側でも setpgid するので、どちらが先でも結果は同じ。
        let _ = sys::setpgid(0, wiring.pgid);
        signal::reset_handlers();
        let _ = wiring.mask.set_mask();

        if let Some(fd) = wiring.stdin {
            let _ = sys::dup2(fd, libc::STDIN_FILENO);
        }
        if let Some(fd) = wiring.stdout {
            let _ = sys::dup2(fd, libc::STDOUT_FILENO);
        }
        for &fd in wiring.pipe_fds {
            let _ = sys::close(fd);
        }

        unsafe { libc::execvp(self.argv.program(), self.argv.as_ptr()) };

        let errno = std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or_default();
        sys::write_raw(libc::STDERR_FILENO, self.diagnostics.for_errno(errno));
        let status = ExecFailure { errno, command: "" }.exit_status();
        sys::_exit(status)
    }
}
