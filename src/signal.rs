//! シグナル処理: ハンドラ、保留シグナル集合、self-pipe 通知、シグナルマスク。
//!
//! ハンドラ（[`on_signal`]）はジョブテーブルに一切触れない。行うのは
//!
//! 1. 保留ビットを [`PENDING`] に立てる
//! 2. [`SignalNotifier`] のソケットペアに 1 バイト書いて待機側を起こす
//!
//! の 2 つだけで、どちらも async-signal-safe。reap とシグナル転送はメインフローの
//! 安全な地点（[`crate::reaper::reap`], [`crate::foreground`]）で行う。

use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use crate::sys::{self, cerr, SignalNumber};

// ── シグナル種別 ─────────────────────────────────────────────────────

/// `kill` ビルトインと転送で扱うシグナル。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Hangup,
    Interrupt,
    Quit,
    Kill,
    Terminate,
    Continue,
    Stop,
    /// 端末からの停止要求（Ctrl+Z）。
    TerminalStop,
}

impl SignalKind {
    const ALL: [SignalKind; 8] = [
        Self::Hangup,
        Self::Interrupt,
        Self::Quit,
        Self::Kill,
        Self::Terminate,
        Self::Continue,
        Self::Stop,
        Self::TerminalStop,
    ];

    pub fn number(self) -> SignalNumber {
        match self {
            Self::Hangup => libc::SIGHUP,
            Self::Interrupt => libc::SIGINT,
            Self::Quit => libc::SIGQUIT,
            Self::Kill => libc::SIGKILL,
            Self::Terminate => libc::SIGTERM,
            Self::Continue => libc::SIGCONT,
            Self::Stop => libc::SIGSTOP,
            Self::TerminalStop => libc::SIGTSTP,
        }
    }

    /// `SIG` 接頭辞なしの名前。
    pub fn name(self) -> &'static str {
        match self {
            Self::Hangup => "HUP",
            Self::Interrupt => "INT",
            Self::Quit => "QUIT",
            Self::Kill => "KILL",
            Self::Terminate => "TERM",
            Self::Continue => "CONT",
            Self::Stop => "STOP",
            Self::TerminalStop => "TSTP",
        }
    }

    /// `kill` のフラグ（先頭の `-` を除いた部分）を解釈する。
    ///
    /// 番号（`9`）、名前（`KILL`）、`SIG` 付き名前（`SIGKILL`）を受け付ける。
    pub fn parse(flag: &str) -> Option<Self> {
        if let Ok(n) = flag.parse::<SignalNumber>() {
            return Self::ALL.into_iter().find(|k| k.number() == n);
        }
        let upper = flag.to_ascii_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

// ── 保留シグナル ─────────────────────────────────────────────────────

const CHILD_BIT: u32 = 1 << 0;
const INTERRUPT_BIT: u32 = 1 << 1;
const STOP_BIT: u32 = 1 << 2;

/// ハンドラが立て、メインフローが [`SignalNotifier::take_pending`] で回収するビット集合。
static PENDING: AtomicU32 = AtomicU32::new(0);

static NOTIFIER: OnceLock<SignalNotifier> = OnceLock::new();

/// 前回の回収以降に届いたシグナル。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pending(u32);

impl Pending {
    /// SIGCHLD が届いた（reap が必要）。
    pub fn child(self) -> bool {
        self.0 & CHILD_BIT != 0
    }

    /// フォアグラウンドジョブへ転送すべきシグナル。
    pub fn forwards(self) -> impl Iterator<Item = SignalKind> {
        [
            (INTERRUPT_BIT, SignalKind::Interrupt),
            (STOP_BIT, SignalKind::TerminalStop),
        ]
        .into_iter()
        .filter(move |&(bit, _)| self.0 & bit != 0)
        .map(|(_, kind)| kind)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

extern "C" {
    #[cfg_attr(
        any(target_os = "macos", target_os = "ios", target_os = "freebsd"),
        link_name = "__error"
    )]
    #[cfg_attr(
        any(target_os = "openbsd", target_os = "netbsd", target_os = "android"),
        link_name = "__errno"
    )]
    #[cfg_attr(target_os = "linux", link_name = "__errno_location")]
    fn errno_location() -> *mut libc::c_int;
}

/// SIGCHLD / SIGINT / SIGTSTP の共通ハンドラ。
extern "C" fn on_signal(signal: libc::c_int) {
    let bit = match signal {
        libc::SIGCHLD => CHILD_BIT,
        libc::SIGINT => INTERRUPT_BIT,
        libc::SIGTSTP => STOP_BIT,
        _ => 0,
    };
    PENDING.fetch_or(bit, Ordering::SeqCst);

    // send が errno を書き換えても割り込まれた側には見せない。
    let saved = unsafe { *errno_location() };
    if let Some(notifier) = NOTIFIER.get() {
        let byte = [1u8];
        unsafe {
            libc::send(
                notifier.tx.as_raw_fd(),
                byte.as_ptr().cast(),
                1,
                libc::MSG_DONTWAIT,
            );
        }
    }
    unsafe { *errno_location() = saved };
}

// ── 通知 ─────────────────────────────────────────────────────────────

/// シグナル到着をメインフローに伝える self-pipe。プロセスに 1 つだけ存在する。
///
/// [`SignalNotifier::install`] でハンドラを登録し、以後は
/// [`wait`](SignalNotifier::wait) で到着まで眠り、[`take_pending`](SignalNotifier::take_pending)
/// で何が届いたかを回収する。
pub struct SignalNotifier {
    rx: UnixStream,
    tx: UnixStream,
}

impl SignalNotifier {
    /// 監視対象のシグナル。
    pub const SIGNALS: [SignalNumber; 3] = [libc::SIGCHLD, libc::SIGINT, libc::SIGTSTP];

    /// ソケットペアを作ってハンドラを登録する。2 回目以降は既存のインスタンスを返す。
    pub fn install() -> io::Result<&'static Self> {
        if NOTIFIER.get().is_none() {
            let (rx, tx) = UnixStream::pair()?;
            // 競合で負けた側のペアはここで捨てられる。
            let _ = NOTIFIER.set(Self { rx, tx });
        }
        let notifier = NOTIFIER
            .get()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "signal notifier unavailable"))?;

        for signal in Self::SIGNALS {
            register_handler(signal)?;
        }
        log::debug!("signal handlers installed for SIGCHLD, SIGINT, SIGTSTP");
        Ok(notifier)
    }

    /// 保留ビットを回収してクリアする。
    pub fn take_pending(&self) -> Pending {
        Pending(PENDING.swap(0, Ordering::SeqCst))
    }

    /// シグナルが届くまでブロックする。既に通知が溜まっていれば即座に戻る。
    pub fn wait(&self) -> io::Result<()> {
        self.wait_timeout(None).map(|_| ())
    }

    /// シグナルが届くか `timeout` が過ぎるまで待つ。通知を受け取ったら `true`。
    pub fn wait_timeout(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let [ready] = sys::poll_readable([self.rx.as_raw_fd()], timeout)?;
        if ready {
            self.drain()?;
        }
        Ok(ready)
    }

    /// 溜まっている通知バイトを読み捨てる。
    pub fn drain(&self) -> io::Result<()> {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::recv(
                    self.rx.as_raw_fd(),
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            match cerr(n) {
                Ok(n) if (n as usize) < buf.len() => return Ok(()),
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }
}

impl AsRawFd for SignalNotifier {
    fn as_raw_fd(&self) -> RawFd {
        self.rx.as_raw_fd()
    }
}

fn register_handler(signal: SignalNumber) -> io::Result<()> {
    let mut action = unsafe { MaybeUninit::<libc::sigaction>::zeroed().assume_init() };
    action.sa_sigaction = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // 実行中は監視対象の他シグナルを遮断し、遅いシステムコールは再開させる。
    action.sa_mask = SignalSet::job_control()?.raw;
    action.sa_flags = libc::SA_RESTART;

    cerr(unsafe { libc::sigaction(signal, &action, std::ptr::null_mut()) })?;
    Ok(())
}

/// 監視対象シグナルのハンドラを既定動作に戻す。
///
/// fork した子が、マスクを戻す前に呼ぶ。exec 前に届いたシグナルは保留されたまま残り、
/// マスク解除時に既定動作で配送される。async-signal-safe。
pub fn reset_handlers() {
    for signal in SignalNotifier::SIGNALS {
        let mut action = unsafe { MaybeUninit::<libc::sigaction>::zeroed().assume_init() };
        action.sa_sigaction = libc::SIG_DFL;
        unsafe {
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(signal, &action, std::ptr::null_mut());
        }
    }
}

// ── シグナルマスク ───────────────────────────────────────────────────

/// `sigprocmask` 用のシグナル集合。
pub struct SignalSet {
    raw: libc::sigset_t,
}

impl SignalSet {
    pub fn empty() -> io::Result<Self> {
        let mut raw = MaybeUninit::<libc::sigset_t>::zeroed();
        cerr(unsafe { libc::sigemptyset(raw.as_mut_ptr()) })?;
        Ok(Self {
            raw: unsafe { raw.assume_init() },
        })
    }

    pub fn add(mut self, signal: SignalNumber) -> io::Result<Self> {
        cerr(unsafe { libc::sigaddset(&mut self.raw, signal) })?;
        Ok(self)
    }

    /// ジョブ登録が終わるまで遅延させる SIGCHLD / SIGINT / SIGTSTP の集合。
    pub fn job_control() -> io::Result<Self> {
        SignalNotifier::SIGNALS
            .into_iter()
            .try_fold(Self::empty()?, |set, signal| set.add(signal))
    }

    pub fn contains(&self, signal: SignalNumber) -> bool {
        unsafe { libc::sigismember(&self.raw, signal) == 1 }
    }

    fn sigprocmask(&self, how: libc::c_int) -> io::Result<Self> {
        let mut original = MaybeUninit::<libc::sigset_t>::zeroed();
        cerr(unsafe { libc::sigprocmask(how, &self.raw, original.as_mut_ptr()) })?;
        Ok(Self {
            raw: unsafe { original.assume_init() },
        })
    }

    /// この集合を遮断し、元のマスクを戻す [`MaskGuard`] を返す。
    pub fn block(&self) -> io::Result<MaskGuard> {
        let original = self.sigprocmask(libc::SIG_BLOCK)?;
        Ok(MaskGuard { original })
    }

    /// マスクをちょうどこの集合にする。async-signal-safe。
    pub fn set_mask(&self) -> io::Result<()> {
        self.sigprocmask(libc::SIG_SETMASK).map(|_| ())
    }

    /// 現在のマスクを返す。
    pub fn current() -> io::Result<Self> {
        let mut current = MaybeUninit::<libc::sigset_t>::zeroed();
        cerr(unsafe {
            libc::sigprocmask(libc::SIG_BLOCK, std::ptr::null(), current.as_mut_ptr())
        })?;
        Ok(Self {
            raw: unsafe { current.assume_init() },
        })
    }
}

/// drop 時に遮断前のマスクへ戻す。
pub struct MaskGuard {
    original: SignalSet,
}

impl MaskGuard {
    /// 遮断前のマスク。fork した子が exec 前に復元するために使う。
    pub fn original(&self) -> &SignalSet {
        &self.original
    }
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        if let Err(err) = self.original.set_mask() {
            log::warn!("cannot restore signal mask: {err}");
        }
    }
}
