//! ush — ジョブ制御付きの小さなシェル
//!
//! 対話ループ: プロンプト表示 → stdin とシグナル通知を `poll` → 1 行ずつ評価 → ループ
//!
//! シグナル（SIGCHLD / SIGINT / SIGTSTP）はハンドラが self-pipe に通知するだけで、
//! 転送・reap・完了通知はこのループ側で行う。プロンプトで入力待ちの間に
//! バックグラウンドジョブが終わっても、通知はすぐに表示される。

use std::io::{self, Write};
use std::os::fd::{AsRawFd, RawFd};

use ush::config::Config;
use ush::logger;
use ush::shell::Shell;
use ush::sys;

/// stdin から読んだバイト列を行に切り出す。
///
/// 行エディタを持たないので、`poll` と素の `read` で扱える形にしておく。
struct LineBuffer {
    fd: RawFd,
    pending: Vec<u8>,
}

impl LineBuffer {
    fn new(fd: RawFd) -> Self {
        Self {
            fd,
            pending: Vec::new(),
        }
    }

    /// 1 回だけ読む。EOF なら `false`。
    fn fill(&mut self) -> io::Result<bool> {
        let mut chunk = [0u8; 4096];
        let n = sys::read(self.fd, &mut chunk)?;
        self.pending.extend_from_slice(&chunk[..n]);
        Ok(n > 0)
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line[..end]).into_owned())
    }

    /// EOF 時に残った改行なしの行。
    fn take_rest(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

fn prompt(shell: &Shell) {
    let mut stdout = io::stdout().lock();
    let _ = write!(stdout, "{}", shell.config.prompt);
    let _ = stdout.flush();
}

/// 1 行を評価する。致命的なエラーならプロセスを終了する。
fn eval(shell: &mut Shell, line: &str) {
    let mut stdout = io::stdout().lock();
    if let Err(err) = shell.eval_line(line, &mut stdout) {
        eprintln!("ush: {err}");
        if err.is_fatal() {
            std::process::exit(1);
        }
    }
}

/// シグナル通知を処理する。完了通知を出したら `true`。
fn service(shell: &mut Shell) -> bool {
    let mut notices = Vec::new();
    if let Err(err) = shell.service_signals(&mut notices) {
        eprintln!("ush: {err}");
        if err.is_fatal() {
            std::process::exit(1);
        }
    }
    if notices.is_empty() {
        return false;
    }
    let mut stdout = io::stdout().lock();
    let _ = stdout.write_all(&notices);
    let _ = stdout.flush();
    true
}

fn main() {
    let (config, errors) = Config::from_env();
    logger::init(config.log_level);
    for err in errors {
        eprintln!("ush: {err}");
    }

    let mut shell = match Shell::new(config) {
        Ok(shell) => shell,
        Err(err) => {
            eprintln!("ush: {err}");
            std::process::exit(1);
        }
    };
    let signal_fd = shell.signals.as_raw_fd();
    let mut input = LineBuffer::new(libc::STDIN_FILENO);

    prompt(&shell);
    loop {
        let [stdin_ready, signal_ready] = match sys::poll_readable([input.fd, signal_fd], None) {
            Ok(ready) => ready,
            Err(err) => {
                eprintln!("ush: poll: {err}");
                std::process::exit(1);
            }
        };

        if signal_ready {
            if let Err(err) = shell.signals.drain() {
                log::warn!("draining signal notifications: {err}");
            }
            if service(&mut shell) {
                prompt(&shell);
            }
        }
        if !stdin_ready {
            continue;
        }

        let open = match input.fill() {
            Ok(open) => open,
            Err(err) => {
                eprintln!("ush: read: {err}");
                std::process::exit(1);
            }
        };
        while let Some(line) = input.next_line() {
            eval(&mut shell, &line);
            if shell.should_exit {
                return;
            }
            service(&mut shell);
            prompt(&shell);
        }
        if !open {
            if let Some(line) = input.take_rest() {
                eval(&mut shell, &line);
                service(&mut shell);
            }
            println!();
            return;
        }
    }
}
