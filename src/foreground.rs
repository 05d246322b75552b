//! フォアグラウンド制御: ジョブ完了の待機、シグナル転送、`fg` / `bg` による再開。
//!
//! 待機はタイマーでのポーリングではなく、[`SignalNotifier`] の self-pipe 上で
//! シグナル到着まで眠る。起きるたびに保留中の割り込みを転送し、reap してから
//! フォアグラウンドスロットが空いたかを確認する。

use std::io::Write;

use crate::error::{Result, ShellError};
use crate::job::{JobId, JobState, JobTable, Transition};
use crate::reaper;
use crate::signal::{SignalKind, SignalNotifier};
use crate::sys;
use crate::wait::WaitAny;

/// フォアグラウンドジョブのプロセスグループに `kind` を送る。
///
/// フォアグラウンドジョブがなければ何もせず `false` を返す。
pub fn forward_signal(jobs: &JobTable, kind: SignalKind) -> Result<bool> {
    let Some(job) = jobs.foreground() else {
        return Ok(false);
    };
    log::debug!("forwarding SIG{} to job [{}] pgid={}", kind.name(), job.id(), job.pgid());
    signal_group(job.pgid(), kind)?;
    Ok(true)
}

/// グループにシグナルを送る。既に全員終了していた場合（ESRCH）は成功扱い。
pub(crate) fn signal_group(pgid: sys::ProcessId, kind: SignalKind) -> Result<()> {
    match sys::killpg(pgid, kind.number()) {
        Ok(()) => Ok(()),
        Err(err) if err.raw_os_error() == Some(libc::ESRCH) => {
            log::debug!("process group {pgid} already gone");
            Ok(())
        }
        Err(source) => Err(ShellError::Signal {
            target: format!("-{pgid}"),
            source,
        }),
    }
}

/// 保留中の割り込みを転送し、状態変化を reap する。
///
/// 対話ループのシグナル受信時と [`wait_foreground`] の各周回で呼ばれる。
pub fn service<W: Write>(jobs: &mut JobTable, signals: &SignalNotifier, out: &mut W) -> Result<()> {
    let pending = signals.take_pending();
    if pending.child() {
        log::trace!("SIGCHLD pending");
    }
    for kind in pending.forwards() {
        if !forward_signal(jobs, kind)? {
            log::debug!("SIG{} with no foreground job", kind.name());
        }
    }
    reaper::reap(jobs, &mut WaitAny, out)?;
    Ok(())
}

/// フォアグラウンドジョブがいなくなるまでブロックする。
///
/// ジョブが停止して抜けた場合は `[jid] Stopped <cmd>` を出力する。
pub fn wait_foreground<W: Write>(
    jobs: &mut JobTable,
    signals: &SignalNotifier,
    out: &mut W,
) -> Result<()> {
    let Some(id) = jobs.foreground().map(|j| j.id()) else {
        return Ok(());
    };

    loop {
        service(jobs, signals, out)?;
        if jobs.foreground().is_none() {
            break;
        }
        signals.wait().map_err(ShellError::Io)?;
    }

    if let Some(job) = jobs.lookup_by_jid(id) {
        if job.state() == JobState::Stopped {
            writeln!(out, "[{}] Stopped {}", job.id(), job.command())?;
            out.flush()?;
        }
    }
    Ok(())
}

/// 停止中（または実行中）のジョブを再開する。`fg` と `bg` の本体。
///
/// `foreground` なら完了か停止まで待つ。
pub fn continue_job<W: Write>(
    jobs: &mut JobTable,
    signals: &SignalNotifier,
    id: JobId,
    foreground: bool,
    out: &mut W,
) -> Result<()> {
    let transition = if foreground {
        Transition::Foreground
    } else {
        Transition::Background
    };
    jobs.set_state(id, transition)?;

    let Some(job) = jobs.lookup_by_jid(id) else {
        return Err(ShellError::InvalidTarget(format!("%{id}")));
    };
    let pgid = job.pgid();
    if foreground {
        writeln!(out, "{}", job.command())?;
    } else {
        writeln!(out, "[{}] {} &", job.id(), job.command())?;
    }
    out.flush()?;

    signal_group(pgid, SignalKind::Continue)?;
    if foreground {
        wait_foreground(jobs, signals, out)?;
    }
    Ok(())
}
