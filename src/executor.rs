//! パイプライン実行: パイプ接続、プロセスグループ設定、ジョブ登録。
//!
//! - [`run_pipeline`]: コマンド列を 1 ジョブとして起動する
//!   - fork 前に argv と exec 失敗時の診断を用意する（[`Stage::new`]）
//!   - SIGCHLD / SIGINT / SIGTSTP をジョブ登録が終わるまでブロックする
//!   - 全ステージが先頭プロセスの PID をプロセスグループ ID として共有する
//!   - foreground: [`wait_foreground`] で完了か停止まで待機
//!   - background: `[jid] lastPid` を出力して即座に返る

use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use crate::error::{Result, ShellError};
use crate::foreground::{signal_group, wait_foreground};
use crate::job::{JobId, JobState, JobTable};
use crate::parser::{CommandSpec, ParseError};
use crate::signal::{SignalKind, SignalNotifier, SignalSet};
use crate::spawn::{Stage, Wiring};
use crate::sys::{self, ForkResult, ProcessId};

/// コマンド列をパイプでつないで起動し、ジョブとして登録する。
///
/// 空のコマンド列は何もせず `Ok(None)` を返す。プログラム名のないステージ、段数超過、
/// テーブル満杯は fork 前に拒否する。
pub fn run_pipeline<W: Write>(
    jobs: &mut JobTable,
    signals: &SignalNotifier,
    commands: &[CommandSpec],
    background: bool,
    cmdline: &str,
    out: &mut W,
) -> Result<Option<JobId>> {
    if commands.is_empty() {
        return Ok(None);
    }
    if commands.iter().any(|c| c.args.is_empty()) {
        return Err(ParseError::EmptyPipelineSegment.into());
    }
    if commands.len() > jobs.max_stages() {
        return Err(ShellError::TooManyStages {
            stages: commands.len(),
            max: jobs.max_stages(),
        });
    }
    if jobs.is_full() {
        return Err(ShellError::TableFull {
            capacity: jobs.capacity(),
        });
    }

    let stages: Vec<Stage> = commands.iter().map(|c| Stage::new(&c.args)).collect();

    // ── fork 区間: ジョブ登録まで子の状態変化シグナルを保留する ──
    let guard = SignalSet::job_control()
        .and_then(|set| set.block())
        .map_err(ShellError::exhausted("sigprocmask"))?;

    let pipes = open_pipes(stages.len() - 1)?;
    let pipe_fds: Vec<RawFd> = pipes
        .iter()
        .flat_map(|(r, w)| [r.as_raw_fd(), w.as_raw_fd()])
        .collect();

    let mut pids: Vec<ProcessId> = Vec::with_capacity(stages.len());
    for (i, stage) in stages.iter().enumerate() {
        let pgid = pids.first().copied().unwrap_or(0);
        let wiring = Wiring {
            pgid,
            stdin: i.checked_sub(1).map(|prev| pipes[prev].0.as_raw_fd()),
            stdout: pipes.get(i).map(|(_, w)| w.as_raw_fd()),
            pipe_fds: &pipe_fds,
            mask: guard.original(),
        };

        match sys::fork() {
            Ok(ForkResult::Child) => stage.exec_child(wiring),
            Ok(ForkResult::Parent(pid)) => {
                let group = if pgid == 0 { pid } else { pgid };
                // 子が先に setpgid / exec 済みなら失敗するが結果は同じ。
                let _ = sys::setpgid(pid, group);
                log::debug!("forked {} as pid {pid} (pgid {group})", commands[i].args[0]);
                pids.push(pid);
            }
            Err(err) => {
                if let Some(&leader) = pids.first() {
                    let _ = signal_group(leader, SignalKind::Kill);
                }
                return Err(ShellError::exhausted("fork")(err));
            }
        }
    }
    drop(pipes);

    let pgid = pids[0];
    let state = if background {
        JobState::Background
    } else {
        JobState::Foreground
    };
    let id = match jobs.add(&pids, pgid, state, cmdline) {
        Ok(id) => id,
        Err(err) => {
            log::warn!("could not register pgid {pgid}: {err}");
            let _ = signal_group(pgid, SignalKind::Kill);
            return Err(err);
        }
    };
    drop(guard);

    if background {
        let last_pid = pids[pids.len() - 1];
        writeln!(out, "[{id}] {last_pid}")?;
        out.flush()?;
    } else {
        wait_foreground(jobs, signals, out)?;
    }
    Ok(Some(id))
}

/// `count` 本のパイプを作る。途中で失敗したら作成済みの分は drop で閉じられる。
fn open_pipes(count: usize) -> Result<Vec<(OwnedFd, OwnedFd)>> {
    let mut pipes = Vec::with_capacity(count);
    for _ in 0..count {
        pipes.push(sys::pipe().map_err(ShellError::exhausted("pipe"))?);
    }
    Ok(pipes)
}
