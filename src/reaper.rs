//! 子プロセスの reap とジョブテーブルへの反映。
//!
//! SIGCHLD は複数の終了が 1 回の通知に合流しうるので、[`reap`] は呼ばれるたびに
//! 取得できる状態変化を全て取り出す。ブロックはしない。
//!
//! 完了通知はバックグラウンド実行中だったジョブについてだけ、ジョブ 1 つにつき 1 行出す。
//! フォアグラウンドジョブや停止中のジョブの終了では何も出さない。

use std::fmt;
use std::io::{self, Write};

use crate::job::{Job, JobId, JobState, JobTable, Removal};
use crate::wait::{ChildEvent, ChildStatusSource};

/// バックグラウンドジョブの完了通知。
#[derive(Debug, PartialEq)]
pub struct Notice<'a> {
    pub id: JobId,
    /// いずれかのプロセスがシグナルで終了した。
    pub killed: bool,
    pub command: &'a str,
}

impl<'a> Notice<'a> {
    fn for_job(job: &'a Job) -> Self {
        Self {
            id: job.id(),
            killed: job.killed(),
            command: job.command(),
        }
    }
}

/// `[jid] done <cmd>` / `[jid] killed <cmd>`
impl fmt::Display for Notice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = if self.killed { "killed" } else { "done" };
        write!(f, "[{}] {} {}", self.id, word, self.command)
    }
}

/// `source` から取れる状態変化を全て取り出してテーブルに反映する。
///
/// 戻り値は消滅（exit またはシグナル終了）したプロセスの数。
pub fn reap<S: ChildStatusSource, W: Write>(
    jobs: &mut JobTable,
    source: &mut S,
    out: &mut W,
) -> io::Result<usize> {
    let mut reaped = 0;
    while let Some((pid, event)) = source.next_change()? {
        log::debug!("child {pid} changed state: {event:?}");
        if let ChildEvent::Stopped(_) = event {
            if let Some(id) = jobs.mark_stopped(pid) {
                log::debug!("job [{id}] stopped");
            }
            continue;
        }
        if !event.is_terminal() {
            continue;
        }

        reaped += 1;
        if let ChildEvent::Signaled(_) = event {
            jobs.note_signaled(pid);
        }
        match jobs.remove_process(pid) {
            Removal::JobRemoved(job) if job.state() == JobState::Background => {
                writeln!(out, "{}", Notice::for_job(&job))?;
            }
            Removal::NotFound => log::debug!("reaped untracked child {pid}"),
            _ => {}
        }
    }
    out.flush()?;
    Ok(reaped)
}
