//! ジョブテーブル。
//!
//! 固定容量のスロット配列でジョブを管理する純粋なデータ構造で、システムコールは呼ばない。
//! スロットは [`JobTable::new`] で一度だけ確保され、各操作は容量に比例した有界時間で終わる。
//!
//! 書き込むのは executor（[`JobTable::add`]）と reaper（[`JobTable::remove_process`] 等）の
//! 2 箇所だけ。どちらもメインフローから呼ばれ、シグナルハンドラからは触らない。

use std::fmt;

use crate::error::{Result, ShellError};
use crate::sys::ProcessId;

pub type JobId = usize;

// ── 状態 ─────────────────────────────────────────────────────────────

/// ジョブの状態。`Foreground` を持てるのはテーブル全体で高々 1 ジョブ。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Foreground,
    Background,
    Stopped,
}

/// 状態遷移のきっかけ。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// SIGTSTP / SIGSTOP で停止した。
    Stop,
    /// `fg` でフォアグラウンドに移す。
    Foreground,
    /// `bg` や `kill -CONT` でバックグラウンド実行に移す。
    Background,
}

impl JobState {
    /// 遷移後の状態。全ての組み合わせで定義される。
    pub fn apply(self, transition: Transition) -> JobState {
        match (self, transition) {
            (_, Transition::Stop) => JobState::Stopped,
            (_, Transition::Foreground) => JobState::Foreground,
            (_, Transition::Background) => JobState::Background,
        }
    }

    /// `jobs` 表示用の単語。
    pub fn word(self) -> &'static str {
        match self {
            JobState::Foreground => "Foreground",
            JobState::Background => "Running",
            JobState::Stopped => "Stopped",
        }
    }
}

// ── ジョブ ───────────────────────────────────────────────────────────

/// 1 回の起動単位（単一コマンドまたはパイプライン）。
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    id: JobId,
    pgid: ProcessId,
    /// まだ reap されていないプロセス。ステージ順。
    pids: Vec<ProcessId>,
    last_pid: ProcessId,
    state: JobState,
    command: String,
    /// いずれかのプロセスがシグナルで終了した。
    killed: bool,
}

impl Job {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// 全プロセスが共有するプロセスグループ ID。作成後は変わらない。
    pub fn pgid(&self) -> ProcessId {
        self.pgid
    }

    pub fn pids(&self) -> &[ProcessId] {
        &self.pids
    }

    /// 最終ステージの PID。バックグラウンド起動時の `[N] pid` 表示に使う。
    pub fn last_pid(&self) -> ProcessId {
        self.last_pid
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn killed(&self) -> bool {
        self.killed
    }
}

/// `[jid] <state-word> <commandline> &`
impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {} &", self.id, self.state.word(), self.command)
    }
}

/// [`JobTable::remove_process`] の結果。
#[derive(Debug, PartialEq)]
pub enum Removal {
    /// どのジョブにも属さない PID だった。
    NotFound,
    /// PID を消したがジョブにはまだ生きたプロセスが残っている。
    Cleared(JobId),
    /// 最後のプロセスだったのでジョブごと削除した。
    JobRemoved(Job),
}

// ── JobTable ─────────────────────────────────────────────────────────

/// 固定容量のジョブテーブル。[`Shell`](crate::shell::Shell) が 1 つ所有し、参照で渡す。
pub struct JobTable {
    slots: Vec<Option<Job>>,
    max_stages: usize,
}

impl JobTable {
    /// `capacity` 個のジョブ、1 ジョブあたり `max_stages` 個のプロセスを保持できるテーブル。
    pub fn new(capacity: usize, max_stages: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            max_stages,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn max_stages(&self) -> usize {
        self.max_stages
    }

    pub fn len(&self) -> usize {
        self.jobs().count()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().next().is_none()
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.slots.iter().flatten()
    }

    fn jobs_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.slots.iter_mut().flatten()
    }

    /// 次に割り当てるジョブ ID。
    ///
    /// 生きているジョブの最大 ID + 1。容量を超える場合は `1..=capacity` の最小未使用 ID に戻る。
    fn next_id(&self) -> JobId {
        let candidate = self.jobs().map(|j| j.id).max().unwrap_or(0) + 1;
        if candidate <= self.capacity() {
            return candidate;
        }
        (1..=self.capacity())
            .find(|&id| self.lookup_by_jid(id).is_none())
            .unwrap_or(candidate)
    }

    /// 最初の空きスロットにジョブを登録し、割り当てた ID を返す。
    pub fn add(
        &mut self,
        pids: &[ProcessId],
        pgid: ProcessId,
        state: JobState,
        command: &str,
    ) -> Result<JobId> {
        if pids.is_empty() {
            return Err(ShellError::EmptyJob);
        }
        if pids.len() > self.max_stages {
            return Err(ShellError::TooManyStages {
                stages: pids.len(),
                max: self.max_stages,
            });
        }
        if state == JobState::Foreground {
            if let Some(fg) = self.foreground() {
                return Err(ShellError::ForegroundBusy(fg.id));
            }
        }

        let id = self.next_id();
        let capacity = self.capacity();
        let max_stages = self.max_stages;
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(ShellError::TableFull { capacity })?;

        let mut job_pids = Vec::with_capacity(max_stages);
        job_pids.extend_from_slice(pids);
        *slot = Some(Job {
            id,
            pgid,
            last_pid: pids[pids.len() - 1],
            pids: job_pids,
            state,
            command: command.to_string(),
            killed: false,
        });
        log::debug!("added job [{id}] pgid={pgid} pids={pids:?} state={state:?}");
        Ok(id)
    }

    /// `pid` を保持しているジョブから取り除く。空になったジョブは削除して返す。
    pub fn remove_process(&mut self, pid: ProcessId) -> Removal {
        if pid < 1 {
            return Removal::NotFound;
        }
        let Some(slot) = self
            .slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|j| j.pids.contains(&pid)))
        else {
            return Removal::NotFound;
        };
        let Some(job) = slot.as_mut() else {
            return Removal::NotFound;
        };

        job.pids.retain(|&p| p != pid);
        if !job.pids.is_empty() {
            return Removal::Cleared(job.id);
        }
        match slot.take() {
            Some(job) => {
                log::debug!("removed job [{}]", job.id);
                Removal::JobRemoved(job)
            }
            None => Removal::NotFound,
        }
    }

    pub fn lookup_by_pid(&self, pid: ProcessId) -> Option<&Job> {
        if pid < 1 {
            return None;
        }
        self.jobs().find(|j| j.pids.contains(&pid))
    }

    pub fn lookup_by_jid(&self, id: JobId) -> Option<&Job> {
        if id < 1 {
            return None;
        }
        self.jobs().find(|j| j.id == id)
    }

    pub fn lookup_by_pgid(&self, pgid: ProcessId) -> Option<&Job> {
        if pgid < 1 {
            return None;
        }
        self.jobs().find(|j| j.pgid == pgid)
    }

    pub fn foreground(&self) -> Option<&Job> {
        self.jobs().find(|j| j.state == JobState::Foreground)
    }

    /// 最も新しい（ID が最大の）ジョブ。`fg` / `bg` の引数省略時の対象。
    pub fn current(&self) -> Option<&Job> {
        self.jobs().max_by_key(|j| j.id)
    }

    /// ジョブ ID 順の一覧。
    pub fn list(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs().collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    /// ジョブの状態を遷移させ、遷移後の状態を返す。
    ///
    /// 別のジョブがフォアグラウンドにいる間は `Foreground` への遷移を拒否する。
    pub fn set_state(&mut self, id: JobId, transition: Transition) -> Result<JobState> {
        if transition == Transition::Foreground {
            if let Some(fg) = self.foreground().filter(|fg| fg.id != id) {
                return Err(ShellError::ForegroundBusy(fg.id));
            }
        }
        let job = self
            .jobs_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| ShellError::InvalidTarget(format!("%{id}")))?;
        job.state = job.state.apply(transition);
        Ok(job.state)
    }

    /// `pid` を含むジョブを停止状態にする。対象がなければ `None`。
    pub fn mark_stopped(&mut self, pid: ProcessId) -> Option<JobId> {
        let job = self.jobs_mut().find(|j| j.pids.contains(&pid))?;
        job.state = job.state.apply(Transition::Stop);
        Some(job.id)
    }

    /// `pid` がシグナルで終了したことを記録する。
    pub fn note_signaled(&mut self, pid: ProcessId) {
        if let Some(job) = self.jobs_mut().find(|j| j.pids.contains(&pid)) {
            job.killed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn table() -> JobTable {
        JobTable::new(4, 3)
    }

    #[test]
    fn add_assigns_increasing_ids() {
        let mut t = table();
        assert_eq!(t.add(&[100], 100, JobState::Background, "a").unwrap(), 1);
        assert_eq!(t.add(&[200, 201], 200, JobState::Background, "b").unwrap(), 2);
        assert_eq!(t.len(), 2);
        assert_eq!(t.lookup_by_pid(201).unwrap().id(), 2);
        assert_eq!(t.lookup_by_pgid(200).unwrap().pids(), &[200, 201]);
    }

    #[test]
    fn ids_are_not_reused_below_a_live_job() {
        let mut t = table();
        t.add(&[1], 1, JobState::Background, "a").unwrap();
        t.add(&[2], 2, JobState::Background, "b").unwrap();
        t.add(&[3], 3, JobState::Background, "c").unwrap();
        // 2 が空いても最大 ID (3) + 1 を使う
        assert!(matches!(t.remove_process(2), Removal::JobRemoved(_)));
        assert_eq!(t.add(&[4], 4, JobState::Background, "d").unwrap(), 4);
    }

    #[test]
    fn ids_restart_after_table_drains() {
        let mut t = table();
        t.add(&[1], 1, JobState::Background, "a").unwrap();
        t.add(&[2], 2, JobState::Background, "b").unwrap();
        t.remove_process(1);
        t.remove_process(2);
        assert!(t.is_empty());
        assert_eq!(t.add(&[3], 3, JobState::Background, "c").unwrap(), 1);
    }

    #[test]
    fn ids_wrap_within_capacity() {
        let mut t = table();
        for pid in 1..=4 {
            t.add(&[pid], pid, JobState::Background, "x").unwrap();
        }
        t.remove_process(2);
        // 最大 ID 4 は容量に等しいので、最小の空き ID 2 に戻る
        assert_eq!(t.add(&[5], 5, JobState::Background, "y").unwrap(), 2);
    }

    #[test]
    fn full_table_is_reported() {
        let mut t = table();
        for pid in 1..=4 {
            t.add(&[pid], pid, JobState::Background, "x").unwrap();
        }
        assert!(t.is_full());
        let err = t.add(&[9], 9, JobState::Background, "y").unwrap_err();
        assert!(matches!(err, ShellError::TableFull { capacity: 4 }));
    }

    #[test]
    fn too_many_stages_is_rejected() {
        let mut t = table();
        let err = t
            .add(&[1, 2, 3, 4], 1, JobState::Background, "a|b|c|d")
            .unwrap_err();
        assert!(matches!(err, ShellError::TooManyStages { stages: 4, max: 3 }));
        assert!(t.is_empty());
    }

    #[test]
    fn empty_job_is_rejected() {
        let mut t = table();
        let err = t.add(&[], 0, JobState::Background, "").unwrap_err();
        assert!(matches!(err, ShellError::EmptyJob));
        assert!(t.is_empty());
    }

    #[test]
    fn remove_process_deletes_job_on_last_pid() {
        let mut t = table();
        let id = t.add(&[10, 11, 12], 10, JobState::Background, "a | b | c").unwrap();

        assert_eq!(t.remove_process(11), Removal::Cleared(id));
        assert_eq!(t.remove_process(10), Removal::Cleared(id));
        assert_eq!(t.lookup_by_jid(id).unwrap().pids(), &[12]);

        let Removal::JobRemoved(job) = t.remove_process(12) else {
            panic!("last pid should remove the job");
        };
        assert_eq!(job.id(), id);
        assert_eq!(job.last_pid(), 12);
        assert!(t.lookup_by_jid(id).is_none());
        assert!(t.is_empty());
    }

    #[test]
    fn remove_unknown_pid_is_not_found() {
        let mut t = table();
        t.add(&[10], 10, JobState::Background, "a").unwrap();
        assert_eq!(t.remove_process(99), Removal::NotFound);
        assert_eq!(t.remove_process(0), Removal::NotFound);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn only_one_foreground_job() {
        let mut t = table();
        let fg = t.add(&[1], 1, JobState::Foreground, "fg").unwrap();
        let err = t.add(&[2], 2, JobState::Foreground, "fg2").unwrap_err();
        assert!(matches!(err, ShellError::ForegroundBusy(id) if id == fg));

        let bg = t.add(&[3], 3, JobState::Background, "bg").unwrap();
        assert!(matches!(
            t.set_state(bg, Transition::Foreground),
            Err(ShellError::ForegroundBusy(_))
        ));
        assert_eq!(t.foreground().unwrap().id(), fg);

        t.mark_stopped(1);
        assert!(t.foreground().is_none());
        assert_eq!(t.set_state(bg, Transition::Foreground).unwrap(), JobState::Foreground);
        assert_eq!(t.foreground().unwrap().id(), bg);
    }

    #[test]
    fn set_state_on_missing_job_is_invalid_target() {
        let mut t = table();
        assert!(matches!(
            t.set_state(7, Transition::Background),
            Err(ShellError::InvalidTarget(target)) if target == "%7"
        ));
    }

    #[test]
    fn transitions_are_total() {
        let states = [JobState::Foreground, JobState::Background, JobState::Stopped];
        for state in states {
            assert_eq!(state.apply(Transition::Stop), JobState::Stopped);
            assert_eq!(state.apply(Transition::Foreground), JobState::Foreground);
            assert_eq!(state.apply(Transition::Background), JobState::Background);
        }
    }

    #[test]
    fn list_is_ordered_and_formatted() {
        let mut t = table();
        t.add(&[1], 1, JobState::Background, "sleep 10").unwrap();
        t.add(&[2, 3], 2, JobState::Background, "cat | sort").unwrap();
        t.remove_process(1);
        t.add(&[4], 4, JobState::Background, "sleep 20").unwrap();
        t.mark_stopped(4);

        let lines: Vec<String> = t.list().iter().map(|j| j.to_string()).collect();
        assert_eq!(
            lines,
            vec![
                "[2] Running cat | sort &".to_string(),
                "[3] Stopped sleep 20 &".to_string(),
            ]
        );
        assert_eq!(t.current().unwrap().id(), 3);
    }

    #[test]
    fn note_signaled_marks_owning_job() {
        let mut t = table();
        t.add(&[5, 6], 5, JobState::Background, "a | b").unwrap();
        t.note_signaled(6);
        t.remove_process(5);
        let Removal::JobRemoved(job) = t.remove_process(6) else {
            panic!("job should be removed");
        };
        assert!(job.killed());
    }

    /// add / remove を任意に繰り返しても ID が重複しない。
    #[test]
    fn ids_stay_unique_under_churn() {
        let mut t = JobTable::new(5, 2);
        let mut next_pid = 1;
        let mut live: Vec<ProcessId> = Vec::new();
        for step in 0..200 {
            if step % 3 == 2 && !live.is_empty() {
                let pid = live.remove((step * 7) % live.len());
                t.remove_process(pid);
            } else if !t.is_full() {
                t.add(&[next_pid], next_pid, JobState::Background, "x").unwrap();
                live.push(next_pid);
                next_pid += 1;
            }

            let mut ids: Vec<JobId> = t.list().iter().map(|j| j.id()).collect();
            let before = ids.len();
            ids.dedup();
            assert_eq!(ids.len(), before);
            assert!(ids.iter().all(|&id| (1..=5).contains(&id)));
        }
    }
}
