//! ビルトインコマンドの実装。
//!
//! ビルトインは fork/exec を経由せずシェル本体のプロセスで直接実行される。
//! `try_exec()` が `Some(result)` を返せばビルトインとして処理済み、
//! `None` なら外部コマンドとして executor に委ねる。
//!
//! | コマンド | 動作 |
//! |----------|------|
//! | `quit` | シェルを終了する |
//! | `jobs` | ジョブ一覧を表示する |
//! | `kill [-SIG] target` | ジョブにシグナルを送る（既定 TERM） |
//! | `fg [%N]` | ジョブをフォアグラウンドで再開して待つ |
//! | `bg [%N]` | ジョブをバックグラウンドで再開する |

use std::fmt;
use std::io::Write;

use crate::error::{Result, ShellError};
use crate::foreground::{self, signal_group};
use crate::job::{JobId, JobState, JobTable, Transition};
use crate::shell::Shell;
use crate::signal::SignalKind;
use crate::sys::ProcessId;

/// ビルトインコマンドの実行を試みる。
///
/// 戻り値:
/// - `Some(result)` — ビルトインとして実行済み
/// - `None` — 該当するビルトインなし（外部コマンドとして実行すべき）
pub fn try_exec<W: Write>(shell: &mut Shell, args: &[&str], out: &mut W) -> Option<Result<()>> {
    let result = match *args.first()? {
        "quit" => {
            shell.should_exit = true;
            Ok(())
        }
        "jobs" => builtin_jobs(shell, out),
        "kill" => builtin_kill(&mut shell.jobs, args),
        "fg" => builtin_continue(shell, args, true, out),
        "bg" => builtin_continue(shell, args, false, out),
        _ => return None,
    };
    Some(result)
}

/// `jobs` — `[jid] <state> <cmd> &` を ID 順に出力する。
fn builtin_jobs<W: Write>(shell: &Shell, out: &mut W) -> Result<()> {
    for line in shell.list_jobs() {
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(())
}

// ── kill ───────────────────────────────────────────────────────────

/// `kill` の送信先。どの形式でも追跡中のジョブに解決できなければならない。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Target {
    /// `%jid`
    Job(JobId),
    /// `-pgid`
    Group(ProcessId),
    /// `pid`
    Process(ProcessId),
}

impl Target {
    pub fn parse(arg: &str) -> Option<Self> {
        if let Some(id) = arg.strip_prefix('%') {
            return id.parse().ok().map(Self::Job);
        }
        if let Some(pgid) = arg.strip_prefix('-') {
            return pgid.parse().ok().filter(|&p| p > 0).map(Self::Group);
        }
        arg.parse().ok().filter(|&p| p > 0).map(Self::Process)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Job(id) => write!(f, "%{id}"),
            Self::Group(pgid) => write!(f, "-{pgid}"),
            Self::Process(pid) => write!(f, "{pid}"),
        }
    }
}

const KILL_USAGE: &str = "kill: usage: kill [-SIG] %jid | -pgid | pid";

/// `kill [-SIG] target`
///
/// 引数が 2 つなら先頭はシグナル指定、1 つなら送信先（`-pgid` を含む）。
fn builtin_kill(jobs: &mut JobTable, args: &[&str]) -> Result<()> {
    let (kind, target) = match args {
        [_, target] => (SignalKind::Terminate, *target),
        [_, flag, target] => {
            let kind = flag
                .strip_prefix('-')
                .and_then(SignalKind::parse)
                .ok_or_else(|| {
                    ShellError::Usage(format!("kill: {flag}: invalid signal specification"))
                })?;
            (kind, *target)
        }
        _ => return Err(ShellError::Usage(KILL_USAGE.to_string())),
    };
    let target = Target::parse(target).ok_or_else(|| {
        ShellError::Usage(format!(
            "kill: {target}: arguments must be process or job IDs"
        ))
    })?;
    signal_job(jobs, target, kind).map(drop)
}

/// `target` が指すジョブに `kind` を送り、対象ジョブの ID を返す。
///
/// どの形式でもジョブのプロセスグループ全体に送る。停止中のジョブに CONT を送った場合はバックグラウンドに戻す。
pub fn signal_job(jobs: &mut JobTable, target: Target, kind: SignalKind) -> Result<JobId> {
    let job = match target {
        Target::Job(id) => jobs.lookup_by_jid(id),
        Target::Group(pgid) => jobs.lookup_by_pgid(pgid),
        Target::Process(pid) => jobs.lookup_by_pid(pid),
    }
    .ok_or_else(|| ShellError::InvalidTarget(target.to_string()))?;
    let (id, pgid, state) = (job.id(), job.pgid(), job.state());

    log::debug!("kill -{} {target} (job [{id}] pgid={pgid})", kind.name());
    signal_group(pgid, kind)?;

    if kind == SignalKind::Continue && state == JobState::Stopped {
        jobs.set_state(id, Transition::Background)?;
    }
    Ok(id)
}

// ── fg / bg ────────────────────────────────────────────────────────

/// `fg [%N]` / `bg [%N]` — 引数省略時は最新のジョブが対象。
fn builtin_continue<W: Write>(
    shell: &mut Shell,
    args: &[&str],
    foreground: bool,
    out: &mut W,
) -> Result<()> {
    let name = args[0];
    let id = match args {
        [_] => shell
            .jobs
            .current()
            .map(|j| j.id())
            .ok_or_else(|| ShellError::Usage(format!("{name}: no current job")))?,
        [_, arg] => {
            let digits = arg.strip_prefix('%').unwrap_or(arg);
            let id: JobId = digits.parse().map_err(|_| {
                ShellError::Usage(format!("{name}: {arg}: argument must be a %jobid"))
            })?;
            if shell.jobs.lookup_by_jid(id).is_none() {
                return Err(ShellError::InvalidTarget(format!("%{id}")));
            }
            id
        }
        _ => return Err(ShellError::Usage(format!("{name}: usage: {name} [%N]"))),
    };
    foreground::continue_job(&mut shell.jobs, shell.signals, id, foreground, out)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::Config;
    use crate::testing::{drain_until_empty, process_lock, reap_until};

    fn shell() -> Shell {
        Shell::new(Config::default()).unwrap()
    }

    fn run(shell: &mut Shell, line: &str) -> (Result<()>, String) {
        let args: Vec<&str> = line.split_whitespace().collect();
        let mut out = Vec::new();
        let result = try_exec(shell, &args, &mut out).expect("builtin");
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn unknown_command_is_not_builtin() {
        let mut sh = shell();
        let mut out = Vec::new();
        assert!(try_exec(&mut sh, &["ls", "-l"], &mut out).is_none());
        assert!(try_exec(&mut sh, &[], &mut out).is_none());
    }

    #[test]
    fn quit_sets_exit_flag() {
        let mut sh = shell();
        let (result, _) = run(&mut sh, "quit");
        result.unwrap();
        assert!(sh.should_exit);
    }

    #[test]
    fn jobs_lists_in_id_order() {
        let mut sh = shell();
        sh.jobs.add(&[20], 20, JobState::Stopped, "vi notes").unwrap();
        sh.jobs
            .add(&[30, 31], 30, JobState::Background, "yes | head")
            .unwrap();
        let (result, out) = run(&mut sh, "jobs");
        result.unwrap();
        assert_eq!(out, "[1] Stopped vi notes &\n[2] Running yes | head &\n");
    }

    #[test]
    fn target_grammar() {
        assert_eq!(Target::parse("%3"), Some(Target::Job(3)));
        assert_eq!(Target::parse("-1200"), Some(Target::Group(1200)));
        assert_eq!(Target::parse("1200"), Some(Target::Process(1200)));
        assert_eq!(Target::parse("%"), None);
        assert_eq!(Target::parse("-0"), None);
        assert_eq!(Target::parse("abc"), None);
        assert_eq!(Target::Group(7).to_string(), "-7");
    }

    #[test]
    fn kill_unknown_job_is_invalid_target() {
        let mut sh = shell();
        let (result, _) = run(&mut sh, "kill %1");
        assert!(matches!(result, Err(ShellError::InvalidTarget(t)) if t == "%1"));

        let (result, _) = run(&mut sh, "kill -9 -424242");
        assert!(matches!(result, Err(ShellError::InvalidTarget(t)) if t == "-424242"));
    }

    #[test]
    fn kill_usage_errors() {
        let mut sh = shell();
        assert!(matches!(run(&mut sh, "kill").0, Err(ShellError::Usage(_))));
        assert!(matches!(
            run(&mut sh, "kill -9 %1 %2").0,
            Err(ShellError::Usage(_))
        ));
        assert!(matches!(
            run(&mut sh, "kill -BOGUS %1").0,
            Err(ShellError::Usage(m)) if m == "kill: -BOGUS: invalid signal specification"
        ));
        assert!(matches!(
            run(&mut sh, "kill 9 %1").0,
            Err(ShellError::Usage(_))
        ));
        assert!(matches!(
            run(&mut sh, "kill job1").0,
            Err(ShellError::Usage(_))
        ));
    }

    #[test]
    fn fg_bg_without_jobs() {
        let mut sh = shell();
        assert!(matches!(run(&mut sh, "fg").0, Err(ShellError::Usage(_))));
        assert!(matches!(
            run(&mut sh, "bg %4").0,
            Err(ShellError::InvalidTarget(t)) if t == "%4"
        ));
        assert!(matches!(run(&mut sh, "bg four").0, Err(ShellError::Usage(_))));
    }

    #[test]
    fn kill_cont_resumes_stopped_job_then_kill_ends_it() {
        let _guard = process_lock();
        let mut sh = shell();
        sh.signals.take_pending();
        let mut out = Vec::new();

        sh.eval_line("sleep 30 &", &mut out).unwrap();
        out.clear();
        let job = sh.jobs.lookup_by_jid(1).unwrap();
        let (pgid, pid) = (job.pgid(), job.last_pid());

        signal_group(pgid, SignalKind::Stop).unwrap();
        reap_until(&mut sh.jobs, sh.signals, &mut out, |jobs| {
            jobs.lookup_by_pid(pid).map(|j| j.state()) == Some(JobState::Stopped)
        });
        assert!(out.is_empty());

        let (result, _) = run(&mut sh, "kill -CONT %1");
        result.unwrap();
        assert_eq!(sh.jobs.lookup_by_jid(1).unwrap().state(), JobState::Background);

        let (result, _) = run(&mut sh, &format!("kill -SIGKILL -{pgid}"));
        result.unwrap();
        drain_until_empty(&mut sh.jobs, sh.signals, &mut out);
        assert_eq!(String::from_utf8(out).unwrap(), "[1] killed sleep 30\n");
    }

    #[test]
    fn kill_by_pid_defaults_to_term() {
        let _guard = process_lock();
        let mut sh = shell();
        sh.signals.take_pending();
        let mut out = Vec::new();

        sh.eval_line("sleep 30 &", &mut out).unwrap();
        out.clear();
        let pid = sh.jobs.lookup_by_jid(1).unwrap().last_pid();

        let id = signal_job(&mut sh.jobs, Target::Process(pid), SignalKind::Terminate).unwrap();
        assert_eq!(id, 1);
        drain_until_empty(&mut sh.jobs, sh.signals, &mut out);
        assert_eq!(String::from_utf8(out).unwrap(), "[1] killed sleep 30\n");
    }

    #[test]
    fn kill_by_pid_reaches_every_stage() {
        let _guard = process_lock();
        let mut sh = shell();
        sh.signals.take_pending();
        let mut out = Vec::new();

        sh.eval_line("sleep 30 | sleep 30 &", &mut out).unwrap();
        out.clear();
        let first = sh.jobs.lookup_by_jid(1).unwrap().pids()[0];

        let (result, _) = run(&mut sh, &format!("kill -KILL {first}"));
        result.unwrap();
        // pid は 1 段目でも、シグナルはグループ全体に届く。
        drain_until_empty(&mut sh.jobs, sh.signals, &mut out);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[1] killed sleep 30 | sleep 30\n"
        );
    }
}
