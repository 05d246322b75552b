//! シェルの実行状態を保持するモジュール。
//!
//! [`Shell`] はジョブテーブルと設定、シグナル通知を束ね、対話ループから 1 行ずつ
//! [`eval_line`](Shell::eval_line) で評価される。ジョブテーブルを変更するのは
//! このメインフローだけで、シグナルハンドラは触れない。

use std::io::Write;

use crate::builtins;
use crate::config::Config;
use crate::error::{Result, ShellError};
use crate::executor;
use crate::foreground;
use crate::job::JobTable;
use crate::parser;
use crate::signal::SignalNotifier;

/// シェルの実行状態。対話ループ全体で共有される。
pub struct Shell {
    /// ジョブテーブル。容量は起動時設定で固定。
    pub jobs: JobTable,
    pub config: Config,
    /// SIGCHLD / SIGINT / SIGTSTP の到着通知。
    pub signals: &'static SignalNotifier,
    /// `quit` ビルトインで true にセットされ、対話ループを終了させる。
    pub should_exit: bool,
}

impl Shell {
    /// シグナルハンドラを登録してシェルを作る。
    pub fn new(config: Config) -> Result<Self> {
        let signals = SignalNotifier::install().map_err(ShellError::exhausted("sigaction"))?;
        Ok(Self {
            jobs: JobTable::new(config.max_jobs, config.max_stages),
            config,
            signals,
            should_exit: false,
        })
    }

    /// 1 行を評価する。`&` 区切りのジョブを順に起動し、最初のエラーで中断する。
    ///
    /// 単一コマンドのジョブはビルトインかどうかを先に確認する。
    pub fn eval_line<W: Write>(&mut self, line: &str, out: &mut W) -> Result<()> {
        for job in parser::parse_into_jobs(line) {
            if self.should_exit {
                break;
            }
            let commands = parser::parse_into_commands(job.text)?;
            if let [single] = commands.as_slice() {
                let argv: Vec<&str> = single.args.iter().map(String::as_str).collect();
                if let Some(result) = builtins::try_exec(self, &argv, out) {
                    result?;
                    continue;
                }
            }
            executor::run_pipeline(
                &mut self.jobs,
                self.signals,
                &commands,
                job.background,
                job.text,
                out,
            )?;
        }
        Ok(())
    }

    /// シグナル到着時の処理: 割り込みの転送と reap、完了通知の出力。
    pub fn service_signals<W: Write>(&mut self, out: &mut W) -> Result<()> {
        foreground::service(&mut self.jobs, self.signals, out)
    }

    /// `jobs` の出力行。ID 順。
    pub fn list_jobs(&self) -> Vec<String> {
        self.jobs.list().iter().map(|j| j.to_string()).collect()
    }
}
