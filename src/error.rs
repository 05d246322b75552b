//! シェル全体で使うエラー型。
//!
//! 致命的なもの（[`ShellError::ResourceExhaustion`]）はバイナリ側でシェルを終了させ、
//! それ以外は診断を出してプロンプトに戻る。

use std::io;

use thiserror::Error;

use crate::job::JobId;
use crate::parser::ParseError;

pub type Result<T> = std::result::Result<T, ShellError>;

#[derive(Debug, Error)]
pub enum ShellError {
    /// `fork` / `pipe` などプロセス資源の確保に失敗した。継続不能。
    #[error("{op}: {source}")]
    ResourceExhaustion {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// ジョブテーブルに空きスロットがない。
    #[error("job table full ({capacity} jobs)")]
    TableFull { capacity: usize },

    /// プロセスを 1 つも持たないジョブは登録できない。
    #[error("job has no processes")]
    EmptyJob,

    /// 1 ジョブあたりのプロセス数上限を超えるパイプライン。
    #[error("pipeline has {stages} stages, at most {max} allowed")]
    TooManyStages { stages: usize, max: usize },

    /// 既に別のフォアグラウンドジョブが存在する。
    #[error("job [{0}] is already in the foreground")]
    ForegroundBusy(JobId),

    /// `%N` / `-pgid` / `pid` が追跡中のジョブに解決できない。
    #[error("{0}: no such job")]
    InvalidTarget(String),

    /// ビルトインの引数が不正。
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// ESRCH 以外の理由でシグナル送信に失敗した。
    #[error("kill {target}: {source}")]
    Signal {
        target: String,
        #[source]
        source: io::Error,
    },

    /// 通知やレポートの書き込み失敗。
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ShellError {
    pub(crate) fn exhausted(op: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::ResourceExhaustion { op, source }
    }

    /// シェルを終了させるべきエラーなら `true`。
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ResourceExhaustion { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_resource_exhaustion_is_fatal() {
        let fatal = ShellError::exhausted("fork")(io::Error::from_raw_os_error(libc::EAGAIN));
        assert!(fatal.is_fatal());
        assert!(fatal.to_string().starts_with("fork: "));

        assert!(!ShellError::TableFull { capacity: 16 }.is_fatal());
        assert!(!ShellError::InvalidTarget("%3".into()).is_fatal());
    }

    #[test]
    fn invalid_target_message() {
        let err = ShellError::InvalidTarget("%1".into());
        assert_eq!(err.to_string(), "%1: no such job");
    }
}
