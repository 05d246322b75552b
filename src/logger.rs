//! 診断ログ。`log` ファサードの出力先を stderr に向ける。
//!
//! 形式は `ush[<level>]: <message>`。ユーザー向けのエラー表示（`ush: ...`）とは別系統で、
//! fork・ジョブ登録・reap・シグナル転送の追跡に使う。

use std::io::Write;

use log::{LevelFilter, Log};

pub struct StderrLogger<W: Send + Sync>
where
    for<'a> &'a W: Write,
{
    target: W,
}

impl<W: Send + Sync> Log for StderrLogger<W>
where
    for<'a> &'a W: Write,
{
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level() && metadata.level() <= log::STATIC_MAX_LEVEL
    }

    fn log(&self, record: &log::Record) {
        let level = record.level().as_str().to_ascii_lowercase();
        let _ = writeln!(&self.target, "ush[{level}]: {}", record.args());
    }

    fn flush(&self) {
        let _ = (&self.target).flush();
    }
}

impl StderrLogger<std::io::Stderr> {
    pub fn to_stderr() -> Self {
        Self {
            target: std::io::stderr(),
        }
    }
}

/// グローバルロガーを登録して最大レベルを設定する。
///
/// 既に登録済み（テストで複数回呼ばれた場合など）ならレベルの更新だけ行う。
pub fn init(level: LevelFilter) {
    if log::set_boxed_logger(Box::new(StderrLogger::to_stderr())).is_err() {
        log::debug!("logger already installed");
    }
    log::set_max_level(level);
}
