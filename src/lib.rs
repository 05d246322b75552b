//! ush ライブラリ — ジョブ制御付きシェルの中核。ベンチマーク・テスト用にモジュールを公開する。
//!
//! バイナリ本体は `main.rs` の対話ループ。
//!
//! ## モジュール構成
//!
//! | モジュール | 役割 |
//! |-----------|------|
//! | [`parser`] | トークナイザ（`&` でジョブ、`|` でステージ、空白で引数に分割。クォート対応） |
//! | [`job`] | ジョブテーブル（固定容量、ID 割り当て、状態遷移、単一フォアグラウンド） |
//! | [`executor`] | パイプライン実行（パイプ作成、fork、プロセスグループ、ジョブ登録） |
//! | [`spawn`] | fork 後の子側処理（fd 配線、シグナルマスク復元、`execvp`） |
//! | [`signal`] | シグナルハンドラ、self-pipe 通知、シグナルマスク |
//! | [`wait`] | `waitpid` の状態デコードと [`ChildStatusSource`](wait::ChildStatusSource) |
//! | [`reaper`] | 子プロセスの reap、ジョブテーブル更新、完了通知 |
//! | [`foreground`] | フォアグラウンド待機、割り込み転送、`fg`/`bg` の再開 |
//! | [`builtins`] | ビルトイン（`quit`, `jobs`, `kill`, `fg`, `bg`） |
//! | [`shell`] | シェルの状態（ジョブテーブル、設定、シグナル通知）と 1 行評価 |
//! | [`config`] | 環境変数からの起動時設定 |
//! | [`logger`] | 診断ログの出力先 |
//! | [`error`] | エラー型 |
//! | [`sys`] | libc システムコールの薄いラッパー |

pub mod builtins;
pub mod config;
pub mod error;
pub mod executor;
pub mod foreground;
pub mod job;
pub mod logger;
pub mod parser;
pub mod reaper;
pub mod shell;
pub mod signal;
pub mod spawn;
pub mod sys;
pub mod wait;
