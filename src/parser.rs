//! トークナイザ: コマンドラインをジョブ（`&` 区切り）とコマンド（`|` 区切り）に分割する。
//!
//! ## 対応構文
//!
//! - ジョブ区切り: `cmd1 & cmd2 &`（`&` で終わるジョブはバックグラウンド）
//! - パイプライン: `cmd1 | cmd2 | cmd3`
//! - クォート: シングル (`'...'`) / ダブル (`"..."`)。クォート内の `&` `|` 空白はリテラル
//!
//! 変数展開・glob・リダイレクトは扱わない。

use thiserror::Error;

// ── 出力型 ───────────────────────────────────────────────────────────

/// コマンドラインの 1 ジョブ分。`text` は元の行のスライス（前後の空白は除去済み）。
#[derive(Debug, PartialEq)]
pub struct JobText<'a> {
    pub text: &'a str,
    pub background: bool,
}

/// パイプラインの 1 ステージ。
#[derive(Debug, PartialEq)]
pub struct CommandSpec {
    /// `args[0]` がプログラム名（PATH 検索される）。
    pub args: Vec<String>,
    /// 出力を次のステージにパイプするなら `true`。
    pub pipe_to_next: bool,
}

#[derive(Debug, PartialEq, Error)]
pub enum ParseError {
    /// クォートが閉じられていない。引数は開始クォート文字。
    #[error("unexpected EOF while looking for matching `{0}`")]
    UnterminatedQuote(char),
    /// `|` の前後にコマンドがない。
    #[error("syntax error near unexpected token `|`")]
    EmptyPipelineSegment,
}

// ── 分割 ─────────────────────────────────────────────────────────────

/// クォート外にある `sep` で `s` を分割する。
fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == sep => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            None => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// コマンドラインをジョブに分割する。
///
/// `&` で終わる区切りはバックグラウンド、最後の区切りは行末が `&` のときだけバックグラウンド。
/// 空白だけの区切りは捨てる（空行なら空の Vec）。
pub fn parse_into_jobs(line: &str) -> Vec<JobText<'_>> {
    let parts = split_unquoted(line, '&');
    let last = parts.len() - 1;
    parts
        .into_iter()
        .enumerate()
        .filter_map(|(i, part)| {
            let text = part.trim();
            (!text.is_empty()).then_some(JobText {
                text,
                background: i < last,
            })
        })
        .collect()
}

/// ジョブテキストをパイプラインのステージに分割し、各ステージを引数に分解する。
pub fn parse_into_commands(job: &str) -> Result<Vec<CommandSpec>, ParseError> {
    if job.trim().is_empty() {
        return Ok(Vec::new());
    }
    let segments = split_unquoted(job, '|');
    let last = segments.len() - 1;
    let mut commands = Vec::with_capacity(segments.len());
    for (i, segment) in segments.into_iter().enumerate() {
        let args = split_words(segment)?;
        if args.is_empty() {
            return Err(ParseError::EmptyPipelineSegment);
        }
        commands.push(CommandSpec {
            args,
            pipe_to_next: i < last,
        });
    }
    Ok(commands)
}

/// 空白区切りで単語に分ける。クォートは取り除き、中身はそのまま残す。
fn split_words(segment: &str) -> Result<Vec<String>, ParseError> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in segment.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => word.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            None => {
                word.push(c);
                in_word = true;
            }
        }
    }
    if let Some(q) = quote {
        return Err(ParseError::UnterminatedQuote(q));
    }
    if in_word {
        words.push(word);
    }
    Ok(words)
}
