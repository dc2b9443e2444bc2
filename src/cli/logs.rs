//! Print or follow the proxy log.

use super::common::{CommandContext, print_warning};
use crate::constants::DEFAULT_LOG_LINES;
use anyhow::{Context, Result};
use clap::Args;
use std::io::{SeekFrom, Write};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const FOLLOW_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Args, Debug)]
pub struct LogsCommand {
    /// Keep printing new lines as they are written
    #[arg(short, long)]
    follow: bool,

    /// Number of trailing lines to print
    #[arg(short = 'n', long, default_value_t = DEFAULT_LOG_LINES)]
    lines: usize,

    /// Print the whole file
    #[arg(long, conflicts_with = "lines")]
    all: bool,
}

impl LogsCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let cfg = ctx.install_config()?;
        let path = cfg.log_file;

        let mut cursor = LogCursor::default();
        match tokio::fs::metadata(&path).await {
            Ok(meta) => {
                let content = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let text = String::from_utf8_lossy(&content);
                let shown = if self.all {
                    &text[..]
                } else {
                    tail_lines(&text, self.lines)
                };
                print!("{shown}");
                cursor = LogCursor {
                    offset: content.len() as u64,
                    identity: file_identity(&meta),
                };
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !self.follow {
                    print_warning(&format!("no log file at {}", path.display()));
                    return Ok(());
                }
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        }

        if self.follow {
            follow(&path, cursor).await?;
        }
        Ok(())
    }
}

/// The last `n` lines of `content`, keeping the final newline.
pub fn tail_lines(content: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let body = content.strip_suffix('\n').unwrap_or(content);
    let start = body.rmatch_indices('\n').nth(n - 1).map_or(0, |(i, _)| i + 1);
    &content[start..]
}

/// Read position in a followed log file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct LogCursor {
    offset: u64,
    identity: Option<u64>,
}

impl LogCursor {
    /// Offset to read from given the file's current state, or `None` when
    /// nothing new was written. A replaced or shrunken file is read from
    /// the start.
    fn advance(&mut self, len: u64, identity: Option<u64>) -> Option<u64> {
        if identity != self.identity || len < self.offset {
            tracing::debug!("log file rotated or truncated");
            self.offset = 0;
            self.identity = identity;
        }
        if len > self.offset {
            let from = self.offset;
            self.offset = len;
            Some(from)
        } else {
            None
        }
    }
}

#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_identity(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

async fn follow(path: &Path, mut cursor: LogCursor) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(FOLLOW_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => return Ok(()),
            _ = ticker.tick() => {}
        }
        // Missing between rotation and re-creation.
        let Ok(meta) = tokio::fs::metadata(path).await else {
            continue;
        };
        let Some(from) = cursor.advance(meta.len(), file_identity(&meta)) else {
            continue;
        };
        let chunk = read_from(path, from, cursor.offset).await?;
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&chunk)?;
        stdout.flush()?;
    }
}

async fn read_from(path: &Path, from: u64, to: u64) -> Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.seek(SeekFrom::Start(from)).await?;
    let mut buf = Vec::with_capacity(usize::try_from(to - from).unwrap_or(0));
    file.take(to - from).read_to_end(&mut buf).await?;
    Ok(buf)
}
