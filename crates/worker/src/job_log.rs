//! 任务本地日志文件
//!
//! 布局：`<log_path>/<yyyy-MM-dd>/<log_id>.log`，日期取自调度时间。
//! 回调失败的批次落盘在 `<log_path>/callbacklog/` 下。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{info, warn};

const CALLBACK_SPOOL_DIR: &str = "callbacklog";
const DATE_DIR_FORMAT: &str = "%Y-%m-%d";

/// 单次读取日志的最大字节数
pub const MAX_LOG_CHUNK_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub content: String,
    pub to_offset: u64,
    /// 已读到文件末尾
    pub reached_eof: bool,
}

#[derive(Debug, Clone)]
pub struct JobLogStore {
    base_path: PathBuf,
}

impl JobLogStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn callback_spool_dir(&self) -> PathBuf {
        self.base_path.join(CALLBACK_SPOOL_DIR)
    }

    pub fn log_file(&self, log_date_time: i64, log_id: i64) -> PathBuf {
        let trigger_time: DateTime<Local> = Local
            .timestamp_millis_opt(log_date_time)
            .single()
            .unwrap_or_else(Local::now);
        self.base_path
            .join(trigger_time.format(DATE_DIR_FORMAT).to_string())
            .join(format!("{log_id}.log"))
    }

    /// 追加一行带时间戳的日志；写失败只记录告警，不影响任务执行
    pub async fn append(&self, path: &Path, source: &str, message: &str) {
        let line = format!(
            "{} [{}] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            source,
            message
        );
        if let Err(e) = Self::append_raw(path, line.as_bytes()).await {
            warn!("写入任务日志失败: path={}, error={}", path.display(), e);
        }
    }

    async fn append_raw(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await
    }

    /// 从字节偏移开始读取一段日志，文件不存在时返回 `None`
    ///
    /// 读取结果在 UTF-8 字符边界处截断，下一次从 `to_offset` 继续即可。
    pub async fn read_chunk(&self, path: &Path, from_offset: u64) -> std::io::Result<Option<LogChunk>> {
        let mut file = match fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let length = file.metadata().await?.len();
        let start = from_offset.min(length);
        file.seek(std::io::SeekFrom::Start(start)).await?;

        let wanted = (length - start).min(MAX_LOG_CHUNK_BYTES) as usize;
        let mut buffer = vec![0u8; wanted];
        file.read_exact(&mut buffer).await?;

        let valid = match std::str::from_utf8(&buffer) {
            Ok(_) => buffer.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => buffer.len(),
        };
        buffer.truncate(valid);
        let to_offset = start + buffer.len() as u64;

        Ok(Some(LogChunk {
            content: String::from_utf8_lossy(&buffer).into_owned(),
            to_offset,
            reached_eof: to_offset >= length,
        }))
    }

    /// 删除超过保留天数的日期目录，返回删除数量
    pub async fn cleanup_expired(&self, retention_days: u32, today: NaiveDate) -> std::io::Result<usize> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(date) = name
                .to_str()
                .and_then(|name| NaiveDate::parse_from_str(name, DATE_DIR_FORMAT).ok())
            else {
                continue;
            };

            if (today - date).num_days() >= i64::from(retention_days) {
                match fs::remove_dir_all(entry.path()).await {
                    Ok(()) => {
                        info!("清理过期任务日志目录: {}", entry.path().display());
                        removed += 1;
                    }
                    Err(e) => warn!("清理任务日志目录失败: {}, error={}", entry.path().display(), e),
                }
            }
        }
        Ok(removed)
    }
}
