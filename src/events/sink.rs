use crate::{
    constants::ICON_PLACEHOLDER,
    events::model::{LogEvent, LogLevel},
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait LogSink: Send + Sync {
    async fn handle(&self, event: &LogEvent);
    async fn flush(&self) {}
}

pub struct ConsoleSink {
    level_filter: Option<LogLevel>,
}
impl ConsoleSink {
    pub fn new(level_filter: Option<LogLevel>) -> Self {
        Self { level_filter }
    }
}

fn level_rank(level: LogLevel) -> u8 {
    match level {
        LogLevel::Trace => 0,
        LogLevel::Debug => 1,
        LogLevel::Info => 2,
        LogLevel::Warn => 3,
        LogLevel::Error => 4,
    }
}

#[async_trait]
impl LogSink for ConsoleSink {
    async fn handle(&self, event: &LogEvent) {
        let meta = event.meta();
        if meta.suppress_console {
            return;
        }
        if let Some(min) = self.level_filter {
            if level_rank(meta.level) < level_rank(min) {
                return;
            }
        }
        match event {
            LogEvent::Network(n) => {
                println!(
                    "{}NET action={} link={:?} addr={:?} detail={:?}",
                    ICON_PLACEHOLDER, n.action, n.link, n.addr, n.detail
                );
            }
            LogEvent::Node(n) => {
                println!(
                    "{}NODE id={} action={} detail={:?}",
                    ICON_PLACEHOLDER, n.node, n.action, n.detail
                );
            }
            LogEvent::Request(r) => {
                println!(
                    "{}HTTP {} {} -> {} client={:?}",
                    ICON_PLACEHOLDER, r.method, r.path, r.status, r.client
                );
            }
            LogEvent::System(s) => {
                println!(
                    "{}SYS action={} detail={:?} corr={:?}",
                    ICON_PLACEHOLDER, s.action, s.detail, s.meta.corr_id
                );
            }
        }
    }
}

/// Appends one JSON object per event to a file, rotating it to
/// `<name>.1 .. <name>.N` once it reaches `max_size_bytes`.
pub struct JsonFileSink {
    path: PathBuf,
    rotate: bool,
    max_size_bytes: u64,
    max_backups: u32,
    writer: tokio::sync::Mutex<Option<tokio::fs::File>>,
}

async fn open_append(path: &Path) -> std::io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}

impl JsonFileSink {
    pub async fn new<P: Into<PathBuf>>(
        path: P,
        rotate: bool,
        max_size_bytes: u64,
        max_backups: u32,
    ) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = open_append(&path).await?;
        Ok(Self {
            path,
            rotate,
            max_size_bytes,
            max_backups,
            writer: tokio::sync::Mutex::new(Some(file)),
        })
    }

    fn backup(&self, idx: u32) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", idx));
        PathBuf::from(name)
    }

    /// Shift backups up by one and start a fresh file. Holds the writer lock
    /// throughout so no event lands in a file being renamed.
    async fn rotate_if_needed(&self, writer: &mut Option<tokio::fs::File>) -> std::io::Result<()> {
        if !self.rotate || self.max_backups == 0 {
            return Ok(());
        }
        let len = tokio::fs::metadata(&self.path).await.map(|m| m.len()).unwrap_or(0);
        if len < self.max_size_bytes {
            return Ok(());
        }
        *writer = None;
        for idx in (1..self.max_backups).rev() {
            let from = self.backup(idx);
            if tokio::fs::try_exists(&from).await.unwrap_or(false) {
                tokio::fs::rename(&from, self.backup(idx + 1)).await?;
            }
        }
        tokio::fs::rename(&self.path, self.backup(1)).await?;
        *writer = Some(open_append(&self.path).await?);
        Ok(())
    }
}

#[async_trait]
impl LogSink for JsonFileSink {
    async fn handle(&self, event: &LogEvent) {
        let Ok(mut json) = serde_json::to_string(event) else {
            return;
        };
        json.push('\n');
        let mut writer = self.writer.lock().await;
        if self.rotate_if_needed(&mut writer).await.is_err() && writer.is_none() {
            *writer = open_append(&self.path).await.ok();
        }
        if let Some(f) = writer.as_mut() {
            let _ = f.write_all(json.as_bytes()).await;
        }
    }

    async fn flush(&self) {
        if let Some(f) = self.writer.lock().await.as_mut() {
            let _ = f.flush().await;
            let _ = f.sync_all().await;
        }
    }
}
