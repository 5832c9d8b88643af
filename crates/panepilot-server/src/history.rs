//! Append-only conversation history.
//!
//! Newline-delimited JSON, partitioned by conversation and by UTC hour:
//! `<root>/<conversation>/messages/YYYY-MM-DD-HH.jsonl`. Records are only
//! ever appended; reads walk the hour files newest-first.

use chrono::{DateTime, Utc};
use panepilot_core::{HistoryRecord, MediaKind, PilotError, PilotResult, Sender};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Records returned by `read` when the caller gives no limit.
pub const DEFAULT_READ_LIMIT: usize = 100;

/// A record before it has been given an id and timestamp.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub from: Sender,
    pub text: String,
    pub media_kind: Option<MediaKind>,
    pub media_path: Option<String>,
    pub agent: Option<String>,
}

impl NewRecord {
    pub fn text(from: Sender, text: impl Into<String>) -> Self {
        Self {
            from,
            text: text.into(),
            media_kind: None,
            media_path: None,
            agent: None,
        }
    }
}

/// Result of a deduplicating append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stored {
    Appended(i64),
    /// The text matched the newest record of the same sender.
    Duplicate(i64),
}

impl Stored {
    pub fn id(self) -> i64 {
        match self {
            Stored::Appended(id) | Stored::Duplicate(id) => id,
        }
    }
}

/// History files for every conversation under one root.
pub struct HistoryStore {
    root: PathBuf,
    /// Last id handed out; ids are process-wide.
    last_id: Mutex<i64>,
    /// Held across "check newest, then append" sequences.
    append_lock: Mutex<()>,
}

impl HistoryStore {
    /// Open the store and seed the id counter from every record on disk.
    pub async fn open(root: PathBuf) -> PilotResult<Self> {
        tokio::fs::create_dir_all(&root).await?;
        let max_id = scan_max_id(&root).await;
        info!(path = %root.display(), max_id, "history store opened");
        Ok(Self {
            root,
            last_id: Mutex::new(max_id),
            append_lock: Mutex::new(()),
        })
    }

    /// Reserve the next message id.
    pub async fn next_id(&self) -> i64 {
        let mut last = self.last_id.lock().await;
        *last += 1;
        *last
    }

    /// Append a record, stamping it with a fresh id and the current time.
    pub async fn append(&self, conversation: &str, record: NewRecord) -> PilotResult<HistoryRecord> {
        let _guard = self.append_lock.lock().await;
        self.append_locked(conversation, record).await
    }

    /// Store an assistant reply unless it is already the newest assistant
    /// record of the conversation.
    pub async fn append_assistant_dedup(
        &self,
        conversation: &str,
        text: &str,
    ) -> PilotResult<Stored> {
        let _guard = self.append_lock.lock().await;
        if let Some(last) = self.last_from(conversation, Sender::Assistant).await? {
            if last.text == text {
                debug!(conversation, id = last.id, "assistant reply already stored");
                return Ok(Stored::Duplicate(last.id));
            }
        }
        let record = self
            .append_locked(conversation, NewRecord::text(Sender::Assistant, text))
            .await?;
        Ok(Stored::Appended(record.id))
    }

    async fn append_locked(
        &self,
        conversation: &str,
        record: NewRecord,
    ) -> PilotResult<HistoryRecord> {
        let now = Utc::now();
        let stored = HistoryRecord {
            id: self.next_id().await,
            timestamp: now.timestamp(),
            from: record.from,
            text: record.text,
            media_kind: record.media_kind,
            media_path: record.media_path,
            agent: record.agent,
        };

        let dir = self.messages_dir(conversation);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(hour_file_name(now));

        let mut line = serde_json::to_string(&stored)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(conversation, id = stored.id, from = %stored.from, "history appended");
        Ok(stored)
    }

    /// Records with `id > after`, optionally from one sender, oldest first,
    /// keeping the newest `limit`.
    pub async fn read(
        &self,
        conversation: &str,
        after: i64,
        limit: usize,
        from_filter: Option<Sender>,
    ) -> PilotResult<Vec<HistoryRecord>> {
        let limit = if limit == 0 { DEFAULT_READ_LIMIT } else { limit };
        let mut collected: Vec<HistoryRecord> = Vec::new();

        for path in self.hour_files_newest_first(conversation).await? {
            let mut batch: Vec<HistoryRecord> = read_records(&path)
                .await?
                .into_iter()
                .filter(|r| r.id > after)
                .filter(|r| from_filter.map_or(true, |f| r.from == f))
                .collect();
            batch.append(&mut collected);
            collected = batch;
            if collected.len() >= limit {
                break;
            }
        }

        collected.sort_by_key(|r| r.id);
        if collected.len() > limit {
            collected = collected.split_off(collected.len() - limit);
        }
        Ok(collected)
    }

    /// Newest record from `sender`.
    pub async fn last_from(
        &self,
        conversation: &str,
        sender: Sender,
    ) -> PilotResult<Option<HistoryRecord>> {
        for path in self.hour_files_newest_first(conversation).await? {
            let newest = read_records(&path)
                .await?
                .into_iter()
                .filter(|r| r.from == sender)
                .max_by_key(|r| r.id);
            if newest.is_some() {
                return Ok(newest);
            }
        }
        Ok(None)
    }

    /// Unix seconds of the newest hour file's modification, 0 when empty.
    pub async fn last_activity(&self, conversation: &str) -> i64 {
        let Ok(files) = self.hour_files_newest_first(conversation).await else {
            return 0;
        };
        let Some(newest) = files.first() else {
            return 0;
        };
        match tokio::fs::metadata(newest).await.and_then(|m| m.modified()) {
            Ok(modified) => DateTime::<Utc>::from(modified).timestamp(),
            Err(e) => {
                debug!(path = %newest.display(), error = %e, "cannot stat history file");
                0
            }
        }
    }

    fn messages_dir(&self, conversation: &str) -> PathBuf {
        self.root.join(conversation).join("messages")
    }

    async fn hour_files_newest_first(&self, conversation: &str) -> PilotResult<Vec<PathBuf>> {
        let dir = self.messages_dir(conversation);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                files.push(path);
            }
        }
        // Hour names sort chronologically.
        files.sort_unstable_by(|a, b| b.cmp(a));
        Ok(files)
    }
}

/// `YYYY-MM-DD-HH.jsonl` for the hour containing `at`.
pub fn hour_file_name(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d-%H.jsonl").to_string()
}

async fn read_records(path: &Path) -> PilotResult<Vec<HistoryRecord>> {
    let content = tokio::fs::read(path)
        .await
        .map_err(|e| PilotError::History(format!("cannot read {}: {e}", path.display())))?;
    let mut records = Vec::new();
    for line in content.split(|b| *b == b'\n') {
        let Ok(line) = std::str::from_utf8(line) else {
            warn!(path = %path.display(), "skipping history line with invalid UTF-8");
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping malformed history line"),
        }
    }
    Ok(records)
}

/// Highest id in any `.jsonl` file below `root`. Unreadable entries are
/// logged and skipped.
async fn scan_max_id(root: &Path) -> i64 {
    let mut max_id = 0;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "cannot scan history directory");
                continue;
            }
        };
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "history directory scan cut short");
                    break;
                }
            };
            let path = entry.path();
            let is_dir = match entry.file_type().await {
                Ok(kind) => kind.is_dir(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot stat history entry");
                    continue;
                }
            };
            if is_dir {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "jsonl") {
                match read_records(&path).await {
                    Ok(records) => {
                        for record in records {
                            max_id = max_id.max(record.id);
                        }
                    }
                    Err(e) => warn!(error = %e, "skipping unreadable history file"),
                }
            }
        }
    }
    max_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn line(id: i64, from: &str, text: &str) -> String {
        format!(r#"{{"id":{id},"ts":1700000000,"from":"{from}","text":"{text}"}}"#)
    }

    fn seed(root: &Path, conversation: &str, file: &str, lines: &[String]) {
        let dir = root.join(conversation).join("messages");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), lines.join("\n") + "\n").unwrap();
    }

    #[test]
    fn hour_files_are_utc() {
        let at = Utc.with_ymd_and_hms(2026, 3, 7, 9, 41, 0).unwrap();
        assert_eq!(hour_file_name(at), "2026-03-07-09.jsonl");
    }

    #[tokio::test]
    async fn ids_continue_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), "42", "2026-01-01-00.jsonl", &[line(7, "human", "a")]);
        seed(dir.path(), "session-web", "2026-01-02-05.jsonl", &[line(19, "claude", "b")]);

        let store = HistoryStore::open(dir.path().to_path_buf()).await.unwrap();
        let rec = store
            .append("42", NewRecord::text(Sender::Api, "next"))
            .await
            .unwrap();
        assert_eq!(rec.id, 20);
        drop(store);

        let reopened = HistoryStore::open(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(reopened.next_id().await, 21);
    }

    #[tokio::test]
    async fn invalid_bytes_skip_the_line_not_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let messages = dir.path().join("42").join("messages");
        std::fs::create_dir_all(&messages).unwrap();
        let mut content = line(5, "human", "before").into_bytes();
        content.extend_from_slice(b"\n\xff\xfe garbage\n");
        content.extend_from_slice(line(6, "claude", "after").as_bytes());
        content.push(b'\n');
        std::fs::write(messages.join("2026-01-01-00.jsonl"), content).unwrap();

        let store = HistoryStore::open(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(store.next_id().await, 7);

        let records = store.read("42", 0, 0, None).await.unwrap();
        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), [5, 6]);
        let stored = store.append_assistant_dedup("42", "after").await.unwrap();
        assert_eq!(stored, Stored::Duplicate(6));
    }

    #[tokio::test]
    async fn read_filters_and_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        seed(
            dir.path(),
            "42",
            "2026-01-01-00.jsonl",
            &[line(1, "human", "h1"), line(2, "claude", "c1")],
        );
        seed(
            dir.path(),
            "42",
            "2026-01-01-01.jsonl",
            &[line(3, "human", "h2"), "not json".to_string(), line(4, "assistant", "c2")],
        );
        let store = HistoryStore::open(dir.path().to_path_buf()).await.unwrap();

        let all = store.read("42", 0, 0, None).await.unwrap();
        let ids: Vec<i64> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids, [1, 2, 3, 4]);

        let newest_two = store.read("42", 0, 2, None).await.unwrap();
        assert_eq!(newest_two.iter().map(|r| r.id).collect::<Vec<_>>(), [3, 4]);

        let assistant = store.read("42", 1, 10, Some(Sender::Assistant)).await.unwrap();
        assert_eq!(assistant.iter().map(|r| r.id).collect::<Vec<_>>(), [2, 4]);

        assert!(store.read("nobody", 0, 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_assistant_reply_is_stored_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path().to_path_buf()).await.unwrap();

        let first = store.append_assistant_dedup("7", "All green.").await.unwrap();
        let second = store.append_assistant_dedup("7", "All green.").await.unwrap();
        assert!(matches!(first, Stored::Appended(_)));
        assert_eq!(second, Stored::Duplicate(first.id()));

        store
            .append("7", NewRecord::text(Sender::Human, "again?"))
            .await
            .unwrap();
        let third = store.append_assistant_dedup("7", "Something new.").await.unwrap();
        assert!(matches!(third, Stored::Appended(id) if id > first.id()));

        let stored = store.read("7", 0, 0, Some(Sender::Assistant)).await.unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_dedup_appends_persist_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(HistoryStore::open(dir.path().to_path_buf()).await.unwrap());

        let a = tokio::spawn({
            let store = store.clone();
            async move { store.append_assistant_dedup("9", "done").await.unwrap() }
        });
        let b = tokio::spawn({
            let store = store.clone();
            async move { store.append_assistant_dedup("9", "done").await.unwrap() }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(a.id(), b.id());
        assert_eq!(store.read("9", 0, 0, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn last_activity_tracks_newest_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(store.last_activity("1").await, 0);

        store.append("1", NewRecord::text(Sender::Human, "hi")).await.unwrap();
        let activity = store.last_activity("1").await;
        assert!((activity - Utc::now().timestamp()).abs() < 60);
    }
}
