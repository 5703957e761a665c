//! Member activity tracking and CSV snapshots.
//!
//! The tracker consumes activity events from the gateway, keeps per-member
//! counters in memory and writes the full member listing as a CSV snapshot on
//! every fan-out tick (and on demand, for the save command). The previous
//! snapshot is reloaded at startup so counters survive restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tokio::sync::mpsc;

use rolekeeper_core::config::ActivityConfig;
use rolekeeper_core::error::{Result, RolekeeperError};
use rolekeeper_core::traits::Platform;
use rolekeeper_core::types::{ActivityEvent, Member, OutboundMessage};

const UPLOAD_FALLBACK: &str = "Activity snapshot upload failed";

#[derive(Debug, Clone, Default)]
pub struct ActivityRecord {
    pub message_count: u64,
    pub last_message: Option<DateTime<Utc>>,
    pub last_vocal: Option<DateTime<Utc>>,
}

pub struct ActivityTracker {
    platform: Arc<dyn Platform>,
    records: HashMap<String, ActivityRecord>,
    path: PathBuf,
    date_format: String,
    include_last_activity: bool,
    uploads: Option<mpsc::Sender<OutboundMessage>>,
}

impl ActivityTracker {
    pub fn new(
        config: &ActivityConfig,
        platform: Arc<dyn Platform>,
        uploads: Option<mpsc::Sender<OutboundMessage>>,
    ) -> Self {
        let mut tracker = Self {
            platform,
            records: HashMap::new(),
            path: PathBuf::from(&config.path),
            date_format: config.date_format.clone(),
            include_last_activity: config.include_last_activity,
            uploads,
        };
        match load_records(&tracker.path, &tracker.date_format) {
            Ok(records) => tracker.records = records,
            Err(e) => tracing::info!("No previous activity snapshot loaded: {e}"),
        }
        tracker
    }

    pub fn record(&mut self, event: &ActivityEvent) {
        let record = self.records.entry(event.member_id.clone()).or_default();
        if event.vocal {
            record.last_vocal = Some(event.timestamp);
        } else {
            record.message_count += 1;
            record.last_message = Some(event.timestamp);
        }
    }

    /// Consume gateway events, periodic ticks and on-demand flush requests
    /// until all producers are gone.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ActivityEvent>,
        mut ticks: mpsc::Receiver<DateTime<Utc>>,
        mut flushes: mpsc::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.record(&event),
                        None => return,
                    }
                }
                tick = ticks.recv() => {
                    if tick.is_none() {
                        return;
                    }
                    self.flush().await;
                }
                flush = flushes.recv() => {
                    if flush.is_none() {
                        return;
                    }
                    self.flush().await;
                }
            }
        }
    }

    async fn flush(&self) {
        let snapshot = match self.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Activity snapshot failed: {e}");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, &snapshot) {
            tracing::warn!("Activity snapshot write failed: {e}");
        }
        if let Some(uploads) = &self.uploads {
            let name = self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "activity.csv".into());
            let message = OutboundMessage::file(name, snapshot, UPLOAD_FALLBACK);
            if uploads.send(message).await.is_err() {
                tracing::debug!("Activity upload queue gone");
            }
        }
    }

    async fn snapshot(&self) -> Result<String> {
        let members = self.platform.list_members().await?;
        render_snapshot(
            &members,
            &self.records,
            &self.date_format,
            self.include_last_activity,
        )
    }
}

/// Render the CSV snapshot for the full member listing. Members without any
/// recorded activity appear with a zero count and empty timestamps.
pub fn render_snapshot(
    members: &[Member],
    records: &HashMap<String, ActivityRecord>,
    date_format: &str,
    include_last_activity: bool,
) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header = vec![
        "userId",
        "userName",
        "userNickname",
        "messageCount",
        "lastMessage",
        "lastVocal",
    ];
    if include_last_activity {
        header.push("lastActivity");
    }
    writer
        .write_record(&header)
        .map_err(|e| RolekeeperError::Snapshot(format!("CSV write failed: {e}")))?;

    for member in members {
        let record = records.get(&member.id).cloned().unwrap_or_default();
        let mut row = vec![
            member.id.clone(),
            member.username.clone(),
            member.nick.clone().unwrap_or_default(),
            record.message_count.to_string(),
            format_time(record.last_message, date_format),
            format_time(record.last_vocal, date_format),
        ];
        if include_last_activity {
            let last = match (record.last_message, record.last_vocal) {
                (Some(m), Some(v)) => Some(m.max(v)),
                (m, v) => m.or(v),
            };
            row.push(format_time(last, date_format));
        }
        writer
            .write_record(&row)
            .map_err(|e| RolekeeperError::Snapshot(format!("CSV write failed: {e}")))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| RolekeeperError::Snapshot(format!("CSV flush failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| RolekeeperError::Snapshot(format!("Invalid CSV: {e}")))
}

/// Load records from a previous snapshot. Extra columns are ignored, so
/// toggling `include_last_activity` does not invalidate old snapshots.
fn load_records(path: &Path, date_format: &str) -> Result<HashMap<String, ActivityRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| RolekeeperError::Snapshot(format!("CSV open failed: {e}")))?;

    let mut records = HashMap::new();
    for row in reader.records() {
        let row = row.map_err(|e| RolekeeperError::Snapshot(format!("CSV read failed: {e}")))?;
        if row.len() < 6 {
            continue;
        }
        records.insert(
            row[0].to_string(),
            ActivityRecord {
                message_count: row[3].parse().unwrap_or(0),
                last_message: parse_time(&row[4], date_format),
                last_vocal: parse_time(&row[5], date_format),
            },
        );
    }
    Ok(records)
}

fn format_time(time: Option<DateTime<Utc>>, format: &str) -> String {
    time.map(|t| t.format(format).to_string()).unwrap_or_default()
}

fn parse_time(value: &str, format: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, format)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rolekeeper_core::types::RoleSet;
    use std::io::Write;

    fn member(id: &str, username: &str, nick: Option<&str>) -> Member {
        Member {
            id: id.into(),
            username: username.into(),
            nick: nick.map(str::to_string),
            roles: RoleSet::new(),
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_record_counts_messages_and_voice_separately() {
        let platform: Arc<dyn Platform> = Arc::new(NoopPlatform);
        let mut tracker = ActivityTracker::new(&ActivityConfig::default(), platform, None);
        tracker.record(&ActivityEvent {
            member_id: "1".into(),
            timestamp: at("2023-06-01T10:00:00Z"),
            vocal: false,
        });
        tracker.record(&ActivityEvent {
            member_id: "1".into(),
            timestamp: at("2023-06-01T11:00:00Z"),
            vocal: true,
        });
        let record = &tracker.records["1"];
        assert_eq!(record.message_count, 1);
        assert_eq!(record.last_message, Some(at("2023-06-01T10:00:00Z")));
        assert_eq!(record.last_vocal, Some(at("2023-06-01T11:00:00Z")));
    }

    #[test]
    fn test_render_snapshot_covers_inactive_members() {
        let members = vec![member("1", "alice", Some("Cpt Alice")), member("2", "bob", None)];
        let mut records = HashMap::new();
        records.insert(
            "1".to_string(),
            ActivityRecord {
                message_count: 3,
                last_message: Some(at("2023-06-01T10:00:00Z")),
                last_vocal: None,
            },
        );

        let csv = render_snapshot(&members, &records, "%Y-%m-%d %H:%M:%S", false).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "userId,userName,userNickname,messageCount,lastMessage,lastVocal");
        assert_eq!(lines[1], "1,alice,Cpt Alice,3,2023-06-01 10:00:00,");
        assert_eq!(lines[2], "2,bob,,0,,");
    }

    #[test]
    fn test_render_snapshot_last_activity_column() {
        let members = vec![member("1", "alice", None)];
        let mut records = HashMap::new();
        records.insert(
            "1".to_string(),
            ActivityRecord {
                message_count: 1,
                last_message: Some(at("2023-06-01T10:00:00Z")),
                last_vocal: Some(at("2023-06-02T09:00:00Z")),
            },
        );
        let csv = render_snapshot(&members, &records, "%Y-%m-%d %H:%M:%S", true).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert!(lines[0].ends_with(",lastActivity"));
        assert!(lines[1].ends_with(",2023-06-02 09:00:00"));
    }

    #[test]
    fn test_load_previous_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "userId,userName,userNickname,messageCount,lastMessage,lastVocal").unwrap();
        writeln!(file, "1,alice,Cpt Alice,5,2023-06-01 10:00:00,").unwrap();
        writeln!(file, "2,bob,,0,,2023-06-02 09:00:00").unwrap();

        let records = load_records(file.path(), "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(records["1"].message_count, 5);
        assert_eq!(records["1"].last_message, Some(at("2023-06-01T10:00:00Z")));
        assert_eq!(records["2"].message_count, 0);
        assert_eq!(records["2"].last_vocal, Some(at("2023-06-02T09:00:00Z")));
    }

    struct NoopPlatform;

    #[async_trait::async_trait]
    impl Platform for NoopPlatform {
        async fn list_roles(&self) -> rolekeeper_core::Result<Vec<rolekeeper_core::types::RoleInfo>> {
            Ok(vec![])
        }
        async fn list_members(&self) -> rolekeeper_core::Result<Vec<Member>> {
            Ok(vec![])
        }
        async fn get_member(&self, _: &str) -> rolekeeper_core::Result<Member> {
            Err(RolekeeperError::Platform("not found".into()))
        }
        async fn rename_member(&self, _: &str, _: &str) -> rolekeeper_core::Result<()> {
            Ok(())
        }
        async fn add_role(&self, _: &str, _: &str) -> rolekeeper_core::Result<()> {
            Ok(())
        }
        async fn remove_role(&self, _: &str, _: &str) -> rolekeeper_core::Result<()> {
            Ok(())
        }
        async fn send_message(&self, _: &str, _: &str) -> rolekeeper_core::Result<()> {
            Ok(())
        }
        async fn send_file(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &[u8],
        ) -> rolekeeper_core::Result<()> {
            Ok(())
        }
        async fn list_scheduled_events(
            &self,
        ) -> rolekeeper_core::Result<Vec<rolekeeper_core::types::ScheduledEvent>> {
            Ok(vec![])
        }
    }
}
