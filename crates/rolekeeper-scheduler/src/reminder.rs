//! Scheduled-event reminders.
//!
//! On each tick the upcoming events are listed and a reminder fires for every
//! configured delay whose reminder instant fell inside the window since the
//! previous tick. The window comparison makes reminders fire exactly once per
//! delay regardless of the tick period.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;

use rolekeeper_core::config::ReminderConfig;
use rolekeeper_core::traits::Platform;
use rolekeeper_core::types::{OutboundMessage, ScheduledEvent};

/// Events whose reminder instant (start minus delay) lies in
/// `(previous, current]`, paired with the matched delay.
pub fn due_reminders<'a>(
    events: &'a [ScheduledEvent],
    delays: &[Duration],
    previous: DateTime<Utc>,
    current: DateTime<Utc>,
) -> Vec<(&'a ScheduledEvent, Duration)> {
    let mut due = Vec::new();
    for event in events {
        for &delay in delays {
            let remind_at = event.start_time - delay;
            if previous < remind_at && remind_at <= current {
                due.push((event, delay));
            }
        }
    }
    due
}

pub struct ReminderScanner {
    platform: Arc<dyn Platform>,
    delays: Vec<Duration>,
    text: String,
    /// Prepended to the event id to form the announcement link.
    event_link_base: String,
    previous: DateTime<Utc>,
    reminders: mpsc::Sender<OutboundMessage>,
}

impl ReminderScanner {
    pub fn new(
        config: &ReminderConfig,
        platform: Arc<dyn Platform>,
        event_link_base: String,
        window_start: DateTime<Utc>,
        reminders: mpsc::Sender<OutboundMessage>,
    ) -> Self {
        Self {
            platform,
            delays: config.delays_mins.iter().map(|&m| Duration::minutes(m)).collect(),
            text: config.text.clone(),
            event_link_base,
            previous: window_start,
            reminders,
        }
    }

    pub async fn run(mut self, mut ticks: mpsc::Receiver<DateTime<Utc>>) {
        while let Some(tick) = ticks.recv().await {
            self.scan(tick).await;
            self.previous = tick;
        }
    }

    async fn scan(&self, current: DateTime<Utc>) {
        let events = match self.platform.list_scheduled_events().await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("Event listing failed: {e}");
                return;
            }
        };
        for (event, delay) in due_reminders(&events, &self.delays, self.previous, current) {
            tracing::info!(
                "Reminder for event {} ({} minutes ahead)",
                event.name,
                delay.num_minutes()
            );
            let text = format!("{}\n{}{}", self.text, self.event_link_base, event.id);
            if self.reminders.send(OutboundMessage::text(text)).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, start: &str) -> ScheduledEvent {
        ScheduledEvent {
            id: id.into(),
            name: format!("event {id}"),
            start_time: start.parse().unwrap(),
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_reminder_fires_inside_window() {
        let events = vec![event("e1", "2023-06-01T12:00:00Z")];
        let delays = vec![Duration::minutes(60)];
        // reminder instant is 11:00; window (10:50, 11:00] contains it
        let due = due_reminders(
            &events,
            &delays,
            at("2023-06-01T10:50:00Z"),
            at("2023-06-01T11:00:00Z"),
        );
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0.id, "e1");
    }

    #[test]
    fn test_reminder_does_not_fire_twice() {
        let events = vec![event("e1", "2023-06-01T12:00:00Z")];
        let delays = vec![Duration::minutes(60)];
        // the next window starts where the previous ended
        let due = due_reminders(
            &events,
            &delays,
            at("2023-06-01T11:00:00Z"),
            at("2023-06-01T11:10:00Z"),
        );
        assert!(due.is_empty());
    }

    #[test]
    fn test_multiple_delays_fire_independently() {
        let events = vec![event("e1", "2023-06-01T12:00:00Z")];
        let delays = vec![Duration::minutes(60), Duration::minutes(10)];
        let due = due_reminders(
            &events,
            &delays,
            at("2023-06-01T11:45:00Z"),
            at("2023-06-01T11:55:00Z"),
        );
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].1, Duration::minutes(10));
    }

    #[test]
    fn test_past_event_is_ignored() {
        let events = vec![event("e1", "2023-06-01T09:00:00Z")];
        let delays = vec![Duration::minutes(60)];
        let due = due_reminders(
            &events,
            &delays,
            at("2023-06-01T10:50:00Z"),
            at("2023-06-01T11:00:00Z"),
        );
        assert!(due.is_empty());
    }
}
