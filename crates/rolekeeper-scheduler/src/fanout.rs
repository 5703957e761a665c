//! Single-timer tick fan-out.
//!
//! One interval timer drives every periodic consumer. Each subscriber gets a
//! capacity-1 channel and ticks are delivered in subscription order, awaiting
//! each delivery. A consumer that stops draining its channel therefore stalls
//! the whole fan-out; consumers must stay responsive.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

pub struct TickFanout {
    period: tokio::time::Duration,
    subscribers: Vec<mpsc::Sender<DateTime<Utc>>>,
}

impl TickFanout {
    pub fn new(period: tokio::time::Duration) -> Self {
        Self {
            period,
            subscribers: Vec::new(),
        }
    }

    /// Register a consumer. Must be called before `spawn`.
    pub fn subscribe(&mut self) -> mpsc::Receiver<DateTime<Utc>> {
        let (tx, rx) = mpsc::channel(1);
        self.subscribers.push(tx);
        rx
    }

    /// Deliver one tick to every subscriber, in subscription order.
    /// Subscribers whose receiver is gone are skipped.
    pub async fn broadcast(&self, tick: DateTime<Utc>) {
        for subscriber in &self.subscribers {
            if subscriber.send(tick).await.is_err() {
                tracing::debug!("Tick subscriber gone");
            }
        }
    }

    /// Run the timer loop. The first tick fires immediately.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.broadcast(Utc::now()).await;
            }
        })
    }
}
