//! Feed polling.
//!
//! One watcher per configured feed. On each tick the feed is fetched and
//! parsed, items newer than the publication watermark are filtered by the
//! link rule, deduplicated, and queued for the news destination. Fetch or
//! parse failures are logged and the watcher waits for the next tick.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::sync::mpsc;

use rolekeeper_core::config::FeedConfig;
use rolekeeper_core::error::{Result, RolekeeperError};
use rolekeeper_core::traits::Translator;
use rolekeeper_core::types::OutboundMessage;
use rolekeeper_engine::cache::BoundedRecencySet;

const SEEN_LINKS_CAPACITY: usize = 100;

/// Link selection rule parsed from the feed configuration.
pub enum LinkFilter {
    All,
    Accept(Regex),
    Reject(Regex),
}

impl LinkFilter {
    /// Parse an empty rule, `accept:<regex>` or `reject:<regex>`. Anything
    /// else is a configuration error.
    pub fn parse(rule: &str) -> Result<Self> {
        if rule.is_empty() {
            return Ok(Self::All);
        }
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| RolekeeperError::Config(format!("Invalid link rule regex: {e}")))
        };
        if let Some(pattern) = rule.strip_prefix("accept:") {
            Ok(Self::Accept(compile(pattern)?))
        } else if let Some(pattern) = rule.strip_prefix("reject:") {
            Ok(Self::Reject(compile(pattern)?))
        } else {
            Err(RolekeeperError::Config(format!(
                "Invalid link rule: {rule}"
            )))
        }
    }

    pub fn matches(&self, link: &str) -> bool {
        match self {
            Self::All => true,
            Self::Accept(re) => re.is_match(link),
            Self::Reject(re) => !re.is_match(link),
        }
    }
}

/// A feed entry selected for announcement.
#[derive(Debug, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub summary: String,
    pub published: DateTime<Utc>,
}

/// Entries published strictly after `watermark` whose link passes `filter`,
/// oldest first.
pub fn select_items(
    feed: &feed_rs::model::Feed,
    watermark: DateTime<Utc>,
    filter: &LinkFilter,
) -> Vec<FeedItem> {
    let mut items: Vec<FeedItem> = feed
        .entries
        .iter()
        .filter_map(|entry| {
            let published = entry.published.or(entry.updated)?;
            if published <= watermark {
                return None;
            }
            let link = entry.links.first().map(|l| l.href.clone())?;
            if !filter.matches(&link) {
                return None;
            }
            Some(FeedItem {
                title: entry
                    .title
                    .as_ref()
                    .map(|t| t.content.clone())
                    .unwrap_or_default(),
                link,
                summary: entry
                    .summary
                    .as_ref()
                    .map(|t| t.content.clone())
                    .unwrap_or_default(),
                published,
            })
        })
        .collect();
    items.sort_by_key(|item| item.published);
    items
}

pub struct FeedWatcher {
    http: reqwest::Client,
    url: String,
    filter: LinkFilter,
    translate_summary: bool,
    translator: Option<Arc<dyn Translator>>,
    seen: BoundedRecencySet,
    watermark: DateTime<Utc>,
    news: mpsc::Sender<OutboundMessage>,
}

impl FeedWatcher {
    pub fn new(
        config: &FeedConfig,
        translator: Option<Arc<dyn Translator>>,
        watermark: DateTime<Utc>,
        news: mpsc::Sender<OutboundMessage>,
    ) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            url: config.url.clone(),
            filter: LinkFilter::parse(&config.link_rule)?,
            translate_summary: config.translate_summary,
            translator,
            seen: BoundedRecencySet::new(SEEN_LINKS_CAPACITY),
            watermark,
            news,
        })
    }

    /// Consume ticks until the fan-out stops.
    pub async fn run(mut self, mut ticks: mpsc::Receiver<DateTime<Utc>>) {
        while ticks.recv().await.is_some() {
            if let Err(e) = self.poll().await {
                tracing::warn!("Feed poll for {} failed: {e}", self.url);
            }
        }
    }

    async fn poll(&mut self) -> Result<()> {
        let body = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| RolekeeperError::Feed(format!("Fetch failed: {e}")))?
            .bytes()
            .await
            .map_err(|e| RolekeeperError::Feed(format!("Read failed: {e}")))?;
        let feed = feed_rs::parser::parse(body.as_ref())
            .map_err(|e| RolekeeperError::Feed(format!("Parse failed: {e}")))?;

        for item in select_items(&feed, self.watermark, &self.filter) {
            self.watermark = self.watermark.max(item.published);
            if self.seen.add(&item.link) {
                continue;
            }
            let text = self.render(&item).await;
            if self.news.send(OutboundMessage::text(text)).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn render(&self, item: &FeedItem) -> String {
        let mut text = if item.title.is_empty() {
            item.link.clone()
        } else {
            format!("{}\n{}", item.title, item.link)
        };
        if self.translate_summary && !item.summary.is_empty() {
            if let Some(translator) = &self.translator {
                let translated = translator.translate(&item.summary).await;
                if !translated.is_empty() {
                    text.push('\n');
                    text.push_str(&translated);
                }
            }
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED_XML: &str = r#"<?xml version="1.0"?>
        <rss version="2.0"><channel>
          <title>News</title>
          <item>
            <title>Old item</title>
            <link>https://example.org/old</link>
            <pubDate>Mon, 02 Jan 2023 10:00:00 GMT</pubDate>
          </item>
          <item>
            <title>Fresh item</title>
            <link>https://example.org/fresh</link>
            <pubDate>Mon, 09 Jan 2023 10:00:00 GMT</pubDate>
          </item>
          <item>
            <title>Sponsored</title>
            <link>https://example.org/ads/1</link>
            <pubDate>Mon, 09 Jan 2023 11:00:00 GMT</pubDate>
          </item>
        </channel></rss>"#;

    fn watermark(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_select_items_honors_watermark() {
        let feed = feed_rs::parser::parse(FEED_XML.as_bytes()).unwrap();
        let items = select_items(&feed, watermark("2023-01-05T00:00:00Z"), &LinkFilter::All);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].link, "https://example.org/fresh");
    }

    #[test]
    fn test_select_items_oldest_first() {
        let feed = feed_rs::parser::parse(FEED_XML.as_bytes()).unwrap();
        let items = select_items(&feed, watermark("2020-01-01T00:00:00Z"), &LinkFilter::All);
        assert_eq!(items.len(), 3);
        assert!(items[0].published < items[2].published);
    }

    #[test]
    fn test_reject_rule_drops_matching_links() {
        let filter = LinkFilter::parse("reject:/ads/").unwrap();
        let feed = feed_rs::parser::parse(FEED_XML.as_bytes()).unwrap();
        let items = select_items(&feed, watermark("2023-01-05T00:00:00Z"), &filter);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Fresh item");
    }

    #[test]
    fn test_accept_rule_keeps_only_matching_links() {
        let filter = LinkFilter::parse("accept:/ads/").unwrap();
        assert!(filter.matches("https://example.org/ads/1"));
        assert!(!filter.matches("https://example.org/fresh"));
    }

    #[test]
    fn test_invalid_rule_is_fatal() {
        assert!(LinkFilter::parse("allow:whatever").is_err());
        assert!(LinkFilter::parse("accept:(unclosed").is_err());
    }
}
