use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

use crate::classifier::{RequestClassifier, TrafficClass};
use crate::reader::LogRecord;

/// Per-page request counts for one calendar day.
///
/// Persisted as the `*_requests` snapshot columns read by the reporting
/// layer. Every `*_unique` count is at most its `*_total`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyPageMetric {
    pub date: NaiveDate,
    pub page: String,
    pub human_total: u16,
    pub human_unique: u16,
    pub bot_total: u16,
    pub bot_unique: u16,
}

impl DailyPageMetric {
    pub fn new(date: NaiveDate, page: impl Into<String>) -> Self {
        Self {
            date,
            page: page.into(),
            human_total: 0,
            human_unique: 0,
            bot_total: 0,
            bot_unique: 0,
        }
    }
}

/// Only successful requests for directory-style pages count as page views.
pub fn is_page_view(record: &LogRecord) -> bool {
    record.status == Some(200) && record.path.ends_with('/')
}

/// Unbounded counts accumulated while a day is open.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct PageCounts {
    human_total: u32,
    human_unique: u32,
    bot_total: u32,
    bot_unique: u32,
}

impl PageCounts {
    fn record(&mut self, class: TrafficClass, unique: bool) {
        let (total, unique_count) = match class {
            TrafficClass::Human => (&mut self.human_total, &mut self.human_unique),
            TrafficClass::Bot => (&mut self.bot_total, &mut self.bot_unique),
        };
        *total += 1;
        if unique {
            *unique_count += 1;
        }
    }

    /// Clamp to the snapshot's 16-bit columns. Returns the metric and whether
    /// any count had to be clamped.
    fn bounded(&self, date: NaiveDate, page: &str) -> (DailyPageMetric, bool) {
        let clamp = |v: u32| u16::try_from(v).unwrap_or(u16::MAX);
        let saturated = [self.human_total, self.human_unique, self.bot_total, self.bot_unique]
            .iter()
            .any(|v| *v > u32::from(u16::MAX));
        let metric = DailyPageMetric {
            date,
            page: page.to_string(),
            human_total: clamp(self.human_total),
            human_unique: clamp(self.human_unique),
            bot_total: clamp(self.bot_total),
            bot_unique: clamp(self.bot_unique),
        };
        (metric, saturated)
    }
}

/// Aggregates the records of exactly one calendar day.
///
/// The uniqueness sets and the user-agent verdict memo live only as long as
/// the aggregator; [`DayAggregator::finish`] drops them together.
pub struct DayAggregator<'a> {
    date: NaiveDate,
    classifier: &'a RequestClassifier,
    pages: BTreeMap<String, PageCounts>,
    seen_ips: HashMap<String, HashSet<String>>,
    verdicts: HashMap<String, TrafficClass>,
}

impl<'a> DayAggregator<'a> {
    pub fn new(date: NaiveDate, classifier: &'a RequestClassifier) -> Self {
        Self {
            date,
            classifier,
            pages: BTreeMap::new(),
            seen_ips: HashMap::new(),
            verdicts: HashMap::new(),
        }
    }

    /// Count one record. Records that are not page views are ignored.
    pub fn observe(&mut self, record: &LogRecord) {
        if !is_page_view(record) {
            return;
        }

        let classifier = self.classifier;
        let class = *self
            .verdicts
            .entry(record.user_agent.clone())
            .or_insert_with(|| classifier.classify(&record.user_agent));

        // One set per page, shared by both classes: an IP is unique on its
        // first request for the page that day, whichever class it lands in.
        let unique = self
            .seen_ips
            .entry(record.path.clone())
            .or_default()
            .insert(record.client_ip.clone());

        self.pages
            .entry(record.path.clone())
            .or_default()
            .record(class, unique);
    }

    /// Close the day and emit one bounded metric per page, keyed by page.
    pub fn finish(self) -> BTreeMap<String, DailyPageMetric> {
        let distinct_pairs: usize = self.seen_ips.values().map(HashSet::len).sum();
        debug!(
            "Closing {}: {} pages, {} distinct page/IP pairs, {} distinct agents",
            self.date,
            self.pages.len(),
            distinct_pairs,
            self.verdicts.len()
        );

        self.pages
            .into_iter()
            .map(|(page, counts)| {
                let (metric, saturated) = counts.bounded(self.date, &page);
                if saturated {
                    warn!(
                        date = %self.date,
                        page = %page,
                        ?counts,
                        "Daily counts exceed 65535 and were saturated"
                    );
                }
                (page, metric)
            })
            .collect()
    }
}

/// Aggregate one day's records into per-page metrics.
pub fn aggregate_day<'r, I>(
    date: NaiveDate,
    records: I,
    classifier: &RequestClassifier,
) -> BTreeMap<String, DailyPageMetric>
where
    I: IntoIterator<Item = &'r LogRecord>,
{
    let mut aggregator = DayAggregator::new(date, classifier);
    for record in records {
        aggregator.observe(record);
    }
    aggregator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::UaFamilies;
    use std::sync::Arc;

    fn classifier() -> RequestClassifier {
        RequestClassifier::new(Arc::new(|ua: &str| match ua {
            "spider" => UaFamilies::new("Spider", "Linux", "Chrome"),
            "unknown" => UaFamilies::new("Other", "Other", "Other"),
            _ => UaFamilies::new("iPhone", "iOS", "Mobile Safari"),
        }))
    }

    fn record(ip: &str, path: &str, status: u16, ua: &str) -> LogRecord {
        LogRecord {
            client_ip: ip.to_string(),
            path: path.to_string(),
            status: Some(status),
            user_agent: ua.to_string(),
            referrer: "-".to_string(),
            timestamp: None,
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    #[test]
    fn test_human_and_spider_scenario() {
        let records = vec![
            record("1.1.1.1", "/", 200, "human"),
            record("1.1.1.1", "/", 200, "human"),
            record("1.1.1.1", "/", 200, "human"),
            record("2.2.2.2", "/", 200, "spider"),
            record("2.2.2.2", "/", 200, "spider"),
        ];

        let metrics = aggregate_day(day(), &records, &classifier());

        assert_eq!(metrics.len(), 1);
        let root = &metrics["/"];
        assert_eq!(root.date, day());
        assert_eq!(
            (root.human_total, root.human_unique, root.bot_total, root.bot_unique),
            (3, 1, 2, 1)
        );
    }

    #[test]
    fn test_filter_keeps_only_ok_directory_pages() {
        let records = vec![
            record("1.1.1.1", "/blog/", 200, "human"),
            record("1.1.1.1", "/blog/style.css", 200, "human"),
            record("1.1.1.1", "/missing/", 404, "human"),
            record("1.1.1.1", "/moved/", 301, "human"),
            LogRecord {
                status: None,
                ..record("1.1.1.1", "/odd/", 200, "human")
            },
        ];

        let metrics = aggregate_day(day(), &records, &classifier());

        assert_eq!(metrics.keys().collect::<Vec<_>>(), ["/blog/"]);
    }

    #[test]
    fn test_uniqueness_is_per_page() {
        let records = vec![
            record("1.1.1.1", "/a/", 200, "human"),
            record("1.1.1.1", "/b/", 200, "human"),
            record("3.3.3.3", "/a/", 200, "human"),
            record("1.1.1.1", "/a/", 200, "human"),
        ];

        let metrics = aggregate_day(day(), &records, &classifier());

        assert_eq!((metrics["/a/"].human_total, metrics["/a/"].human_unique), (3, 2));
        assert_eq!((metrics["/b/"].human_total, metrics["/b/"].human_unique), (1, 1));
    }

    #[test]
    fn test_ip_seen_as_human_is_not_unique_as_bot() {
        let records = vec![
            record("4.4.4.4", "/", 200, "human"),
            record("4.4.4.4", "/", 200, "unknown"),
        ];

        let metrics = aggregate_day(day(), &records, &classifier());
        let root = &metrics["/"];

        assert_eq!((root.human_total, root.human_unique), (1, 1));
        assert_eq!((root.bot_total, root.bot_unique), (1, 0));
    }

    #[test]
    fn test_unique_never_exceeds_total() {
        let ips = ["1.1.1.1", "2.2.2.2", "3.3.3.3"];
        let uas = ["human", "spider", "unknown"];
        let pages = ["/", "/a/", "/b/"];
        let mut records = Vec::new();
        for i in 0..60 {
            records.push(record(ips[i % 3], pages[(i / 3) % 3], 200, uas[(i / 7) % 3]));
        }

        for metric in aggregate_day(day(), &records, &classifier()).values() {
            assert!(metric.human_unique <= metric.human_total, "{metric:?}");
            assert!(metric.bot_unique <= metric.bot_total, "{metric:?}");
        }
    }

    #[test]
    fn test_counts_saturate_at_u16_max() {
        let classifier = classifier();
        let mut aggregator = DayAggregator::new(day(), &classifier);
        let hit = record("1.1.1.1", "/", 200, "human");
        for _ in 0..(u32::from(u16::MAX) + 10) {
            aggregator.observe(&hit);
        }

        let metrics = aggregator.finish();
        assert_eq!(metrics["/"].human_total, u16::MAX);
        assert_eq!(metrics["/"].human_unique, 1);
    }

    #[test]
    fn test_empty_day() {
        let metrics = aggregate_day(day(), &Vec::<LogRecord>::new(), &classifier());
        assert!(metrics.is_empty());
    }
}
