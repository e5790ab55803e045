use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use logtally::reader::{parse_blobs, parse_extended_log};
use logtally::{aggregate_day, HeuristicUaParser, LogRecord, RequestClassifier};
use std::sync::Arc;

const HEADER: &str = "#Version: 1.0\n#Fields: date time x-edge-location c-ip cs-method cs-uri-stem sc-status cs(Referer) cs(User-Agent)\n";

const AGENTS: [&str; 4] = [
    "Mozilla/5.0%20(iPhone;%20CPU%20iPhone%20OS%2017_0%20like%20Mac%20OS%20X)%20AppleWebKit/605.1.15%20(KHTML,%20like%20Gecko)%20Version/17.0%20Mobile/15E148%20Safari/604.1",
    "Mozilla/5.0%20(Macintosh;%20Intel%20Mac%20OS%20X%2010_15_7)%20AppleWebKit/537.36%20(KHTML,%20like%20Gecko)%20Chrome/120.0.0.0%20Safari/537.36",
    "Mozilla/5.0%20(compatible;%20Googlebot/2.1;%20+http://www.google.com/bot.html)",
    "curl/8.4.0",
];

const PAGES: [&str; 6] = ["/", "/blog/", "/about/", "/blog/post-1/", "/style.css", "/missing/"];

// Synthetic day: a few hundred visitors, mixed agents and pages
fn synthetic_log(requests: usize) -> String {
    let mut text = String::with_capacity(HEADER.len() + requests * 220);
    text.push_str(HEADER);
    for i in 0..requests {
        let status = if i % 17 == 0 { 404 } else { 200 };
        text.push_str(&format!(
            "2024-01-02\t{:02}:{:02}:{:02}\tLHR62-C2\t10.0.{}.{}\tGET\t{}\t{}\t-\t{}\n",
            (i / 3600) % 24,
            (i / 60) % 60,
            i % 60,
            (i / 256) % 4,
            i % 256,
            PAGES[i % PAGES.len()],
            status,
            AGENTS[(i / 7) % AGENTS.len()],
        ));
    }
    text
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("extended_log_parse");
    for requests in [1_000usize, 10_000] {
        let text = synthetic_log(requests);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(requests), &text, |b, text| {
            b.iter(|| black_box(parse_extended_log("bench", text).map(|r| r.len())))
        });
    }
    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let parser = HeuristicUaParser::new().expect("UA rules should compile");
    let classifier = RequestClassifier::new(Arc::new(parser));
    let date = NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid date");

    let mut group = c.benchmark_group("daily_aggregate");
    for requests in [1_000usize, 10_000, 100_000] {
        let table = parse_blobs(vec![("bench".to_string(), synthetic_log(requests).into_bytes())]);
        let records: Vec<LogRecord> = table.records.unwrap_or_default();
        group.throughput(Throughput::Elements(records.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(requests), &records, |b, records| {
            b.iter(|| black_box(aggregate_day(date, records, &classifier).len()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse, bench_aggregate);
criterion_main!(benches);
