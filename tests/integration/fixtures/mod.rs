// Known log content for integration tests
#![allow(dead_code)]

/// Column header used by every fixture log, in CloudFront field order.
pub const LOG_HEADER: &str = "#Version: 1.0\n\
#Fields: date time x-edge-location sc-bytes c-ip cs-method cs(Host) cs-uri-stem sc-status cs(Referer) cs(User-Agent)\n";

/// Classified as human by the built-in parser.
pub const IPHONE_SAFARI: &str = "Mozilla/5.0%20(iPhone;%20CPU%20iPhone%20OS%2017_0%20like%20Mac%20OS%20X)%20AppleWebKit/605.1.15%20(KHTML,%20like%20Gecko)%20Version/17.0%20Mobile/15E148%20Safari/604.1";

/// Classified as human by the built-in parser.
pub const MAC_CHROME: &str = "Mozilla/5.0%20(Macintosh;%20Intel%20Mac%20OS%20X%2010_15_7)%20AppleWebKit/537.36%20(KHTML,%20like%20Gecko)%20Chrome/120.0.0.0%20Safari/537.36";

/// Spider device family.
pub const GOOGLEBOT: &str = "Mozilla/5.0%20(compatible;%20Googlebot/2.1;%20+http://www.google.com/bot.html)";

/// One request: (client ip, path, status, user agent).
pub type Hit<'a> = (&'a str, &'a str, u16, &'a str);

/// Render an extended-format log for `day` containing `hits` in order.
pub fn extended_log(day: &str, hits: &[Hit<'_>]) -> String {
    let mut text = LOG_HEADER.to_string();
    for (second, (ip, path, status, ua)) in hits.iter().enumerate() {
        text.push_str(&format!(
            "{day}\t00:00:{:02}\tLHR62-C2\t512\t{ip}\tGET\texample.cloudfront.net\t{path}\t{status}\t-\t{ua}\n",
            second % 60
        ));
    }
    text
}

/// The reference day: three human hits from one IP, two spider hits from another.
pub fn scenario_hits() -> Vec<Hit<'static>> {
    vec![
        ("1.1.1.1", "/", 200, IPHONE_SAFARI),
        ("1.1.1.1", "/", 200, IPHONE_SAFARI),
        ("1.1.1.1", "/", 200, IPHONE_SAFARI),
        ("2.2.2.2", "/", 200, GOOGLEBOT),
        ("2.2.2.2", "/", 200, GOOGLEBOT),
    ]
}
