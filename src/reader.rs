use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use flate2::read::MultiGzDecoder;
use std::io::Read;
use tracing::{debug, warn};

use crate::error::FileError;

/// Plain-text logs start with this line; anything else is treated as gzip.
pub const VERSION_MARKER: &str = "#Version:";

pub const FIELD_DATE: &str = "date";
pub const FIELD_TIME: &str = "time";
pub const FIELD_CLIENT_IP: &str = "c-ip";
pub const FIELD_URI_STEM: &str = "cs-uri-stem";
pub const FIELD_STATUS: &str = "sc-status";
pub const FIELD_USER_AGENT: &str = "cs(User-Agent)";
pub const FIELD_REFERER: &str = "cs(Referer)";

/// One request line of an extended-format access log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub client_ip: String,
    pub path: String,
    /// `None` when the status column is not an integer.
    pub status: Option<u16>,
    /// Percent-decoded user-agent string.
    pub user_agent: String,
    pub referrer: String,
    /// From the `date` and `time` columns, when both are present and valid.
    pub timestamp: Option<NaiveDateTime>,
}

/// Records parsed from all of one day's log objects.
#[derive(Debug, Default)]
pub struct DayTable {
    /// `None` when not a single object could be parsed.
    pub records: Option<Vec<LogRecord>>,
    pub files_parsed: usize,
    pub failures: Vec<FileError>,
}

/// Column positions resolved from the `#Fields:` header line.
struct Columns {
    width: usize,
    client_ip: usize,
    path: usize,
    status: usize,
    user_agent: Option<usize>,
    referrer: Option<usize>,
    date: Option<usize>,
    time: Option<usize>,
}

impl Columns {
    fn resolve(id: &str, header: &str) -> Result<Self, FileError> {
        // The first token is the "#Fields:" directive itself.
        let names: Vec<&str> = header.split_whitespace().skip(1).collect();
        let find = |name: &str| names.iter().position(|n| *n == name);
        let require = |column: &'static str| {
            find(column).ok_or_else(|| FileError::MissingColumn {
                id: id.to_string(),
                column,
            })
        };

        Ok(Self {
            width: names.len(),
            client_ip: require(FIELD_CLIENT_IP)?,
            path: require(FIELD_URI_STEM)?,
            status: require(FIELD_STATUS)?,
            user_agent: find(FIELD_USER_AGENT),
            referrer: find(FIELD_REFERER),
            date: find(FIELD_DATE),
            time: find(FIELD_TIME),
        })
    }
}

/// Undo the gzip layer if there is one and decode the text.
pub fn decode_blob(id: &str, bytes: &[u8]) -> Result<String, FileError> {
    let raw = if bytes.starts_with(VERSION_MARKER.as_bytes()) {
        bytes.to_vec()
    } else {
        let mut inflated = Vec::new();
        MultiGzDecoder::new(bytes)
            .read_to_end(&mut inflated)
            .map_err(|source| FileError::Decompress {
                id: id.to_string(),
                source,
            })?;
        inflated
    };
    String::from_utf8(raw).map_err(|_| FileError::Encoding { id: id.to_string() })
}

/// Parse the text of one extended-format log.
///
/// Line 1 is the version line and is skipped, line 2 names the columns, and
/// every following non-comment line is a tab-separated request. Rows shorter
/// than the header are padded with empty values; longer rows reject the file.
pub fn parse_extended_log(id: &str, text: &str) -> Result<Vec<LogRecord>, FileError> {
    let mut lines = text.lines();
    lines.next().ok_or_else(|| FileError::MissingHeader {
        id: id.to_string(),
        what: "version",
    })?;
    let header = lines.next().ok_or_else(|| FileError::MissingHeader {
        id: id.to_string(),
        what: "fields",
    })?;
    let columns = Columns::resolve(id, header)?;

    let mut records = Vec::new();
    for (offset, line) in lines.enumerate() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() > columns.width {
            return Err(FileError::Malformed {
                id: id.to_string(),
                line: offset + 3,
                expected: columns.width,
                found: fields.len(),
            });
        }
        records.push(build_record(&columns, &fields));
    }

    debug!("Parsed {}: {} records", id, records.len());
    Ok(records)
}

fn build_record(columns: &Columns, fields: &[&str]) -> LogRecord {
    let field = |idx: usize| fields.get(idx).copied().unwrap_or("");
    let optional = |idx: Option<usize>| idx.map(field).unwrap_or("");

    let timestamp = match (columns.date, columns.time) {
        (Some(d), Some(t)) => {
            let date = NaiveDate::parse_from_str(field(d), "%Y-%m-%d").ok();
            let time = NaiveTime::parse_from_str(field(t), "%H:%M:%S").ok();
            date.zip(time).map(|(date, time)| date.and_time(time))
        }
        _ => None,
    };

    LogRecord {
        client_ip: field(columns.client_ip).to_string(),
        path: field(columns.path).to_string(),
        status: field(columns.status).trim().parse().ok(),
        user_agent: percent_decode(optional(columns.user_agent)),
        referrer: optional(columns.referrer).to_string(),
        timestamp,
    }
}

fn percent_decode(raw: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned()
}

/// Decode and parse every blob of one day into a single table.
///
/// Row order across blobs is not significant. A blob that fails to decode or
/// parse is skipped with a warning and recorded in [`DayTable::failures`].
pub fn parse_blobs<I>(blobs: I) -> DayTable
where
    I: IntoIterator<Item = (String, Vec<u8>)>,
{
    let mut table = DayTable::default();
    for (id, bytes) in blobs {
        let parsed = decode_blob(&id, &bytes).and_then(|text| parse_extended_log(&id, &text));
        match parsed {
            Ok(records) => {
                table.files_parsed += 1;
                table.records.get_or_insert_with(Vec::new).extend(records);
            }
            Err(e) => {
                warn!("Couldn't parse log file: {}", e);
                table.failures.push(e);
            }
        }
    }
    table
}
