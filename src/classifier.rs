use regex_automata::meta::{BuildError, Regex};
use std::sync::Arc;

/// Family name the UA parser uses when it cannot identify a component.
pub const OTHER_FAMILY: &str = "Other";
/// Device family assigned to crawlers.
pub const SPIDER_FAMILY: &str = "Spider";

/// Whether a request came from a person or an automated agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficClass {
    Human,
    Bot,
}

/// Families extracted from a user-agent string, in ua-parser terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UaFamilies {
    pub device: String,
    pub os: String,
    pub agent: String,
}

impl UaFamilies {
    pub fn new(device: impl Into<String>, os: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            os: os.into(),
            agent: agent.into(),
        }
    }
}

/// Decide human vs bot from parsed families.
///
/// Any unidentified component, or a spider device, makes the request a bot.
pub fn classify_families(families: &UaFamilies) -> TrafficClass {
    let unidentified = families.device == OTHER_FAMILY
        || families.os == OTHER_FAMILY
        || families.agent == OTHER_FAMILY;
    if unidentified || families.device == SPIDER_FAMILY {
        TrafficClass::Bot
    } else {
        TrafficClass::Human
    }
}

/// Extracts device, OS and agent families from a raw user-agent string.
pub trait UserAgentParser: Send + Sync {
    fn parse(&self, user_agent: &str) -> UaFamilies;
}

impl<F> UserAgentParser for F
where
    F: Fn(&str) -> UaFamilies + Send + Sync,
{
    fn parse(&self, user_agent: &str) -> UaFamilies {
        self(user_agent)
    }
}

/// Shared, read-only classifier handed to every lane.
#[derive(Clone)]
pub struct RequestClassifier {
    parser: Arc<dyn UserAgentParser>,
}

impl RequestClassifier {
    pub fn new(parser: Arc<dyn UserAgentParser>) -> Self {
        Self { parser }
    }

    pub fn classify(&self, user_agent: &str) -> TrafficClass {
        classify_families(&self.parser.parse(user_agent))
    }
}

impl std::fmt::Debug for RequestClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestClassifier").finish_non_exhaustive()
    }
}

// Rules are tried in order and the first match wins, so more specific
// patterns sit above the ones they would otherwise be shadowed by.

// Crawler names end in "bot" or "Bot" followed by a version, a separator or
// the end of the string. Upper-case "BOT" is left out because phone brands
// such as CUBOT use it.
const SPIDER_PATTERN: &str = r"(?i:crawl|spider|slurp|archiver|fetcher|scrapy|curl/|wget/|python-requests|python-urllib|go-http-client|java/|libwww|httpclient|okhttp|facebookexternalhit|headlesschrome|lighthouse|mediapartners|bingpreview)|[Bb]ot(?:[/;)+,@-]|\s?v?\d|$)";

const DEVICE_RULES: &[(&str, &str)] = &[
    (r"iPhone", "iPhone"),
    (r"iPad", "iPad"),
    (r"iPod", "iPod"),
    (r"Macintosh", "Mac"),
    (r"Android.*Mobile", "Generic Smartphone"),
    (r"Android", "Generic Tablet"),
];

const OS_RULES: &[(&str, &str)] = &[
    (r"iPhone|iPad|iPod", "iOS"),
    (r"Android", "Android"),
    (r"Windows", "Windows"),
    (r"CrOS", "Chrome OS"),
    (r"Mac OS X|Macintosh", "Mac OS X"),
    (r"Ubuntu", "Ubuntu"),
    (r"Linux", "Linux"),
];

// In-app browsers come first: their UAs also carry the host engine's tokens.
const AGENT_RULES: &[(&str, &str)] = &[
    (r"Instagram[ /]\d", "Instagram"),
    (r"FBAN/|FBAV/|FB_IAB/|FBIOS", "Facebook"),
    (r"LinkedInApp", "LinkedIn"),
    (r"Snapchat/?\d", "Snapchat"),
    (r"Pinterest(?:/| for )", "Pinterest"),
    (r"MicroMessenger/", "WeChat"),
    (r"\bLine/\d", "LINE"),
    (r"GSA/", "Google"),
    (r"Edg(e|A|iOS)?/", "Edge"),
    (r"OPR/|Opera", "Opera"),
    (r"SamsungBrowser/", "Samsung Internet"),
    (r"CriOS/", "Chrome Mobile iOS"),
    (r"FxiOS/", "Firefox iOS"),
    (r"Firefox/", "Firefox"),
    (r"; wv\).*Chrome/", "Chrome Mobile WebView"),
    (r"Chrome/[\d.]+ Mobile", "Chrome Mobile"),
    (r"Chrome/", "Chrome"),
    (r"Mobile/\S+ Safari/|Version/[\d.]+ Mobile", "Mobile Safari"),
    (r"Version/[\d.]+.*Safari/", "Safari"),
    (r"(?:iPhone|iPad|iPod).*AppleWebKit/.*Mobile/", "Mobile Safari UI/WKWebView"),
    (r"MSIE |Trident/", "IE"),
];

/// Regex-based stand-in for a full ua-parser rule set.
///
/// Follows ua-parser's conventions: crawlers get the `Spider` device family
/// and anything not recognised is `Other` (which includes desktop devices
/// other than Macs).
pub struct HeuristicUaParser {
    spider: Regex,
    devices: Vec<(Regex, &'static str)>,
    oses: Vec<(Regex, &'static str)>,
    agents: Vec<(Regex, &'static str)>,
}

impl HeuristicUaParser {
    pub fn new() -> Result<Self, BuildError> {
        Ok(Self {
            spider: Regex::new(SPIDER_PATTERN)?,
            devices: compile(DEVICE_RULES)?,
            oses: compile(OS_RULES)?,
            agents: compile(AGENT_RULES)?,
        })
    }
}

fn compile(rules: &[(&str, &'static str)]) -> Result<Vec<(Regex, &'static str)>, BuildError> {
    rules
        .iter()
        .map(|(pattern, family)| Regex::new(pattern).map(|regex| (regex, *family)))
        .collect()
}

fn first_match(rules: &[(Regex, &'static str)], user_agent: &str) -> &'static str {
    rules
        .iter()
        .find(|(regex, _)| regex.is_match(user_agent))
        .map_or(OTHER_FAMILY, |(_, family)| *family)
}

impl UserAgentParser for HeuristicUaParser {
    fn parse(&self, user_agent: &str) -> UaFamilies {
        if self.spider.is_match(user_agent) {
            return UaFamilies::new(SPIDER_FAMILY, OTHER_FAMILY, OTHER_FAMILY);
        }
        UaFamilies::new(
            first_match(&self.devices, user_agent),
            first_match(&self.oses, user_agent),
            first_match(&self.agents, user_agent),
        )
    }
}
