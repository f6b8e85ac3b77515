//! User-agent decomposition into browser, operating system and device.
//!
//! Rules are tried in order and the first match wins, so more specific products (Edge, Opera,
//! Samsung Internet) are listed before the engines they are built on (Chrome, Safari).

use once_cell::sync::Lazy;
use regex::Regex;

struct Rule {
    regex: Regex,
    name: Option<&'static str>,
}

fn rules(table: &[(&str, Option<&'static str>)]) -> Vec<Rule> {
    table
        .iter()
        .map(|(pattern, name)| Rule {
            regex: Regex::new(pattern).expect("user-agent pattern is valid"),
            name: *name,
        })
        .collect()
}

/// Browser rules: group 1 is the version.
static BROWSERS: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (r"\b(?:EdgA|EdgiOS|Edge?)/([\d.]+)", Some("Edge")),
        (r"\b(?:OPR|OPiOS)/([\d.]+)", Some("Opera")),
        (r"\bOpera\b.*\bVersion/([\d.]+)", Some("Opera")),
        (r"\bSamsungBrowser/([\d.]+)", Some("Samsung Internet")),
        (r"\bFxiOS/([\d.]+)", Some("Firefox")),
        (r"\bFirefox/([\d.]+)", Some("Firefox")),
        (r"\bHeadlessChrome/([\d.]+)", Some("Chrome Headless")),
        (r"; wv\).*?\bChrome/([\d.]+)", Some("Chrome WebView")),
        (r"\bCriOS/([\d.]+)", Some("Chrome")),
        (r"\bChrome/([\d.]+)", Some("Chrome")),
        (r"\bVersion/([\d.]+).*\bMobile/\S+ Safari/", Some("Mobile Safari")),
        (r"\bVersion/([\d.]+).*\bSafari/", Some("Safari")),
        (r"(?:\bMSIE |\bTrident/.*\brv:)([\d.]+)", Some("IE")),
    ])
});

/// Operating system rules: group 1, when present, is the version.
static OPERATING_SYSTEMS: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (r"\bWindows NT ([\d.]+)", Some("Windows")),
        (r"\b(?:iPhone|iPad|iPod)\b.*?\bOS ([\d_]+)", Some("iOS")),
        (r"\bCrOS \S+ ([\d.]+)", Some("Chrome OS")),
        (r"\bMac OS X(?: ([\d_.]+))?", Some("Mac OS")),
        (r"\bAndroid(?:[ /]([\d.]+))?", Some("Android")),
        (r"\bUbuntu(?:/([\d.]+))?", Some("Ubuntu")),
        (r"\bLinux\b", Some("Linux")),
    ])
});

/// Device rules: `name` is the vendor (if known) and group 1 is the model.
static DEVICES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (r"\b(iPad)\b", Some("Apple")),
        (r"\b(iPod)\b", Some("Apple")),
        (r"\b(iPhone)\b", Some("Apple")),
        (r"\b(Macintosh)\b", Some("Apple")),
        (r"\b((?:SM|GT|SCH)-[A-Za-z0-9]+)", Some("Samsung")),
        (r"\b(Pixel[^;)]*?)(?: Build/|;|\))", Some("Google")),
        (r"\bHUAWEI[ _]?([^;)]*?)(?: Build/|;|\))", Some("Huawei")),
        (r"\b((?:ELE|VOG|ANE|LYA|MAR|CLT|EML)-[A-Z0-9]+)", Some("Huawei")),
        (r"\b((?:Redmi|POCO|Mi)[ _][^;)]*?|M\d{4}[A-Z0-9]+)(?: Build/|;|\))", Some("Xiaomi")),
        (r"\bAndroid [\d.]+; (?:[a-z]{2}[-_][A-Za-z]{2}; )?([^;)]+?)(?: Build/|;|\))", None),
    ])
});

/// Form-factor tokens that sit where the generic Android rule expects a model, e.g. Firefox's
/// `(Android 14; Mobile; rv:121.0)`.
const FORM_FACTOR_TOKENS: [&str; 3] = ["Mobile", "Tablet", "TV"];

/// The decomposed user agent. Each component is `None` when nothing about it was recognized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAgent {
    /// Browser name and version, e.g. `Chrome 120.0.0.0`
    pub browser: Option<String>,
    /// Operating system name and version, e.g. `Windows 10`
    pub os: Option<String>,
    /// Device vendor and model, e.g. `Apple iPhone`
    pub device: Option<String>,
}

impl UserAgent {
    pub fn parse(user_agent: &str) -> Self {
        Self {
            browser: parse_browser(user_agent),
            os: parse_os(user_agent),
            device: parse_device(user_agent),
        }
    }
}

fn parse_browser(ua: &str) -> Option<String> {
    let (rule, captures) = first_match(&BROWSERS, ua)?;
    join(rule.name, captures.get(1).map(|m| m.as_str()))
}

fn parse_os(ua: &str) -> Option<String> {
    let (rule, captures) = first_match(&OPERATING_SYSTEMS, ua)?;
    let version = captures.get(1).map(|m| m.as_str().replace('_', "."));
    let version = match (rule.name, version) {
        (Some("Windows"), Some(nt)) => Some(windows_release(&nt).to_string()),
        (_, version) => version,
    };
    join(rule.name, version.as_deref())
}

fn parse_device(ua: &str) -> Option<String> {
    let (rule, captures) = first_match(&DEVICES, ua)?;
    let model = captures
        .get(1)
        .map(|m| m.as_str().trim())
        .filter(|model| !FORM_FACTOR_TOKENS.contains(model));
    join(rule.name, model)
}

fn first_match<'r, 'u>(rules: &'r [Rule], ua: &'u str) -> Option<(&'r Rule, regex::Captures<'u>)> {
    rules.iter().find_map(|rule| rule.regex.captures(ua).map(|captures| (rule, captures)))
}

/// Marketing name of a Windows NT kernel version.
fn windows_release(nt_version: &str) -> &str {
    match nt_version {
        "10.0" => "10",
        "6.3" => "8.1",
        "6.2" => "8",
        "6.1" => "7",
        "6.0" => "Vista",
        "5.1" | "5.2" => "XP",
        "5.0" => "2000",
        other => other,
    }
}

/// Joins the known parts with a space; `None` if neither part is known.
fn join(first: Option<&str>, second: Option<&str>) -> Option<String> {
    let parts: Vec<&str> = [first, second].into_iter().flatten().filter(|s| !s.is_empty()).collect();
    if parts.is_empty() { None } else { Some(parts.join(" ")) }
}
