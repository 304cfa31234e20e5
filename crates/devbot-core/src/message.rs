//! Rendering helpers shared by the record variants.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Date layout used by the open-data API, e.g. `2022-01-10T00:00:00.000`.
pub const UPSTREAM_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

pub const FEED_SOURCE: &str = "City of Calgary Open Data";
pub const DEVELOPMENT_MAP_URL: &str = "https://developmentmap.calgary.ca/?find=";
pub const DMAP_URL: &str = "https://dmap.calgary.ca/?find=";

/// Everything a syndication sink needs to publish one record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub guid: String,
    pub title: String,
    pub summary: String,
    pub link: String,
    pub pub_date: DateTime<Utc>,
    pub category: String,
    pub author: String,
    pub source: String,
    pub comments: String,
    pub content: String,
}

pub fn parse_upstream_date(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), UPSTREAM_DATE_FORMAT).ok()
}

/// `2022-01-10T00:00:00.000` becomes `2022-01-10`; anything unparseable is
/// shown as received.
pub fn short_date(value: &str) -> String {
    parse_upstream_date(value)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| value.to_string())
}

/// `January 2, 2006` style date, if the value parses.
pub fn long_date(value: &str) -> Option<String> {
    parse_upstream_date(value).map(|d| d.format("%B %-d, %Y").to_string())
}

/// Upper-cases the first letter of every word, leaving the rest untouched.
pub fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut at_word_start = true;
    for ch in value.chars() {
        if at_word_start {
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
        at_word_start = !(ch.is_alphanumeric() || ch == '_');
    }
    out
}

pub fn google_maps_url(address: &str) -> String {
    let query: String =
        url::form_urlencoded::byte_serialize(format!("{address}, Calgary, Alberta").as_bytes()).collect();
    format!("https://maps.google.com/?q={query}")
}

pub fn development_map_url(key: &str) -> String {
    format!("{DEVELOPMENT_MAP_URL}{key}")
}

/// Accumulates `**Label:** value` lines for the markdown About block.
#[derive(Debug, Default)]
pub(crate) struct AboutBlock {
    lines: Vec<String>,
}

impl AboutBlock {
    pub(crate) fn line(&mut self, label: &str, value: &str) -> &mut Self {
        self.lines.push(format!("**{label}:** {value}"));
        self
    }

    pub(crate) fn opt(&mut self, label: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value {
            self.line(label, value);
        }
        self
    }

    pub(crate) fn finish(&self, key: &str, address: Option<&str>) -> String {
        let mut message = String::from("## About\n\n");
        message.push_str(&self.lines.join("\n"));
        message.push_str("\n\n## Links\n\n");
        message.push_str(&format!("[Development Map]({DMAP_URL}{key})"));
        if let Some(address) = address {
            message.push_str(&format!("\n[Google Maps]({})", google_maps_url(address)));
        }
        message.push('\n');
        message
    }
}
