//! Land use rezoning applications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::most_recent_timestamp;
use crate::message::{development_map_url, google_maps_url, long_date, short_date, AboutBlock, FeedEntry, FEED_SOURCE};
use crate::record::{RecordKind, TrackedRecord, Tracking};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Multipoint {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub coordinates: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RezoningApplication {
    #[serde(rename = "permittype", default)]
    pub permit_type: Option<String>,
    #[serde(rename = "permitnum", default)]
    pub permit_num: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "statuscurrent")]
    pub status_current: String,
    #[serde(rename = "applieddate", default)]
    pub applied_date: Option<String>,
    #[serde(rename = "completeddate", default)]
    pub completed_date: Option<String>,
    #[serde(default)]
    pub applicant: Option<String>,
    #[serde(rename = "fromlud", default)]
    pub from_lud: Option<String>,
    #[serde(rename = "proposedlud", default)]
    pub proposed_lud: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(rename = "locationaddresses", default)]
    pub location_addresses: Option<String>,
    #[serde(rename = "locationcount", default)]
    pub location_count: Option<String>,
    #[serde(default)]
    pub latitude: Option<String>,
    #[serde(default)]
    pub longitude: Option<String>,
    #[serde(default)]
    pub multipoint: Option<Multipoint>,
    #[serde(flatten)]
    pub tracking: Tracking,
}

impl RezoningApplication {
    fn feed_description(&self) -> String {
        let mut html = String::new();
        html.push_str(&format!("<h3>🏛️ REZONING APPLICATION {}</h3>", self.permit_num));
        html.push_str(&format!("<p><strong>Status:</strong> {}</p>", self.status_current));

        if let Some(address) = &self.address {
            html.push_str(&format!("<p>📍 <strong>Address:</strong> {address}</p>"));
            html.push_str("<ul style='margin-top: 5px; margin-bottom: 15px;'>");
            html.push_str(&format!(
                "<li>📍 <a href='{}' target='_blank'>View on Google Maps</a></li>",
                google_maps_url(address)
            ));
            html.push_str(&format!(
                "<li>📋 <a href='{}' target='_blank'>View on Calgary Development Map</a></li>",
                development_map_url(&self.permit_num)
            ));
            html.push_str("</ul>");
        }
        if let Some(description) = &self.description {
            html.push_str(&format!("<p>🏗️ <strong>Project:</strong> {description}</p>"));
        }

        html.push_str(
            "<div style='background-color: #fff3cd; padding: 10px; margin: 10px 0; border-left: 4px solid #ffc107;'>",
        );
        html.push_str("<h4>🏘️ LAND USE CHANGE:</h4><ul>");
        if let Some(from) = &self.from_lud {
            html.push_str(&format!("<li><strong>From:</strong> {from}</li>"));
        }
        if let Some(to) = &self.proposed_lud {
            html.push_str(&format!("<li><strong>To:</strong> {to}</li>"));
        }
        html.push_str("</ul></div>");

        if let Some(applicant) = &self.applicant {
            html.push_str(&format!("<p>👤 <strong>Applicant:</strong> {applicant}</p>"));
        }

        html.push_str("<h4>📅 TIMELINE:</h4><ul>");
        for (label, value) in [("Applied", &self.applied_date), ("Completed", &self.completed_date)] {
            if let Some(date) = value.as_deref().and_then(long_date) {
                html.push_str(&format!("<li>{label}: {date}</li>"));
            }
        }
        html.push_str("</ul>");

        if self.status_current.to_lowercase().contains("approv") {
            html.push_str(
                "<div style='background-color: #d4edda; padding: 10px; margin: 10px 0; border-left: 4px solid #28a745;'>",
            );
            html.push_str(&format!("<strong>✅ STATUS:</strong> {}", self.status_current));
            html.push_str("</div>");
        }
        html
    }
}

impl TrackedRecord for RezoningApplication {
    const KIND: RecordKind = RecordKind::RezoningApplication;

    fn key(&self) -> &str {
        &self.permit_num
    }

    fn status(&self) -> &str {
        &self.status_current
    }

    fn tracking(&self) -> &Tracking {
        &self.tracking
    }

    fn tracking_mut(&mut self) -> &mut Tracking {
        &mut self.tracking
    }

    fn field_changes(&self, stored: &Self) -> Vec<String> {
        if self.status_current == stored.status_current {
            return Vec::new();
        }
        vec![format!(
            "Status updated from '{}' to '{}'",
            stored.status_current, self.status_current
        )]
    }

    fn dated_fields(&self) -> Vec<&str> {
        [&self.applied_date, &self.completed_date]
            .into_iter()
            .filter_map(|d| d.as_deref())
            .collect()
    }

    fn information_message(&self) -> String {
        let mut about = AboutBlock::default();
        about
            .line("Permit Number", &self.permit_num)
            .opt("Date Applied", self.applied_date.as_deref().map(short_date).as_deref())
            .opt("Address", self.address.as_deref())
            .opt("Applicant", self.applicant.as_deref())
            .opt("Description", self.description.as_deref())
            .opt("Proposed Land Use District", self.proposed_lud.as_deref())
            .opt("Current Land Use District", self.from_lud.as_deref());
        if !self.status_current.is_empty() {
            about.line("Permit Status", &self.status_current);
        }
        about.finish(&self.permit_num, self.address.as_deref())
    }

    fn feed_entry(&self, now: DateTime<Utc>) -> FeedEntry {
        let title = match &self.address {
            Some(address) => format!("🏛️ Rezoning Application: {} - {address}", self.permit_num),
            None => format!("🏛️ Rezoning Application: {}", self.permit_num),
        };
        let link = development_map_url(&self.permit_num);
        let content = self.feed_description();
        FeedEntry {
            guid: self.tracking.rss_guid.clone(),
            title,
            summary: content.clone(),
            comments: format!("{link}#comments"),
            link,
            pub_date: most_recent_timestamp(self, now),
            category: "Land Use Rezoning".to_string(),
            author: self.applicant.clone().unwrap_or_else(|| "Unknown".to_string()),
            source: FEED_SOURCE.to_string(),
            content,
        }
    }
}
