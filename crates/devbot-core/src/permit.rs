//! Development permits (open-data dataset `6933-unw5`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::most_recent_timestamp;
use crate::message::{
    development_map_url, google_maps_url, long_date, short_date, title_case, AboutBlock, FeedEntry, FEED_SOURCE,
};
use crate::record::{Point, RecordKind, TrackedRecord, Tracking};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DevelopmentPermit {
    #[serde(default)]
    pub point: Option<Point>,
    #[serde(rename = "permitnum", default)]
    pub permit_num: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub applicant: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "proposedusecode", default)]
    pub proposed_use_code: Option<String>,
    #[serde(rename = "proposedusedescription", default)]
    pub proposed_use_description: Option<String>,
    #[serde(rename = "permitteddiscretionary", default)]
    pub permitted_discretionary: Option<String>,
    #[serde(rename = "landusedistrict", default)]
    pub land_use_district: Option<String>,
    #[serde(rename = "landusedistrictdescription", default)]
    pub land_use_district_description: Option<String>,
    #[serde(rename = "statuscurrent")]
    pub status_current: String,
    #[serde(rename = "applieddate", default)]
    pub applied_date: Option<String>,
    #[serde(rename = "communitycode", default)]
    pub community_code: Option<String>,
    #[serde(rename = "communityname", default)]
    pub community_name: Option<String>,
    #[serde(default)]
    pub ward: Option<String>,
    #[serde(default)]
    pub quadrant: Option<String>,
    #[serde(default)]
    pub latitude: Option<String>,
    #[serde(default)]
    pub longitude: Option<String>,
    #[serde(rename = "locationcount", default)]
    pub location_count: Option<String>,
    #[serde(rename = "locationtypes", default)]
    pub location_types: Option<String>,
    #[serde(rename = "locationaddresses", default)]
    pub location_addresses: Option<String>,
    #[serde(rename = "locationsgeojson", default)]
    pub locations_geojson: Option<String>,
    #[serde(rename = "locationswkt", default)]
    pub locations_wkt: Option<String>,
    #[serde(rename = "decisiondate", default)]
    pub decision_date: Option<String>,
    #[serde(rename = "mustcommencedate", default)]
    pub must_commence_date: Option<String>,
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(rename = "decisionby", default)]
    pub decision_by: Option<String>,
    #[serde(rename = "releasedate", default)]
    pub release_date: Option<String>,
    #[serde(flatten)]
    pub tracking: Tracking,
}

impl DevelopmentPermit {
    fn feed_description(&self) -> String {
        let mut html = String::new();
        html.push_str(&format!("<h3>🏗️ DEVELOPMENT PERMIT {}</h3>", self.permit_num));
        html.push_str(&format!("<p><strong>Status:</strong> {}</p>", self.status_current));

        if let Some(address) = &self.address {
            html.push_str(&format!("<p>📍 <strong>Address:</strong> {address}</p>"));
        }
        if let Some(community) = &self.community_name {
            html.push_str(&format!("<p>🏘️ <strong>Community:</strong> {community}"));
            if let Some(ward) = &self.ward {
                html.push_str(&format!(" (Ward {ward})"));
            }
            html.push_str("</p>");
        }
        if let Some(description) = &self.description {
            html.push_str(&format!("<p>🏗️ <strong>Project:</strong> {description}</p>"));
        }
        if let Some(land_use) = &self.land_use_district_description {
            html.push_str(&format!("<p>🏘️ <strong>Land Use:</strong> {land_use}</p>"));
        }
        if let Some(kind) = &self.permitted_discretionary {
            html.push_str(&format!("<p>📋 <strong>Application Type:</strong> {kind}</p>"));
        }
        if let Some(applicant) = &self.applicant {
            html.push_str(&format!("<p>👤 <strong>Applicant:</strong> {applicant}</p>"));
        }

        html.push_str("<h4>📅 TIMELINE:</h4><ul>");
        for (label, value) in [
            ("Applied", &self.applied_date),
            ("Decision", &self.decision_date),
            ("Released", &self.release_date),
            ("Must Commence By", &self.must_commence_date),
        ] {
            if let Some(date) = value.as_deref().and_then(long_date) {
                html.push_str(&format!("<li>{label}: {date}</li>"));
            }
        }
        html.push_str("</ul>");

        if let Some(decision) = self.decision.as_deref().filter(|d| !d.is_empty()) {
            html.push_str(
                "<div style='background-color: #d4edda; padding: 10px; margin: 10px 0; border-left: 4px solid #28a745;'>",
            );
            html.push_str(&format!("<strong>✅ DECISION:</strong> {decision}"));
            if let Some(by) = self.decision_by.as_deref().filter(|b| !b.is_empty()) {
                html.push_str(&format!(" (by {by})"));
            }
            html.push_str("</div>");
        }

        if let (Some(lat), Some(lon)) = (&self.latitude, &self.longitude) {
            html.push_str(&format!("<p>📍 <strong>Coordinates:</strong> {lat}, {lon}</p>"));
        }

        html.push_str("<hr/><h4>🗺️ MAPS & DETAILS:</h4><ul>");
        if let Some(address) = &self.address {
            html.push_str(&format!(
                "<li>📍 <a href='{}' target='_blank'>View on Google Maps</a></li>",
                google_maps_url(address)
            ));
        }
        html.push_str(&format!(
            "<li>📋 <a href='{}' target='_blank'>View on Calgary Development Map</a></li>",
            development_map_url(&self.permit_num)
        ));
        html.push_str("</ul>");
        html
    }
}

impl TrackedRecord for DevelopmentPermit {
    const KIND: RecordKind = RecordKind::DevelopmentPermit;

    fn key(&self) -> &str {
        &self.permit_num
    }

    fn status(&self) -> &str {
        &self.status_current
    }

    fn decision(&self) -> Option<&str> {
        self.decision.as_deref()
    }

    fn tracking(&self) -> &Tracking {
        &self.tracking
    }

    fn tracking_mut(&mut self) -> &mut Tracking {
        &mut self.tracking
    }

    fn field_changes(&self, stored: &Self) -> Vec<String> {
        let mut lines = Vec::new();

        if self.status_current != stored.status_current {
            lines.push(format!(
                "Status updated from '{}' to '{}'",
                stored.status_current, self.status_current
            ));
        }

        // A decision disappearing upstream is not news; only a new or
        // different value is.
        if let Some(decision) = &self.decision {
            if stored.decision.as_ref() != Some(decision) {
                lines.push(format!("Decision updated to '{decision}'"));
                if let Some(by) = &self.decision_by {
                    lines.push(format!("Decision By '{by}'"));
                }
            }
        }

        if self.must_commence_date != stored.must_commence_date {
            lines.push(format!(
                "Must Commence By updated from '{}' to '{}'",
                stored.must_commence_date.as_deref().unwrap_or_default(),
                self.must_commence_date.as_deref().unwrap_or_default()
            ));
        }

        lines
    }

    fn dated_fields(&self) -> Vec<&str> {
        [&self.applied_date, &self.decision_date, &self.release_date]
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
            .opt("Community", self.community_name.as_deref())
            .opt("Applicant", self.applicant.as_deref())
            .opt("Description", self.description.as_deref())
            .opt("Current Land Use", self.land_use_district_description.as_deref());
        if !self.status_current.is_empty() {
            about.line("Permit Status", &self.status_current);
        }
        about
            .opt("Must Commence By", self.must_commence_date.as_deref())
            .opt("Application Type", self.permitted_discretionary.as_deref())
            .opt("Decision", self.decision.as_deref())
            .opt("Release Date", self.release_date.as_deref());
        about.finish(&self.permit_num, self.address.as_deref())
    }

    fn feed_entry(&self, now: DateTime<Utc>) -> FeedEntry {
        let status = title_case(&self.status_current.to_lowercase());
        let title = match &self.address {
            Some(address) => format!("🏗️ Development Permit ({status}): {} - {address}", self.permit_num),
            None => format!("🏗️ Development Permit ({status}): {}", self.permit_num),
        };
        let link = development_map_url(&self.permit_num);
        FeedEntry {
            guid: self.tracking.rss_guid.clone(),
            title,
            summary: format!(
                "Development permit for {} - Status: {}",
                self.address.as_deref().unwrap_or("an unlisted address"),
                self.status_current
            ),
            comments: format!("{link}#comments"),
            link,
            pub_date: most_recent_timestamp(self, now),
            category: Self::KIND.display_name().to_string(),
            author: self.applicant.clone().unwrap_or_else(|| "Unknown".to_string()),
            source: FEED_SOURCE.to_string(),
            content: self.feed_description(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permit() -> DevelopmentPermit {
        serde_json::from_str(
            r#"{
                "point": {"type": "Point", "coordinates": [-114.13992156438134, 51.02930819585162]},
                "permitnum": "DP2022-00156",
                "address": "2819 36 ST SW",
                "applicant": "TRICOR DESIGN GROUP",
                "description": "NEW: CONTEXTUAL SEMI-DETACHED DWELLING",
                "landusedistrictdescription": "Residential - Grade-Oriented Infill",
                "permitteddiscretionary": "Permitted",
                "statuscurrent": "Released",
                "applieddate": "2022-01-10T00:00:00.000",
                "decisiondate": "2022-02-16T00:00:00.000",
                "releasedate": "2022-04-19T00:00:00.000",
                "decision": "Approval",
                "decisionby": "Development Authority",
                "communityname": "KILLARNEY/GLENGARRY",
                "ward": "8"
            }"#,
        )
        .expect("permit json")
    }

    #[test]
    fn upstream_json_parses_without_bookkeeping() {
        let dp = permit();
        assert_eq!(dp.permit_num, "DP2022-00156");
        assert_eq!(dp.point.as_ref().map(|p| p.kind.as_str()), Some("Point"));
        assert_eq!(dp.tracking, Tracking::default());
        assert_eq!(dp.quadrant, None);
    }

    #[test]
    fn information_message_lists_known_fields() {
        let message = permit().information_message();
        assert!(message.starts_with("## About\n\n**Permit Number:** DP2022-00156"));
        assert!(message.contains("**Date Applied:** 2022-01-10"));
        assert!(message.contains("**Community:** KILLARNEY/GLENGARRY"));
        assert!(message.contains("**Decision:** Approval"));
        assert!(message.contains("[Development Map](https://dmap.calgary.ca/?find=DP2022-00156)"));
        assert!(message.contains("[Google Maps](https://maps.google.com/?q=2819+36+ST+SW%2C+Calgary%2C+Alberta)"));
    }

    #[test]
    fn decision_changes_are_null_aware() {
        let stored = permit();
        let mut fetched = stored.clone();
        assert!(fetched.field_changes(&stored).is_empty());

        fetched.decision = None;
        assert!(fetched.field_changes(&stored).is_empty());

        let mut undecided = stored.clone();
        undecided.decision = None;
        let lines = stored.field_changes(&undecided);
        assert_eq!(lines, vec!["Decision updated to 'Approval'", "Decision By 'Development Authority'"]);
    }

    #[test]
    fn must_commence_change_is_reported() {
        let mut stored = permit();
        stored.must_commence_date = Some("2024-02-16T00:00:00.000".into());
        let mut fetched = stored.clone();
        fetched.must_commence_date = Some("2024-08-16T00:00:00.000".into());
        assert_eq!(
            fetched.field_changes(&stored),
            vec!["Must Commence By updated from '2024-02-16T00:00:00.000' to '2024-08-16T00:00:00.000'"]
        );

        fetched.must_commence_date = None;
        assert_eq!(
            fetched.field_changes(&stored),
            vec!["Must Commence By updated from '2024-02-16T00:00:00.000' to ''"]
        );
    }

    #[test]
    fn feed_entry_uses_title_cased_status() {
        let mut dp = permit();
        dp.status_current = "IN PROGRESS".into();
        dp.tracking.rss_guid = "abc".into();
        let entry = dp.feed_entry(Utc::now());
        assert_eq!(entry.title, "🏗️ Development Permit (In Progress): DP2022-00156 - 2819 36 ST SW");
        assert_eq!(entry.guid, "abc");
        assert_eq!(entry.author, "TRICOR DESIGN GROUP");
        assert_eq!(entry.category, "Development Permit");
        assert!(entry.content.contains("<li>Released: April 19, 2022</li>"));
        assert!(entry.content.contains("(by Development Authority)"));
    }
}
