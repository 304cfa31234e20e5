//! Action derivation: pairs fetched records with stored ones by natural key
//! and decides what the notification sinks should do about each.

use serde::{Deserialize, Serialize};

use crate::record::TrackedRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Create,
    Update,
    Close,
    Skip,
}

impl ActionKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ActionKind::Create => "CREATE",
            ActionKind::Update => "UPDATE",
            ActionKind::Close => "CLOSE",
            ActionKind::Skip => "SKIP",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one pairing. Lives for a single reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub key: String,
    pub kind: ActionKind,
    pub message: String,
}

impl Action {
    fn new(key: &str, kind: ActionKind, message: String) -> Self {
        Self {
            key: key.to_string(),
            kind,
            message,
        }
    }
}

pub fn find_by_key<'a, R: TrackedRecord>(records: &'a [R], key: &str) -> Option<&'a R> {
    records.iter().find(|r| r.key() == key)
}

pub fn find_by_key_mut<'a, R: TrackedRecord>(records: &'a mut [R], key: &str) -> Option<&'a mut R> {
    records.iter_mut().find(|r| r.key() == key)
}

/// Replaces the first record sharing `record`'s key in place, or appends it.
pub fn upsert<R: TrackedRecord>(records: &mut Vec<R>, record: R) {
    match records.iter().position(|r| r.key() == record.key()) {
        Some(index) => records[index] = record,
        None => records.push(record),
    }
}

/// Marks stored records whose discussion was closed out-of-band.
///
/// Returns how many records changed. No action is produced for these; the
/// flag alone makes the next diff skip them.
pub fn apply_manual_closures<R: TrackedRecord>(stored: &mut [R], closed_keys: &[String]) -> usize {
    let mut changed = 0;
    for key in closed_keys {
        if let Some(record) = find_by_key_mut(stored, key) {
            if !record.tracking().github_discussion_closed {
                record.tracking_mut().github_discussion_closed = true;
                changed += 1;
            }
        }
    }
    changed
}

/// Closing is an edge, not a level: only the move into a closing status
/// closes the notification.
fn close_message<R: TrackedRecord>(fetched: &R, stored: &R) -> Option<String> {
    let kind = R::KIND;
    if kind.is_closing_status(fetched.status()) && !kind.is_closing_status(stored.status()) {
        Some(format!(
            "Closing file as it changed to status '{}'",
            fetched.status()
        ))
    } else {
        None
    }
}

fn compare<R: TrackedRecord>(fetched: &R, stored: &R) -> Option<Action> {
    let key = fetched.key();
    let tracking = stored.tracking();

    if tracking.github_discussion_closed {
        return Some(Action::new(key, ActionKind::Skip, String::new()));
    }
    if !tracking.has_handle() {
        // Published under an older channel (or never): publish again.
        return Some(Action::new(key, ActionKind::Create, fetched.information_message()));
    }

    let changes = fetched.field_changes(stored);
    let update = (!changes.is_empty()).then(|| changes.join("\n"));

    match (update, close_message(fetched, stored)) {
        (Some(update), None) => Some(Action::new(key, ActionKind::Update, update)),
        (Some(update), Some(close)) => Some(Action::new(key, ActionKind::Close, format!("{update}\n\n{close}"))),
        (None, Some(close)) => Some(Action::new(key, ActionKind::Close, close)),
        (None, None) => None,
    }
}

/// Derives the actions for one snapshot pair, in the order of `fetched`.
pub fn derive_actions<R: TrackedRecord>(fetched: &[R], stored: &[R]) -> Vec<Action> {
    fetched
        .iter()
        .filter_map(|record| match find_by_key(stored, record.key()) {
            None => Some(Action::new(record.key(), ActionKind::Create, record.information_message())),
            Some(prev) => compare(record, prev),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permit::DevelopmentPermit;
    use crate::rezoning::RezoningApplication;

    fn permit(key: &str, status: &str) -> DevelopmentPermit {
        let mut dp = DevelopmentPermit {
            permit_num: key.to_string(),
            status_current: status.to_string(),
            address: Some("123 Test ST SW".into()),
            ..Default::default()
        };
        dp.tracking.github_discussion_id = Some(format!("D_{key}"));
        dp
    }

    fn application(key: &str, status: &str) -> RezoningApplication {
        let mut ra = RezoningApplication {
            permit_num: key.to_string(),
            status_current: status.to_string(),
            ..Default::default()
        };
        ra.tracking.github_discussion_id = Some(format!("D_{key}"));
        ra
    }

    #[test]
    fn identical_snapshots_produce_nothing() {
        let stored = vec![permit("DP1", "In Circulation"), permit("DP2", "Under Review")];
        let fetched = stored.clone();
        assert!(derive_actions(&fetched, &stored).is_empty());
    }

    #[test]
    fn status_change_is_an_update() {
        let stored = vec![permit("DP1", "In Circulation")];
        let fetched = vec![permit("DP1", "In Progress")];
        let actions = derive_actions(&fetched, &stored);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Update);
        assert_eq!(actions[0].message, "Status updated from 'In Circulation' to 'In Progress'");
    }

    #[test]
    fn status_comparison_is_case_sensitive() {
        let stored = vec![permit("DP1", "In Progress")];
        let fetched = vec![permit("DP1", "IN PROGRESS")];
        let actions = derive_actions(&fetched, &stored);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Update);
    }

    #[test]
    fn moving_into_closing_status_closes() {
        let stored = vec![permit("DP1", "Under Review")];
        let fetched = vec![permit("DP1", "Released")];
        let actions = derive_actions(&fetched, &stored);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Close);
        assert_eq!(
            actions[0].message,
            "Status updated from 'Under Review' to 'Released'\n\nClosing file as it changed to status 'Released'"
        );
    }

    #[test]
    fn already_in_closing_status_is_inert() {
        let stored = vec![permit("DP1", "Released")];
        let fetched = vec![permit("DP1", "Released")];
        assert!(derive_actions(&fetched, &stored).is_empty());

        let stored = vec![permit("DP1", "Cancelled")];
        let fetched = vec![permit("DP1", "Released")];
        let actions = derive_actions(&fetched, &stored);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Update);
    }

    #[test]
    fn close_edge_requires_previous_open_status() {
        let open = permit("DP1", "Under Review");
        let released = permit("DP1", "Released");
        assert!(close_message(&released, &open).is_some());
        assert!(close_message(&released, &released).is_none());
        assert!(close_message(&open, &released).is_none());
    }

    #[test]
    fn decision_only_change_is_an_update() {
        let stored = vec![permit("DP1", "In Progress")];
        let mut changed = permit("DP1", "In Progress");
        changed.decision = Some("Approval".into());
        let actions = derive_actions(&[changed], &stored);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Update);
        assert_eq!(actions[0].message, "Decision updated to 'Approval'");
    }

    #[test]
    fn unknown_key_is_created() {
        let fetched = vec![permit("DP2022-00156", "Submitted")];
        let actions = derive_actions(&fetched, &[]);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].key, "DP2022-00156");
        assert_eq!(actions[0].kind, ActionKind::Create);
        assert!(actions[0].message.contains("## About"));
    }

    #[test]
    fn closed_records_are_skipped() {
        let mut stored = permit("DP1", "Under Review");
        stored.tracking.github_discussion_closed = true;
        let mut fetched = permit("DP1", "Released");
        fetched.decision = Some("Approval".into());

        let actions = derive_actions(&[fetched], &[stored]);
        assert_eq!(
            actions,
            vec![Action { key: "DP1".into(), kind: ActionKind::Skip, message: String::new() }]
        );
    }

    #[test]
    fn stored_without_handle_is_republished() {
        let mut stored = permit("DP1", "In Circulation");
        stored.tracking.github_discussion_id = None;
        let actions = derive_actions(&[permit("DP1", "In Circulation")], &[stored]);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Create);
    }

    #[test]
    fn rezoning_uses_its_own_closing_set() {
        let stored = vec![application("LOC1", "Under Review"), application("LOC2", "Under Review")];
        let fetched = vec![application("LOC1", "Released"), application("LOC2", "Approved")];
        let actions = derive_actions(&fetched, &stored);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].kind, ActionKind::Update);
        assert_eq!(actions[1].kind, ActionKind::Close);
    }

    #[test]
    fn actions_follow_fetched_order() {
        let stored = vec![permit("B", "Submitted")];
        let fetched = vec![permit("C", "Submitted"), permit("B", "In Progress"), permit("A", "Submitted")];
        let keys: Vec<_> = derive_actions(&fetched, &stored).into_iter().map(|a| a.key).collect();
        assert_eq!(keys, vec!["C", "B", "A"]);
    }

    #[test]
    fn duplicate_stored_keys_pair_with_first() {
        let mut second = permit("DP1", "Under Review");
        second.tracking.github_discussion_closed = true;
        let stored = vec![permit("DP1", "Under Review"), second];
        let actions = derive_actions(&[permit("DP1", "In Progress")], &stored);
        assert_eq!(actions[0].kind, ActionKind::Update);
    }

    #[test]
    fn upsert_replaces_in_place_or_appends() {
        let mut records = vec![permit("A", "Submitted"), permit("B", "Submitted")];
        upsert(&mut records, permit("A", "Released"));
        upsert(&mut records, permit("C", "Submitted"));
        let view: Vec<_> = records.iter().map(|r| (r.key(), r.status())).collect();
        assert_eq!(view, vec![("A", "Released"), ("B", "Submitted"), ("C", "Submitted")]);
    }

    #[test]
    fn manual_closures_flag_open_records_once() {
        let mut stored = vec![permit("A", "Submitted"), permit("B", "Submitted")];
        stored[1].tracking.github_discussion_closed = true;
        let closed = vec!["A".to_string(), "B".to_string(), "Z".to_string()];
        assert_eq!(apply_manual_closures(&mut stored, &closed), 1);
        assert!(stored.iter().all(|r| r.tracking.github_discussion_closed));
        assert_eq!(apply_manual_closures(&mut stored, &closed), 0);
    }

    #[test]
    fn empty_key_still_pairs() {
        let stored = vec![permit("", "Submitted")];
        let fetched = vec![permit("", "In Progress")];
        let actions = derive_actions(&fetched, &stored);
        assert_eq!(actions[0].key, "");
        assert_eq!(actions[0].kind, ActionKind::Update);
    }
}
