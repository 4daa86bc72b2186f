//! Commit message fields: merging across commits and rendering back to text.

use std::collections::BTreeSet;

/// Substituted when none of a branch's commits carry a test plan.
pub const DEFAULT_TEST_PLAN: &str = "I DIDNT TEST";

/// Trailers longer than this are written in multi-line form.
const WRAP_WIDTH: usize = 72;

/// The parsed trailer block of a commit message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFields {
    pub title: String,
    pub summary: String,
    pub test_plan: String,
    pub reviewer_ids: Vec<String>,
}

impl MessageFields {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.summary.is_empty()
            && self.test_plan.is_empty()
            && self.reviewer_ids.is_empty()
    }

    /// Combine the fields of an earlier commit with those of a later one.
    ///
    /// The title comes from the earliest commit that has one, text fields are
    /// joined with a newline, and reviewers are unioned in sorted order.
    pub fn merge(&self, later: &MessageFields) -> MessageFields {
        if self.is_empty() {
            return later.clone();
        }
        if later.is_empty() {
            return self.clone();
        }

        let title = if self.title.is_empty() {
            later.title.clone()
        } else {
            self.title.clone()
        };

        let reviewer_ids: BTreeSet<&String> = self
            .reviewer_ids
            .iter()
            .chain(later.reviewer_ids.iter())
            .collect();

        MessageFields {
            title,
            summary: join_nonempty(&self.summary, &later.summary),
            test_plan: join_nonempty(&self.test_plan, &later.test_plan),
            reviewer_ids: reviewer_ids.into_iter().cloned().collect(),
        }
    }

    /// Fold `merge` over commits, oldest first.
    pub fn merge_all<'a, I>(fields: I) -> MessageFields
    where
        I: IntoIterator<Item = &'a MessageFields>,
    {
        fields
            .into_iter()
            .fold(MessageFields::default(), |acc, next| acc.merge(next))
    }
}

fn join_nonempty(earlier: &str, later: &str) -> String {
    match (earlier.is_empty(), later.is_empty()) {
        (true, _) => later.to_string(),
        (_, true) => earlier.to_string(),
        _ => format!("{earlier}\n{later}"),
    }
}

/// A commit message ready to be written, with reviewers as usernames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitMessage {
    pub title: String,
    pub summary: String,
    pub test_plan: String,
    pub reviewers: Vec<String>,
    pub revision_uri: Option<String>,
}

impl CommitMessage {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(self.title.trim());
        out.push_str("\n\n");

        let summary = self.summary.trim();
        if !summary.is_empty() {
            out.push_str(summary);
            out.push_str("\n\n");
        }

        let test_plan = self.test_plan.trim();
        let reviewers = self.reviewers.join(" ");

        let fits = |label: &str, value: &str| {
            !value.contains('\n') && label.len() + 1 + value.len() <= WRAP_WIDTH
        };

        if fits("Test Plan:", test_plan) && fits("Reviewers:", &reviewers) {
            out.push_str(&format!("Test Plan: {test_plan}\n"));
            if !reviewers.is_empty() {
                out.push_str(&format!("Reviewers: {reviewers}\n"));
            }
        } else {
            out.push_str(&format!("Test Plan:\n{test_plan}\n"));
            if !reviewers.is_empty() {
                out.push_str(&format!("\nReviewers:\n{reviewers}\n"));
            }
        }

        if let Some(uri) = &self.revision_uri {
            out.push_str(&format!("\nDifferential Revision: {uri}\n"));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(title: &str, summary: &str, test_plan: &str, reviewers: &[&str]) -> MessageFields {
        MessageFields {
            title: title.to_string(),
            summary: summary.to_string(),
            test_plan: test_plan.to_string(),
            reviewer_ids: reviewers.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn test_merge_rules() {
        let a = fields("first", "sum a", "plan a", &["PHID-b", "PHID-a"]);
        let b = fields("second", "sum b", "", &["PHID-c", "PHID-a"]);

        let merged = a.merge(&b);
        assert_eq!(merged.title, "first");
        assert_eq!(merged.summary, "sum a\nsum b");
        assert_eq!(merged.test_plan, "plan a");
        assert_eq!(merged.reviewer_ids, vec!["PHID-a", "PHID-b", "PHID-c"]);
    }

    #[test]
    fn test_merge_identity() {
        let x = fields("t", "s", "p", &["PHID-z", "PHID-y"]);
        let empty = MessageFields::default();

        assert_eq!(x.merge(&empty), x);
        assert_eq!(empty.merge(&x), x);
    }

    #[test]
    fn test_merge_is_associative() {
        let a = fields("", "a", "", &["PHID-1"]);
        let b = fields("b", "", "pb", &["PHID-3"]);
        let c = fields("c", "c", "pc", &["PHID-2", "PHID-1"]);

        assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
    }

    #[test]
    fn test_title_from_first_nonempty() {
        let a = fields("", "only summary", "", &[]);
        let b = fields("real title", "", "", &[]);
        let c = fields("later title", "", "", &[]);

        let merged = MessageFields::merge_all([&a, &b, &c]);
        assert_eq!(merged.title, "real title");
        assert_eq!(merged.summary, "only summary");
    }

    #[test]
    fn test_render_single_line_trailers() {
        let message = CommitMessage {
            title: "add NEWFILE".into(),
            summary: "".into(),
            test_plan: "tp".into(),
            reviewers: vec!["alice".into(), "bob".into()],
            revision_uri: None,
        };

        assert_eq!(
            message.render(),
            "add NEWFILE\n\nTest Plan: tp\nReviewers: alice bob\n"
        );
    }

    #[test]
    fn test_render_multi_line_when_plan_spans_lines() {
        let message = CommitMessage {
            title: "fix".into(),
            summary: "details".into(),
            test_plan: "ran it\nlooked at it".into(),
            reviewers: vec!["alice".into()],
            revision_uri: None,
        };

        assert_eq!(
            message.render(),
            "fix\n\ndetails\n\nTest Plan:\nran it\nlooked at it\n\nReviewers:\nalice\n"
        );
    }

    #[test]
    fn test_render_multi_line_when_too_wide() {
        let message = CommitMessage {
            title: "fix".into(),
            test_plan: "x".repeat(WRAP_WIDTH),
            ..Default::default()
        };

        assert!(message.render().contains("Test Plan:\nxxxx"));
    }

    #[test]
    fn test_render_landed_trailer() {
        let message = CommitMessage {
            title: "add NEWFILE".into(),
            test_plan: "tp".into(),
            reviewers: vec!["alice".into()],
            revision_uri: Some("https://phab.test/D1".into()),
            ..Default::default()
        };

        assert!(message
            .render()
            .ends_with("Reviewers: alice\n\nDifferential Revision: https://phab.test/D1\n"));
    }
}
