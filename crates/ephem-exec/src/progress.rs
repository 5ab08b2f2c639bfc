// SPDX-FileCopyrightText: 2026 Ephem Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Progress tracking over change-apply output.
//!
//! The parser is a per-resource state machine. Each resource address moves
//! from unseen or in-progress to exactly one of completed or failed, and
//! never leaves a terminal state, so duplicate or retried output lines are
//! never counted twice. The expected total comes from the plan summary; until
//! one is seen (or when it is zero) the rendering is indeterminate.
//!
//! Recognized shapes, after stripping ANSI colour codes and box-drawing
//! gutters:
//!
//! ```text
//! Plan: 3 to add, 1 to change, 0 to destroy.
//! aws_instance.web: Creating...
//! aws_instance.web: Still creating... [10s elapsed]
//! aws_instance.web: Creation complete after 12s [id=i-0abc]
//! aws_instance.web: Modifications complete after 2s [id=i-0abc]
//! aws_instance.web: Destruction complete after 3s
//! Error: creating EC2 Instance: ...
//!   with aws_instance.web,
//! ```
//!
//! Data sources (`data.*`) are read, not changed, and are never counted.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

static PLAN_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) to add, (\d+) to change, (\d+) to destroy").unwrap()
});

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap());

/// `<address>: <message>` where the address may be nested in modules and indexed.
static RESOURCE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^((?:module\.[\w-]+(?:\[[^\]]*\])?\.)*(?:data\.)?[\w-]+\.[\w-]+(?:\[[^\]]*\])?): (.+)$"#,
    )
    .unwrap()
});

/// The attribution line under an error block.
static ERROR_ATTRIBUTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^with ((?:module\.[\w-]+(?:\[[^\]]*\])?\.)*[\w-]+\.[\w-]+(?:\[[^\]]*\])?),?$"#)
        .unwrap()
});

const BAR_WIDTH: usize = 20;

/// Characters change-apply tools use to frame diagnostics.
const BOX_CHARS: &[char] = &['│', '╷', '╵', '┃', '╭', '╰', '─', '┌', '└', '├'];

/// Kind of change a resource is undergoing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceAction {
    Create,
    Modify,
    Destroy,
}

impl ResourceAction {
    fn verb(self) -> &'static str {
        match self {
            ResourceAction::Create => "Creating",
            ResourceAction::Modify => "Modifying",
            ResourceAction::Destroy => "Destroying",
        }
    }
}

/// What a single observed line did to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Started { address: String, action: ResourceAction },
    Completed { address: String },
    Failed { address: String },
    /// A terminal line for a resource already in a terminal state.
    Duplicate { address: String },
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceState {
    InProgress(ResourceAction),
    Completed,
    Failed,
}

enum Shape {
    InProgress(ResourceAction),
    Succeeded,
    Errored,
}

/// Progress summary for one execution.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    total: Option<u64>,
    resources: BTreeMap<String, ResourceState>,
    completed: BTreeSet<String>,
    failed: BTreeSet<String>,
    current_action: String,
    /// An `Error:` line was seen and not yet attributed.
    pending_error: bool,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks for "N to add, M to change, K to destroy" and sets the total to
    /// `N + M + K`. The last match in `text` wins. Returns false, leaving the
    /// state untouched, when there is no summary.
    pub fn observe_plan_summary(&mut self, text: &str) -> bool {
        let clean = strip_decorations(text);
        let Some(caps) = PLAN_SUMMARY.captures_iter(&clean).last() else {
            return false;
        };
        let count = |i: usize| caps[i].parse::<u64>().unwrap_or(0);
        self.total = Some(count(1).saturating_add(count(2)).saturating_add(count(3)));
        true
    }

    /// Feeds one output line through the per-resource state machine.
    pub fn observe_line(&mut self, line: &str) -> LineEvent {
        let clean = strip_decorations(line);
        let clean = clean.trim();
        if clean.is_empty() {
            return LineEvent::Ignored;
        }

        if clean.starts_with("Error:") {
            self.pending_error = true;
            return LineEvent::Ignored;
        }

        if self.pending_error
            && let Some(caps) = ERROR_ATTRIBUTION.captures(clean)
        {
            self.pending_error = false;
            return self.finish(&caps[1], false);
        }

        let Some(caps) = RESOURCE_LINE.captures(clean) else {
            return LineEvent::Ignored;
        };
        let address = &caps[1];
        if is_data_source(address) {
            return LineEvent::Ignored;
        }

        match classify_message(&caps[2]) {
            Some(Shape::InProgress(action)) => self.start(address, action),
            Some(Shape::Succeeded) => self.finish(address, true),
            Some(Shape::Errored) => self.finish(address, false),
            None => LineEvent::Ignored,
        }
    }

    fn start(&mut self, address: &str, action: ResourceAction) -> LineEvent {
        self.current_action = format!("{} {address}", action.verb());
        match self.resources.get(address) {
            Some(ResourceState::Completed | ResourceState::Failed) => {}
            _ => {
                self.resources
                    .insert(address.to_string(), ResourceState::InProgress(action));
            }
        }
        LineEvent::Started {
            address: address.to_string(),
            action,
        }
    }

    fn finish(&mut self, address: &str, success: bool) -> LineEvent {
        if let Some(ResourceState::Completed | ResourceState::Failed) = self.resources.get(address) {
            return LineEvent::Duplicate {
                address: address.to_string(),
            };
        }

        let address = address.to_string();
        if success {
            self.resources.insert(address.clone(), ResourceState::Completed);
            self.completed.insert(address.clone());
            self.current_action = format!("Completed {address}");
            LineEvent::Completed { address }
        } else {
            self.resources.insert(address.clone(), ResourceState::Failed);
            self.failed.insert(address.clone());
            self.current_action = format!("Failed {address}");
            LineEvent::Failed { address }
        }
    }

    /// True for lines that finish a resource or introduce/attribute an error.
    ///
    /// The streamer never coalesces these under back-pressure.
    pub fn is_terminal_line(line: &str) -> bool {
        let clean = strip_decorations(line);
        let clean = clean.trim();
        if clean.starts_with("Error:") || ERROR_ATTRIBUTION.is_match(clean) {
            return true;
        }
        if PLAN_SUMMARY.is_match(clean) {
            return true;
        }
        RESOURCE_LINE
            .captures(clean)
            .and_then(|caps| classify_message(&caps[2]))
            .is_some_and(|shape| !matches!(shape, Shape::InProgress(_)))
    }

    /// Fixed-width bar, percentage of completed resources, and current action.
    ///
    /// Clamped to 100% when more resources finish than the plan predicted.
    /// Without a known non-zero total an indeterminate indicator is shown.
    pub fn render(&self) -> String {
        let done = self.completed.len() as u64;
        let mut out = match self.total {
            Some(total) if total > 0 => {
                let ratio = (done as f64 / total as f64).min(1.0);
                let filled = (ratio * BAR_WIDTH as f64).round() as usize;
                format!(
                    "[{}{}] {:>3}% ({}/{})",
                    "#".repeat(filled),
                    "-".repeat(BAR_WIDTH - filled),
                    (ratio * 100.0).round() as u64,
                    done.min(total),
                    total
                )
            }
            _ => format!("[{}] ? ({done} done)", "?".repeat(BAR_WIDTH)),
        };
        if !self.failed.is_empty() {
            out.push_str(&format!(", {} failed", self.failed.len()));
        }
        if !self.current_action.is_empty() {
            out.push(' ');
            out.push_str(&self.current_action);
        }
        out
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn completed(&self) -> &BTreeSet<String> {
        &self.completed
    }

    pub fn failed(&self) -> &BTreeSet<String> {
        &self.failed
    }

    pub fn current_action(&self) -> &str {
        &self.current_action
    }

    /// Resources started but not yet finished.
    pub fn in_progress(&self) -> impl Iterator<Item = &str> {
        self.resources.iter().filter_map(|(address, state)| match state {
            ResourceState::InProgress(_) => Some(address.as_str()),
            _ => None,
        })
    }
}

fn classify_message(message: &str) -> Option<Shape> {
    let message = message.trim();
    if message.contains("complete after") {
        return Some(Shape::Succeeded);
    }
    if message.contains("errored") || message.contains("failed") {
        return Some(Shape::Errored);
    }
    let action = if message.starts_with("Creating...") || message.starts_with("Still creating...") {
        ResourceAction::Create
    } else if message.starts_with("Modifying...") || message.starts_with("Still modifying...") {
        ResourceAction::Modify
    } else if message.starts_with("Destroying...") || message.starts_with("Still destroying...") {
        ResourceAction::Destroy
    } else {
        return None;
    };
    Some(Shape::InProgress(action))
}

fn is_data_source(address: &str) -> bool {
    let mut parts = address.split('.');
    while let Some(part) = parts.next() {
        if part == "module" {
            parts.next();
            continue;
        }
        return part == "data";
    }
    false
}

/// Removes ANSI escapes and leading box-drawing gutters.
fn strip_decorations(text: &str) -> String {
    let no_ansi = ANSI_ESCAPE.replace_all(text, "");
    no_ansi
        .lines()
        .map(|line| line.trim_start_matches(|c: char| BOX_CHARS.contains(&c) || c.is_whitespace()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plan_summary_sets_total() {
        let mut tracker = ProgressTracker::new();
        assert!(tracker.observe_plan_summary("Plan: 5 to add, 2 to change, 0 to destroy"));
        assert_eq!(tracker.total(), Some(7));

        tracker.observe_line("Refreshing state...");
        assert!(!tracker.observe_plan_summary("Refreshing state..."));
        assert_eq!(tracker.total(), Some(7));
    }

    #[test]
    fn last_plan_summary_wins() {
        let mut tracker = ProgressTracker::new();
        tracker.observe_plan_summary("Plan: 1 to add, 0 to change, 0 to destroy.");
        tracker.observe_plan_summary(
            "Plan: 2 to add, 0 to change, 0 to destroy.\nPlan: 3 to add, 1 to change, 1 to destroy.",
        );
        assert_eq!(tracker.total(), Some(5));
    }

    #[test]
    fn four_resources_reach_full_progress_without_double_count() {
        let mut tracker = ProgressTracker::new();
        assert!(tracker.observe_plan_summary("Plan: 3 to add, 1 to change, 0 to destroy."));

        for name in ["a", "b", "c"] {
            tracker.observe_line(&format!("null_resource.{name}: Creating..."));
            tracker.observe_line(&format!(
                "null_resource.{name}: Creation complete after 0s [id=1]"
            ));
        }
        assert_eq!(
            tracker.observe_line("google_storage_bucket.logs: Modifying... [id=logs]"),
            LineEvent::Started {
                address: "google_storage_bucket.logs".into(),
                action: ResourceAction::Modify
            }
        );
        tracker.observe_line("google_storage_bucket.logs: Modifications complete after 1s [id=logs]");

        assert_eq!(tracker.completed().len(), 4);
        assert!(tracker.render().contains("100%"));

        let event = tracker.observe_line("null_resource.a: Creation complete after 0s [id=1]");
        assert_eq!(event, LineEvent::Duplicate { address: "null_resource.a".into() });
        assert_eq!(tracker.completed().len(), 4);
    }

    #[test]
    fn in_progress_line_sets_current_action() {
        let mut tracker = ProgressTracker::new();
        tracker.observe_line("module.net.google_compute_network.vpc: Creating...");
        assert_eq!(
            tracker.current_action(),
            "Creating module.net.google_compute_network.vpc"
        );
        assert_eq!(
            tracker.in_progress().collect::<Vec<_>>(),
            vec!["module.net.google_compute_network.vpc"]
        );
    }

    #[test]
    fn still_creating_is_not_terminal() {
        let mut tracker = ProgressTracker::new();
        tracker.observe_line("aws_instance.web[0]: Still creating... [10s elapsed]");
        assert!(tracker.completed().is_empty());
        assert!(!ProgressTracker::is_terminal_line(
            "aws_instance.web[0]: Still creating... [10s elapsed]"
        ));
        assert!(ProgressTracker::is_terminal_line(
            "aws_instance.web[0]: Creation complete after 1s [id=x]"
        ));
    }

    #[test]
    fn boxed_error_is_attributed_to_resource() {
        let mut tracker = ProgressTracker::new();
        tracker.observe_plan_summary("Plan: 2 to add, 0 to change, 0 to destroy.");
        tracker.observe_line("google_sql_database_instance.main: Creating...");
        for line in [
            "╷",
            "│ \x1b[1m\x1b[31mError: \x1b[0mcreating instance: googleapi: Error 409",
            "│ ",
            "│   with google_sql_database_instance.main,",
            "│   on main.tf line 12, in resource \"google_sql_database_instance\" \"main\":",
            "╵",
        ] {
            tracker.observe_line(line);
        }
        assert_eq!(tracker.failed().len(), 1);
        assert!(tracker.failed().contains("google_sql_database_instance.main"));
        assert!(tracker.completed().is_empty());
        let rendered = tracker.render();
        assert!(rendered.contains("0%"));
        assert!(rendered.contains("1 failed"));
    }

    #[test]
    fn failed_resource_is_never_completed_later() {
        let mut tracker = ProgressTracker::new();
        tracker.observe_line("aws_s3_bucket.b: Creation errored after 3s");
        tracker.observe_line("aws_s3_bucket.b: Creation complete after 4s");
        assert_eq!(tracker.failed().len(), 1);
        assert!(tracker.completed().is_empty());
    }

    #[test]
    fn data_sources_are_not_counted() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.observe_line("data.aws_ami.ubuntu: Reading..."), LineEvent::Ignored);
        assert_eq!(
            tracker.observe_line("data.aws_ami.ubuntu: Read complete after 1s [id=ami-1]"),
            LineEvent::Ignored
        );
        assert_eq!(
            tracker.observe_line("module.app.data.aws_ami.ubuntu: Read complete after 1s"),
            LineEvent::Ignored
        );
        assert!(tracker.completed().is_empty());
    }

    #[test]
    fn ansi_codes_are_stripped() {
        let mut tracker = ProgressTracker::new();
        tracker.observe_line("\x1b[0m\x1b[1mnull_resource.x: Creation complete after 0s [id=1]\x1b[0m");
        assert!(tracker.completed().contains("null_resource.x"));
    }

    #[test]
    fn unknown_total_renders_indeterminate() {
        let mut tracker = ProgressTracker::new();
        tracker.observe_line("null_resource.x: Creation complete after 0s [id=1]");
        let rendered = tracker.render();
        assert!(rendered.contains('?'));
        assert!(!rendered.contains('%'));
        assert!(rendered.contains("1 done"));
    }

    #[test]
    fn zero_total_renders_indeterminate() {
        let mut tracker = ProgressTracker::new();
        tracker.observe_plan_summary("Plan: 0 to add, 0 to change, 0 to destroy.");
        assert_eq!(tracker.total(), Some(0));
        assert!(!tracker.render().contains('%'));
    }

    #[test]
    fn progress_beyond_total_is_clamped() {
        let mut tracker = ProgressTracker::new();
        tracker.observe_plan_summary("Plan: 1 to add, 0 to change, 0 to destroy.");
        tracker.observe_line("null_resource.a: Creation complete after 0s");
        tracker.observe_line("null_resource.b: Creation complete after 0s");
        let rendered = tracker.render();
        assert!(rendered.starts_with(&format!("[{}] 100% (1/1)", "#".repeat(BAR_WIDTH))));
    }

    #[test]
    fn half_way_bar() {
        let mut tracker = ProgressTracker::new();
        tracker.observe_plan_summary("Plan: 4 to add, 0 to change, 0 to destroy.");
        tracker.observe_line("null_resource.a: Creation complete after 0s");
        tracker.observe_line("null_resource.b: Creation complete after 0s");
        let rendered = tracker.render();
        assert!(rendered.starts_with("[##########----------]  50% (2/4)"));
    }

    proptest! {
        #[test]
        fn terminal_events_never_double_count(
            events in proptest::collection::vec((0usize..6, any::<bool>()), 0..60)
        ) {
            let mut tracker = ProgressTracker::new();
            let mut distinct = BTreeSet::new();
            for (i, success) in events {
                let line = if success {
                    format!("null_resource.r{i}: Creation complete after 1s")
                } else {
                    format!("null_resource.r{i}: Creation errored after 1s")
                };
                tracker.observe_line(&line);
                distinct.insert(i);
            }
            prop_assert_eq!(tracker.completed().len() + tracker.failed().len(), distinct.len());
            prop_assert!(tracker.completed().is_disjoint(tracker.failed()));
        }
    }
}
