use std::io::IsTerminal;

use chrono::{DateTime, Local, Utc};
use core_model::{CorruptionGroup, Message, RepairPlan, RepairResult, RepairStatus, RepairUnit};
use owo_colors::OwoColorize;
use repair::RestoreReport;
use serde::Serialize;

const RULE_WIDTH: usize = 100;

#[derive(Serialize)]
pub struct JsonListOutput {
    pub corrupted_sessions: usize,
    pub corrupted_messages: usize,
    pub sessions: Vec<JsonSession>,
}

#[derive(Serialize)]
pub struct JsonSession {
    pub id: String,
    pub title: String,
    pub corrupted_messages: Vec<JsonErroredMessage>,
    pub units: Vec<JsonUnit>,
    pub unattributed: Vec<String>,
    pub remove_messages: Vec<String>,
    pub remove_parts: usize,
}

#[derive(Serialize)]
pub struct JsonErroredMessage {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub model: String,
    pub error: String,
}

#[derive(Serialize)]
pub struct JsonUnit {
    pub position: String,
    pub source: Option<String>,
    pub offending_part: Option<String>,
    pub echoes: Vec<String>,
    pub problem: Option<String>,
}

pub fn color_enabled() -> bool {
    std::io::stdout().is_terminal()
        && std::io::stderr().is_terminal()
        && std::env::var_os("NO_COLOR").is_none()
}

pub fn format_local(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

pub fn render_list(groups: &[CorruptionGroup], plans: &[RepairPlan], use_color: bool) -> String {
    let mut out = String::new();
    if groups.is_empty() {
        out.push_str("No corrupted sessions found.\n");
        return out;
    }
    let total: usize = groups.iter().map(|g| g.errored.len()).sum();
    out.push_str(&format!(
        "Found {total} corrupted message(s) in {} session(s):\n\n",
        groups.len()
    ));
    out.push_str(&"-".repeat(RULE_WIDTH));
    out.push('\n');

    for (i, (group, plan)) in groups.iter().zip(plans).enumerate() {
        let title = if use_color {
            group.session.title.bold().to_string()
        } else {
            group.session.title.clone()
        };
        out.push_str(&format!("\n[{}] Session: {title}\n", i + 1));
        out.push_str(&format!("    Session ID: {}\n", group.session.id));
        out.push_str(&format!("    Corrupted Messages: {}\n", group.errored.len()));

        for msg in &group.errored {
            render_errored(&mut out, msg, use_color);
        }
        if !group.units.is_empty() || !group.unattributed.is_empty() {
            out.push('\n');
        }
        for unit in &group.units {
            render_unit(&mut out, unit);
        }
        for msg in &group.unattributed {
            out.push_str(&format!(
                "    Unattributed: {} (error text names no position)\n",
                msg.id
            ));
        }

        let fix = if let Some(reason) = group.unresolved_reason() {
            format!("none; {reason}")
        } else {
            format!(
                "Remove {} message(s) and {} part(s)",
                plan.messages.len(),
                plan.parts.len()
            )
        };
        let fix = match (use_color, group.is_unresolvable()) {
            (false, _) => fix,
            (true, false) => fix.green().to_string(),
            (true, true) => fix.yellow().to_string(),
        };
        out.push_str(&format!("\n    Fix: {fix}\n"));
    }

    out.push('\n');
    out.push_str(&"-".repeat(RULE_WIDTH));
    out.push_str("\n\nTo fix a specific session, run:\n  session-repair fix <session_id>\n");
    out.push_str("\nTo fix all corrupted sessions, run:\n  session-repair fix --all\n");
    out.push_str("\nAdd --dry-run to see what would be done without making changes.\n");
    out
}

fn render_errored(out: &mut String, msg: &Message, use_color: bool) {
    let error = msg.error_text().unwrap_or_default();
    let error = if use_color {
        error.red().to_string()
    } else {
        error.to_string()
    };
    out.push_str(&format!("\n    - Message: {}\n", msg.id));
    out.push_str(&format!("      Time: {}\n", format_local(msg.created_at)));
    out.push_str(&format!("      Model: {}\n", msg.model_label()));
    out.push_str(&format!("      Error: {error}\n"));
}

fn render_unit(out: &mut String, unit: &RepairUnit) {
    match &unit.source {
        Some(source) => {
            let block = unit
                .offending_part
                .as_ref()
                .map(|p| format!(", block {} ({})", p.id, p.kind))
                .unwrap_or_default();
            out.push_str(&format!(
                "    Source: {} [{} {}] at {}{block}; {} echo(es)\n",
                source.id,
                source.role,
                source.model_label(),
                unit.position,
                unit.echoes.len()
            ));
        }
        None => {
            out.push_str(&format!(
                "    Source: none at {}; {} echo(es)\n",
                unit.position,
                unit.echoes.len()
            ));
        }
    }
    if let Some(problem) = &unit.problem {
        out.push_str(&format!("      Untrusted: {problem}\n"));
    }
}

pub fn build_json_list(groups: &[CorruptionGroup], plans: &[RepairPlan]) -> JsonListOutput {
    let sessions = groups
        .iter()
        .zip(plans)
        .map(|(group, plan)| JsonSession {
            id: group.session.id.clone(),
            title: group.session.title.clone(),
            corrupted_messages: group
                .errored
                .iter()
                .map(|m| JsonErroredMessage {
                    id: m.id.clone(),
                    created_at: m.created_at,
                    model: m.model_label(),
                    error: m.error_text().unwrap_or_default().to_string(),
                })
                .collect(),
            units: group
                .units
                .iter()
                .map(|u| JsonUnit {
                    position: u.position.to_string(),
                    source: u.source.as_ref().map(|s| s.id.clone()),
                    offending_part: u.offending_part.as_ref().map(|p| p.id.clone()),
                    echoes: u.echoes.iter().map(|e| e.id.clone()).collect(),
                    problem: u.problem.clone(),
                })
                .collect(),
            unattributed: group.unattributed.iter().map(|m| m.id.clone()).collect(),
            remove_messages: plan.message_ids(),
            remove_parts: plan.parts.len(),
        })
        .collect();
    JsonListOutput {
        corrupted_sessions: groups.len(),
        corrupted_messages: groups.iter().map(|g| g.errored.len()).sum(),
        sessions,
    }
}

pub fn status_label(result: &RepairResult) -> &'static str {
    match (result.status, result.dry_run) {
        (RepairStatus::Success, true) => "WOULD SUCCEED",
        (RepairStatus::Success, false) => "SUCCESS",
        (RepairStatus::NoOpNeeded, _) => "NO-OP (nothing to remove)",
        (RepairStatus::Failed, _) => "FAILED",
    }
}

pub fn render_result(result: &RepairResult, use_color: bool) -> String {
    let mut out = String::new();
    let status = status_label(result);
    let status = match (use_color, result.status) {
        (false, _) => status.to_string(),
        (true, RepairStatus::Failed) => status.red().bold().to_string(),
        (true, RepairStatus::NoOpNeeded) => status.dimmed().to_string(),
        (true, RepairStatus::Success) => status.green().bold().to_string(),
    };
    let verb = if result.dry_run { "to remove" } else { "removed" };

    out.push_str(&format!("\nProcessing session: {}\n", result.title));
    out.push_str(&format!("  Session ID: {}\n", result.session_id));
    out.push_str(&format!("  Status: {status}\n"));
    out.push_str(&format!("  Messages {verb}: {}\n", result.messages_removed.len()));
    for id in &result.messages_removed {
        out.push_str(&format!("    - {id}\n"));
    }
    out.push_str(&format!("  Parts {verb}: {}\n", result.parts_removed));
    if let Some(path) = &result.backup_path {
        out.push_str(&format!("  Backup saved to: {}\n", path.display()));
    }
    if let Some(error) = &result.error {
        out.push_str(&format!("  Error: {error}\n"));
    }
    out
}

pub fn render_restore(report: &RestoreReport) -> String {
    let mut out = String::new();
    let verb = if report.dry_run {
        "Would restore"
    } else {
        "Restored"
    };
    out.push_str(&format!(
        "{verb} {} file(s) for session {} from {}\n",
        report.files.len(),
        report.session_id,
        report.backup_dir.display()
    ));
    for path in &report.files {
        out.push_str(&format!("  - {}\n", path.display()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use store_fs::fixture::StorageFixture;

    fn scenario() -> StorageFixture {
        let fx = StorageFixture::new();
        fx.session("proj", "ses_1", "Switch models")
            .message("ses_1", "msg_t0", "user", 1000)
            .message("ses_1", "msg_t1", "assistant", 2000)
            .part("msg_t1", "prt_a", "reasoning")
            .signature_error("ses_1", "msg_t2", 3000, 1, 0)
            .signature_error("ses_1", "msg_t3", 4000, 1, 0);
        fx
    }

    fn listing(fx: &StorageFixture) -> (Vec<CorruptionGroup>, Vec<RepairPlan>) {
        let store = fx.store();
        let groups: Vec<_> = scan::scan(&store)
            .unwrap()
            .iter()
            .map(|c| scan::resolve(&store, c))
            .collect();
        let plans = groups.iter().map(|g| repair::plan(&store, g)).collect();
        (groups, plans)
    }

    #[test]
    fn list_reports_errored_count_and_fix_plan() {
        let fx = scenario();
        let (groups, plans) = listing(&fx);
        let text = render_list(&groups, &plans, false);
        assert!(text.contains("[1] Session: Switch models"));
        assert!(text.contains("Corrupted Messages: 2"));
        assert!(text.contains("Fix: Remove 3 message(s) and 1 part(s)"));
        assert!(text.contains("Source: msg_t1 [assistant anthropic/claude-sonnet-4] at messages.1.content.0, block prt_a (reasoning)"));
        assert!(text.contains("Model: openai/gpt-5"));
    }

    #[test]
    fn untrusted_position_lists_no_fix() {
        let fx = StorageFixture::new();
        fx.message("ses_1", "msg_0", "user", 1)
            .message("ses_1", "msg_1", "assistant", 2)
            .signature_error("ses_1", "msg_2", 3, 40, 0);
        let (groups, plans) = listing(&fx);
        let text = render_list(&groups, &plans, false);
        assert!(text.contains("Source: none at messages.40.content.0; 1 echo(es)"));
        assert!(text.contains("Untrusted: position is past the end of the session (3 messages)"));
        assert!(text.contains("Fix: none; messages.40.content.0: position is past the end"));
    }

    #[test]
    fn empty_listing() {
        assert_eq!(render_list(&[], &[], false), "No corrupted sessions found.\n");
    }

    #[test]
    fn json_listing_mirrors_text() {
        let fx = scenario();
        let (groups, plans) = listing(&fx);
        let json = serde_json::to_value(build_json_list(&groups, &plans)).unwrap();
        assert_eq!(json["corrupted_sessions"], 1);
        assert_eq!(json["corrupted_messages"], 2);
        assert_eq!(json["sessions"][0]["units"][0]["source"], "msg_t1");
        assert_eq!(
            json["sessions"][0]["remove_messages"],
            serde_json::json!(["msg_t1", "msg_t2", "msg_t3"])
        );
    }

    #[test]
    fn result_labels() {
        let fx = scenario();
        let store = fx.store();
        let options = repair::RepairOptions {
            backup_root: fx.path("repair-backups"),
            dry_run: true,
        };
        let preview = repair::repair_session(&store, &options, "ses_1");
        let text = render_result(&preview, false);
        assert!(text.contains("Status: WOULD SUCCEED"));
        assert!(text.contains("Messages to remove: 3"));
        assert!(!text.contains("Backup saved to"));

        let clean = repair::repair_session(&store, &options, "ses_other");
        assert_eq!(status_label(&clean), "NO-OP (nothing to remove)");
    }
}
