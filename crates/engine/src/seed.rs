//! Built-in detection policies, seeded idempotently at startup.
//!
//! Seeding goes through `save_policy`, which upserts by unique name, so
//! every boot converges on the same policy set without duplicating rows or
//! clobbering operator-created policies with other names.

use chrono::Utc;
use uuid::Uuid;

use al_domain::{
    ConditionLogic, ConditionOperator, EventCategory, Policy, PolicyAction, RuleCondition,
    Severity,
};
use al_store::Store;

fn condition(field: &str, operator: ConditionOperator, value: &str) -> RuleCondition {
    RuleCondition {
        field: field.to_string(),
        operator,
        value: value.into(),
        case_sensitive: false,
    }
}

#[allow(clippy::too_many_arguments)]
fn policy(
    name: &str,
    description: &str,
    categories: Vec<EventCategory>,
    conditions: Vec<RuleCondition>,
    logic: ConditionLogic,
    action: PolicyAction,
    severity: Severity,
    alert_title: &str,
    alert_description: &str,
    tags: &[&str],
) -> Policy {
    Policy {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: description.to_string(),
        enabled: true,
        categories,
        tools: Vec::new(),
        conditions,
        condition_logic: logic,
        action,
        severity,
        alert_title: alert_title.to_string(),
        alert_description: alert_description.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// The default detection policy set.
pub fn default_policies() -> Vec<Policy> {
    vec![
        policy(
            "[EXFIL-001] Sensitive file exfiltration via network tools",
            "Blocks network commands that reference credential material \
             (.env, .pem, SSH keys, secrets) directly on the command line.",
            vec![EventCategory::CommandExec],
            vec![condition(
                "tool_input.command",
                ConditionOperator::Matches,
                r"(curl|wget|fetch)\s+.*(\.(env|pem|key)|credentials|secrets|password|api_key|\.ssh/id_)",
            )],
            ConditionLogic::All,
            PolicyAction::Block,
            Severity::Critical,
            "Data exfiltration attempt blocked",
            "A network command referencing sensitive files was blocked before execution.",
            &["exfiltration", "credentials"],
        ),
        policy(
            "[EXEC-001] Remote script piped to shell",
            "Blocks the curl-pipe-to-shell pattern used to run untrusted \
             remote code in one step.",
            vec![EventCategory::CommandExec],
            vec![condition(
                "tool_input.command",
                ConditionOperator::Matches,
                r"(curl|wget)\s+.*\|\s*(bash|sh|python|perl|ruby)",
            )],
            ConditionLogic::All,
            PolicyAction::Block,
            Severity::Critical,
            "Download-and-execute blocked",
            "A command piping remote content into an interpreter was blocked.",
            &["download-execute", "remote-code"],
        ),
        policy(
            "[FILE-001] Destructive filesystem command",
            "Alerts on recursive deletion, filesystem formatting, and raw \
             device writes.",
            vec![EventCategory::CommandExec],
            vec![condition(
                "tool_input.command",
                ConditionOperator::Matches,
                r"(rm\s+-rf\s+[/~]|mkfs\.|dd\s+if=.*of=/dev/)",
            )],
            ConditionLogic::All,
            PolicyAction::Alert,
            Severity::High,
            "Destructive command executed",
            "A command capable of irreversible filesystem damage was observed.",
            &["destructive", "filesystem"],
        ),
        policy(
            "[FILE-002] Credential file access",
            "Alerts when credential material is read (SSH keys, cloud \
             credentials, env files, shadow).",
            vec![EventCategory::FileRead],
            vec![condition(
                "file_paths",
                ConditionOperator::Matches,
                r"(\.ssh/id_|\.aws/credentials|\.env$|/etc/shadow|\.pem$|\.netrc)",
            )],
            ConditionLogic::All,
            PolicyAction::Alert,
            Severity::High,
            "Credential file accessed",
            "An agent read a file that typically holds credentials or keys.",
            &["credentials", "file-access"],
        ),
        policy(
            "[EXEC-002] Privilege escalation attempt",
            "Alerts on sudo usage and setuid-bit manipulation from an agent \
             session.",
            vec![EventCategory::CommandExec],
            vec![
                condition("tool_input.command", ConditionOperator::Matches, r"^\s*sudo\s+"),
                condition(
                    "tool_input.command",
                    ConditionOperator::Matches,
                    r"chmod\s+(\+s|u\+s|[0-7]*[4-7][0-7]{2}\s+/)",
                ),
            ],
            ConditionLogic::Any,
            PolicyAction::Alert,
            Severity::Medium,
            "Privilege escalation attempt",
            "The agent attempted to elevate privileges or set setuid bits.",
            &["privilege-escalation"],
        ),
        policy(
            "[SESSION-001] Dangerous skip permissions mode",
            "Alerts when a session starts with permission checks bypassed. \
             Such sessions can execute any tool without user approval.",
            Vec::new(),
            vec![
                condition("hook_type", ConditionOperator::Equals, "SessionStart"),
                condition(
                    "permission_mode",
                    ConditionOperator::Matches,
                    r"(dangerously.*skip|bypass|none|disabled)",
                ),
            ],
            ConditionLogic::All,
            PolicyAction::Alert,
            Severity::Critical,
            "Session started with permissions bypassed",
            "A session was started with permission checks disabled. All tool \
             executions in this session proceed without user approval.",
            &["permissions", "session-security", "high-risk"],
        ),
    ]
}

/// Seed the default policies by name. Returns how many were written.
pub fn seed_default_policies(store: &Store) -> al_store::Result<usize> {
    let mut count = 0;
    for policy in default_policies() {
        match store.save_policy(&policy) {
            Ok(()) => count += 1,
            Err(err) => {
                tracing::error!(policy = %policy.name, error = %err, "failed to seed policy");
            }
        }
    }
    Ok(count)
}
