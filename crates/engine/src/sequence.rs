//! Behavioral sequence detection.
//!
//! Unlike single-event policies, sequence rules match ordered or unordered
//! combinations of events within a sliding time window, per session.
//! Example: "read .env" followed by "curl POST to external server" within
//! five minutes is the classic exfiltration pattern.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use al_domain::{policy::lookup_path, PolicyAction, Severity};

/// A single step in a sequence rule: a category allowlist plus dot-notation
/// field → regex patterns that must all match (case-insensitive).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    pub label: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub field_patterns: HashMap<String, String>,
}

/// A multi-step behavioral detection rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<SequenceStep>,
    #[serde(default = "default_window")]
    pub time_window_seconds: i64,
    #[serde(default = "default_true")]
    pub ordered: bool,
    #[serde(default = "default_action")]
    pub action: PolicyAction,
    #[serde(default = "default_rule_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub alert_title: String,
    #[serde(default)]
    pub alert_description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_window() -> i64 {
    300
}
fn default_true() -> bool {
    true
}
fn default_action() -> PolicyAction {
    PolicyAction::Alert
}
fn default_rule_severity() -> Severity {
    Severity::Critical
}

/// An event held in a session's sliding window.
#[derive(Debug, Clone)]
pub struct BufferedEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

/// Per-session sliding-window correlator.
///
/// Keeps a bounded FIFO of recent events per session; every new event is
/// checked against all loaded rules. A (rule, session) pair fires at most
/// once for the lifetime of the tracker, until `reset_session`.
pub struct SequenceTracker {
    rules: Vec<SequenceRule>,
    buffers: HashMap<String, VecDeque<BufferedEvent>>,
    max_buffer_size: usize,
    fired: HashSet<(String, String)>,
}

impl Default for SequenceTracker {
    fn default() -> Self {
        SequenceTracker::new(500)
    }
}

impl SequenceTracker {
    pub fn new(max_buffer_size: usize) -> Self {
        SequenceTracker {
            rules: Vec::new(),
            buffers: HashMap::new(),
            max_buffer_size,
            fired: HashSet::new(),
        }
    }

    /// Replace the loaded rules, keeping only enabled ones.
    pub fn load_rules(&mut self, rules: Vec<SequenceRule>) {
        self.rules = rules.into_iter().filter(|r| r.enabled).collect();
        tracing::info!(count = self.rules.len(), "sequence rules loaded");
    }

    /// Add an event to the session window and return any newly completed
    /// sequences as (rule, matching events in step order).
    pub fn track_event(
        &mut self,
        event_id: Uuid,
        session_id: &str,
        timestamp: DateTime<Utc>,
        data: Value,
    ) -> Vec<(SequenceRule, Vec<BufferedEvent>)> {
        let buffer = self.buffers.entry(session_id.to_string()).or_default();
        buffer.push_back(BufferedEvent {
            event_id,
            timestamp,
            data,
        });
        while buffer.len() > self.max_buffer_size {
            buffer.pop_front();
        }

        // Evict entries older than the largest window among loaded rules.
        let max_window = self
            .rules
            .iter()
            .map(|r| r.time_window_seconds)
            .max()
            .unwrap_or(300);
        let cutoff = timestamp - Duration::seconds(max_window);
        while buffer.front().map_or(false, |e| e.timestamp < cutoff) {
            buffer.pop_front();
        }

        let mut matches = Vec::new();
        for rule in &self.rules {
            let Some(events) = check_rule(rule, self.buffers.get(session_id), timestamp) else {
                continue;
            };
            let dedup_key = (rule.id.clone(), session_id.to_string());
            if self.fired.insert(dedup_key) {
                tracing::info!(
                    rule = %rule.id,
                    name = %rule.name,
                    session_id = %session_id,
                    "sequence detected"
                );
                matches.push((rule.clone(), events));
            }
        }

        matches
    }

    /// Clear both the window and the fired set for a session.
    pub fn reset_session(&mut self, session_id: &str) {
        self.buffers.remove(session_id);
        self.fired.retain(|(_, sid)| sid != session_id);
    }
}

fn check_rule(
    rule: &SequenceRule,
    buffer: Option<&VecDeque<BufferedEvent>>,
    now: DateTime<Utc>,
) -> Option<Vec<BufferedEvent>> {
    let buffer = buffer?;
    let cutoff = now - Duration::seconds(rule.time_window_seconds);
    let window: Vec<&BufferedEvent> =
        buffer.iter().filter(|e| e.timestamp >= cutoff).collect();
    if window.is_empty() {
        return None;
    }

    let mut step_matches: Vec<Vec<&BufferedEvent>> = Vec::with_capacity(rule.steps.len());
    for step in &rule.steps {
        let matching: Vec<&BufferedEvent> = window
            .iter()
            .copied()
            .filter(|e| matches_step(step, &e.data))
            .collect();
        if matching.is_empty() {
            return None;
        }
        step_matches.push(matching);
    }

    if rule.ordered {
        find_ordered_match(&step_matches)
    } else {
        Some(step_matches.iter().map(|m| m[0].clone()).collect())
    }
}

fn matches_step(step: &SequenceStep, data: &Value) -> bool {
    if !step.categories.is_empty() {
        let category = data.get("category").and_then(Value::as_str).unwrap_or("");
        if !step.categories.iter().any(|c| c == category) {
            return false;
        }
    }

    for (field, pattern) in &step.field_patterns {
        let Some(value) = lookup_path(data, field) else {
            return false;
        };
        if value.is_null() {
            return false;
        }
        let Ok(re) = RegexBuilder::new(pattern).case_insensitive(true).build() else {
            return false;
        };
        let matched = match value {
            Value::Array(items) => items.iter().any(|item| re.is_match(&stringify(item))),
            other => re.is_match(&stringify(other)),
        };
        if !matched {
            return false;
        }
    }

    true
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Greedy forward scan: for each step, pick the earliest event at or after
/// the previously picked one. Failure at any step means no fire.
fn find_ordered_match(step_matches: &[Vec<&BufferedEvent>]) -> Option<Vec<BufferedEvent>> {
    let mut result: Vec<BufferedEvent> = Vec::with_capacity(step_matches.len());
    let mut last_time: Option<DateTime<Utc>> = None;

    for matches in step_matches {
        let mut sorted: Vec<&&BufferedEvent> = matches.iter().collect();
        sorted.sort_by_key(|e| e.timestamp);
        let picked = sorted
            .into_iter()
            .find(|e| last_time.map_or(true, |t| e.timestamp >= t))?;
        last_time = Some(picked.timestamp);
        result.push((*picked).clone());
    }

    Some(result)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn step(label: &str, categories: &[&str], patterns: &[(&str, &str)]) -> SequenceStep {
    SequenceStep {
        label: label.to_string(),
        categories: categories.iter().map(|c| c.to_string()).collect(),
        field_patterns: patterns
            .iter()
            .map(|(field, pattern)| (field.to_string(), pattern.to_string()))
            .collect(),
    }
}

/// The built-in multi-step detection rules.
pub fn default_sequence_rules() -> Vec<SequenceRule> {
    vec![
        SequenceRule {
            id: "SEQ-EXFIL-001".to_string(),
            name: "Data exfiltration: sensitive file read, then network access".to_string(),
            description: "A sensitive file (.env, .pem, credentials, SSH keys) was read \
                          and network access followed within the time window."
                .to_string(),
            steps: vec![
                step(
                    "Read sensitive file",
                    &["file_read"],
                    &[(
                        "file_paths",
                        r"(\.(env|pem|key)|credentials|secrets|password|api_key|\.ssh/id_)",
                    )],
                ),
                step(
                    "Network access",
                    &["network_access", "command_exec"],
                    &[(
                        "commands",
                        r"(curl|wget|fetch|requests\.|http\.client|urllib|aiohttp|node\s+-e|python.*import\s+(requests|urllib|http))",
                    )],
                ),
            ],
            time_window_seconds: 300,
            ordered: true,
            action: PolicyAction::Alert,
            severity: Severity::Critical,
            alert_title: "Data exfiltration pattern detected".to_string(),
            alert_description: "A sensitive file was read followed by network access. This \
                                sequence matches the classic data exfiltration pattern where \
                                credentials or secrets are stolen and transmitted externally."
                .to_string(),
            tags: vec![
                "exfiltration".to_string(),
                "sequence".to_string(),
                "data-theft".to_string(),
            ],
            enabled: true,
        },
        SequenceRule {
            id: "SEQ-EXFIL-002".to_string(),
            name: "Staged exfiltration: encode, then network".to_string(),
            description: "Files were encoded or archived (base64, xxd, tar) and then sent \
                          over the network."
                .to_string(),
            steps: vec![
                step(
                    "Encode or archive sensitive data",
                    &["command_exec"],
                    &[(
                        "commands",
                        r"(base64|xxd|tar\s+[czf]|zip|gzip|openssl\s+(enc|base64)).*(\.(env|pem|key|json|conf)|credentials|secrets|\.ssh)",
                    )],
                ),
                step(
                    "Network transmission",
                    &["command_exec", "network_access"],
                    &[(
                        "commands",
                        r"(curl|wget|nc\s|ncat|python.*socket|ruby.*TCPSocket)",
                    )],
                ),
            ],
            time_window_seconds: 300,
            ordered: true,
            action: PolicyAction::Alert,
            severity: Severity::Critical,
            alert_title: "Staged data exfiltration detected".to_string(),
            alert_description: "Data was encoded or archived and then transmitted over the \
                                network. This multi-step pattern is used to evade simple \
                                exfiltration detection."
                .to_string(),
            tags: vec![
                "exfiltration".to_string(),
                "sequence".to_string(),
                "encoding".to_string(),
                "evasion".to_string(),
            ],
            enabled: true,
        },
        SequenceRule {
            id: "SEQ-EXEC-001".to_string(),
            name: "Download and execute".to_string(),
            description: "A file was downloaded (curl -o, wget) and then executed (bash, \
                          python, chmod +x) within the time window."
                .to_string(),
            steps: vec![
                step(
                    "Download file",
                    &["command_exec", "network_access"],
                    &[("commands", r"(curl\s+.*-[oO]\s|wget\s|fetch\s+.*-o\s)")],
                ),
                step(
                    "Execute downloaded file",
                    &["command_exec"],
                    &[("commands", r"(bash|sh|python[23]?|perl|ruby|chmod\s+\+x)\s+")],
                ),
            ],
            time_window_seconds: 120,
            ordered: true,
            action: PolicyAction::Alert,
            severity: Severity::Critical,
            alert_title: "Download and execute pattern detected".to_string(),
            alert_description: "A file was downloaded and then executed. This is a common \
                                malware deployment technique."
                .to_string(),
            tags: vec![
                "download-execute".to_string(),
                "sequence".to_string(),
                "malware".to_string(),
            ],
            enabled: true,
        },
        SequenceRule {
            id: "SEQ-RECON-001".to_string(),
            name: "Reconnaissance, then privilege escalation".to_string(),
            description: "System files (/etc/passwd, /proc) were read and a privilege \
                          escalation attempt (sudo, chmod +s) followed."
                .to_string(),
            steps: vec![
                step(
                    "System reconnaissance",
                    &["file_read"],
                    &[("file_paths", r"^(/etc/(passwd|shadow|sudoers|group|hosts)|/proc/)")],
                ),
                step(
                    "Privilege escalation attempt",
                    &["command_exec"],
                    &[(
                        "commands",
                        r"(sudo\s|chmod\s+\+s|chmod\s+777|chown\s+root|setuid|pkexec|doas\s)",
                    )],
                ),
            ],
            time_window_seconds: 600,
            ordered: true,
            action: PolicyAction::Alert,
            severity: Severity::High,
            alert_title: "Reconnaissance followed by privilege escalation".to_string(),
            alert_description: "System files were read for reconnaissance followed by a \
                                privilege escalation attempt. This sequence indicates a \
                                deliberate attack progression."
                .to_string(),
            tags: vec![
                "reconnaissance".to_string(),
                "sequence".to_string(),
                "privilege-escalation".to_string(),
            ],
            enabled: true,
        },
        SequenceRule {
            id: "SEQ-PERSIST-001".to_string(),
            name: "Persistence installation".to_string(),
            description: "A script was created or downloaded and then written into a \
                          persistence location (cron, systemd, shell profiles, launchd)."
                .to_string(),
            steps: vec![
                step(
                    "Create or download script",
                    &["file_write", "command_exec"],
                    &[("file_paths", r"\.(sh|py|pl|rb|js)$")],
                ),
                step(
                    "Install persistence",
                    &["file_write", "command_exec"],
                    &[(
                        "file_paths",
                        r"(cron|systemd|launchd|\.bashrc|\.zshrc|\.profile|\.bash_profile|/etc/init\.d|LaunchAgents|LaunchDaemons)",
                    )],
                ),
            ],
            time_window_seconds: 600,
            ordered: true,
            action: PolicyAction::Alert,
            severity: Severity::High,
            alert_title: "Persistence mechanism installed".to_string(),
            alert_description: "A script was created and then installed into a persistence \
                                location (cron, systemd, shell profile, launchd). This \
                                indicates an attempt to maintain access across reboots."
                .to_string(),
            tags: vec![
                "persistence".to_string(),
                "sequence".to_string(),
                "backdoor".to_string(),
            ],
            enabled: true,
        },
    ]
}
