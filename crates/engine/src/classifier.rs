//! Pure event classification: category inference, severity scoring, and
//! content extraction (file paths, commands, URLs, IPs, command→file refs).

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use al_domain::{Event, EventCategory, Severity};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Category classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fixed mapping from known tool names to categories.
fn tool_category(tool: &str) -> Option<EventCategory> {
    Some(match tool {
        // File reading tools
        "Read" | "read_file" | "cat" | "head" | "tail" | "Glob" | "Grep" => {
            EventCategory::FileRead
        }
        // File writing tools
        "Write" | "Edit" | "write_file" | "NotebookEdit" => EventCategory::FileWrite,
        // Command execution tools
        "Bash" | "bash" | "execute_command" | "shell" => EventCategory::CommandExec,
        // Network access tools
        "WebFetch" | "WebSearch" | "fetch" | "curl" | "http" => EventCategory::NetworkAccess,
        // Subagent tools
        "Task" | "dispatch_agent" => EventCategory::SubagentSpawn,
        // Agent workflow / task management tools
        "TaskCreate" | "TaskUpdate" | "TaskList" | "TaskGet" | "TaskStop" | "TodoWrite"
        | "TodoRead" | "AskUserQuestion" | "Skill" | "EnterPlanMode" | "ExitPlanMode" => {
            EventCategory::SessionLifecycle
        }
        _ => return None,
    })
}

const NETWORK_COMMANDS: &[&str] = &[
    "curl",
    "wget",
    "ssh",
    "scp",
    "rsync",
    "nc",
    "netcat",
    "ping",
    "traceroute",
    "dig",
    "nslookup",
    "host",
    "ftp",
    "sftp",
    "telnet",
];

fn is_network_command(command: &str) -> bool {
    let lower = command.to_lowercase();
    NETWORK_COMMANDS.iter().any(|cmd| lower.contains(cmd))
}

/// Classify an event into a category from its tool name and input shape.
pub fn classify_event(event: &Event) -> EventCategory {
    if let Some(tool) = event.tool_name.as_deref() {
        if let Some(category) = tool_category(tool) {
            return category;
        }
    }

    let empty = serde_json::Map::new();
    let tool_input = event.tool_input.as_ref().unwrap_or(&empty);

    // File operations: a path key alone is a read, with content a write.
    if tool_input.contains_key("file_path") || tool_input.contains_key("path") {
        if tool_input.contains_key("content") || tool_input.contains_key("new_string") {
            return EventCategory::FileWrite;
        }
        return EventCategory::FileRead;
    }

    if let Some(command) = tool_input.get("command").and_then(|v| v.as_str()) {
        if is_network_command(command) {
            return EventCategory::NetworkAccess;
        }
        return EventCategory::CommandExec;
    }

    if tool_input.contains_key("url") {
        return EventCategory::NetworkAccess;
    }

    match event.hook_type.as_str() {
        "SessionStart" | "SessionEnd" | "PermissionRequest" | "UserPromptSubmit" => {
            EventCategory::SessionLifecycle
        }
        "SubagentStart" | "SubagentStop" => EventCategory::SubagentSpawn,
        _ => EventCategory::Unknown,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Severity scoring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn ci(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("static pattern must compile")
}

static DANGEROUS_COMMAND_PATTERNS: Lazy<Vec<(Regex, Severity)>> = Lazy::new(|| {
    vec![
        // Critical commands
        (ci(r"rm\s+-rf\s+/"), Severity::Critical),
        (ci(r":\(\)\{ :\|:& \};:"), Severity::Critical), // fork bomb
        (ci(r"mkfs\."), Severity::Critical),
        (ci(r"dd\s+if=.*of=/dev/"), Severity::Critical),
        (ci(r"chmod\s+-R\s+777\s+/"), Severity::Critical),
        // High severity
        (ci(r"curl.*\|\s*(bash|sh)"), Severity::High),
        (ci(r"wget.*\|\s*(bash|sh)"), Severity::High),
        (ci(r"rm\s+-rf"), Severity::High),
        (ci(r"sudo\s+"), Severity::High),
        (ci(r"chmod\s+[0-7]*7[0-7]*"), Severity::High),
        (ci(r"chown\s+-R"), Severity::High),
        (ci(r"nc\s+-.*-e"), Severity::High),
        (ci(r"python.*-c.*socket"), Severity::High),
        (ci(r"base64\s+-d.*\|"), Severity::High),
        // Evasion-resistant patterns
        (
            ci(r"python[23]?\s+-c\s+.*(?:import\s+(?:requests|urllib|http|socket)|urlopen|urlretrieve)"),
            Severity::High,
        ),
        (
            ci(r#"node\s+-e\s+.*(?:require\s*\(\s*['"](?:http|https|net|child_process)|fetch\s*\()"#),
            Severity::High,
        ),
        (
            ci(r"ruby\s+-e\s+.*(?:Net::HTTP|TCPSocket|open-uri|URI\.open)"),
            Severity::High,
        ),
        (ci(r"perl\s+-e\s+.*(?:LWP|IO::Socket|Net::HTTP)"), Severity::High),
        (
            ci(r"base64.*(?:\.env|\.pem|\.key|credential|secret|password|ssh)"),
            Severity::High,
        ),
        (ci(r"openssl\s+(?:enc|base64).*(?:\.env|\.pem|\.key)"), Severity::High),
        (ci(r"xxd.*(?:\.env|\.pem|\.key|credential)"), Severity::High),
        (ci(r"\$\(.*(?:curl|wget|base64|cat\s+.*\.env)"), Severity::High),
        (ci(r"eval\s+.*(?:curl|wget|base64|\\x)"), Severity::High),
        (
            ci(r"echo\s+[A-Za-z0-9+/=]{20,}\s*\|\s*base64\s+-d"),
            Severity::High,
        ),
        // Medium severity
        (ci(r"curl\s+"), Severity::Medium),
        (ci(r"wget\s+"), Severity::Medium),
        (ci(r"git\s+clone"), Severity::Medium),
        (ci(r"pip\s+install"), Severity::Medium),
        (ci(r"npm\s+install"), Severity::Medium),
        (ci(r"ssh\s+"), Severity::Medium),
        (ci(r"scp\s+"), Severity::Medium),
        // Low severity
        (ci(r"git\s+"), Severity::Low),
        (ci(r"ls\s+"), Severity::Info),
        (ci(r"pwd"), Severity::Info),
        (ci(r"echo\s+"), Severity::Info),
    ]
});

static SENSITIVE_FILE_PATTERNS: Lazy<Vec<(Regex, Severity)>> = Lazy::new(|| {
    vec![
        (ci(r"/etc/passwd"), Severity::High),
        (ci(r"/etc/shadow"), Severity::Critical),
        (ci(r"\.ssh/.*"), Severity::High),
        (ci(r"id_rsa"), Severity::Critical),
        (ci(r"id_ed25519"), Severity::Critical),
        (ci(r"\.aws/credentials"), Severity::Critical),
        (ci(r"\.env"), Severity::High),
        (ci(r"\.netrc"), Severity::High),
        (ci(r"\.pgpass"), Severity::High),
        (ci(r"\.git/config"), Severity::Medium),
        (ci(r"password"), Severity::Medium),
        (ci(r"secret"), Severity::Medium),
        (ci(r"token"), Severity::Medium),
        (ci(r"api.?key"), Severity::Medium),
        (ci(r"\.bashrc"), Severity::Low),
        (ci(r"\.zshrc"), Severity::Low),
        (ci(r"\.profile"), Severity::Low),
    ]
});

/// Compute the severity for an already-classified, enriched event: the
/// maximum over command and file-path pattern hits, floored at Low for
/// network access and Medium for subagent spawns.
pub fn compute_severity(event: &Event) -> Severity {
    let mut max_severity = Severity::Info;
    let empty = serde_json::Map::new();
    let tool_input = event.tool_input.as_ref().unwrap_or(&empty);

    if event.category == EventCategory::CommandExec {
        if let Some(command) = tool_input.get("command").and_then(|v| v.as_str()) {
            for (pattern, severity) in DANGEROUS_COMMAND_PATTERNS.iter() {
                if pattern.is_match(command) {
                    max_severity = max_severity.max(*severity);
                }
            }
        }
    }

    let direct_path = tool_input
        .get("file_path")
        .or_else(|| tool_input.get("path"))
        .and_then(|v| v.as_str());
    let paths = direct_path
        .into_iter()
        .map(str::to_string)
        .chain(event.file_paths.iter().cloned());
    for path in paths {
        for (pattern, severity) in SENSITIVE_FILE_PATTERNS.iter() {
            if pattern.is_match(&path) {
                max_severity = max_severity.max(*severity);
            }
        }
    }

    if event.category == EventCategory::NetworkAccess {
        max_severity = max_severity.max(Severity::Low);
    }
    if event.category == EventCategory::SubagentSpawn {
        max_severity = max_severity.max(Severity::Medium);
    }

    max_severity
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Extractors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

static COMMAND_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)(/[^\s;|&><]+|\.?\.?/[^\s;|&><]+)").unwrap());
static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"https?://[^\s"'>]+"#).unwrap());
static IPV4_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap());

fn push_unique(out: &mut Vec<String>, seen: &mut HashSet<String>, value: String) {
    if seen.insert(value.clone()) {
        out.push(value);
    }
}

/// File paths referenced by the event: direct path fields, glob patterns,
/// and absolute/relative paths embedded in shell commands. Deduplicated.
pub fn extract_file_paths(event: &Event) -> Vec<String> {
    let mut paths = Vec::new();
    let mut seen = HashSet::new();
    let empty = serde_json::Map::new();
    let tool_input = event.tool_input.as_ref().unwrap_or(&empty);

    for field in ["file_path", "path", "notebook_path"] {
        if let Some(path) = tool_input.get(field).and_then(|v| v.as_str()) {
            push_unique(&mut paths, &mut seen, path.to_string());
        }
    }

    if event.tool_name.as_deref() == Some("Glob") {
        if let Some(pattern) = tool_input.get("pattern").and_then(|v| v.as_str()) {
            push_unique(&mut paths, &mut seen, pattern.to_string());
        }
    }

    if let Some(command) = tool_input.get("command").and_then(|v| v.as_str()) {
        for captures in COMMAND_PATH_RE.captures_iter(command) {
            push_unique(&mut paths, &mut seen, captures[1].to_string());
        }
    }

    paths
}

/// The `command` field, if present.
pub fn extract_commands(event: &Event) -> Vec<String> {
    let empty = serde_json::Map::new();
    let tool_input = event.tool_input.as_ref().unwrap_or(&empty);
    tool_input
        .get("command")
        .and_then(|v| v.as_str())
        .map(|c| vec![c.to_string()])
        .unwrap_or_default()
}

/// The `url` field plus any `http(s)://` matches inside a command.
pub fn extract_urls(event: &Event) -> Vec<String> {
    let mut urls = Vec::new();
    let mut seen = HashSet::new();
    let empty = serde_json::Map::new();
    let tool_input = event.tool_input.as_ref().unwrap_or(&empty);

    if let Some(url) = tool_input.get("url").and_then(|v| v.as_str()) {
        push_unique(&mut urls, &mut seen, url.to_string());
    }
    if let Some(command) = tool_input.get("command").and_then(|v| v.as_str()) {
        for m in URL_RE.find_iter(command) {
            push_unique(&mut urls, &mut seen, m.as_str().to_string());
        }
    }

    urls
}

/// IPv4 literals in the command and URL fields.
pub fn extract_ip_addresses(event: &Event) -> Vec<String> {
    let mut ips = Vec::new();
    let mut seen = HashSet::new();
    let empty = serde_json::Map::new();
    let tool_input = event.tool_input.as_ref().unwrap_or(&empty);

    for field in ["command", "url"] {
        if let Some(text) = tool_input.get(field).and_then(|v| v.as_str()) {
            for m in IPV4_RE.find_iter(text) {
                push_unique(&mut ips, &mut seen, m.as_str().to_string());
            }
        }
    }

    ips
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Command → file data flow
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Role a file plays in a shell command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileRole {
    Reads,
    Writes,
    Executes,
}

/// A file referenced by a command, with the role it plays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFileRef {
    pub path: String,
    pub role: FileRole,
}

static DOWNLOAD_OUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:curl|wget)\s+.*?(?:-o|-O|--output[= ])\s*(\S+)").unwrap());
static REDIRECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\d|&)?>>?\s*([^\s;|&]+)").unwrap());
static TEE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"tee\s+(?:-a\s+)?(\S+)").unwrap());
static CP_MV_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:cp|mv)\s+(?:-\w+\s+)*(\S+)\s+(\S+)").unwrap());
static INTERPRETER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[;|&]\s*)(?:bash|sh|zsh|python3?|node|ruby|perl)\s+([^\s;|&-]\S*)")
        .unwrap()
});
static DOT_SLASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[;|&]\s*)(\./[^\s;|&]+)").unwrap());
static SOURCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:source|\.)\s+([^\s;|&]+)").unwrap());
static CHMOD_X_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"chmod\s+\+x\s+(\S+)").unwrap());
static READER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:cat|less|more|head|tail|sort|wc|md5sum|sha256sum)\s+(?:-\w+\s+)*([^\s;|&-]\S*)")
        .unwrap()
});
static INPUT_REDIRECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<\s*([^\s;|&]+)").unwrap());
static CURL_DATA_FILE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-d\s+@(\S+)").unwrap());

/// Parse a shell command and return the files it writes, reads, or executes.
/// Feeds the graph builder's process → file data-flow edges.
pub fn extract_command_file_refs(command: &str) -> Vec<CommandFileRef> {
    let mut refs = Vec::new();
    let mut seen: HashSet<(String, FileRole)> = HashSet::new();
    let mut add = |path: &str, role: FileRole, refs: &mut Vec<CommandFileRef>| {
        if seen.insert((path.to_string(), role)) {
            refs.push(CommandFileRef {
                path: path.to_string(),
                role,
            });
        }
    };

    // Output / write patterns.
    for captures in DOWNLOAD_OUT_RE.captures_iter(command) {
        add(&captures[1], FileRole::Writes, &mut refs);
    }
    for captures in REDIRECT_RE.captures_iter(command) {
        let path = &captures[1];
        if !path.starts_with('-') && !path.starts_with("/dev/") {
            add(path, FileRole::Writes, &mut refs);
        }
    }
    for captures in TEE_RE.captures_iter(command) {
        add(&captures[1], FileRole::Writes, &mut refs);
    }
    for captures in CP_MV_RE.captures_iter(command) {
        add(&captures[1], FileRole::Reads, &mut refs);
        add(&captures[2], FileRole::Writes, &mut refs);
    }

    // Execution patterns.
    for captures in INTERPRETER_RE.captures_iter(command) {
        add(&captures[1], FileRole::Executes, &mut refs);
    }
    for captures in DOT_SLASH_RE.captures_iter(command) {
        add(&captures[1], FileRole::Executes, &mut refs);
    }
    for captures in SOURCE_RE.captures_iter(command) {
        add(&captures[1], FileRole::Executes, &mut refs);
    }
    for captures in CHMOD_X_RE.captures_iter(command) {
        add(&captures[1], FileRole::Executes, &mut refs);
    }

    // Read / input patterns.
    for captures in READER_RE.captures_iter(command) {
        add(&captures[1], FileRole::Reads, &mut refs);
    }
    for captures in INPUT_REDIRECT_RE.captures_iter(command) {
        let path = &captures[1];
        // Skip heredoc markers (<< EOF).
        if !path.starts_with('<') {
            add(path, FileRole::Reads, &mut refs);
        }
    }
    for captures in CURL_DATA_FILE_RE.captures_iter(command) {
        add(&captures[1], FileRole::Reads, &mut refs);
    }

    refs
}

/// Enrich an event in place with the extracted lists.
pub fn enrich(event: &mut Event) {
    event.file_paths = extract_file_paths(event);
    event.commands = extract_commands(event);
    event.urls = extract_urls(event);
    event.ip_addresses = extract_ip_addresses(event);
    event.enriched = true;
}

/// Classify an event in place: category first, then severity.
pub fn classify(event: &mut Event) {
    event.category = classify_event(event);
    event.severity = compute_severity(event);
}
