//! Content-based risk scoring.
//!
//! Each signal table pairs a pattern with an additive weight. An event with
//! no matches contributes zero, so normal development activity (reading
//! source, running tests, git) never moves the session risk score.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use al_domain::Event;

fn ci(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("static pattern must compile")
}

/// File-path signals. One match per path.
static FILE_RISK_SIGNALS: Lazy<Vec<(Regex, i64)>> = Lazy::new(|| {
    vec![
        // Cryptographic keys / SSH
        (ci(r"\.ssh/(id_|authorized_keys|known_hosts)"), 15),
        (ci(r"\.(pem|key|p12|pfx|jks|keystore)$"), 12),
        // Cloud / service credentials
        (ci(r"\.aws/(credentials|config)"), 15),
        (ci(r"\.gcloud/|\.azure/|\.kube/config"), 12),
        (ci(r"\.git-credentials|\.netrc"), 12),
        // Env / secret files
        (ci(r"\.env(\.\w+)?$"), 10),
        (ci(r"(secret|credential|password|token)s?(\.\w+)?$"), 10),
        // System sensitive
        (ci(r"/etc/(passwd|shadow|sudoers)"), 10),
        (ci(r"/proc/(self|[0-9]+)/(environ|maps|cmdline)"), 8),
        // Browser / app data
        (ci(r"(cookies|login\s*data|\.gnupg)"), 8),
    ]
});

/// Command signals. A command can match several and the weights stack.
static CMD_RISK_SIGNALS: Lazy<Vec<(Regex, i64)>> = Lazy::new(|| {
    vec![
        // Reverse shells
        (ci(r"/dev/tcp/|/dev/udp/"), 25),
        (ci(r"nc\b.*-e\s+/bin/|ncat\b.*-e\s+/bin/"), 25),
        (ci(r"mkfifo.*nc\b|socat\b.*exec:"), 25),
        // Download-and-execute
        (ci(r"curl\b.*\|\s*(ba)?sh|wget\b.*\|\s*(ba)?sh"), 20),
        (ci(r"curl\b.*-o\s+\S+.*&&.*chmod\s+\+x"), 20),
        // Data exfiltration
        (ci(r"curl\b.*(-F|--data|--upload-file)\s+.*@"), 18),
        (ci(r"curl\b.*\|\s*base64"), 15),
        // Encoding / obfuscation
        (ci(r"base64\b.*(-d|--decode|encode)"), 10),
        (ci(r"\beval\b.*\$\(|`.*`.*\beval\b"), 12),
        // Interpreter one-liners with network
        (ci(r"python[23]?\s+-c\s+.*\b(requests|urllib|socket)\b"), 12),
        (ci(r"node\s+-e\s+.*\bfetch\b"), 10),
        (ci(r"ruby\s+-e\s+.*\bNet::HTTP\b"), 10),
        // Privilege escalation
        (ci(r"\bsudo\b.*chmod\s+[0-7]*[4-7][0-7]{2}|chown\s+root"), 8),
        (ci(r"\bchmod\b.*\+s\b"), 10),
        // Recon
        (ci(r"\bwhoami\b|\bid\b|\buname\b.*-a"), 3),
    ]
});

/// Grep/Search pattern signals (credential hunting).
static SEARCH_RISK_SIGNALS: Lazy<Vec<(Regex, i64)>> = Lazy::new(|| {
    vec![
        (ci(r"password|passwd|api_key|api.key|secret.key|token"), 8),
        (ci(r"AKIA[0-9A-Z]|aws_secret|aws_access"), 12),
        (ci(r"BEGIN\s+(RSA|DSA|EC|OPENSSH)\s+PRIVATE"), 15),
        (ci(r"ghp_[A-Za-z0-9]|github_pat_"), 10),
    ]
});

/// URL signals. One match per URL.
static URL_RISK_SIGNALS: Lazy<Vec<(Regex, i64)>> = Lazy::new(|| {
    vec![(ci(r"(pastebin|requestbin|ngrok|burp|interact\.sh|oast)"), 12)]
});

static URL_IP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://(\d{1,3}(?:\.\d{1,3}){3})").unwrap());

/// Loopback and RFC 1918 private ranges.
fn is_private_or_loopback_ipv4(ip: &str) -> bool {
    if ip.starts_with("127.") || ip.starts_with("0.") || ip.starts_with("10.") {
        return true;
    }
    if ip.starts_with("192.168.") {
        return true;
    }
    if let Some(rest) = ip.strip_prefix("172.") {
        if let Some(second) = rest.split('.').next().and_then(|o| o.parse::<u8>().ok()) {
            return (16..=31).contains(&second);
        }
    }
    false
}

/// Sum of all matched signal weights across the event's content. Zero for
/// benign activity.
pub fn compute_event_risk(event: &Event) -> i64 {
    let mut score = 0;

    // 1. File path signals, one match per path.
    for path in &event.file_paths {
        for (pattern, weight) in FILE_RISK_SIGNALS.iter() {
            if pattern.is_match(path) {
                score += weight;
                break;
            }
        }
    }

    // 2. Command signals; multiple matches per command stack.
    for command in &event.commands {
        for (pattern, weight) in CMD_RISK_SIGNALS.iter() {
            if pattern.is_match(command) {
                score += weight;
            }
        }
    }

    // 3. Search / grep pattern signals.
    if matches!(event.tool_name.as_deref(), Some("Grep") | Some("Search")) {
        if let Some(search) = event
            .tool_input
            .as_ref()
            .and_then(|input| input.get("pattern"))
            .and_then(|v| v.as_str())
        {
            for (pattern, weight) in SEARCH_RISK_SIGNALS.iter() {
                if pattern.is_match(search) {
                    score += weight;
                }
            }
        }
    }

    // 4. URL signals, one match per URL, plus raw non-private IP hosts.
    for url in &event.urls {
        for (pattern, weight) in URL_RISK_SIGNALS.iter() {
            if pattern.is_match(url) {
                score += weight;
                break;
            }
        }
        if let Some(captures) = URL_IP_RE.captures(url) {
            if !is_private_or_loopback_ipv4(&captures[1]) {
                score += 8;
            }
        }
    }

    // 5. Contacting external IPs.
    for ip in &event.ip_addresses {
        if !is_private_or_loopback_ipv4(ip) {
            score += 6;
        }
    }

    score
}
