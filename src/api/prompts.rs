//! Prompt templates and reply post-processing for the domain endpoints.

use super::types::{Environment, ScriptLanguage, Severity};
use once_cell::sync::Lazy;
use regex::Regex;

pub const CHAT_SYSTEM_PROMPT: &str = "You are an operations assistant for engineers. \
Answer precisely, prefer concrete commands and configuration over general advice, \
and say so when you are unsure.";

pub const LOG_ANALYSIS_SYSTEM_PROMPT: &str = "You analyse system and application logs. \
Report issues one per line, then recommendations one per line.";

pub const SCRIPT_SYSTEM_PROMPT: &str = "You write small, safe automation scripts. \
Never include destructive operations unless they are explicitly requested.";

const MAX_FINDINGS: usize = 5;
const LONG_ANALYSIS_CHARS: usize = 500;

pub fn log_analysis_prompt(logs: &str, context: Option<&str>) -> String {
    let mut prompt = String::with_capacity(logs.len() + 256);
    prompt.push_str("Analyse the following logs.\n\n");
    if let Some(ctx) = context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str("Context: ");
        prompt.push_str(ctx.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str("Logs:\n");
    prompt.push_str(logs);
    prompt.push_str(
        "\n\nList each issue you find on its own line starting with \"Issue:\", \
         then each recommendation on its own line starting with \"Recommendation:\". \
         State the overall severity as critical, high, medium or low.",
    );
    prompt
}

pub fn script_prompt(requirement: &str, environment: Environment, language: ScriptLanguage) -> String {
    format!(
        "Write a {lang} script for {env}.\n\nRequirement: {req}\n\n\
         Reply in two parts separated by a blank line:\n\
         Script:\n<the script only>\n\nExplanation: <what it does and how to run it>",
        lang = language.as_str(),
        env = environment.as_str(),
        req = requirement.trim(),
    )
}

/// Issues and recommendations pulled out of a free-text analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct Findings {
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub severity: Severity,
    pub confidence: f32,
}

pub fn extract_findings(analysis: &str) -> Findings {
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();
    for line in analysis.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let lower = line.to_lowercase();
        if issues.len() < MAX_FINDINGS && (lower.contains("issue") || lower.contains("error")) {
            issues.push(line.to_string());
        }
        if recommendations.len() < MAX_FINDINGS
            && (lower.contains("recommend") || lower.contains("suggest"))
        {
            recommendations.push(line.to_string());
        }
    }
    Findings {
        issues,
        recommendations,
        severity: severity_of(analysis),
        confidence: if analysis.len() > LONG_ANALYSIS_CHARS { 0.8 } else { 0.6 },
    }
}

fn severity_of(analysis: &str) -> Severity {
    let lower = analysis.to_lowercase();
    if lower.contains("critical") {
        Severity::Critical
    } else if lower.contains("error") {
        Severity::High
    } else if lower.contains("warning") {
        Severity::Medium
    } else {
        Severity::Low
    }
}

const BASE_WARNINGS: [&str; 3] = [
    "Review the script before running it.",
    "Test in a non-production environment first.",
    "Run with the least privileges that work.",
];

static FENCED_BLOCK: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*\n(.*?)```").ok());

static DESTRUCTIVE: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"rm\s+-[a-zA-Z]*r[a-zA-Z]*f|rm\s+-[a-zA-Z]*f[a-zA-Z]*r", "Script deletes files recursively."),
        (r"(?i)remove-item\b.*-recurse", "Script deletes files recursively."),
        (r"shutil\.rmtree", "Script deletes directory trees."),
        (r"\bmkfs(\.\w+)?\b|\bdd\s+if=", "Script writes to block devices."),
        (r"(?i)\b(shutdown|reboot)\b|stop-computer|restart-computer", "Script restarts or stops the machine."),
        (r"\bsudo\b", "Script requests elevated privileges."),
    ]
    .into_iter()
    .filter_map(|(pattern, warning)| Regex::new(pattern).ok().map(|re| (re, warning)))
    .collect()
});

/// Script text, explanation and safety warnings from a generated reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptParts {
    pub script: String,
    pub explanation: String,
    pub safety_warnings: Vec<String>,
}

pub fn split_script_reply(reply: &str) -> ScriptParts {
    let (script, explanation) = match FENCED_BLOCK.as_ref().and_then(|re| re.captures(reply)) {
        Some(caps) => {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            let code = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let rest = format!("{}{}", &reply[..whole.start], &reply[whole.end..]);
            (code.trim_end().to_string(), clean_explanation(&rest))
        }
        None => {
            let mut parts = reply.splitn(2, "\n\n");
            let head = parts.next().unwrap_or_default().trim();
            let head = head.strip_prefix("Script:").unwrap_or(head).trim_start_matches('\n');
            let tail = parts.next().unwrap_or_default();
            (head.trim_end().to_string(), clean_explanation(tail))
        }
    };

    let mut safety_warnings: Vec<String> = BASE_WARNINGS.iter().map(|w| w.to_string()).collect();
    for (pattern, warning) in DESTRUCTIVE.iter() {
        if pattern.is_match(&script) && !safety_warnings.iter().any(|w| w == warning) {
            safety_warnings.push(warning.to_string());
        }
    }
    ScriptParts {
        script,
        explanation,
        safety_warnings,
    }
}

fn clean_explanation(text: &str) -> String {
    let text = text.trim();
    let text = match text.find("Explanation:") {
        Some(at) => &text[at + "Explanation:".len()..],
        None => text,
    };
    let text = text.trim();
    if text.is_empty() {
        "No explanation provided.".to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn findings_are_capped_and_classified() {
        let analysis = (0..8)
            .map(|i| format!("Issue: connection error #{}", i))
            .chain(std::iter::once("Recommendation: raise the pool size".to_string()))
            .collect::<Vec<_>>()
            .join("\n");
        let f = extract_findings(&analysis);
        assert_eq!(f.issues.len(), 5);
        assert_eq!(f.recommendations, vec!["Recommendation: raise the pool size"]);
        assert_eq!(f.severity, Severity::High);
        assert!((f.confidence - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn severity_prefers_the_strongest_marker() {
        assert_eq!(severity_of("a CRITICAL failure and an error"), Severity::Critical);
        assert_eq!(severity_of("one warning only"), Severity::Medium);
        assert_eq!(severity_of("all good"), Severity::Low);
    }

    #[test]
    fn long_analysis_raises_confidence() {
        let f = extract_findings(&"x".repeat(501));
        assert!((f.confidence - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn plain_reply_splits_on_blank_line() {
        let parts = split_script_reply("Script:\necho hi\n\nExplanation: prints hi");
        assert_eq!(parts.script, "echo hi");
        assert_eq!(parts.explanation, "prints hi");
        assert_eq!(parts.safety_warnings.len(), 3);
    }

    #[test]
    fn fenced_reply_uses_the_code_block() {
        let reply = "Here you go:\n```bash\nset -e\nrm -rf /tmp/build\n```\nExplanation: cleans the build dir";
        let parts = split_script_reply(reply);
        assert_eq!(parts.script, "set -e\nrm -rf /tmp/build");
        assert!(parts.explanation.starts_with("cleans the build dir"));
        assert!(parts
            .safety_warnings
            .iter()
            .any(|w| w.contains("recursively")));
    }

    #[test]
    fn prompts_carry_the_inputs() {
        let p = log_analysis_prompt("E: disk full", Some("nightly backup"));
        assert!(p.contains("E: disk full"));
        assert!(p.contains("Context: nightly backup"));
        let p = script_prompt("rotate logs", Environment::Windows, ScriptLanguage::Powershell);
        assert!(p.contains("powershell script for windows"));
    }
}
