//! Static security validation for learner code.
//!
//! [`SecurityValidator::scan`] runs a line-oriented pattern pass over source
//! code and classifies every match as [`Severity::Critical`],
//! [`Severity::High`] or [`Severity::Medium`]. Critical findings must stop
//! execution before a sandbox is ever created.
//!
//! The scan is pure apart from the audit log: every violation is emitted on the
//! `audit` tracing target with its rule, severity, line and snippet.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Language;

/// Largest accepted source file in bytes.
pub const MAX_CODE_BYTES: usize = 64 * 1024;

/// Longest snippet kept in a [`Violation`].
const MAX_SNIPPET_CHARS: usize = 120;

/// How dangerous a detected pattern is.
///
/// Ordered so that `Critical > High > Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Suspicious but not dangerous on its own.
    Medium,
    /// Likely sandbox probing or data exfiltration.
    High,
    /// Never executed.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A single pattern match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Stable rule identifier, e.g. `py.os_system`.
    pub rule: String,
    /// Severity of the rule.
    pub severity: Severity,
    /// 1-based line number of the match.
    pub line: usize,
    /// Trimmed source line around the match.
    pub snippet: String,
    /// Human readable explanation.
    pub message: String,
}

/// Result of scanning one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// All violations, in source order.
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    /// Returns `true` if any violation is critical.
    #[must_use]
    pub fn has_critical(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.severity == Severity::Critical)
    }

    /// Highest severity found, if any.
    #[must_use]
    pub fn max_severity(&self) -> Option<Severity> {
        self.violations.iter().map(|v| v.severity).max()
    }

    /// Number of violations with the given severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.violations
            .iter()
            .filter(|v| v.severity == severity)
            .count()
    }

    /// Returns `true` when nothing was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// When a rule applies.
#[derive(Debug, Clone, Copy)]
enum Guard {
    /// Every match counts.
    Always,
    /// Only counts when the code contains no `break` (loop smells).
    NoBreak,
    /// Skipped if another rule already matched the same line.
    Fallback,
    /// Only counts when the code mentions the given module.
    Uses(&'static str),
}

struct Rule {
    id: &'static str,
    severity: Severity,
    pattern: Regex,
    message: &'static str,
    guard: Guard,
}

impl Rule {
    fn new(
        id: &'static str,
        severity: Severity,
        pattern: &str,
        message: &'static str,
        guard: Guard,
    ) -> Option<Self> {
        match Regex::new(pattern) {
            Ok(pattern) => Some(Self {
                id,
                severity,
                pattern,
                message,
                guard,
            }),
            Err(e) => {
                tracing::error!(rule = id, error = %e, "Invalid security rule pattern");
                None
            }
        }
    }
}

static PYTHON_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    use Guard::{Always, Fallback, NoBreak, Uses};
    use Severity::{Critical, High, Medium};

    [
        Rule::new("py.eval", Critical, r"\beval\s*\(", "eval() executes arbitrary code", Always),
        Rule::new("py.exec", Critical, r"\bexec\s*\(", "exec() executes arbitrary code", Always),
        Rule::new(
            "py.os_system",
            Critical,
            r"\bos\s*\.\s*(system|popen|exec\w*|spawn\w*|fork|kill|_exit)\b",
            "os process control can run shell commands",
            Always,
        ),
        Rule::new(
            "py.subprocess",
            Critical,
            r"\bsubprocess\b",
            "subprocess spawns external programs",
            Always,
        ),
        Rule::new(
            "py.fs_mutation",
            Critical,
            r"\b(os\s*\.\s*(open|remove|unlink|rmdir|removedirs|rename|replace|chmod|chown|mkdir|makedirs|truncate)|shutil)\b",
            "filesystem modification is not allowed",
            Always,
        ),
        Rule::new(
            "py.pathlib_mutation",
            Critical,
            r"\.\s*(write_text|write_bytes|unlink|rmdir|rename|replace|touch|mkdir|chmod|symlink_to|hardlink_to)\s*\(",
            "modifying files through pathlib is not allowed",
            Uses("pathlib"),
        ),
        Rule::new(
            "py.file_write",
            Critical,
            r#"\bopen\s*\([^)]*,\s*(mode\s*=\s*)?['"][^'"]*[wax+]"#,
            "writing files is not allowed",
            Always,
        ),
        Rule::new(
            "py.socket",
            Critical,
            r"\b(import\s+socket|from\s+socket\b|socket\s*\.\s*socket)",
            "raw sockets are not allowed",
            Always,
        ),
        Rule::new(
            "py.dynamic_import",
            High,
            r"(__import__|\bimportlib\b)",
            "dynamic imports can bypass static checks",
            Always,
        ),
        Rule::new(
            "py.native",
            High,
            r"\b(ctypes|cffi)\b",
            "native code access is not allowed",
            Always,
        ),
        Rule::new(
            "py.deserialize",
            High,
            r"\b(pickle|marshal|shelve)\b",
            "unsafe deserialization modules",
            Always,
        ),
        Rule::new(
            "py.introspection",
            High,
            r"(__builtins__|__subclasses__|__globals__|__code__)",
            "interpreter internals are a common sandbox escape",
            Always,
        ),
        Rule::new(
            "py.network",
            High,
            r"\b(urllib|requests|httpx|http\.client|ftplib|smtplib|telnetlib)\b",
            "network clients are disabled in the sandbox",
            Always,
        ),
        Rule::new(
            "py.file_read",
            High,
            r"\bopen\s*\(",
            "reading files is not needed for exercises",
            Fallback,
        ),
        Rule::new(
            "py.compile",
            High,
            r"\bcompile\s*\(",
            "compile() builds code objects at runtime",
            Always,
        ),
        Rule::new(
            "py.infinite_loop",
            Medium,
            r"^\s*while\s+(True|1)\s*:",
            "loop has no break and may never terminate",
            NoBreak,
        ),
        Rule::new(
            "py.input",
            Medium,
            r"\binput\s*\(",
            "input() blocks forever without stdin",
            Always,
        ),
        Rule::new(
            "py.large_allocation",
            Medium,
            r"(\*\s*10\s*\*\*\s*([89]|\d{2,})|\d{9,})",
            "very large allocation",
            Always,
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
});

static JAVASCRIPT_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    use Guard::{Always, NoBreak};
    use Severity::{Critical, High, Medium};

    [
        Rule::new("js.eval", Critical, r"\beval\s*\(", "eval() executes arbitrary code", Always),
        Rule::new(
            "js.function_constructor",
            Critical,
            r"\bnew\s+Function\s*\(",
            "Function constructor executes arbitrary code",
            Always,
        ),
        Rule::new(
            "js.child_process",
            Critical,
            r"child_process",
            "child_process spawns external programs",
            Always,
        ),
        Rule::new(
            "js.fs",
            Critical,
            r#"(require\s*\(\s*['"](node:)?fs(/promises)?['"]\s*\)|from\s+['"](node:)?fs(/promises)?['"])"#,
            "filesystem access is not allowed",
            Always,
        ),
        Rule::new(
            "js.socket",
            Critical,
            r#"require\s*\(\s*['"](node:)?(net|dgram|tls)['"]\s*\)"#,
            "raw sockets are not allowed",
            Always,
        ),
        Rule::new(
            "js.process_control",
            Critical,
            r"\bprocess\s*\.\s*(binding|dlopen|kill)\b",
            "process internals are not allowed",
            Always,
        ),
        Rule::new(
            "js.network",
            High,
            r#"(\bfetch\s*\(|XMLHttpRequest|WebSocket|require\s*\(\s*['"](node:)?https?['"]\s*\))"#,
            "network clients are disabled in the sandbox",
            Always,
        ),
        Rule::new(
            "js.dynamic_require",
            High,
            r#"(\brequire\s*\(\s*[^'"\s)]|\bimport\s*\()"#,
            "dynamic module loading can bypass static checks",
            Always,
        ),
        Rule::new(
            "js.vm",
            High,
            r#"require\s*\(\s*['"](node:)?(vm|worker_threads|cluster)['"]\s*\)"#,
            "nested execution contexts are not allowed",
            Always,
        ),
        Rule::new(
            "js.prototype",
            High,
            r"(__proto__|constructor\s*\.\s*constructor)",
            "prototype tampering is a common sandbox escape",
            Always,
        ),
        Rule::new(
            "js.process_env",
            High,
            r"\bprocess\s*\.\s*env\b",
            "environment inspection is not needed for exercises",
            Always,
        ),
        Rule::new(
            "js.infinite_loop",
            Medium,
            r"(while\s*\(\s*(true|1)\s*\)|for\s*\(\s*;\s*;\s*\))",
            "loop has no break and may never terminate",
            NoBreak,
        ),
        Rule::new(
            "js.timers",
            Medium,
            r"\bsetInterval\s*\(",
            "intervals keep the process alive",
            Always,
        ),
        Rule::new(
            "js.large_allocation",
            Medium,
            r"(new\s+Array\s*\(\s*\d{8,}|\.repeat\s*\(\s*\d{8,}|\d{10,})",
            "very large allocation",
            Always,
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
});

/// Stateless pattern scanner.
///
/// # Example
///
/// ```
/// use coach_sandbox::{Language, SecurityValidator, Severity};
///
/// let report = SecurityValidator::new().scan("import os\nos.system(\"rm -rf /\")", Language::Python);
/// assert!(report.has_critical());
/// assert_eq!(report.violations[0].line, 2);
/// assert_eq!(report.violations[0].severity, Severity::Critical);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityValidator;

impl SecurityValidator {
    /// Creates a validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Scans `code` and returns every violation in source order.
    ///
    /// Comment-only lines are skipped. Each violation is written to the
    /// `audit` log target.
    pub fn scan(&self, code: &str, language: Language) -> ValidationReport {
        let (rules, comment) = match language {
            Language::Python => (&*PYTHON_RULES, "#"),
            Language::JavaScript => (&*JAVASCRIPT_RULES, "//"),
        };
        let has_break = code.contains("break") || code.contains("return");

        let mut violations = Vec::new();
        for (index, line) in code.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with(comment) {
                continue;
            }

            let mut matched_on_line = false;
            for rule in rules {
                let applies = match rule.guard {
                    Guard::Always => true,
                    Guard::NoBreak => !has_break,
                    Guard::Fallback => !matched_on_line,
                    Guard::Uses(module) => code.contains(module),
                };
                if applies && rule.pattern.is_match(line) {
                    matched_on_line = true;
                    violations.push(Violation {
                        rule: rule.id.to_string(),
                        severity: rule.severity,
                        line: index + 1,
                        snippet: snippet(trimmed),
                        message: rule.message.to_string(),
                    });
                }
            }
        }

        for violation in &violations {
            warn!(
                target: "audit",
                timestamp = %Utc::now().to_rfc3339(),
                language = %language,
                rule = %violation.rule,
                severity = %violation.severity,
                line = violation.line,
                snippet = %violation.snippet,
                "Security violation detected"
            );
        }

        ValidationReport { violations }
    }
}

fn snippet(line: &str) -> String {
    if line.chars().count() <= MAX_SNIPPET_CHARS {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(MAX_SNIPPET_CHARS).collect();
    cut.push('…');
    cut
}
