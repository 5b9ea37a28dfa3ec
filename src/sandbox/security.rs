//! Pre-flight lexical scan for dangerous constructs.
//!
//! The scan is a coarse filter in front of the container isolation, not a
//! substitute for it. A single critical match, or three high-severity
//! matches, rejects the submission before any container is created.

use once_cell::sync::Lazy;
use regex::Regex;

/// Severity of a banned pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    High,
}

/// High-severity matches needed to block on their own.
pub const HIGH_SEVERITY_THRESHOLD: usize = 3;

struct BannedPattern {
    regex: Regex,
    severity: Severity,
    description: &'static str,
}

fn pattern(raw: &str, severity: Severity, description: &'static str) -> BannedPattern {
    BannedPattern {
        regex: Regex::new(raw).expect("static pattern compiles"),
        severity,
        description,
    }
}

static COMMON_PATTERNS: Lazy<Vec<BannedPattern>> = Lazy::new(|| {
    vec![
        pattern(r"(?i)/etc/(passwd|shadow)", Severity::Critical, "system credential files"),
        pattern(r"(?i)fork\s*\(\s*\)\s*;?\s*while|while\s*\(\s*(1|true)\s*\)\s*\{?\s*fork", Severity::Critical, "fork bomb"),
        pattern(r":\(\)\{\s*:\|:&\s*\};:", Severity::Critical, "shell fork bomb"),
    ]
});

static JAVASCRIPT_PATTERNS: Lazy<Vec<BannedPattern>> = Lazy::new(|| {
    vec![
        pattern(r#"require\s*\(\s*['"]child_process['"]"#, Severity::Critical, "process spawning"),
        pattern(r#"require\s*\(\s*['"]net['"]"#, Severity::High, "network sockets"),
        pattern(r#"require\s*\(\s*['"]fs['"]"#, Severity::High, "filesystem access"),
        pattern(r"\beval\s*\(", Severity::High, "dynamic evaluation"),
        pattern(r"new\s+Function\s*\(", Severity::High, "dynamic code construction"),
        pattern(r"process\.binding", Severity::Critical, "raw runtime bindings"),
    ]
});

static PYTHON_PATTERNS: Lazy<Vec<BannedPattern>> = Lazy::new(|| {
    vec![
        pattern(r"import\s+subprocess|from\s+subprocess", Severity::Critical, "process spawning"),
        pattern(r"os\s*\.\s*(system|popen|exec[lv]p?e?)", Severity::Critical, "process spawning"),
        pattern(r"import\s+socket|from\s+socket", Severity::High, "network sockets"),
        pattern(r"\beval\s*\(|\bexec\s*\(", Severity::High, "dynamic evaluation"),
        pattern(r"__import__\s*\(", Severity::High, "dynamic imports"),
        pattern(r"import\s+ctypes|from\s+ctypes", Severity::Critical, "raw syscall access"),
        pattern(r#"open\s*\(\s*['"]/(etc|proc|sys|dev|root|home)"#, Severity::High, "filesystem access outside workspace"),
    ]
});

static JAVA_PATTERNS: Lazy<Vec<BannedPattern>> = Lazy::new(|| {
    vec![
        pattern(r"Runtime\s*\.\s*getRuntime\s*\(\s*\)\s*\.\s*exec", Severity::Critical, "process spawning"),
        pattern(r"new\s+ProcessBuilder", Severity::Critical, "process spawning"),
        pattern(r"java\s*\.\s*net\s*\.\s*Socket", Severity::High, "network sockets"),
        pattern(r"java\s*\.\s*lang\s*\.\s*reflect", Severity::High, "reflection"),
        pattern(r"sun\s*\.\s*misc\s*\.\s*Unsafe", Severity::Critical, "unsafe memory access"),
    ]
});

static NATIVE_PATTERNS: Lazy<Vec<BannedPattern>> = Lazy::new(|| {
    vec![
        pattern(r"\bsystem\s*\(|\bpopen\s*\(|\bexec[lv]p?e?\s*\(", Severity::Critical, "process spawning"),
        pattern(r"\bfork\s*\(|\bvfork\s*\(", Severity::High, "process creation"),
        pattern(r"\bsocket\s*\(|sys/socket\.h", Severity::High, "network sockets"),
        pattern(r"\bsyscall\s*\(", Severity::Critical, "raw syscalls"),
        pattern(r"\bptrace\s*\(", Severity::Critical, "process tracing"),
    ]
});

static GO_PATTERNS: Lazy<Vec<BannedPattern>> = Lazy::new(|| {
    vec![
        pattern(r#""os/exec""#, Severity::Critical, "process spawning"),
        pattern(r#""net""#, Severity::High, "network sockets"),
        pattern(r#""syscall""#, Severity::Critical, "raw syscalls"),
        pattern(r#""unsafe""#, Severity::High, "unsafe memory access"),
    ]
});

static RUST_PATTERNS: Lazy<Vec<BannedPattern>> = Lazy::new(|| {
    vec![
        pattern(r"std\s*::\s*process\s*::\s*Command", Severity::Critical, "process spawning"),
        pattern(r"std\s*::\s*net\s*::", Severity::High, "network sockets"),
        pattern(r"\bunsafe\s*\{", Severity::High, "unsafe block"),
        pattern(r#"asm!\s*\("#, Severity::Critical, "inline assembly"),
    ]
});

static PHP_PATTERNS: Lazy<Vec<BannedPattern>> = Lazy::new(|| {
    vec![
        pattern(r"\b(shell_exec|exec|system|passthru|proc_open|popen)\s*\(", Severity::Critical, "process spawning"),
        pattern(r"\b(fsockopen|curl_init|stream_socket_client)\s*\(", Severity::High, "network access"),
        pattern(r"\beval\s*\(", Severity::High, "dynamic evaluation"),
        pattern(r"\b(fopen|file_get_contents)\s*\(\s*['\x22]/(etc|proc|sys|dev|root|home)", Severity::High, "filesystem access outside workspace"),
    ]
});

fn patterns_for(language: &str) -> &'static [BannedPattern] {
    match language {
        "javascript" => &JAVASCRIPT_PATTERNS,
        "python" => &PYTHON_PATTERNS,
        "java" => &JAVA_PATTERNS,
        "c" | "cpp" => &NATIVE_PATTERNS,
        "go" => &GO_PATTERNS,
        "rust" => &RUST_PATTERNS,
        "php" => &PHP_PATTERNS,
        _ => &[],
    }
}

/// Scan verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Clean,
    /// The submission is rejected; the string names the triggering rules.
    Blocked(String),
}

impl ScanOutcome {
    pub fn is_blocked(&self) -> bool {
        matches!(self, ScanOutcome::Blocked(_))
    }
}

/// Lexical scanner with optional operator-supplied extra patterns.
pub struct SecurityScanner {
    enabled: bool,
    /// Extra substrings treated as critical, from configuration.
    extra_critical: Vec<String>,
}

impl SecurityScanner {
    pub fn new(enabled: bool, extra_critical: Vec<String>) -> Self {
        Self {
            enabled,
            extra_critical,
        }
    }

    /// Scan `code` with the rules for `language`.
    pub fn scan(&self, language: &str, code: &str) -> ScanOutcome {
        if !self.enabled {
            return ScanOutcome::Clean;
        }

        let mut critical: Vec<&str> = Vec::new();
        let mut high: Vec<&str> = Vec::new();

        for entry in COMMON_PATTERNS.iter().chain(patterns_for(language)) {
            if entry.regex.is_match(code) {
                match entry.severity {
                    Severity::Critical => critical.push(entry.description),
                    Severity::High => high.push(entry.description),
                }
            }
        }

        for keyword in &self.extra_critical {
            if !keyword.is_empty() && code.contains(keyword.as_str()) {
                critical.push("operator-banned keyword");
            }
        }

        if !critical.is_empty() {
            return ScanOutcome::Blocked(critical.join(", "));
        }
        if high.len() >= HIGH_SEVERITY_THRESHOLD {
            return ScanOutcome::Blocked(high.join(", "));
        }
        ScanOutcome::Clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> SecurityScanner {
        SecurityScanner::new(true, Vec::new())
    }

    #[test]
    fn test_clean_hello_world() {
        assert_eq!(
            scanner().scan("python", r#"print("Hello World")"#),
            ScanOutcome::Clean
        );
        assert_eq!(
            scanner().scan("javascript", r#"console.log("Hello World")"#),
            ScanOutcome::Clean
        );
    }

    #[test]
    fn test_single_critical_blocks() {
        let outcome = scanner().scan("python", "import subprocess\nsubprocess.run(['ls'])");
        assert!(outcome.is_blocked());

        let outcome = scanner().scan("java", "Runtime.getRuntime().exec(\"ls\");");
        assert!(outcome.is_blocked());
    }

    #[test]
    fn test_single_high_passes() {
        // One high-severity hit alone is below the threshold.
        let outcome = scanner().scan("python", "import socket");
        assert_eq!(outcome, ScanOutcome::Clean);
    }

    #[test]
    fn test_three_highs_block() {
        let code = "import socket\neval('1')\n__import__('math')";
        assert!(scanner().scan("python", code).is_blocked());
    }

    #[test]
    fn test_disabled_scanner_passes_everything() {
        let scanner = SecurityScanner::new(false, Vec::new());
        assert_eq!(
            scanner.scan("python", "import subprocess"),
            ScanOutcome::Clean
        );
    }

    #[test]
    fn test_operator_keywords_are_critical() {
        let scanner = SecurityScanner::new(true, vec!["forbidden_call".to_string()]);
        assert!(scanner.scan("python", "forbidden_call()").is_blocked());
    }

    #[test]
    fn test_unknown_language_uses_common_rules_only() {
        assert_eq!(scanner().scan("cobol", "DISPLAY 'HI'."), ScanOutcome::Clean);
        assert!(scanner().scan("cobol", "cat /etc/passwd").is_blocked());
    }

    #[test]
    fn test_fork_bomb_blocked_everywhere() {
        assert!(scanner().scan("c", "while(1){fork();}").is_blocked());
    }
}
