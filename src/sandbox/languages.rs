//! Supported language table.
//!
//! Each entry names the container image, file layout, and commands for one
//! language, plus its default deadline and memory cap. Commands containing
//! `{class}` are rewritten with the Java entry-point class extracted from
//! the source.

use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Per-language execution configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageConfig {
    /// Stable language tag used on the wire.
    pub tag: &'static str,
    /// Container image the phases run in.
    pub image: &'static str,
    /// Source file extension, without the dot.
    pub extension: &'static str,
    /// Source file name, `{class}` for Java.
    pub source_file: &'static str,
    /// Compile command, if the language has a compile phase.
    pub compile_command: Option<&'static str>,
    /// Run command.
    pub run_command: &'static str,
    pub default_timeout: Duration,
    pub default_memory_bytes: u64,
}

static LANGUAGES: &[LanguageConfig] = &[
    LanguageConfig {
        tag: "javascript",
        image: "node:18-alpine",
        extension: "js",
        source_file: "main.js",
        compile_command: None,
        run_command: "node main.js",
        default_timeout: Duration::from_secs(30),
        default_memory_bytes: 256 * MIB,
    },
    LanguageConfig {
        tag: "python",
        image: "python:3.11-alpine",
        extension: "py",
        source_file: "main.py",
        compile_command: None,
        run_command: "python main.py",
        default_timeout: Duration::from_secs(30),
        default_memory_bytes: 256 * MIB,
    },
    LanguageConfig {
        tag: "java",
        image: "eclipse-temurin:17-jdk",
        extension: "java",
        source_file: "{class}.java",
        compile_command: Some("javac {class}.java"),
        run_command: "java {class}",
        default_timeout: Duration::from_secs(30),
        default_memory_bytes: 512 * MIB,
    },
    LanguageConfig {
        tag: "cpp",
        image: "gcc:11-alpine",
        extension: "cpp",
        source_file: "main.cpp",
        compile_command: Some("g++ -std=c++17 -O2 -o main main.cpp"),
        run_command: "./main",
        default_timeout: Duration::from_secs(45),
        default_memory_bytes: 256 * MIB,
    },
    LanguageConfig {
        tag: "c",
        image: "gcc:11-alpine",
        extension: "c",
        source_file: "main.c",
        compile_command: Some("gcc -O2 -o main main.c"),
        run_command: "./main",
        default_timeout: Duration::from_secs(45),
        default_memory_bytes: 256 * MIB,
    },
    LanguageConfig {
        tag: "go",
        image: "golang:1.21-alpine",
        extension: "go",
        source_file: "main.go",
        compile_command: Some("go build -o main main.go"),
        run_command: "./main",
        default_timeout: Duration::from_secs(45),
        default_memory_bytes: 256 * MIB,
    },
    LanguageConfig {
        tag: "rust",
        image: "rust:1.75-alpine",
        extension: "rs",
        source_file: "main.rs",
        compile_command: Some("rustc -O -o main main.rs"),
        run_command: "./main",
        default_timeout: Duration::from_secs(45),
        default_memory_bytes: 256 * MIB,
    },
    LanguageConfig {
        tag: "php",
        image: "php:8-alpine",
        extension: "php",
        source_file: "main.php",
        compile_command: None,
        run_command: "php main.php",
        default_timeout: Duration::from_secs(30),
        default_memory_bytes: 128 * MIB,
    },
];

/// Look up a language by tag.
pub fn language_config(tag: &str) -> Option<&'static LanguageConfig> {
    LANGUAGES.iter().find(|l| l.tag == tag)
}

/// The full supported set.
pub fn supported_languages() -> &'static [LanguageConfig] {
    LANGUAGES
}

/// Whether `tag` names a supported language.
pub fn is_supported(tag: &str) -> bool {
    language_config(tag).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_eight_languages_present() {
        let tags: Vec<&str> = supported_languages().iter().map(|l| l.tag).collect();
        assert_eq!(
            tags,
            vec!["javascript", "python", "java", "cpp", "c", "go", "rust", "php"]
        );
    }

    #[test]
    fn test_compiled_languages_have_compile_commands() {
        for tag in ["java", "cpp", "c", "go", "rust"] {
            assert!(language_config(tag).unwrap().compile_command.is_some());
        }
        for tag in ["javascript", "python", "php"] {
            assert!(language_config(tag).unwrap().compile_command.is_none());
        }
    }

    #[test]
    fn test_defaults_match_policy() {
        let java = language_config("java").unwrap();
        assert_eq!(java.default_memory_bytes, 512 * MIB);
        assert_eq!(java.default_timeout, Duration::from_secs(30));

        let cpp = language_config("cpp").unwrap();
        assert_eq!(cpp.default_timeout, Duration::from_secs(45));

        let php = language_config("php").unwrap();
        assert_eq!(php.default_memory_bytes, 128 * MIB);
    }

    #[test]
    fn test_unknown_tag() {
        assert!(language_config("cobol").is_none());
        assert!(!is_supported("COBOL"));
    }
}
