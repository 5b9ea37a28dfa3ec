//! Per-execution scratch workspaces.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use super::languages::LanguageConfig;

/// Java entry point used when no public class is declared.
pub const DEFAULT_JAVA_CLASS: &str = "Main";

/// Name of the stdin file inside the workspace, present only when the
/// request carried input.
pub const INPUT_FILE: &str = "input.txt";

static JAVA_CLASS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"public\s+class\s+([A-Za-z_][A-Za-z0-9_]*)").expect("static pattern compiles")
});

/// Extract the Java entry-point class name from the source.
pub fn java_class_name(code: &str) -> &str {
    JAVA_CLASS_RE
        .captures(code)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(DEFAULT_JAVA_CLASS)
}

/// Substitute the `{class}` placeholder in a file name or command.
pub fn expand_class(template: &str, class: &str) -> String {
    template.replace("{class}", class)
}

/// A scratch directory exclusively owned by one execution. Dropping the
/// workspace removes the directory; [`Workspace::cleanup`] does the same
/// eagerly on the normal path.
pub struct Workspace {
    dir: PathBuf,
    /// Source file name as written, with any `{class}` expanded.
    source_file: String,
    has_stdin: bool,
}

impl Workspace {
    /// Create the directory and write the source (and stdin, if any).
    pub async fn materialize(
        scratch_root: &Path,
        execution_id: Uuid,
        language: &LanguageConfig,
        code: &str,
        stdin: &str,
    ) -> std::io::Result<Self> {
        let dir = scratch_root.join(format!("exec-{execution_id}"));
        tokio::fs::create_dir_all(&dir).await?;

        let class = java_class_name(code);
        let source_file = expand_class(language.source_file, class);
        tokio::fs::write(dir.join(&source_file), code).await?;

        let has_stdin = !stdin.is_empty();
        if has_stdin {
            tokio::fs::write(dir.join(INPUT_FILE), stdin).await?;
        }

        Ok(Self {
            dir,
            source_file,
            has_stdin,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn has_stdin(&self) -> bool {
        self.has_stdin
    }

    /// Remove the scratch directory.
    pub async fn cleanup(self) {
        let dir = self.dir.clone();
        // Consume self so Drop does not run a second removal.
        std::mem::forget(self);
        if let Err(err) = tokio::fs::remove_dir_all(&dir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(dir = %dir.display(), error = %err, "scratch cleanup failed");
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        // Last-resort removal for early-return and panic paths.
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::languages::language_config;

    #[test]
    fn test_java_class_extraction() {
        let code = "public class Solution { public static void main(String[] a) {} }";
        assert_eq!(java_class_name(code), "Solution");
    }

    #[test]
    fn test_java_class_default() {
        assert_eq!(java_class_name("class Hidden {}"), DEFAULT_JAVA_CLASS);
        assert_eq!(java_class_name(""), DEFAULT_JAVA_CLASS);
    }

    #[test]
    fn test_expand_class() {
        assert_eq!(expand_class("{class}.java", "Solution"), "Solution.java");
        assert_eq!(expand_class("java {class}", "Main"), "java Main");
        assert_eq!(expand_class("main.py", "Main"), "main.py");
    }

    #[tokio::test]
    async fn test_materialize_and_cleanup() {
        let root = std::env::temp_dir().join("codecollab-ws-test");
        let id = Uuid::new_v4();
        let lang = language_config("python").unwrap();

        let ws = Workspace::materialize(&root, id, lang, "print(1)", "42\n")
            .await
            .unwrap();
        let dir = ws.dir().to_path_buf();
        assert!(dir.join("main.py").exists());
        assert!(dir.join(INPUT_FILE).exists());
        assert!(ws.has_stdin());

        ws.cleanup().await;
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_no_input_file_for_empty_stdin() {
        let root = std::env::temp_dir().join("codecollab-ws-test");
        let lang = language_config("javascript").unwrap();
        let ws = Workspace::materialize(&root, Uuid::new_v4(), lang, "1+1", "")
            .await
            .unwrap();
        assert!(!ws.dir().join(INPUT_FILE).exists());
        assert!(!ws.has_stdin());
        ws.cleanup().await;
    }

    #[tokio::test]
    async fn test_java_source_uses_class_name() {
        let root = std::env::temp_dir().join("codecollab-ws-test");
        let lang = language_config("java").unwrap();
        let code = "public class Greeter {}";
        let ws = Workspace::materialize(&root, Uuid::new_v4(), lang, code, "")
            .await
            .unwrap();
        assert_eq!(ws.source_file(), "Greeter.java");
        assert!(ws.dir().join("Greeter.java").exists());
        ws.cleanup().await;
    }

    #[tokio::test]
    async fn test_drop_removes_directory() {
        let root = std::env::temp_dir().join("codecollab-ws-test");
        let lang = language_config("python").unwrap();
        let ws = Workspace::materialize(&root, Uuid::new_v4(), lang, "print(1)", "")
            .await
            .unwrap();
        let dir = ws.dir().to_path_buf();
        drop(ws);
        assert!(!dir.exists());
    }
}
