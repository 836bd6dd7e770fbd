use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::TranslatorConfig;

/// How a translation attempt ended. Every variant maps onto the text stored
/// as the job's result.
#[derive(Debug, Clone, PartialEq)]
pub enum TranslationOutcome {
    Translated(String),
    /// The translator wrote nothing to stdout but complained on stderr.
    Diagnostics(String),
    StartFailed(String),
    TimedOut,
}

impl TranslationOutcome {
    pub fn from_output(stdout: String, stderr: String) -> Self {
        if stdout.trim().is_empty() && !stderr.trim().is_empty() {
            TranslationOutcome::Diagnostics(stderr)
        } else {
            TranslationOutcome::Translated(stdout)
        }
    }

    pub fn result_text(&self) -> String {
        match self {
            TranslationOutcome::Translated(text) => text.clone(),
            TranslationOutcome::Diagnostics(stderr) => {
                format!("{}{}", common::TRANSLATE_ERROR_PREFIX, stderr)
            }
            TranslationOutcome::StartFailed(_) => common::START_FAILURE_RESULT.to_string(),
            TranslationOutcome::TimedOut => common::TIMEOUT_RESULT.to_string(),
        }
    }
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, src_lang: &str, tgt_lang: &str) -> TranslationOutcome;
}

/// Runs an external translator: payload on stdin, translation on stdout,
/// diagnostics on stderr.
#[derive(Debug, Clone)]
pub struct CommandTranslator {
    program: String,
    args: Vec<String>,
    search_paths: Vec<PathBuf>,
}

impl CommandTranslator {
    pub fn new(config: &TranslatorConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            search_paths: config.search_paths.clone(),
        }
    }

    pub fn resolve(&self) -> Option<PathBuf> {
        resolve_program(&self.program, &self.search_paths, std::env::var_os("PATH"))
    }

    fn build_args(&self, src_lang: &str, tgt_lang: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace("{src}", src_lang).replace("{tgt}", tgt_lang))
            .collect()
    }
}

#[async_trait]
impl Translator for CommandTranslator {
    async fn translate(&self, text: &str, src_lang: &str, tgt_lang: &str) -> TranslationOutcome {
        let Some(program) = self.resolve() else {
            log::error!("Translator {:?} not found in search paths or PATH", self.program);
            return TranslationOutcome::StartFailed(format!("{} not found", self.program));
        };

        let mut cmd = Command::new(&program);
        cmd.args(self.build_args(src_lang, tgt_lang));
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                log::error!("Failed to spawn {}: {}", program.display(), e);
                return TranslationOutcome::StartFailed(e.to_string());
            }
        };

        // Feed stdin from its own task so a chatty translator cannot block on
        // a full stdout pipe while we are still writing.
        if let Some(mut stdin) = child.stdin.take() {
            let input = text.as_bytes().to_vec();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    log::debug!("Translator closed stdin early: {}", e);
                }
            });
        }

        match child.wait_with_output().await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                if !output.status.success() {
                    log::warn!("Translator exited with {}", output.status);
                }
                if !stderr.trim().is_empty() {
                    log::info!(target: "job_output", "{} {} -> {}\n{}", program.display(), src_lang, tgt_lang, stderr);
                }
                TranslationOutcome::from_output(stdout, stderr)
            }
            Err(e) => {
                log::error!("Failed to collect translator output: {}", e);
                TranslationOutcome::Diagnostics(format!("failed to collect translator output: {}", e))
            }
        }
    }
}

/// Locate `program`. Names containing a slash are used as given; bare names
/// are looked up in `search_paths` and then in `path_env`.
pub fn resolve_program(
    program: &str,
    search_paths: &[PathBuf],
    path_env: Option<OsString>,
) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }

    let from_env: Vec<PathBuf> = path_env
        .map(|p| std::env::split_paths(&p).collect())
        .unwrap_or_default();

    search_paths
        .iter()
        .chain(from_env.iter())
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn translator(program: &str, args: &[&str]) -> CommandTranslator {
        CommandTranslator::new(&TranslatorConfig {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            search_paths: Vec::new(),
        })
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(
            TranslationOutcome::from_output("你好\n".into(), "warning\n".into()),
            TranslationOutcome::Translated("你好\n".into())
        );
        assert_eq!(
            TranslationOutcome::from_output("  \n".into(), "network down\n".into()),
            TranslationOutcome::Diagnostics("network down\n".into())
        );
        assert_eq!(
            TranslationOutcome::from_output(String::new(), String::new()),
            TranslationOutcome::Translated(String::new())
        );
    }

    #[test]
    fn test_result_text() {
        assert_eq!(
            TranslationOutcome::Diagnostics("boom".into()).result_text(),
            "[Translate Error]\nboom"
        );
        assert_eq!(
            TranslationOutcome::StartFailed("nope".into()).result_text(),
            "[Error] Unable to start translation process."
        );
    }

    #[test]
    fn test_build_args_substitutes_languages() {
        let t = CommandTranslator::new(&TranslatorConfig::default());
        assert_eq!(t.build_args("en", "zh-tw"), vec!["-b", "-no-auto", "-s", "en", "-t", "zh-tw"]);
    }

    #[test]
    fn test_resolve_prefers_search_paths() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let expected = write_script(first.path(), "trans", "cat");
        write_script(second.path(), "trans", "cat");

        let found = resolve_program(
            "trans",
            &[first.path().to_path_buf()],
            Some(second.path().as_os_str().to_os_string()),
        );
        assert_eq!(found, Some(expected));
    }

    #[test]
    fn test_resolve_skips_non_executable() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("trans"), "not a program").unwrap();
        assert_eq!(resolve_program("trans", &[dir.path().to_path_buf()], None), None);
        assert_eq!(resolve_program("/definitely/not/here", &[], None), None);
    }

    #[tokio::test]
    async fn test_translates_via_stdin_and_stdout() {
        let outcome = translator("cat", &[]).translate("Hello", "en", "zh-tw").await;
        assert_eq!(outcome, TranslationOutcome::Translated("Hello".into()));
    }

    #[tokio::test]
    async fn test_language_codes_reach_the_command() {
        let t = translator("sh", &["-c", "cat >/dev/null; echo \"$1:$2\"", "sh", "{src}", "{tgt}"]);

        let outcome = t.translate("Hello", "en", "zh-tw").await;
        assert_eq!(outcome, TranslationOutcome::Translated("en:zh-tw\n".into()));
    }

    #[tokio::test]
    async fn test_stderr_only_becomes_diagnostics() {
        let t = translator("sh", &["-c", "cat >/dev/null; echo 'no engine' >&2; exit 1"]);

        let outcome = t.translate("Hello", "en", "ja").await;
        assert_eq!(outcome, TranslationOutcome::Diagnostics("no engine\n".into()));
    }

    #[tokio::test]
    async fn test_missing_program_is_start_failure() {
        let t = translator("/nonexistent/trans", &[]);
        let outcome = t.translate("Hello", "en", "ja").await;
        assert!(matches!(outcome, TranslationOutcome::StartFailed(_)));
    }
}
