//! Command execution: environment expansion, safety gating, pipelines,
//! redirections, timeouts, and history logging.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::{debug, warn};

use stratafs_model::{FsResult, SafetyPolicy};

use crate::catalog::PolicyStore;
use crate::fs::StrataFs;
use crate::shell::handlers::{self, HandlerResult, ShellCtx};
use crate::shell::parser::{self, ParsedCommand};
use crate::shell::safety::{SafetyAnalyzer, default_policy};
use crate::time::now_ms;

/// Executor tuning and environment defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Log every execution to the catalog history table.
    pub history_enabled: bool,
    pub home: String,
    pub user: String,
    pub path_var: String,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            history_enabled: true,
            home: "/home/user".to_string(),
            user: "user".to_string(),
            path_var: "/usr/local/bin:/usr/bin:/bin".to_string(),
        }
    }
}

/// Result of one executed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub command_text: String,
    pub cwd: String,
    pub duration_ms: u64,
}

/// A restricted shell whose file operations dispatch to the FS facade.
///
/// One executor tracks one working directory and environment; the safety
/// policy and overrides are re-read from the catalog on every execution so
/// policy changes take effect immediately.
#[derive(Debug)]
pub struct ShellExecutor {
    fs: StrataFs,
    policies: PolicyStore,
    config: ExecConfig,
    env: HashMap<String, String>,
    cwd: String,
}

impl ShellExecutor {
    pub async fn new(fs: StrataFs, config: ExecConfig) -> FsResult<Self> {
        let policies = fs.catalog().policies();
        policies.ensure_active(&default_policy()).await?;

        let mut env = HashMap::new();
        env.insert("PWD".to_string(), "/".to_string());
        env.insert("HOME".to_string(), config.home.clone());
        env.insert("USER".to_string(), config.user.clone());
        env.insert("PATH".to_string(), config.path_var.clone());

        Ok(Self {
            fs,
            policies,
            config,
            env,
            cwd: "/".to_string(),
        })
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.env.insert(name.into(), value.into());
    }

    pub fn policies(&self) -> &PolicyStore {
        &self.policies
    }

    /// Execute one command line.
    pub async fn execute(&mut self, line: &str) -> FsResult<ExecOutcome> {
        let started = Instant::now();
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(self.outcome(trimmed, 0, String::new(), String::new(), started));
        }

        let expanded = expand_vars(trimmed, &self.env);
        let parsed = match parser::parse(&expanded) {
            Ok(parsed) => parsed,
            Err(err) => {
                let outcome =
                    self.outcome(trimmed, 2, String::new(), format!("syntax error: {err}\n"), started);
                self.log(&outcome, false, None).await;
                return Ok(outcome);
            }
        };

        let policy = match self.policies.active_policy().await? {
            Some(policy) => policy,
            None => self.policies.ensure_active(&default_policy()).await?,
        };
        let overrides = self.policies.overrides_in_effect(now_ms()).await?;
        let analyzer = SafetyAnalyzer::new(policy.clone(), overrides)?;
        let verdict = analyzer.analyze(&parsed, &expanded);
        if !verdict.safe {
            let reason = verdict
                .reason
                .unwrap_or_else(|| "command blocked".to_string());
            debug!("refusing {trimmed:?}: {reason} (risk={})", verdict.risk);
            let outcome = self.outcome(
                trimmed,
                1,
                String::new(),
                format!("blocked: {reason}\n"),
                started,
            );
            self.log(&outcome, true, Some(reason.as_str())).await;
            return Ok(outcome);
        }

        let budget = Duration::from_millis(policy.timeout_ms.max(1));
        let run = self.run_pipeline(&parsed, &policy);
        let (exit_code, stdout, stderr) = match tokio::time::timeout(budget, run).await {
            Ok(result) => result,
            Err(_) => (
                124,
                String::new(),
                format!("command timed out after {}ms\n", policy.timeout_ms),
            ),
        };

        let outcome = self.outcome(trimmed, exit_code, stdout, stderr, started);
        self.log(&outcome, false, None).await;
        Ok(outcome)
    }

    async fn run_pipeline(
        &mut self,
        parsed: &ParsedCommand,
        policy: &SafetyPolicy,
    ) -> (i32, String, String) {
        let segments = parsed.segments();
        let mut stdout = String::new();
        let mut stderr_agg = String::new();
        let mut exit_code = 0;

        for (index, segment) in segments.iter().enumerate() {
            let stdin = match &segment.stdin_redirect {
                Some(source) => {
                    match handlers::read_redirect(&self.fs, &self.cwd, source).await {
                        Ok(contents) => contents,
                        Err(err) => return (1, String::new(), format!("{err}\n")),
                    }
                }
                None => std::mem::take(&mut stdout),
            };

            let mut ctx = ShellCtx {
                fs: &self.fs,
                cwd: &mut self.cwd,
                env: &mut self.env,
            };
            let HandlerResult {
                exit_code: code,
                stdout: seg_out,
                stderr: seg_err,
            } = handlers::run(&mut ctx, segment, stdin).await;
            exit_code = code;

            match &segment.stderr_redirect {
                Some(target) => {
                    if let Err(err) = handlers::write_redirect(
                        &self.fs,
                        &self.cwd,
                        target,
                        &seg_err,
                        segment.append_stderr,
                    )
                    .await
                    {
                        return (1, String::new(), format!("{err}\n"));
                    }
                }
                None => stderr_agg.push_str(&seg_err),
            }

            match &segment.stdout_redirect {
                Some(target) => {
                    if let Err(err) = handlers::write_redirect(
                        &self.fs,
                        &self.cwd,
                        target,
                        &seg_out,
                        segment.append_stdout,
                    )
                    .await
                    {
                        return (1, String::new(), format!("{err}\n"));
                    }
                    stdout = String::new();
                }
                None => stdout = seg_out,
            }

            if exit_code != 0 && policy.strict && index + 1 < segments.len() {
                debug!("strict pipeline stopped at segment {index} (exit {exit_code})");
                break;
            }
        }

        (exit_code, stdout, stderr_agg)
    }

    fn outcome(
        &self,
        command_text: &str,
        exit_code: i32,
        stdout: String,
        stderr: String,
        started: Instant,
    ) -> ExecOutcome {
        ExecOutcome {
            exit_code,
            stdout,
            stderr,
            command_text: command_text.to_string(),
            cwd: self.cwd.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn log(&self, outcome: &ExecOutcome, was_blocked: bool, reason: Option<&str>) {
        if !self.config.history_enabled {
            return;
        }
        if let Err(err) = self
            .policies
            .log_execution(
                &outcome.command_text,
                outcome.exit_code,
                was_blocked,
                reason,
                &outcome.cwd,
                outcome.duration_ms,
            )
            .await
        {
            warn!("execution history write failed: {err}");
        }
    }
}

/// Expand `$NAME` and `${NAME}` from the environment; unknown variables
/// expand to the empty string. Expansion happens on the raw command string
/// before parsing.
fn expand_vars(input: &str, env: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    while let Some((_, ch)) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }
        match chars.peek() {
            Some((_, '{')) => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for (_, inner) in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    name.push(inner);
                }
                if closed && is_var_name(&name) {
                    out.push_str(env.get(&name).map(String::as_str).unwrap_or(""));
                } else {
                    out.push_str("${");
                    out.push_str(&name);
                    if closed {
                        out.push('}');
                    }
                }
            }
            Some((_, c)) if c.is_ascii_alphabetic() || *c == '_' => {
                let mut name = String::new();
                while let Some((_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || *c == '_' {
                        name.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(env.get(&name).map(String::as_str).unwrap_or(""));
            }
            _ => out.push('$'),
        }
    }
    out
}

fn is_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StrataFs;
    use stratafs_model::OverrideAction;

    async fn executor() -> ShellExecutor {
        let fs = StrataFs::open_in_memory().await.unwrap();
        ShellExecutor::new(fs, ExecConfig::default()).await.unwrap()
    }

    #[test]
    fn variable_expansion_forms() {
        let mut env = HashMap::new();
        env.insert("HOME".to_string(), "/home/user".to_string());
        env.insert("NAME_2".to_string(), "x".to_string());

        assert_eq!(expand_vars("cd $HOME", &env), "cd /home/user");
        assert_eq!(expand_vars("cd ${HOME}/sub", &env), "cd /home/user/sub");
        assert_eq!(expand_vars("echo $NAME_2!", &env), "echo x!");
        assert_eq!(expand_vars("echo $MISSING.", &env), "echo .");
        assert_eq!(expand_vars("price $5", &env), "price $5");
        assert_eq!(expand_vars("lone $", &env), "lone $");
    }

    #[tokio::test]
    async fn echo_pipeline_to_cat() {
        let mut exec = executor().await;
        let outcome = exec.execute("echo hello | cat").await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout, "hello\n");
        assert!(outcome.stderr.is_empty());
    }

    #[tokio::test]
    async fn write_read_cycle_through_redirects() {
        let mut exec = executor().await;
        assert_eq!(exec.execute("echo one > /f.txt").await.unwrap().exit_code, 0);
        assert_eq!(exec.execute("echo two >> /f.txt").await.unwrap().exit_code, 0);
        let outcome = exec.execute("cat /f.txt").await.unwrap();
        assert_eq!(outcome.stdout, "one\ntwo\n");

        let outcome = exec.execute("wc -l < /f.txt").await.unwrap();
        assert_eq!(outcome.stdout.trim(), "2");
    }

    #[tokio::test]
    async fn blocked_command_exits_one_with_stderr() {
        let mut exec = executor().await;
        let outcome = exec.execute("curl http://x").await.unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert!(outcome.stderr.contains("blocked"));
        assert!(outcome.stdout.is_empty());

        let history = exec.policies().recent_executions(1).await.unwrap();
        assert!(history[0].was_blocked);
    }

    #[tokio::test]
    async fn allow_override_reaches_command_not_found() {
        let mut exec = executor().await;
        exec.policies()
            .add_override("curl", false, OverrideAction::Allow, "test", None)
            .await
            .unwrap();
        let outcome = exec.execute("curl http://x").await.unwrap();
        // No handler exists for curl, so it fails as unknown, not blocked.
        assert_eq!(outcome.exit_code, 127);
        assert!(outcome.stderr.contains("command not found"));
    }

    #[tokio::test]
    async fn cwd_tracks_cd_and_pwd() {
        let mut exec = executor().await;
        exec.execute("mkdir -p /work/sub").await.unwrap();
        assert_eq!(exec.execute("cd /work/sub").await.unwrap().exit_code, 0);
        assert_eq!(exec.cwd(), "/work/sub");
        assert_eq!(exec.execute("pwd").await.unwrap().stdout, "/work/sub\n");
        assert_eq!(exec.env().get("PWD").unwrap(), "/work/sub");

        // Relative paths resolve against the tracked cwd.
        exec.execute("echo data > rel.txt").await.unwrap();
        let outcome = exec.execute("cat /work/sub/rel.txt").await.unwrap();
        assert_eq!(outcome.stdout, "data\n");
    }

    #[tokio::test]
    async fn cd_without_argument_goes_home() {
        let mut exec = executor().await;
        exec.execute("mkdir -p /home/user").await.unwrap();
        exec.execute("cd /home/user").await.unwrap();
        exec.execute("cd /").await.unwrap();
        assert_eq!(exec.cwd(), "/");
        exec.execute("cd").await.unwrap();
        assert_eq!(exec.cwd(), "/home/user");
    }

    #[tokio::test]
    async fn empty_line_is_a_quiet_success() {
        let mut exec = executor().await;
        let outcome = exec.execute("   ").await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.stdout.is_empty());
    }

    #[tokio::test]
    async fn syntax_errors_exit_two() {
        let mut exec = executor().await;
        let outcome = exec.execute("echo 'open").await.unwrap();
        assert_eq!(outcome.exit_code, 2);
        assert!(outcome.stderr.contains("syntax error"));
    }

    #[tokio::test]
    async fn history_records_outcomes() {
        let mut exec = executor().await;
        exec.execute("echo logged").await.unwrap();
        let history = exec.policies().recent_executions(5).await.unwrap();
        assert_eq!(history[0].command_text, "echo logged");
        assert_eq!(history[0].exit_code, 0);
        assert!(!history[0].was_blocked);
    }

    #[tokio::test]
    async fn strict_policy_stops_failing_pipelines() {
        let fs = StrataFs::open_in_memory().await.unwrap();
        let policies = fs.catalog().policies();
        let mut strict = default_policy();
        strict.name = "strict".into();
        strict.strict = true;
        policies.insert_policy(&strict, true).await.unwrap();

        let mut exec = ShellExecutor::new(fs, ExecConfig::default()).await.unwrap();
        let outcome = exec.execute("false | echo should-not-run").await.unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert!(outcome.stdout.is_empty());
    }

    #[tokio::test]
    async fn timeout_comes_from_the_policy() {
        let fs = StrataFs::open_in_memory().await.unwrap();
        let policies = fs.catalog().policies();
        let mut quick = default_policy();
        quick.name = "quick".into();
        quick.timeout_ms = 5_000;
        policies.insert_policy(&quick, true).await.unwrap();

        let mut exec = ShellExecutor::new(fs, ExecConfig::default()).await.unwrap();
        let outcome = exec.execute("echo fast").await.unwrap();
        assert_eq!(outcome.exit_code, 0);
    }
}
