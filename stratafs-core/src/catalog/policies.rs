//! Persistence for safety policies, overrides, and execution history.
//!
//! These rows live in dedicated tables that never appear in the filesystem
//! tree. List-valued policy fields are stored as JSON columns.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use stratafs_model::{
    ExecutionRecord, FsError, FsResult, OverrideAction, PolicyOverride, SafetyPolicy,
};

use crate::time::now_ms;

#[derive(Clone, Debug)]
pub struct PolicyStore {
    pool: SqlitePool,
}

impl PolicyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert `policy` as the active policy unless one already exists.
    pub async fn ensure_active(&self, policy: &SafetyPolicy) -> FsResult<SafetyPolicy> {
        if let Some(active) = self.active_policy().await? {
            return Ok(active);
        }
        self.insert_policy(policy, true).await
    }

    pub async fn insert_policy(
        &self,
        policy: &SafetyPolicy,
        active: bool,
    ) -> FsResult<SafetyPolicy> {
        if active {
            sqlx::query("UPDATE safety_policies SET active = 0")
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        let result = sqlx::query(
            "INSERT INTO safety_policies
                (name, allowlist_mode, blocked, allowed, dangerous_patterns,
                 strict, timeout_ms, active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&policy.name)
        .bind(policy.allowlist_mode)
        .bind(to_json(&policy.blocked)?)
        .bind(to_json(&policy.allowed)?)
        .bind(to_json(&policy.dangerous_patterns)?)
        .bind(policy.strict)
        .bind(policy.timeout_ms as i64)
        .bind(active)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let mut stored = policy.clone();
        stored.id = result.last_insert_rowid();
        stored.active = active;
        Ok(stored)
    }

    /// Make the named policy the single active one.
    pub async fn activate(&self, name: &str) -> FsResult<SafetyPolicy> {
        sqlx::query("UPDATE safety_policies SET active = 0")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        let updated = sqlx::query("UPDATE safety_policies SET active = 1 WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if updated.rows_affected() == 0 {
            return Err(FsError::invalid_argument(format!("no policy named {name}")));
        }
        self.active_policy()
            .await?
            .ok_or_else(|| FsError::io("activated policy not readable"))
    }

    pub async fn active_policy(&self) -> FsResult<Option<SafetyPolicy>> {
        let row = sqlx::query("SELECT * FROM safety_policies WHERE active = 1 LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(hydrate_policy).transpose()
    }

    // ------------------------------------------------------------------
    // Overrides
    // ------------------------------------------------------------------

    pub async fn add_override(
        &self,
        command: &str,
        is_pattern: bool,
        action: OverrideAction,
        reason: &str,
        expires_at: Option<i64>,
    ) -> FsResult<PolicyOverride> {
        let result = sqlx::query(
            "INSERT INTO safety_overrides (command, is_pattern, action, reason, expires_at, active)
             VALUES (?, ?, ?, ?, ?, 1)",
        )
        .bind(command)
        .bind(is_pattern)
        .bind(action.as_str())
        .bind(reason)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(PolicyOverride {
            id: result.last_insert_rowid(),
            command: command.to_string(),
            is_pattern,
            action,
            reason: reason.to_string(),
            expires_at,
            active: true,
        })
    }

    pub async fn deactivate_override(&self, id: i64) -> FsResult<()> {
        sqlx::query("UPDATE safety_overrides SET active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Overrides in effect at `now` (active and unexpired).
    pub async fn overrides_in_effect(&self, now: i64) -> FsResult<Vec<PolicyOverride>> {
        let rows = sqlx::query(
            "SELECT * FROM safety_overrides
             WHERE active = 1 AND (expires_at IS NULL OR expires_at > ?)
             ORDER BY id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(hydrate_override).collect()
    }

    // ------------------------------------------------------------------
    // Execution history
    // ------------------------------------------------------------------

    pub async fn log_execution(
        &self,
        command_text: &str,
        exit_code: i32,
        was_blocked: bool,
        block_reason: Option<&str>,
        cwd: &str,
        duration_ms: u64,
    ) -> FsResult<()> {
        sqlx::query(
            "INSERT INTO execution_history
                (command_text, exit_code, was_blocked, block_reason, cwd, duration_ms, executed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(command_text)
        .bind(exit_code)
        .bind(was_blocked)
        .bind(block_reason)
        .bind(cwd)
        .bind(duration_ms as i64)
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Most recent executions, newest first.
    pub async fn recent_executions(&self, limit: u32) -> FsResult<Vec<ExecutionRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM execution_history ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(hydrate_record).collect()
    }
}

fn db_err(err: sqlx::Error) -> FsError {
    FsError::io(format!("policy store database: {err}"))
}

fn to_json(list: &[String]) -> FsResult<String> {
    serde_json::to_string(list)
        .map_err(|e| FsError::io(format!("policy list serialization: {e}")))
}

fn from_json(raw: &str) -> FsResult<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|e| FsError::io(format!("corrupt policy list column: {e}")))
}

fn hydrate_policy(row: &SqliteRow) -> FsResult<SafetyPolicy> {
    Ok(SafetyPolicy {
        id: row.try_get("id").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        allowlist_mode: row.try_get("allowlist_mode").map_err(db_err)?,
        blocked: from_json(row.try_get::<&str, _>("blocked").map_err(db_err)?)?,
        allowed: from_json(row.try_get::<&str, _>("allowed").map_err(db_err)?)?,
        dangerous_patterns: from_json(
            row.try_get::<&str, _>("dangerous_patterns").map_err(db_err)?,
        )?,
        strict: row.try_get("strict").map_err(db_err)?,
        timeout_ms: row.try_get::<i64, _>("timeout_ms").map_err(db_err)? as u64,
        active: row.try_get("active").map_err(db_err)?,
    })
}

fn hydrate_override(row: &SqliteRow) -> FsResult<PolicyOverride> {
    let action_tag: String = row.try_get("action").map_err(db_err)?;
    let action = OverrideAction::from_str_tag(&action_tag)
        .ok_or_else(|| FsError::io(format!("corrupt override action: {action_tag}")))?;
    Ok(PolicyOverride {
        id: row.try_get("id").map_err(db_err)?,
        command: row.try_get("command").map_err(db_err)?,
        is_pattern: row.try_get("is_pattern").map_err(db_err)?,
        action,
        reason: row.try_get("reason").map_err(db_err)?,
        expires_at: row.try_get("expires_at").map_err(db_err)?,
        active: row.try_get("active").map_err(db_err)?,
    })
}

fn hydrate_record(row: &SqliteRow) -> FsResult<ExecutionRecord> {
    Ok(ExecutionRecord {
        id: row.try_get("id").map_err(db_err)?,
        command_text: row.try_get("command_text").map_err(db_err)?,
        exit_code: row.try_get("exit_code").map_err(db_err)?,
        was_blocked: row.try_get("was_blocked").map_err(db_err)?,
        block_reason: row.try_get("block_reason").map_err(db_err)?,
        cwd: row.try_get("cwd").map_err(db_err)?,
        duration_ms: row.try_get::<i64, _>("duration_ms").map_err(db_err)? as u64,
        executed_at: row.try_get("executed_at").map_err(db_err)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::tier::{TierLimits, TierRouter};

    async fn store() -> PolicyStore {
        let catalog = Catalog::open_in_memory(TierRouter::in_memory(TierLimits::default()))
            .await
            .unwrap();
        catalog.policies()
    }

    fn sample_policy() -> SafetyPolicy {
        SafetyPolicy {
            id: 0,
            name: "default".into(),
            allowlist_mode: false,
            blocked: vec!["curl".into(), "wget".into()],
            allowed: vec![],
            dangerous_patterns: vec![r"rm\s+-rf\s+/".into()],
            strict: false,
            timeout_ms: 30_000,
            active: false,
        }
    }

    #[tokio::test]
    async fn ensure_active_inserts_once() {
        let store = store().await;
        let first = store.ensure_active(&sample_policy()).await.unwrap();
        assert!(first.active);
        let second = store.ensure_active(&sample_policy()).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn exactly_one_policy_is_active() {
        let store = store().await;
        store.insert_policy(&sample_policy(), true).await.unwrap();
        let mut strict = sample_policy();
        strict.name = "strict".into();
        store.insert_policy(&strict, true).await.unwrap();

        let active = store.active_policy().await.unwrap().unwrap();
        assert_eq!(active.name, "strict");

        store.activate("default").await.unwrap();
        let active = store.active_policy().await.unwrap().unwrap();
        assert_eq!(active.name, "default");
    }

    #[tokio::test]
    async fn overrides_filter_expired_and_inactive() {
        let store = store().await;
        let keep = store
            .add_override("curl", false, OverrideAction::Allow, "session approval", None)
            .await
            .unwrap();
        store
            .add_override("wget", false, OverrideAction::Allow, "expired", Some(1))
            .await
            .unwrap();
        let gone = store
            .add_override("nc", false, OverrideAction::Block, "revoked", None)
            .await
            .unwrap();
        store.deactivate_override(gone.id).await.unwrap();

        let effective = store.overrides_in_effect(now_ms()).await.unwrap();
        assert_eq!(effective.len(), 1);
        assert_eq!(effective[0].id, keep.id);
    }

    #[tokio::test]
    async fn history_is_returned_newest_first() {
        let store = store().await;
        store
            .log_execution("echo one", 0, false, None, "/", 3)
            .await
            .unwrap();
        store
            .log_execution("curl http://x", 1, true, Some("blocked"), "/", 0)
            .await
            .unwrap();

        let recent = store.recent_executions(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].command_text, "curl http://x");
        assert!(recent[0].was_blocked);
        assert_eq!(recent[1].exit_code, 0);
    }
}
