//! Persistence for user-defined sparse presets.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use stratafs_model::{FsError, FsResult};

use crate::time::now_ms;

/// One named include/exclude pattern set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetRecord {
    pub name: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct PresetStore {
    pool: SqlitePool,
}

impl PresetStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a named preset.
    pub async fn save(&self, preset: &PresetRecord) -> FsResult<()> {
        sqlx::query(
            "INSERT INTO sparse_presets (name, include, exclude, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET include = excluded.include,
                                             exclude = excluded.exclude",
        )
        .bind(&preset.name)
        .bind(to_json(&preset.include)?)
        .bind(to_json(&preset.exclude)?)
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn load(&self, name: &str) -> FsResult<Option<PresetRecord>> {
        let row = sqlx::query("SELECT * FROM sparse_presets WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(hydrate_preset).transpose()
    }

    pub async fn list(&self) -> FsResult<Vec<PresetRecord>> {
        let rows = sqlx::query("SELECT * FROM sparse_presets ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(hydrate_preset).collect()
    }

    pub async fn delete(&self, name: &str) -> FsResult<bool> {
        let result = sqlx::query("DELETE FROM sparse_presets WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}

fn db_err(err: sqlx::Error) -> FsError {
    FsError::io(format!("preset store database: {err}"))
}

fn to_json(list: &[String]) -> FsResult<String> {
    serde_json::to_string(list)
        .map_err(|e| FsError::io(format!("preset list serialization: {e}")))
}

fn hydrate_preset(row: &SqliteRow) -> FsResult<PresetRecord> {
    let include: &str = row.try_get("include").map_err(db_err)?;
    let exclude: &str = row.try_get("exclude").map_err(db_err)?;
    Ok(PresetRecord {
        name: row.try_get("name").map_err(db_err)?,
        include: serde_json::from_str(include)
            .map_err(|e| FsError::io(format!("corrupt preset include column: {e}")))?,
        exclude: serde_json::from_str(exclude)
            .map_err(|e| FsError::io(format!("corrupt preset exclude column: {e}")))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::tier::{TierLimits, TierRouter};

    async fn store() -> PresetStore {
        let catalog = Catalog::open_in_memory(TierRouter::in_memory(TierLimits::default()))
            .await
            .unwrap();
        catalog.presets()
    }

    #[tokio::test]
    async fn save_load_and_replace() {
        let store = store().await;
        let preset = PresetRecord {
            name: "frontend".into(),
            include: vec!["src/**".into(), "public/**".into()],
            exclude: vec!["**/node_modules/**".into()],
        };
        store.save(&preset).await.unwrap();
        assert_eq!(store.load("frontend").await.unwrap(), Some(preset.clone()));

        let replaced = PresetRecord {
            include: vec!["app/**".into()],
            ..preset
        };
        store.save(&replaced).await.unwrap();
        assert_eq!(store.load("frontend").await.unwrap(), Some(replaced));
        assert_eq!(store.list().await.unwrap().len(), 1);

        assert!(store.delete("frontend").await.unwrap());
        assert!(!store.delete("frontend").await.unwrap());
        assert_eq!(store.load("frontend").await.unwrap(), None);
    }
}
