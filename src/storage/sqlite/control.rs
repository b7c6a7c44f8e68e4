//! Relational control plane: catalogue, pools and flavors.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::storage::{
    CatalogueController, CatalogueEntry, Flavor, FlavorsController, Page, Pool, PoolPatch,
    PoolsController, Result, StorageError,
};

pub(super) struct SqliteCatalogueController {
    pub pool: SqlitePool,
}

#[async_trait]
impl CatalogueController for SqliteCatalogueController {
    async fn list(&self, project: &str) -> Result<Vec<CatalogueEntry>> {
        let rows = sqlx::query(
            "SELECT project, queue, pool FROM catalogue WHERE project = ? ORDER BY queue",
        )
        .bind(project)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(CatalogueEntry {
                    project: row.try_get("project")?,
                    queue: row.try_get("queue")?,
                    pool: row.try_get("pool")?,
                })
            })
            .collect()
    }

    async fn get(&self, project: &str, queue: &str) -> Result<CatalogueEntry> {
        let row = sqlx::query("SELECT pool FROM catalogue WHERE project = ? AND queue = ?")
            .bind(project)
            .bind(queue)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::QueueNotMapped {
                project: project.to_string(),
                queue: queue.to_string(),
            })?;

        Ok(CatalogueEntry {
            project: project.to_string(),
            queue: queue.to_string(),
            pool: row.try_get("pool")?,
        })
    }

    async fn exists(&self, project: &str, queue: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM catalogue WHERE project = ? AND queue = ?")
            .bind(project)
            .bind(queue)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert(&self, project: &str, queue: &str, pool: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO catalogue (project, queue, pool) VALUES (?, ?, ?)
             ON CONFLICT (project, queue) DO UPDATE SET pool = excluded.pool",
        )
        .bind(project)
        .bind(queue)
        .bind(pool)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, project: &str, queue: &str, pool: &str) -> Result<()> {
        let result = sqlx::query("UPDATE catalogue SET pool = ? WHERE project = ? AND queue = ?")
            .bind(pool)
            .bind(project)
            .bind(queue)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::QueueNotMapped {
                project: project.to_string(),
                queue: queue.to_string(),
            });
        }
        Ok(())
    }

    async fn delete(&self, project: &str, queue: &str) -> Result<()> {
        sqlx::query("DELETE FROM catalogue WHERE project = ? AND queue = ?")
            .bind(project)
            .bind(queue)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub(super) struct SqlitePoolsController {
    pub pool: SqlitePool,
}

fn row_to_pool(row: &SqliteRow) -> Result<Pool> {
    let options: String = row.try_get("options")?;
    Ok(Pool {
        name: row.try_get("name")?,
        uri: row.try_get("uri")?,
        weight: row.try_get("weight")?,
        flavor: row.try_get("flavor")?,
        options: serde_json::from_str(&options)?,
    })
}

#[async_trait]
impl PoolsController for SqlitePoolsController {
    async fn list(&self, marker: Option<&str>, limit: usize) -> Result<Page<Pool>> {
        let rows = sqlx::query("SELECT * FROM pools WHERE name > ? ORDER BY name LIMIT ?")
            .bind(marker.unwrap_or(""))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(row_to_pool(row)?);
        }

        let marker = if items.len() == limit {
            items.last().map(|pool| pool.name.clone())
        } else {
            None
        };

        Ok(Page { items, marker })
    }

    async fn get(&self, name: &str) -> Result<Pool> {
        let row = sqlx::query("SELECT * FROM pools WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref()
            .map(row_to_pool)
            .transpose()?
            .ok_or_else(|| StorageError::PoolDoesNotExist {
                name: name.to_string(),
            })
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM pools WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn create(&self, pool: Pool) -> Result<()> {
        let taken = sqlx::query("SELECT 1 FROM pools WHERE uri = ? AND name != ?")
            .bind(&pool.uri)
            .bind(&pool.name)
            .fetch_optional(&self.pool)
            .await?;
        if taken.is_some() {
            return Err(StorageError::PoolAlreadyExists);
        }

        sqlx::query(
            "INSERT INTO pools (name, uri, weight, flavor, options) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (name) DO UPDATE
                SET uri = excluded.uri, weight = excluded.weight,
                    flavor = excluded.flavor, options = excluded.options",
        )
        .bind(&pool.name)
        .bind(&pool.uri)
        .bind(pool.weight)
        .bind(&pool.flavor)
        .bind(pool.options.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, name: &str, patch: PoolPatch) -> Result<()> {
        let mut pool = self.get(name).await?;

        if let Some(uri) = &patch.uri {
            let taken = sqlx::query("SELECT 1 FROM pools WHERE uri = ? AND name != ?")
                .bind(uri)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
            if taken.is_some() {
                return Err(StorageError::PoolAlreadyExists);
            }
            pool.uri = uri.clone();
        }
        if let Some(weight) = patch.weight {
            pool.weight = weight;
        }
        if let Some(flavor) = patch.flavor {
            pool.flavor = flavor;
        }
        if let Some(options) = patch.options {
            pool.options = options;
        }

        sqlx::query(
            "UPDATE pools SET uri = ?, weight = ?, flavor = ?, options = ? WHERE name = ?",
        )
        .bind(&pool.uri)
        .bind(pool.weight)
        .bind(&pool.flavor)
        .bind(pool.options.to_string())
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let row = sqlx::query(
            "SELECT p.flavor FROM pools p
              WHERE p.name = ? AND p.flavor IS NOT NULL
                AND EXISTS (SELECT 1 FROM flavors f WHERE f.name = p.flavor)",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Err(StorageError::PoolInUseByFlavor {
                pool: name.to_string(),
                flavor: row.try_get("flavor")?,
            });
        }

        sqlx::query("DELETE FROM pools WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_by_flavor(&self, flavor: Option<&str>) -> Result<Vec<Pool>> {
        let rows = match flavor {
            Some(flavor) => {
                sqlx::query("SELECT * FROM pools WHERE flavor = ? ORDER BY name")
                    .bind(flavor)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM pools WHERE flavor IS NULL ORDER BY name")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(row_to_pool).collect()
    }
}

pub(super) struct SqliteFlavorsController {
    pub pool: SqlitePool,
}

#[async_trait]
impl FlavorsController for SqliteFlavorsController {
    async fn list(
        &self,
        project: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Page<Flavor>> {
        let rows = sqlx::query(
            "SELECT * FROM flavors WHERE project = ? AND name > ? ORDER BY name LIMIT ?",
        )
        .bind(project)
        .bind(marker.unwrap_or(""))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let capabilities: String = row.try_get("capabilities")?;
            items.push(Flavor {
                name: row.try_get("name")?,
                project: row.try_get("project")?,
                capabilities: serde_json::from_str(&capabilities)?,
            });
        }

        let marker = if items.len() == limit {
            items.last().map(|flavor| flavor.name.clone())
        } else {
            None
        };

        Ok(Page { items, marker })
    }

    async fn get(&self, project: &str, name: &str) -> Result<Flavor> {
        let row = sqlx::query("SELECT * FROM flavors WHERE project = ? AND name = ?")
            .bind(project)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::FlavorDoesNotExist {
                name: name.to_string(),
            })?;

        let capabilities: String = row.try_get("capabilities")?;
        Ok(Flavor {
            name: row.try_get("name")?,
            project: row.try_get("project")?,
            capabilities: serde_json::from_str(&capabilities)?,
        })
    }

    async fn exists(&self, project: &str, name: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM flavors WHERE project = ? AND name = ?")
            .bind(project)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn create(&self, flavor: Flavor) -> Result<()> {
        sqlx::query(
            "INSERT INTO flavors (project, name, capabilities) VALUES (?, ?, ?)
             ON CONFLICT (project, name) DO UPDATE SET capabilities = excluded.capabilities",
        )
        .bind(&flavor.project)
        .bind(&flavor.name)
        .bind(flavor.capabilities.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, project: &str, name: &str, capabilities: Value) -> Result<()> {
        let result =
            sqlx::query("UPDATE flavors SET capabilities = ? WHERE project = ? AND name = ?")
                .bind(capabilities.to_string())
                .bind(project)
                .bind(name)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::FlavorDoesNotExist {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn delete(&self, project: &str, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM flavors WHERE project = ? AND name = ?")
            .bind(project)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
