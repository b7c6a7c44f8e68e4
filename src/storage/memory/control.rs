//! In-process control plane: catalogue, pools and flavors.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::storage::{
    CatalogueController, CatalogueEntry, Flavor, FlavorsController, Page, Pool, PoolPatch,
    PoolsController, Result, StorageError,
};

#[derive(Debug, Default)]
pub struct MemoryControlStore {
    catalogue: DashMap<(String, String), String>,
    pools: DashMap<String, Pool>,
    flavors: DashMap<(String, String), Flavor>,
}

pub(super) struct MemoryCatalogueController {
    pub store: Arc<MemoryControlStore>,
}

#[async_trait]
impl CatalogueController for MemoryCatalogueController {
    async fn list(&self, project: &str) -> Result<Vec<CatalogueEntry>> {
        let mut entries: Vec<CatalogueEntry> = self
            .store
            .catalogue
            .iter()
            .filter(|entry| entry.key().0 == project)
            .map(|entry| CatalogueEntry {
                project: entry.key().0.clone(),
                queue: entry.key().1.clone(),
                pool: entry.value().clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.queue.cmp(&b.queue));
        Ok(entries)
    }

    async fn get(&self, project: &str, queue: &str) -> Result<CatalogueEntry> {
        self.store
            .catalogue
            .get(&(project.to_string(), queue.to_string()))
            .map(|pool| CatalogueEntry {
                project: project.to_string(),
                queue: queue.to_string(),
                pool: pool.clone(),
            })
            .ok_or_else(|| StorageError::QueueNotMapped {
                project: project.to_string(),
                queue: queue.to_string(),
            })
    }

    async fn exists(&self, project: &str, queue: &str) -> Result<bool> {
        Ok(self
            .store
            .catalogue
            .contains_key(&(project.to_string(), queue.to_string())))
    }

    async fn insert(&self, project: &str, queue: &str, pool: &str) -> Result<()> {
        self.store
            .catalogue
            .insert((project.to_string(), queue.to_string()), pool.to_string());
        Ok(())
    }

    async fn update(&self, project: &str, queue: &str, pool: &str) -> Result<()> {
        let key = (project.to_string(), queue.to_string());
        match self.store.catalogue.get_mut(&key) {
            Some(mut entry) => {
                *entry = pool.to_string();
                Ok(())
            }
            None => Err(StorageError::QueueNotMapped {
                project: project.to_string(),
                queue: queue.to_string(),
            }),
        }
    }

    async fn delete(&self, project: &str, queue: &str) -> Result<()> {
        self.store
            .catalogue
            .remove(&(project.to_string(), queue.to_string()));
        Ok(())
    }
}

pub(super) struct MemoryPoolsController {
    pub store: Arc<MemoryControlStore>,
}

#[async_trait]
impl PoolsController for MemoryPoolsController {
    async fn list(&self, marker: Option<&str>, limit: usize) -> Result<Page<Pool>> {
        let mut names: Vec<String> = self
            .store
            .pools
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();

        let mut items = Vec::new();
        for name in names {
            if let Some(marker) = marker {
                if name.as_str() <= marker {
                    continue;
                }
            }
            if let Some(pool) = self.store.pools.get(&name) {
                items.push(pool.clone());
            }
            if items.len() == limit {
                break;
            }
        }

        let marker = if items.len() == limit {
            items.last().map(|pool| pool.name.clone())
        } else {
            None
        };

        Ok(Page { items, marker })
    }

    async fn get(&self, name: &str) -> Result<Pool> {
        self.store
            .pools
            .get(name)
            .map(|pool| pool.clone())
            .ok_or_else(|| StorageError::PoolDoesNotExist {
                name: name.to_string(),
            })
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.store.pools.contains_key(name))
    }

    async fn create(&self, pool: Pool) -> Result<()> {
        let uri_taken = self
            .store
            .pools
            .iter()
            .any(|entry| entry.value().uri == pool.uri && entry.key() != &pool.name);
        if uri_taken {
            return Err(StorageError::PoolAlreadyExists);
        }

        self.store.pools.insert(pool.name.clone(), pool);
        Ok(())
    }

    async fn update(&self, name: &str, patch: PoolPatch) -> Result<()> {
        if let Some(uri) = &patch.uri {
            let uri_taken = self
                .store
                .pools
                .iter()
                .any(|entry| entry.value().uri == *uri && entry.key() != name);
            if uri_taken {
                return Err(StorageError::PoolAlreadyExists);
            }
        }

        let Some(mut pool) = self.store.pools.get_mut(name) else {
            return Err(StorageError::PoolDoesNotExist {
                name: name.to_string(),
            });
        };

        if let Some(uri) = patch.uri {
            pool.uri = uri;
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
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let in_use = self.store.pools.get(name).and_then(|pool| {
            pool.flavor.as_ref().and_then(|flavor| {
                self.store
                    .flavors
                    .iter()
                    .find(|entry| &entry.key().1 == flavor)
                    .map(|entry| entry.key().1.clone())
            })
        });

        if let Some(flavor) = in_use {
            return Err(StorageError::PoolInUseByFlavor {
                pool: name.to_string(),
                flavor,
            });
        }

        self.store.pools.remove(name);
        Ok(())
    }

    async fn list_by_flavor(&self, flavor: Option<&str>) -> Result<Vec<Pool>> {
        let mut pools: Vec<Pool> = self
            .store
            .pools
            .iter()
            .filter(|entry| entry.value().flavor.as_deref() == flavor)
            .map(|entry| entry.value().clone())
            .collect();
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pools)
    }
}

pub(super) struct MemoryFlavorsController {
    pub store: Arc<MemoryControlStore>,
}

#[async_trait]
impl FlavorsController for MemoryFlavorsController {
    async fn list(
        &self,
        project: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<Page<Flavor>> {
        let mut names: Vec<String> = self
            .store
            .flavors
            .iter()
            .filter(|entry| entry.key().0 == project)
            .map(|entry| entry.key().1.clone())
            .collect();
        names.sort();

        let mut items = Vec::new();
        for name in names {
            if let Some(marker) = marker {
                if name.as_str() <= marker {
                    continue;
                }
            }
            if let Some(flavor) = self
                .store
                .flavors
                .get(&(project.to_string(), name.clone()))
            {
                items.push(flavor.clone());
            }
            if items.len() == limit {
                break;
            }
        }

        let marker = if items.len() == limit {
            items.last().map(|flavor| flavor.name.clone())
        } else {
            None
        };

        Ok(Page { items, marker })
    }

    async fn get(&self, project: &str, name: &str) -> Result<Flavor> {
        self.store
            .flavors
            .get(&(project.to_string(), name.to_string()))
            .map(|flavor| flavor.clone())
            .ok_or_else(|| StorageError::FlavorDoesNotExist {
                name: name.to_string(),
            })
    }

    async fn exists(&self, project: &str, name: &str) -> Result<bool> {
        Ok(self
            .store
            .flavors
            .contains_key(&(project.to_string(), name.to_string())))
    }

    async fn create(&self, flavor: Flavor) -> Result<()> {
        self.store
            .flavors
            .insert((flavor.project.clone(), flavor.name.clone()), flavor);
        Ok(())
    }

    async fn update(&self, project: &str, name: &str, capabilities: Value) -> Result<()> {
        let key = (project.to_string(), name.to_string());
        match self.store.flavors.get_mut(&key) {
            Some(mut flavor) => {
                flavor.capabilities = capabilities;
                Ok(())
            }
            None => Err(StorageError::FlavorDoesNotExist {
                name: name.to_string(),
            }),
        }
    }

    async fn delete(&self, project: &str, name: &str) -> Result<()> {
        self.store
            .flavors
            .remove(&(project.to_string(), name.to_string()));
        Ok(())
    }
}
