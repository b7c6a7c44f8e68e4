//! Wires configuration to storage: control driver first, then either the
//! pooled data driver (catalogue routing) or a single direct backend.

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::storage::pooling::{Catalog, PooledDataDriver};
use crate::storage::{utils, ControlDriver, DataDriver, Result};

pub struct Bootstrap {
    pub conf: Config,
    pub control: Arc<dyn ControlDriver>,
    pub data: Arc<dyn DataDriver>,
    /// Present when pooling is enabled.
    pub catalog: Option<Arc<Catalog>>,
}

impl Bootstrap {
    pub async fn new(conf: Config) -> Result<Self> {
        let control = utils::open_control_driver(&conf.storage.control_uri).await?;
        let tuning = utils::StorageTuning::from(&conf.storage);

        let (data, catalog): (Arc<dyn DataDriver>, _) = if conf.storage.pooling {
            info!("storage: pooled data driver (control: {})", conf.storage.control_uri);
            utils::driver_registry().set_tuning(tuning);
            let catalog = Arc::new(Catalog::new(Arc::clone(&control)));
            (
                Arc::new(PooledDataDriver::new(Arc::clone(&catalog))),
                Some(catalog),
            )
        } else {
            info!("storage: direct data driver {}", conf.storage.data_uri);
            (
                utils::open_data_driver(&conf.storage.data_uri, tuning).await?,
                None,
            )
        };

        Ok(Self {
            conf,
            control,
            data,
            catalog,
        })
    }
}
