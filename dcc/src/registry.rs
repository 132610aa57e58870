//! Device registry: maps a device id to the factory that opens it

use dcc_core::{DccError, DccResult};
use dcc_elink::ElinkCommandStation;
use dcc_station::CommandStation;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Opens a command station from a connection string
pub type StationFactory =
    Arc<dyn Fn(String) -> BoxFuture<'static, DccResult<Box<dyn CommandStation>>> + Send + Sync>;

/// Registered command station drivers
///
/// Built explicitly and handed to whatever opens devices; there is no
/// process-wide registry.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    factories: BTreeMap<String, StationFactory>,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every driver in this workspace
    pub fn with_default_drivers() -> Self {
        let mut registry = Self::new();
        registry.register(ElinkCommandStation::DEVICE_ID, |connection_string| {
            async move {
                let station = ElinkCommandStation::open(&connection_string).await?;
                Ok(Box::new(station) as Box<dyn CommandStation>)
            }
            .boxed()
        });
        registry
    }

    /// Register `factory` under `device_id`, replacing any earlier entry
    pub fn register<F>(&mut self, device_id: impl Into<String>, factory: F)
    where
        F: Fn(String) -> BoxFuture<'static, DccResult<Box<dyn CommandStation>>>
            + Send
            + Sync
            + 'static,
    {
        let device_id = device_id.into();
        if self
            .factories
            .insert(device_id.clone(), Arc::new(factory))
            .is_some()
        {
            log::warn!("driver {device_id} registered twice, keeping the last one");
        }
    }

    /// Registered device ids, sorted
    pub fn device_ids(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.factories.contains_key(device_id)
    }

    /// Open a station with the driver registered as `device_id`
    ///
    /// # Errors
    /// `DccError::NotSupported` for an unknown device id, otherwise whatever
    /// the driver's open fails with
    pub async fn open(
        &self,
        device_id: &str,
        connection_string: &str,
    ) -> DccResult<Box<dyn CommandStation>> {
        let factory = self
            .factories
            .get(device_id)
            .ok_or_else(|| DccError::NotSupported(format!("Device \"{device_id}\"")))?
            .clone();
        log::info!("opening {device_id} with \"{connection_string}\"");
        factory(connection_string.to_string()).await
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
