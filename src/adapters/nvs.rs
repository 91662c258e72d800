//! Non-volatile storage adapter (in-memory backend).
//!
//! Implements [`CoefficientStore`], [`ConfigPort`] and [`StoragePort`] over
//! one namespaced key-value map.  Values are postcard-encoded, so what a
//! read returns has been through the same encode/decode path as on flash.
//!
//! - Config validation: records are validated before they are persisted.
//! - Namespace isolation: each subsystem uses its own namespace prefix.

use std::cell::RefCell;
use std::collections::HashMap;

use log::{debug, info};

use crate::app::ports::{CoefficientStore, ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::Configuration;

const CONFIG_NAMESPACE: &str = "o2ctl";
const CONFIG_KEY: &str = "config";
const CAL_NAMESPACE: &str = "cal";

#[derive(Default)]
pub struct NvsAdapter {
    store: RefCell<HashMap<String, Vec<u8>>>,
}

impl NvsAdapter {
    pub fn new() -> Self {
        info!("NvsAdapter: simulation backend");
        Self::default()
    }

    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    fn coefficient_key(key: u8) -> String {
        Self::composite_key(CAL_NAMESPACE, &format!("c{key:02x}"))
    }

    /// Overwrite a coefficient slot with raw bytes, bypassing the encoder.
    /// Lets tests model a corrupted cell.
    pub fn poke_raw(&self, key: u8, bytes: &[u8]) {
        self.store.borrow_mut().insert(Self::coefficient_key(key), bytes.to_vec());
    }

    /// Number of stored keys across all namespaces.
    pub fn len(&self) -> usize {
        self.store.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.borrow().is_empty()
    }
}

impl CoefficientStore for NvsAdapter {
    fn write_coefficient(&mut self, key: u8, value: f64) -> Result<(), StorageError> {
        let bytes = postcard::to_allocvec(&value).map_err(|_| StorageError::IoError)?;
        self.store.borrow_mut().insert(Self::coefficient_key(key), bytes);
        debug!("NvsAdapter: coefficient 0x{key:02x} = {value}");
        Ok(())
    }

    fn read_coefficient(&self, key: u8) -> Result<f64, StorageError> {
        let store = self.store.borrow();
        let bytes = store.get(&Self::coefficient_key(key)).ok_or(StorageError::NotFound)?;
        postcard::from_bytes(bytes).map_err(|_| StorageError::Corrupted)
    }
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<Configuration, ConfigError> {
        let key = Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY);
        let store = self.store.borrow();
        let bytes = store.get(&key).ok_or(ConfigError::NotFound)?;
        let bits: u32 = postcard::from_bytes(bytes).map_err(|_| ConfigError::Corrupted)?;
        let config = Configuration::from_bits(bits)?;
        config.validate()?;
        info!("NvsAdapter: loaded config 0x{bits:08x}");
        Ok(config)
    }

    fn save(&self, config: &Configuration) -> Result<(), ConfigError> {
        config.validate()?;
        let key = Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY);
        let bytes = postcard::to_allocvec(&config.to_bits()).map_err(|_| ConfigError::IoError)?;
        self.store.borrow_mut().insert(key, bytes);
        info!("NvsAdapter: config 0x{:08x} saved", config.to_bits());
        Ok(())
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let store = self.store.borrow();
        let data = store
            .get(&Self::composite_key(namespace, key))
            .ok_or(StorageError::NotFound)?;
        if data.len() > buf.len() {
            return Err(StorageError::IoError);
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.store
            .borrow_mut()
            .insert(Self::composite_key(namespace, key), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.store.borrow_mut().remove(&Self::composite_key(namespace, key));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.store.borrow().contains_key(&Self::composite_key(namespace, key))
    }
}
