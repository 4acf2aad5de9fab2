//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements both [`ConfigPort`] and [`StoragePort`].
//!
//! - Config validation: every field is range-checked before persistence;
//!   nothing is clamped.
//! - Namespace isolation: each record store uses its own namespace
//!   (`maint`, `calib`); the system config lives in `crema`.
//! - A single `nvs_commit()` is atomic per key.  Multi-key atomicity is
//!   layered on top by [`RecordStore`](crate::persist::RecordStore).

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::{HeatingStrategy, MachineType, SystemConfig};
use crate::control::boiler::{
    BoilerRole, FIRMWARE_MAX_BREW_C, FIRMWARE_MAX_STEAM_C, current_budget_a, heater_current_a,
    heaters_fit_together,
};
use log::info;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
#[cfg(target_os = "espidf")]
use log::warn;

const CONFIG_NAMESPACE: &str = "crema";
const CONFIG_KEY: &str = "syscfg";

/// Largest config blob accepted from flash.
#[cfg(target_os = "espidf")]
const MAX_BLOB_SIZE: usize = 1024;

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: std::cell::RefCell<HashMap<String, Vec<u8>>>,
}

impl NvsAdapter {
    /// Create a new NvsAdapter and initialise NVS flash.
    ///
    /// On first boot or after a version mismatch the NVS partition is
    /// erased and re-initialised.
    pub fn new() -> Result<Self, ConfigError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called once from the main task before any NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK {
                    return Err(ConfigError::IoError);
                }
                if unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(ConfigError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(ConfigError::IoError);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsAdapter: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: std::cell::RefCell::new(HashMap::new()),
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    /// NUL-terminated copy of an NVS name (15 chars max).
    #[cfg(target_os = "espidf")]
    fn c_name(name: &str) -> [u8; 16] {
        let mut buf = [0u8; 16];
        let bytes = name.as_bytes();
        let len = bytes.len().min(15);
        buf[..len].copy_from_slice(&bytes[..len]);
        buf
    }

    /// Open an NVS namespace, run `f` with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns = Self::c_name(namespace);
        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let ret = unsafe { nvs_open(ns.as_ptr().cast(), mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }

        let result = f(handle);
        unsafe {
            nvs_close(handle);
        }
        result
    }

    /// `nvs_set_blob` + `nvs_commit` in one namespace.
    #[cfg(target_os = "espidf")]
    fn put_blob(namespace: &str, key: &str, data: &[u8]) -> Result<(), i32> {
        let key = Self::c_name(key);
        Self::with_nvs_handle(namespace, true, |handle| {
            let ret = unsafe {
                nvs_set_blob(handle, key.as_ptr().cast(), data.as_ptr().cast(), data.len())
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(())
        })
    }
}

/// Range-check every field before it may reach flash.
pub fn validate_config(cfg: &SystemConfig) -> Result<(), ConfigError> {
    const TARGET_MAX_C: f32 = 200.0;
    const GAIN_MAX: f32 = 100.0;

    let in_range = |v: f32, lo: f32, hi: f32| v.is_finite() && (lo..=hi).contains(&v);

    if !in_range(cfg.brew_max_temp_c, 0.0, FIRMWARE_MAX_BREW_C) {
        return Err(ConfigError::ValidationFailed(
            "brew_max_temp_c above firmware ceiling",
        ));
    }
    if !in_range(cfg.steam_max_temp_c, 0.0, FIRMWARE_MAX_STEAM_C) {
        return Err(ConfigError::ValidationFailed(
            "steam_max_temp_c above firmware ceiling",
        ));
    }
    if !in_range(cfg.brew_target_c, 0.0, TARGET_MAX_C)
        || cfg.brew_target_c > BoilerRole::Brew.ceiling_c(cfg)
    {
        return Err(ConfigError::ValidationFailed(
            "brew_target_c must be 0-200 and below the brew ceiling",
        ));
    }
    if !in_range(cfg.steam_target_c, 0.0, TARGET_MAX_C)
        || cfg.steam_target_c > BoilerRole::Steam.ceiling_c(cfg)
    {
        return Err(ConfigError::ValidationFailed(
            "steam_target_c must be 0-200 and below the steam ceiling",
        ));
    }
    if !in_range(cfg.sleep_setpoint_c, 0.0, cfg.brew_target_c) {
        return Err(ConfigError::ValidationFailed(
            "sleep_setpoint_c must be 0 to brew_target_c",
        ));
    }
    for g in [cfg.brew_pid, cfg.steam_pid] {
        if ![g.kp, g.ki, g.kd].iter().all(|&v| in_range(v, 0.0, GAIN_MAX)) {
            return Err(ConfigError::ValidationFailed("PID gains must be 0-100"));
        }
    }
    if !in_range(cfg.mains_voltage, 100.0, 250.0) {
        return Err(ConfigError::ValidationFailed("mains_voltage must be 100-250"));
    }
    if !in_range(cfg.max_current_a, 1.0, 50.0) {
        return Err(ConfigError::ValidationFailed("max_current_a must be 1-50"));
    }
    if !in_range(cfg.brew_heater_w, 0.0, 5_000.0) || !in_range(cfg.steam_heater_w, 0.0, 5_000.0) {
        return Err(ConfigError::ValidationFailed("heater power must be 0-5000 W"));
    }
    let budget_a = current_budget_a(cfg);
    if heater_current_a(cfg, cfg.brew_heater_w) > budget_a
        || heater_current_a(cfg, cfg.steam_heater_w) > budget_a
    {
        return Err(ConfigError::ValidationFailed(
            "a single heater exceeds the current budget",
        ));
    }
    if cfg.machine_type == MachineType::DualBoiler
        && cfg.heating_strategy == HeatingStrategy::Parallel
        && !heaters_fit_together(cfg)
    {
        return Err(ConfigError::ValidationFailed(
            "parallel heating exceeds the current budget",
        ));
    }
    for t in [
        cfg.backflush_threshold,
        cfg.group_clean_threshold,
        cfg.descale_threshold,
    ] {
        if !(10..=1000).contains(&t) {
            return Err(ConfigError::ValidationFailed(
                "maintenance thresholds must be 10-1000",
            ));
        }
    }
    if !(5..=100).contains(&cfg.control_loop_interval_ms) {
        return Err(ConfigError::ValidationFailed(
            "control_loop_interval_ms must be 5-100",
        ));
    }
    if !(1..=32).contains(&cfg.max_frames_per_tick) {
        return Err(ConfigError::ValidationFailed(
            "max_frames_per_tick must be 1-32",
        ));
    }
    if cfg.wake_hours.iter().any(|&h| h > 23) {
        return Err(ConfigError::ValidationFailed("wake hours must be 0-23"));
    }
    Ok(())
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let key = Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY);
            if let Some(bytes) = self.store.borrow().get(&key) {
                let cfg: SystemConfig =
                    postcard::from_bytes(bytes).map_err(|_| ConfigError::Corrupted)?;
                info!("NvsAdapter: loaded config from store");
                Ok(cfg)
            } else {
                info!("NvsAdapter: no stored config, using defaults");
                Ok(SystemConfig::default())
            }
        }

        #[cfg(target_os = "espidf")]
        {
            let key = Self::c_name(CONFIG_KEY);
            let result = Self::with_nvs_handle(CONFIG_NAMESPACE, false, |handle| {
                let mut size: usize = 0;

                // First call: get size
                let ret = unsafe {
                    nvs_get_blob(handle, key.as_ptr().cast(), core::ptr::null_mut(), &mut size)
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                if size == 0 || size > MAX_BLOB_SIZE {
                    return Err(ESP_ERR_NVS_INVALID_LENGTH);
                }

                let mut buf = vec![0u8; size];
                let ret = unsafe {
                    nvs_get_blob(handle, key.as_ptr().cast(), buf.as_mut_ptr().cast(), &mut size)
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(buf)
            });

            match result {
                Ok(bytes) => {
                    let cfg: SystemConfig =
                        postcard::from_bytes(&bytes).map_err(|_| ConfigError::Corrupted)?;
                    info!("NvsAdapter: loaded config from NVS ({} bytes)", bytes.len());
                    Ok(cfg)
                }
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => {
                    info!("NvsAdapter: no stored config, using defaults");
                    Ok(SystemConfig::default())
                }
                Err(e) => {
                    warn!("NvsAdapter: NVS read error {}, using defaults", e);
                    Ok(SystemConfig::default())
                }
            }
        }
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;

        #[cfg(not(target_os = "espidf"))]
        {
            let key = Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY);
            self.store.borrow_mut().insert(key, bytes);
            info!("NvsAdapter: config saved (simulation)");
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            match Self::put_blob(CONFIG_NAMESPACE, CONFIG_KEY, &bytes) {
                Ok(()) => {
                    info!("NvsAdapter: config saved to NVS ({} bytes)", bytes.len());
                    Ok(())
                }
                Err(e) if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE => Err(ConfigError::StorageFull),
                Err(e) => {
                    warn!("NvsAdapter: NVS write error {}", e);
                    Err(ConfigError::IoError)
                }
            }
        }
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            match self.store.borrow().get(&composite) {
                Some(data) => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    Ok(len)
                }
                None => Err(StorageError::NotFound),
            }
        }

        #[cfg(target_os = "espidf")]
        {
            let key = Self::c_name(key);
            let result = Self::with_nvs_handle(namespace, false, |handle| {
                let mut size = buf.len();
                let ret = unsafe {
                    nvs_get_blob(handle, key.as_ptr().cast(), buf.as_mut_ptr().cast(), &mut size)
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(size)
            });
            match result {
                Ok(size) => Ok(size),
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Err(StorageError::NotFound),
                Err(_) => Err(StorageError::IoError),
            }
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.store.borrow_mut().insert(composite, data.to_vec());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            Self::put_blob(namespace, key, data).map_err(|e| {
                if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE {
                    StorageError::Full
                } else {
                    warn!("NvsAdapter: write {}::{} failed ({})", namespace, key, e);
                    StorageError::IoError
                }
            })
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.store.borrow_mut().remove(&composite);
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key = Self::c_name(key);
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                let ret = unsafe { nvs_erase_key(handle, key.as_ptr().cast()) };
                if ret != ESP_OK && ret != ESP_ERR_NVS_NOT_FOUND {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            result.map_err(|_| StorageError::IoError)
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.store.borrow().contains_key(&composite)
        }

        #[cfg(target_os = "espidf")]
        {
            let key = Self::c_name(key);
            Self::with_nvs_handle(namespace, false, |handle| {
                let ret =
                    unsafe { nvs_find_key(handle, key.as_ptr().cast(), core::ptr::null_mut()) };
                Ok(ret == ESP_OK)
            })
            .unwrap_or(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PidGains;

    fn rejected(cfg: &SystemConfig) -> bool {
        matches!(validate_config(cfg), Err(ConfigError::ValidationFailed(_)))
    }

    #[test]
    fn default_config_passes_validation() {
        assert!(validate_config(&SystemConfig::default()).is_ok());
    }

    #[test]
    fn ceiling_above_firmware_limit_never_saved() {
        let nvs = NvsAdapter::new().unwrap();
        let cfg = SystemConfig {
            brew_max_temp_c: FIRMWARE_MAX_BREW_C + 1.0,
            ..Default::default()
        };
        assert!(nvs.save(&cfg).is_err());
        // Nothing stored: load falls back to defaults.
        let loaded = nvs.load().unwrap();
        assert_eq!(loaded.brew_max_temp_c, SystemConfig::default().brew_max_temp_c);
    }

    #[test]
    fn target_above_ceiling_rejected() {
        assert!(rejected(&SystemConfig {
            brew_target_c: 125.0,
            ..Default::default()
        }));
        assert!(rejected(&SystemConfig {
            steam_target_c: f32::NAN,
            ..Default::default()
        }));
    }

    #[test]
    fn gains_and_power_budget_ranges() {
        assert!(rejected(&SystemConfig {
            brew_pid: PidGains {
                kp: 101.0,
                ki: 0.0,
                kd: 0.0
            },
            ..Default::default()
        }));
        assert!(rejected(&SystemConfig {
            mains_voltage: 50.0,
            ..Default::default()
        }));
        assert!(rejected(&SystemConfig {
            max_current_a: 0.5,
            ..Default::default()
        }));
    }

    #[test]
    fn parallel_rejected_when_heaters_overload_supply() {
        let tight = SystemConfig {
            heating_strategy: HeatingStrategy::Parallel,
            max_current_a: 10.0,
            ..Default::default()
        };
        assert!(rejected(&tight));

        // 10.43 A under an 11 A supply still misses the 95 % headroom.
        assert!(rejected(&SystemConfig {
            max_current_a: 11.0,
            ..tight.clone()
        }));
        assert!(validate_config(&SystemConfig {
            max_current_a: 16.0,
            ..tight.clone()
        })
        .is_ok());

        // Strategies that take turns in the window may run on the same supply.
        for strategy in [HeatingStrategy::Sequential, HeatingStrategy::SmartStagger] {
            assert!(validate_config(&SystemConfig {
                heating_strategy: strategy,
                ..tight.clone()
            })
            .is_ok());
        }
        // A single boiler has nothing to run in parallel with.
        assert!(validate_config(&SystemConfig {
            machine_type: MachineType::SingleBoiler,
            ..tight
        })
        .is_ok());
    }

    #[test]
    fn heater_alone_over_budget_rejected() {
        assert!(rejected(&SystemConfig {
            heating_strategy: HeatingStrategy::Sequential,
            max_current_a: 5.0,
            ..Default::default()
        }));
        assert!(rejected(&SystemConfig {
            steam_heater_w: f32::NAN,
            ..Default::default()
        }));
    }

    #[test]
    fn timing_and_threshold_ranges() {
        assert!(rejected(&SystemConfig {
            control_loop_interval_ms: 1,
            ..Default::default()
        }));
        assert!(rejected(&SystemConfig {
            max_frames_per_tick: 0,
            ..Default::default()
        }));
        assert!(rejected(&SystemConfig {
            descale_threshold: 5,
            ..Default::default()
        }));
    }

    #[test]
    fn wake_hour_out_of_range_rejected() {
        let mut cfg = SystemConfig::default();
        cfg.wake_hours.push(24).unwrap();
        assert!(rejected(&cfg));
    }

    #[test]
    fn config_round_trip() {
        let nvs = NvsAdapter::new().unwrap();
        let mut cfg = SystemConfig {
            brew_target_c: 94.5,
            ..Default::default()
        };
        cfg.wake_hours.push(6).unwrap();
        nvs.save(&cfg).unwrap();
        let loaded = nvs.load().unwrap();
        assert_eq!(loaded.brew_target_c, 94.5);
        assert_eq!(&loaded.wake_hours[..], &[6]);
    }

    #[test]
    fn storage_round_trip() {
        let mut nvs = NvsAdapter::new().unwrap();
        let data = b"hello NVS";
        nvs.write("test_ns", "greeting", data).unwrap();
        assert!(nvs.exists("test_ns", "greeting"));

        let mut buf = [0u8; 64];
        let len = nvs.read("test_ns", "greeting", &mut buf).unwrap();
        assert_eq!(&buf[..len], data);

        nvs.delete("test_ns", "greeting").unwrap();
        assert!(!nvs.exists("test_ns", "greeting"));
    }

    #[test]
    fn storage_read_missing_key() {
        let nvs = NvsAdapter::new().unwrap();
        let mut buf = [0u8; 64];
        assert!(matches!(
            nvs.read("ns", "nope", &mut buf),
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn namespace_isolation() {
        let mut nvs = NvsAdapter::new().unwrap();
        nvs.write("maint", "commit", b"alpha").unwrap();
        nvs.write("calib", "commit", b"bravo").unwrap();

        let mut buf = [0u8; 64];
        let len = nvs.read("maint", "commit", &mut buf).unwrap();
        assert_eq!(&buf[..len], b"alpha");

        let len = nvs.read("calib", "commit", &mut buf).unwrap();
        assert_eq!(&buf[..len], b"bravo");
    }
}
