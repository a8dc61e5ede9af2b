//! Thread-shared store of the latest sensor values.
//!
//! One mutex guards the whole aggregate so a reader can never observe a
//! value without its matching freshness flag. The lock is only ever held
//! for the duration of a field copy, never across I/O.

use std::sync::{Arc, Mutex};

use crate::models::SensorKind;

#[derive(Debug, Default)]
struct CacheInner {
    connected: bool,

    has_temp: bool,
    has_press: bool,
    has_humid: bool,

    temperature: f32,
    pressure: f32,
    humidity: f32,
}

/// Point-in-time copy of the cache. `None` means "not fresh", i.e. no
/// successful decode since the last disconnection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub temperature: Option<f32>,
    pub pressure: Option<f32>,
    pub humidity: Option<f32>,
    pub connected: bool,
}

impl Snapshot {
    pub fn value(&self, kind: SensorKind) -> Option<f32> {
        match kind {
            SensorKind::Temperature => self.temperature,
            SensorKind::Pressure => self.pressure,
            SensorKind::Humidity => self.humidity,
        }
    }
}

/// Cloneable handle to the process-wide sensor cache.
#[derive(Debug, Clone, Default)]
pub struct SensorCache {
    inner: Arc<Mutex<CacheInner>>,
}

impl SensorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decoded value and mark that kind fresh.
    pub fn update(&self, kind: SensorKind, value: f32) {
        let mut state = self.inner.lock().unwrap();
        match kind {
            SensorKind::Temperature => {
                state.temperature = value;
                state.has_temp = true;
            }
            SensorKind::Pressure => {
                state.pressure = value;
                state.has_press = true;
            }
            SensorKind::Humidity => {
                state.humidity = value;
                state.has_humid = true;
            }
        }
        state.connected = true;
    }

    /// Mark the link up without touching freshness. Called on a successful
    /// (re)connection before any reading has arrived.
    pub fn mark_connected(&self) {
        self.inner.lock().unwrap().connected = true;
    }

    /// Clear the connectivity flag and all freshness flags. The raw values
    /// stay in place; the flags alone gate what the HTTP page shows.
    pub fn mark_disconnected(&self) {
        let mut state = self.inner.lock().unwrap();
        state.connected = false;
        state.has_temp = false;
        state.has_press = false;
        state.has_humid = false;
    }

    /// Copy the whole aggregate under the lock.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.inner.lock().unwrap();
        Snapshot {
            temperature: state.has_temp.then_some(state.temperature),
            pressure: state.has_press.then_some(state.pressure),
            humidity: state.has_humid.then_some(state.humidity),
            connected: state.connected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_and_disconnected() {
        let cache = SensorCache::new();
        let snap = cache.snapshot();
        assert!(!snap.connected);
        for kind in SensorKind::ALL {
            assert_eq!(snap.value(kind), None);
        }
    }

    #[test]
    fn update_sets_value_and_connectivity() {
        let cache = SensorCache::new();
        cache.update(SensorKind::Temperature, 23.45);
        let snap = cache.snapshot();
        assert!(snap.connected);
        assert_eq!(snap.temperature, Some(23.45));
        assert_eq!(snap.pressure, None);
        assert_eq!(snap.humidity, None);
    }

    #[test]
    fn disconnect_clears_all_flags() {
        let cache = SensorCache::new();
        cache.update(SensorKind::Temperature, 21.0);
        cache.update(SensorKind::Pressure, 1003.25);
        cache.update(SensorKind::Humidity, 45.5);

        cache.mark_disconnected();
        let snap = cache.snapshot();
        assert!(!snap.connected);
        for kind in SensorKind::ALL {
            assert_eq!(snap.value(kind), None);
        }

        // Idempotent regardless of prior state
        cache.mark_disconnected();
        assert_eq!(cache.snapshot(), snap);
    }

    #[test]
    fn reconnect_does_not_resurrect_stale_values() {
        let cache = SensorCache::new();
        cache.update(SensorKind::Humidity, 45.5);
        cache.mark_disconnected();

        cache.mark_connected();
        let snap = cache.snapshot();
        assert!(snap.connected);
        assert_eq!(snap.humidity, None);

        // A fresh decode after reconnect shows up again
        cache.update(SensorKind::Humidity, 46.0);
        assert_eq!(cache.snapshot().humidity, Some(46.0));
    }
}
