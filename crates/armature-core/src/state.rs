use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

/// Flag gating `log_through` inside the fetch engine.
pub const NET_INTERNAL_ERROR_LOG: &str = "net.internal_error_log";
/// Flag gating `log_through` inside the updater.
pub const UPDATE_INTERNAL_ERROR_LOG: &str = "update.internal_error_log";
/// Flag gating emitter mirroring from the progressor path.
pub const NET_PROGRESSOR_NETUPDATE: &str = "net.progressor_netupdate";

/// Named monotonic counters, used for per-process event identifiers.
#[derive(Debug, Default)]
pub struct IndexRegistry {
    inner: Mutex<HashMap<String, u64>>,
}

impl IndexRegistry {
    /// Increment the named counter and return its new value. The first
    /// call for a name yields 1.
    pub fn next(&self, name: &str) -> u64 {
        let mut inner = self.inner.lock().expect("index registry poisoned");
        let counter = inner.entry(name.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// The counter's current value, if it has ever been incremented.
    pub fn current(&self, name: &str) -> Option<u64> {
        self.inner
            .lock()
            .expect("index registry poisoned")
            .get(name)
            .copied()
    }

    pub fn reset(&self, name: &str) {
        self.inner
            .lock()
            .expect("index registry poisoned")
            .insert(name.to_string(), 0);
    }

    pub fn reset_all(&self) {
        for counter in self
            .inner
            .lock()
            .expect("index registry poisoned")
            .values_mut()
        {
            *counter = 0;
        }
    }
}

/// Named boolean flags toggling framework-internal behavior at runtime.
///
/// Unknown flags read as disabled.
#[derive(Debug)]
pub struct FlagRegistry {
    inner: RwLock<HashMap<String, bool>>,
}

impl Default for FlagRegistry {
    fn default() -> Self {
        let mut flags = HashMap::new();
        flags.insert(NET_INTERNAL_ERROR_LOG.to_string(), true);
        flags.insert(UPDATE_INTERNAL_ERROR_LOG.to_string(), true);
        flags.insert(NET_PROGRESSOR_NETUPDATE.to_string(), true);
        FlagRegistry {
            inner: RwLock::new(flags),
        }
    }
}

impl FlagRegistry {
    pub fn enable(&self, flag: &str) {
        self.inner
            .write()
            .expect("flag registry poisoned")
            .insert(flag.to_string(), true);
    }

    pub fn disable(&self, flag: &str) {
        self.inner
            .write()
            .expect("flag registry poisoned")
            .insert(flag.to_string(), false);
    }

    pub fn is_enabled(&self, flag: &str) -> bool {
        self.inner
            .read()
            .expect("flag registry poisoned")
            .get(flag)
            .copied()
            .unwrap_or(false)
    }

    /// Disable a flag for the guard's lifetime, restoring it on drop.
    ///
    /// Used by subsystems that issue sub-requests whose failures they
    /// interpret themselves, to avoid double-logging expected errors.
    pub fn suppress<'a>(&'a self, flag: &'a str) -> FlagGuard<'a> {
        self.disable(flag);
        FlagGuard { flags: self, flag }
    }
}

/// Re-enables a suppressed flag when dropped.
pub struct FlagGuard<'a> {
    flags: &'a FlagRegistry,
    flag: &'a str,
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flags.enable(self.flag);
    }
}

/// Process-wide mutable framework state, passed explicitly into the
/// framework constructor so multiple independent instances can coexist.
#[derive(Debug, Default)]
pub struct FrameworkState {
    pub indexes: IndexRegistry,
    pub flags: FlagRegistry,
}
