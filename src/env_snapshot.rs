//! Snapshot of the toolchain's target-selection environment variables.
//!
//! Captured once before any build runs and restored once every build has
//! finished, so the driver leaves `GOOS`/`GOARCH` (or whatever the toolchain
//! reads) exactly as it found them. Unset and set-to-empty are distinct
//! states and both are restored as captured.

use std::ffi::OsString;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: Vec<(String, Option<OsString>)>,
}

impl EnvSnapshot {
    /// Record the current value of each of `keys`.
    pub fn capture<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let vars = keys
            .into_iter()
            .map(|key| {
                let key = key.into();
                let value = std::env::var_os(&key);
                (key, value)
            })
            .collect();
        Self { vars }
    }

    /// Put every captured variable back to its captured value.
    ///
    /// Variables that already match are left untouched.
    pub fn restore(&self) {
        for (key, value) in &self.vars {
            if std::env::var_os(key).as_deref() == value.as_deref() {
                continue;
            }
            // SAFETY: restore runs on the driver thread after the build worker
            // pool has been joined; no other thread reads the environment.
            match value {
                Some(v) => unsafe { std::env::set_var(key, v) },
                None => unsafe { std::env::remove_var(key) },
            }
        }
    }

    /// Restore the snapshot when the returned guard is dropped, including
    /// when a fatal error unwinds out of the run.
    pub fn restore_on_drop(self) -> RestoreGuard {
        RestoreGuard { snapshot: self }
    }
}

/// Restores an [`EnvSnapshot`] on drop.
#[derive(Debug)]
pub struct RestoreGuard {
    snapshot: EnvSnapshot,
}

#[cfg(test)]
impl EnvSnapshot {
    /// The captured value of `key`, or `None` if it was unset or not captured.
    fn get(&self, key: &str) -> Option<&std::ffi::OsStr> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Whether every captured variable still holds its captured value.
    fn is_current(&self) -> bool {
        self.vars
            .iter()
            .all(|(key, value)| std::env::var_os(key).as_deref() == value.as_deref())
    }
}

#[cfg(test)]
impl RestoreGuard {
    fn snapshot(&self) -> &EnvSnapshot {
        &self.snapshot
    }
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        self.snapshot.restore();
    }
}
