/*
 *
 *  *
 *  *      Copyright (c) 2018-2025, SnackCloud All rights reserved.
 *  *
 *  *   Redistribution and use in source and binary forms, with or without
 *  *   modification, are permitted provided that the following conditions are met:
 *  *
 *  *   Redistributions of source code must retain the above copyright notice,
 *  *   this list of conditions and the following disclaimer.
 *  *   Redistributions in binary form must reproduce the above copyright
 *  *   notice, this list of conditions and the following disclaimer in the
 *  *   documentation and/or other materials provided with the distribution.
 *  *   Neither the name of the www.snackcloud.cn developer nor the names of its
 *  *   contributors may be used to endorse or promote products derived from
 *  *   this software without specific prior written permission.
 *  *   Author: SnackCloud
 *  *
 *
 */
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{LockError, LockResult};
use crate::util::num_milliseconds;

/// Fraction of the lease duration between renewals.
pub const REFRESH_INTERVAL_COEF: f64 = 0.8;

pub type LockLostCallback = Arc<dyn Fn(LockError) + Send + Sync>;

fn default_on_lock_lost(err: LockError) {
    panic!("{err}");
}

/// Construction options shared by every lock flavor.
#[derive(Clone)]
pub struct LockOptions {
    /// Lease duration; the store expires the lock this long after the last
    /// successful acquire or refresh.
    pub lock_timeout: Duration,
    /// Wall-clock budget for `acquire`/`try_acquire`.
    pub acquire_timeout: Duration,
    /// Maximum number of acquire attempts; `None` means unbounded.
    pub acquire_attempts_limit: Option<u32>,
    /// Pause between failed acquire attempts.
    pub retry_interval: Duration,
    /// Renewal period. `None` resolves to `REFRESH_INTERVAL_COEF` times the
    /// lease duration; a zero duration disables renewal so the lease expires
    /// naturally.
    pub refresh_interval: Option<Duration>,
    /// Invoked from the renewal task when a held lock is definitively gone.
    /// The default panics in that task.
    pub on_lock_lost: LockLostCallback,
    /// Fencing token override for hand-off scenarios.
    pub identifier: Option<String>,
    /// Appended to generated identifiers as `<uuid>-<suffix>`.
    pub identifier_suffix: Option<String>,
    /// Adopt a lock this process did not acquire: the first acquisition
    /// refreshes instead of contending. Requires `identifier`.
    pub acquired_externally: bool,
    /// Draw a fresh identifier on every non-adopted acquisition of a reused
    /// handle instead of keeping the construction-time token.
    pub regenerate_identifier: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(10_000),
            acquire_timeout: Duration::from_millis(10_000),
            acquire_attempts_limit: None,
            retry_interval: Duration::from_millis(10),
            refresh_interval: None,
            on_lock_lost: Arc::new(default_on_lock_lost),
            identifier: None,
            identifier_suffix: None,
            acquired_externally: false,
            regenerate_identifier: false,
        }
    }
}

impl LockOptions {
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    pub fn with_acquire_attempts_limit(mut self, limit: u32) -> Self {
        self.acquire_attempts_limit = Some(limit);
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = Some(refresh_interval);
        self
    }

    pub fn with_on_lock_lost<F>(mut self, callback: F) -> Self
    where
        F: Fn(LockError) + Send + Sync + 'static,
    {
        self.on_lock_lost = Arc::new(callback);
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_identifier_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.identifier_suffix = Some(suffix.into());
        self
    }

    pub fn with_acquired_externally(mut self, acquired_externally: bool) -> Self {
        self.acquired_externally = acquired_externally;
        self
    }

    pub fn with_regenerate_identifier(mut self, regenerate: bool) -> Self {
        self.regenerate_identifier = regenerate;
        self
    }

    /// Effective renewal period in milliseconds resolution.
    pub fn resolved_refresh_interval(&self) -> Duration {
        match self.refresh_interval {
            Some(interval) => interval,
            None => {
                let ms = num_milliseconds(&self.lock_timeout) as f64 * REFRESH_INTERVAL_COEF;
                Duration::from_millis(ms.round() as u64)
            }
        }
    }

    pub(crate) fn validate(&self) -> LockResult<()> {
        if let Some(identifier) = &self.identifier {
            if identifier.is_empty() {
                return Err(LockError::ConfigError(
                    "identifier must be a non-empty string".to_string(),
                ));
            }
        }
        if self.acquired_externally && self.identifier.is_none() {
            return Err(LockError::ConfigError(
                "acquired_externally requires an explicit identifier".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for LockOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockOptions")
            .field("lock_timeout", &self.lock_timeout)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("acquire_attempts_limit", &self.acquire_attempts_limit)
            .field("retry_interval", &self.retry_interval)
            .field("refresh_interval", &self.refresh_interval)
            .field("identifier", &self.identifier)
            .field("identifier_suffix", &self.identifier_suffix)
            .field("acquired_externally", &self.acquired_externally)
            .field("regenerate_identifier", &self.regenerate_identifier)
            .finish_non_exhaustive()
    }
}
