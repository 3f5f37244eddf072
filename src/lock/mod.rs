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

mod fair_semaphore;
mod multi_semaphore;
mod mutex;
mod redlock;
mod semaphore;
mod watchdog;

pub use fair_semaphore::*;
pub use multi_semaphore::*;
pub use mutex::*;
pub use redlock::*;
pub use semaphore::*;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, warn};

use crate::config::LockOptions;
use crate::errors::{LockError, LockResult};
use crate::util::get_lock_id;
use watchdog::RefreshWatchdog;

/// Storage-side behavior of one lock flavor.
///
/// A routine knows how to take, extend and return one lease under a fixed
/// identifier. It holds no lifecycle state of its own; [`Lock`] drives it.
#[async_trait]
pub trait LockRoutine: Send + Sync + 'static {
    /// Flavor name used in error messages and logs, e.g. `"mutex"`.
    fn kind(&self) -> &str;

    /// Resource key this lock guards.
    fn key(&self) -> &str;

    /// One acquisition attempt. `Ok(false)` means the resource is busy
    /// right now; the caller decides whether to retry.
    async fn attempt(&self, identifier: &str) -> LockResult<bool>;

    /// Extends the lease to a full lock timeout from now. `Ok(false)` means
    /// the lease no longer exists on the store.
    async fn refresh(&self, identifier: &str) -> LockResult<bool>;

    /// Returns the lease. Must be safe to call when the lease is already
    /// gone.
    async fn release(&self, identifier: &str) -> LockResult<()>;
}

/// Lifecycle engine shared by every lock flavor.
///
/// Wraps a [`LockRoutine`] with the timed acquire loop, the background
/// refresh watchdog and the release handshake. A handle is owned by one
/// task at a time; share the protected resource, not the lock.
pub struct Lock<R: LockRoutine> {
    routine: Arc<R>,
    options: LockOptions,
    identifier: String,
    acquired: Arc<AtomicBool>,
    acquired_externally: bool,
    watchdog: Option<RefreshWatchdog>,
}

impl<R: LockRoutine> Lock<R> {
    pub(crate) fn with_routine(routine: R, options: LockOptions) -> LockResult<Self> {
        options.validate()?;
        let identifier = match options.identifier.clone() {
            Some(identifier) => identifier,
            None => get_lock_id(options.identifier_suffix.as_deref()),
        };
        let acquired_externally = options.acquired_externally;
        Ok(Self {
            routine: Arc::new(routine),
            options,
            identifier,
            acquired: Arc::new(AtomicBool::new(false)),
            acquired_externally,
            watchdog: None,
        })
    }

    /// Makes one timed run at the lock.
    ///
    /// Attempts are spaced by the retry interval until the acquire timeout
    /// or the attempts limit is reached, whichever comes first. `Ok(false)`
    /// means the window closed without the lock being taken. Attempts that
    /// fail with a transport error count as busy and are retried.
    pub async fn try_acquire(&mut self) -> LockResult<bool> {
        debug!("try_acquire {} {}", self.routine.kind(), self.routine.key());

        if self.acquired_externally {
            // Adopting a lease created elsewhere: prove it still exists by
            // refreshing it once. No retry loop on this path.
            let adopted = self.routine.refresh(&self.identifier).await?;
            self.acquired_externally = false;
            if !adopted {
                return Ok(false);
            }
            self.acquired.store(true, Ordering::SeqCst);
            self.start_refresh_watchdog();
            return Ok(true);
        }

        if self.options.regenerate_identifier && self.options.identifier.is_none() {
            self.identifier = get_lock_id(self.options.identifier_suffix.as_deref());
        }

        let deadline = Instant::now() + self.options.acquire_timeout;
        let mut attempts: u32 = 0;

        loop {
            if Instant::now() >= deadline {
                return Ok(false);
            }
            if let Some(limit) = self.options.acquire_attempts_limit {
                if attempts >= limit {
                    return Ok(false);
                }
            }
            attempts += 1;

            match self.routine.attempt(&self.identifier).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        "Attempt {} on {} {} failed: {}",
                        attempts,
                        self.routine.kind(),
                        self.routine.key(),
                        err
                    );
                }
            }

            sleep(self.options.retry_interval).await;
        }

        self.acquired.store(true, Ordering::SeqCst);
        self.start_refresh_watchdog();
        Ok(true)
    }

    /// Like [`try_acquire`](Self::try_acquire) but treats an exhausted
    /// acquire window as an error.
    pub async fn acquire(&mut self) -> LockResult<()> {
        if self.try_acquire().await? {
            Ok(())
        } else {
            Err(LockError::timeout(self.routine.kind(), self.routine.key()))
        }
    }

    /// Releases the lock and stops the refresh watchdog.
    ///
    /// The held flag is lowered before anything else so that a refresh
    /// already in flight resolves as a deliberate release, not a lost
    /// lease. Releasing a lock that is not held does nothing.
    pub async fn release(&mut self) -> LockResult<()> {
        debug!("release {} {}", self.routine.kind(), self.routine.key());
        let was_acquired = self.acquired.swap(false, Ordering::SeqCst);
        self.stop_refresh();
        let was_external = std::mem::take(&mut self.acquired_externally);
        if was_acquired || was_external {
            self.routine.release(&self.identifier).await?;
        }
        Ok(())
    }

    /// Stops background refresh without releasing the lock. The lease then
    /// runs out on its own unless refreshed again by a later acquire.
    pub fn stop_refresh(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.signal_stop();
        }
    }

    /// Whether this handle currently believes it holds the lock.
    pub fn is_acquired(&self) -> bool {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Holder identifier written to the store.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn kind(&self) -> &str {
        self.routine.kind()
    }

    pub fn key(&self) -> &str {
        self.routine.key()
    }

    fn start_refresh_watchdog(&mut self) {
        self.stop_refresh();
        let refresh_interval = self.options.resolved_refresh_interval();
        if refresh_interval.is_zero() {
            return;
        }

        let routine = Arc::clone(&self.routine);
        let identifier = self.identifier.clone();
        let acquired = Arc::clone(&self.acquired);
        let on_lock_lost = Arc::clone(&self.options.on_lock_lost);
        let kind = self.routine.kind().to_string();
        let key = self.routine.key().to_string();

        let renew_func = move || {
            let routine = Arc::clone(&routine);
            let identifier = identifier.clone();
            let acquired = Arc::clone(&acquired);
            let on_lock_lost = Arc::clone(&on_lock_lost);
            let kind = kind.clone();
            let key = key.clone();
            async move {
                match routine.refresh(&identifier).await {
                    Ok(true) => true,
                    Err(err) => {
                        // Transient trouble reaching the store is not proof
                        // the lease is gone; keep ticking.
                        warn!("Failed to refresh {} {}: {}", kind, key, err);
                        true
                    }
                    Ok(false) => {
                        if !acquired.load(Ordering::SeqCst) {
                            // The lock was released while this refresh was
                            // in flight.
                            debug!("Refresh of {} {} resolved after release", kind, key);
                            return false;
                        }
                        acquired.store(false, Ordering::SeqCst);
                        error!("Lost {} for key {}", kind, key);
                        (*on_lock_lost)(LockError::lost(&kind, &key));
                        false
                    }
                }
            }
        };

        self.watchdog = Some(RefreshWatchdog::spawn(refresh_interval, renew_func));
    }
}

pub(crate) fn validate_key(key: &str) -> LockResult<()> {
    if key.is_empty() {
        return Err(LockError::ConfigError(
            "key must be a non-empty string".into(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_count(name: &str, value: u32) -> LockResult<()> {
    if value == 0 {
        return Err(LockError::ConfigError(format!("{name} must be at least 1")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Routine whose answers are queued up front. Counters and defaults
    /// make the engine's retry and refresh behavior observable without a
    /// Redis server.
    #[derive(Clone)]
    struct ScriptedRoutine {
        attempt_results: Arc<StdMutex<VecDeque<LockResult<bool>>>>,
        refresh_results: Arc<StdMutex<VecDeque<LockResult<bool>>>>,
        refresh_delay: Duration,
        default_attempt: bool,
        attempt_calls: Arc<AtomicUsize>,
        refresh_calls: Arc<AtomicUsize>,
        release_calls: Arc<AtomicUsize>,
        identifiers_seen: Arc<StdMutex<Vec<String>>>,
    }

    impl ScriptedRoutine {
        fn new() -> Self {
            Self {
                attempt_results: Arc::new(StdMutex::new(VecDeque::new())),
                refresh_results: Arc::new(StdMutex::new(VecDeque::new())),
                refresh_delay: Duration::ZERO,
                default_attempt: true,
                attempt_calls: Arc::new(AtomicUsize::new(0)),
                refresh_calls: Arc::new(AtomicUsize::new(0)),
                release_calls: Arc::new(AtomicUsize::new(0)),
                identifiers_seen: Arc::new(StdMutex::new(Vec::new())),
            }
        }

        fn failing() -> Self {
            Self {
                default_attempt: false,
                ..Self::new()
            }
        }

        fn with_refresh_delay(mut self, delay: Duration) -> Self {
            self.refresh_delay = delay;
            self
        }

        fn queue_attempts(&self, results: Vec<LockResult<bool>>) {
            self.attempt_results.lock().unwrap().extend(results);
        }

        fn queue_refreshes(&self, results: Vec<LockResult<bool>>) {
            self.refresh_results.lock().unwrap().extend(results);
        }

        fn attempts(&self) -> usize {
            self.attempt_calls.load(Ordering::SeqCst)
        }

        fn refreshes(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }

        fn releases(&self) -> usize {
            self.release_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LockRoutine for ScriptedRoutine {
        fn kind(&self) -> &str {
            "mutex"
        }

        fn key(&self) -> &str {
            "test"
        }

        async fn attempt(&self, identifier: &str) -> LockResult<bool> {
            self.attempt_calls.fetch_add(1, Ordering::SeqCst);
            self.identifiers_seen
                .lock()
                .unwrap()
                .push(identifier.to_string());
            match self.attempt_results.lock().unwrap().pop_front() {
                Some(result) => result,
                None => Ok(self.default_attempt),
            }
        }

        async fn refresh(&self, _identifier: &str) -> LockResult<bool> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if !self.refresh_delay.is_zero() {
                sleep(self.refresh_delay).await;
            }
            match self.refresh_results.lock().unwrap().pop_front() {
                Some(result) => result,
                None => Ok(true),
            }
        }

        async fn release(&self, _identifier: &str) -> LockResult<()> {
            self.release_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn transport_error() -> LockError {
        LockError::RedisError(redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        )))
    }

    /// Options for tests that do not exercise the watchdog.
    fn no_refresh_options() -> LockOptions {
        LockOptions::default().with_refresh_interval(Duration::ZERO)
    }

    fn lost_collector(options: LockOptions) -> (LockOptions, Arc<StdMutex<Vec<String>>>) {
        let lost = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&lost);
        let options = options.with_on_lock_lost(move |err| {
            sink.lock().unwrap().push(err.to_string());
        });
        (options, lost)
    }

    #[test]
    fn test_constructor_validation_helpers() {
        assert!(validate_key("jobs").is_ok());
        assert!(matches!(validate_key(""), Err(LockError::ConfigError(_))));
        assert!(validate_count("limit", 1).is_ok());
        assert!(matches!(
            validate_count("permits", 0),
            Err(LockError::ConfigError(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_gives_up_at_deadline() {
        let routine = ScriptedRoutine::failing();
        let options = no_refresh_options()
            .with_acquire_timeout(Duration::from_millis(100))
            .with_retry_interval(Duration::from_millis(10));
        let mut lock = Lock::with_routine(routine.clone(), options).unwrap();

        let started = Instant::now();
        let acquired = lock.try_acquire().await.unwrap();

        assert!(!acquired);
        assert!(!lock.is_acquired());
        assert_eq!(routine.attempts(), 10);
        assert_eq!(started.elapsed(), Duration::from_millis(100));
        assert_eq!(routine.refreshes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_reports_timeout() {
        let routine = ScriptedRoutine::failing();
        let options = no_refresh_options()
            .with_acquire_timeout(Duration::from_millis(50))
            .with_retry_interval(Duration::from_millis(10));
        let mut lock = Lock::with_routine(routine, options).unwrap();

        let err = lock.acquire().await.unwrap_err();

        assert!(matches!(err, LockError::TimeoutError { .. }));
        assert_eq!(err.to_string(), "Acquire mutex test timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_attempts_limit() {
        let routine = ScriptedRoutine::failing();
        let options = no_refresh_options()
            .with_acquire_attempts_limit(2)
            .with_retry_interval(Duration::from_millis(10));
        let mut lock = Lock::with_routine(routine.clone(), options).unwrap();

        let started = Instant::now();
        let acquired = lock.try_acquire().await.unwrap();

        assert!(!acquired);
        assert_eq!(routine.attempts(), 2);
        assert_eq!(started.elapsed(), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_spaced_by_retry_interval() {
        let routine = ScriptedRoutine::new();
        routine.queue_attempts(vec![Ok(false), Ok(false)]);
        let options = no_refresh_options().with_retry_interval(Duration::from_millis(10));
        let mut lock = Lock::with_routine(routine.clone(), options).unwrap();

        let started = Instant::now();
        let acquired = lock.try_acquire().await.unwrap();

        assert!(acquired);
        assert_eq!(routine.attempts(), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_errors_are_retried() {
        let routine = ScriptedRoutine::new();
        routine.queue_attempts(vec![Err(transport_error())]);
        let options = no_refresh_options().with_retry_interval(Duration::from_millis(10));
        let mut lock = Lock::with_routine(routine.clone(), options).unwrap();

        let acquired = lock.try_acquire().await.unwrap();

        assert!(acquired);
        assert_eq!(routine.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adopts_externally_acquired_lock() {
        let routine = ScriptedRoutine::new();
        let options = no_refresh_options()
            .with_identifier("owner-1")
            .with_acquired_externally(true);
        let mut lock = Lock::with_routine(routine.clone(), options).unwrap();

        let acquired = lock.try_acquire().await.unwrap();

        assert!(acquired);
        assert!(lock.is_acquired());
        assert_eq!(lock.identifier(), "owner-1");
        assert_eq!(routine.attempts(), 0);
        assert_eq!(routine.refreshes(), 1);

        lock.release().await.unwrap();
        assert_eq!(routine.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_adoption_clears_external_flag() {
        let routine = ScriptedRoutine::new();
        routine.queue_refreshes(vec![Ok(false)]);
        let options = no_refresh_options()
            .with_identifier("owner-1")
            .with_acquired_externally(true);
        let mut lock = Lock::with_routine(routine.clone(), options).unwrap();

        assert!(!lock.try_acquire().await.unwrap());

        // Nothing was adopted, so there is nothing to give back.
        lock.release().await.unwrap();
        assert_eq!(routine.releases(), 0);

        // The handle now behaves like a plain lock.
        assert!(lock.try_acquire().await.unwrap());
        assert_eq!(routine.attempts(), 1);
        assert_eq!(routine.refreshes(), 1);

        lock.release().await.unwrap();
        assert_eq!(routine.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adoption_error_keeps_external_flag() {
        let routine = ScriptedRoutine::new();
        routine.queue_refreshes(vec![Err(transport_error())]);
        let options = no_refresh_options()
            .with_identifier("owner-1")
            .with_acquired_externally(true);
        let mut lock = Lock::with_routine(routine.clone(), options).unwrap();

        assert!(lock.try_acquire().await.is_err());

        // The adoption can be retried after a transport error.
        let acquired = lock.try_acquire().await.unwrap();
        assert!(acquired);
        assert_eq!(routine.attempts(), 0);
        assert_eq!(routine.refreshes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_only_releases_once() {
        let routine = ScriptedRoutine::new();
        let mut lock = Lock::with_routine(routine.clone(), no_refresh_options()).unwrap();

        assert!(lock.try_acquire().await.unwrap());
        lock.release().await.unwrap();
        lock.release().await.unwrap();

        assert!(!lock.is_acquired());
        assert_eq!(routine.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_is_reusable() {
        let routine = ScriptedRoutine::new();
        let mut lock = Lock::with_routine(routine.clone(), no_refresh_options()).unwrap();

        for _ in 0..3 {
            assert!(lock.try_acquire().await.unwrap());
            lock.release().await.unwrap();
        }

        assert_eq!(routine.attempts(), 3);
        assert_eq!(routine.releases(), 3);

        let identifiers = routine.identifiers_seen.lock().unwrap().clone();
        assert!(identifiers.iter().all(|id| id == &identifiers[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_regenerate_identifier_per_acquire() {
        let routine = ScriptedRoutine::new();
        let options = no_refresh_options().with_regenerate_identifier(true);
        let mut lock = Lock::with_routine(routine.clone(), options).unwrap();

        assert!(lock.try_acquire().await.unwrap());
        lock.release().await.unwrap();
        assert!(lock.try_acquire().await.unwrap());
        lock.release().await.unwrap();

        let identifiers = routine.identifiers_seen.lock().unwrap().clone();
        assert_eq!(identifiers.len(), 2);
        assert_ne!(identifiers[0], identifiers[1]);
        assert!(!identifiers[0].is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_refreshes_lease() {
        let routine = ScriptedRoutine::new();
        let options = LockOptions::default().with_refresh_interval(Duration::from_millis(50));
        let mut lock = Lock::with_routine(routine.clone(), options).unwrap();

        assert!(lock.try_acquire().await.unwrap());
        sleep(Duration::from_millis(175)).await;

        assert_eq!(routine.refreshes(), 3);
        assert!(lock.is_acquired());

        lock.release().await.unwrap();
        sleep(Duration::from_millis(200)).await;
        assert_eq!(routine.refreshes(), 3);
        assert_eq!(routine.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_refresh_cadence_tracks_lock_timeout() {
        let routine = ScriptedRoutine::new();
        let options = LockOptions::default().with_lock_timeout(Duration::from_millis(100));
        let mut lock = Lock::with_routine(routine.clone(), options).unwrap();

        assert!(lock.try_acquire().await.unwrap());
        // 0.8 * 100ms puts ticks at 80, 160 and 240ms.
        sleep(Duration::from_millis(250)).await;

        assert_eq!(routine.refreshes(), 3);
        lock.release().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_refresh_interval_disables_watchdog() {
        let routine = ScriptedRoutine::new();
        let mut lock = Lock::with_routine(routine.clone(), no_refresh_options()).unwrap();

        assert!(lock.try_acquire().await.unwrap());
        sleep(Duration::from_secs(1)).await;

        assert_eq!(routine.refreshes(), 0);
        assert!(lock.is_acquired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_lease_fires_callback_once() {
        let routine = ScriptedRoutine::new();
        routine.queue_refreshes(vec![Ok(true), Ok(false)]);
        let (options, lost) =
            lost_collector(LockOptions::default().with_refresh_interval(Duration::from_millis(50)));
        let mut lock = Lock::with_routine(routine.clone(), options).unwrap();

        assert!(lock.try_acquire().await.unwrap());
        sleep(Duration::from_millis(300)).await;

        assert_eq!(*lost.lock().unwrap(), ["Lost mutex for key test"]);
        assert!(!lock.is_acquired());
        // The watchdog stopped at the lost tick.
        assert_eq!(routine.refreshes(), 2);

        // Nothing is held any more, so release is a no-op.
        lock.release().await.unwrap();
        assert_eq!(routine.releases(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_errors_do_not_lose_lease() {
        let routine = ScriptedRoutine::new();
        routine.queue_refreshes(vec![Err(transport_error()), Err(transport_error())]);
        let (options, lost) =
            lost_collector(LockOptions::default().with_refresh_interval(Duration::from_millis(50)));
        let mut lock = Lock::with_routine(routine.clone(), options).unwrap();

        assert!(lock.try_acquire().await.unwrap());
        sleep(Duration::from_millis(175)).await;

        assert!(lost.lock().unwrap().is_empty());
        assert!(lock.is_acquired());
        assert_eq!(routine.refreshes(), 3);

        lock.release().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_during_inflight_refresh_suppresses_loss() {
        // The refresh that starts at 50ms only resolves at 250ms, well
        // after release() at 100ms has lowered the held flag. Its negative
        // answer must read as a deliberate release, not a lost lease.
        let routine =
            ScriptedRoutine::new().with_refresh_delay(Duration::from_millis(200));
        routine.queue_refreshes(vec![Ok(false)]);
        let (options, lost) =
            lost_collector(LockOptions::default().with_refresh_interval(Duration::from_millis(50)));
        let mut lock = Lock::with_routine(routine.clone(), options).unwrap();

        assert!(lock.try_acquire().await.unwrap());
        sleep(Duration::from_millis(100)).await;
        lock.release().await.unwrap();
        sleep(Duration::from_millis(300)).await;

        assert!(lost.lock().unwrap().is_empty());
        assert!(!lock.is_acquired());
        assert_eq!(routine.refreshes(), 1);
        assert_eq!(routine.releases(), 1);
    }
}
