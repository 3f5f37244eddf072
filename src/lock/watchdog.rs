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

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Background task that keeps a held lease alive by invoking a renew
/// closure on a fixed cadence until stopped or until the closure reports
/// that the lease is gone.
pub(crate) struct RefreshWatchdog {
    stop_tx: watch::Sender<()>,
}

impl RefreshWatchdog {
    pub(crate) fn spawn<F, Fut>(refresh_interval: Duration, renew_func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(());

        tokio::spawn(async move {
            // The lease was just acquired at full length, so the first
            // renewal is only due after one whole interval.
            let mut interval = interval_at(Instant::now() + refresh_interval, refresh_interval);
            // A renewal that overruns its slot must not be followed by a
            // burst of catch-up renewals.
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        // An in-flight renewal always runs to completion;
                        // a stop signal is only observed between renewals.
                        if !renew_func().await {
                            break;
                        }
                    }
                    _ = stop_rx.changed() => {
                        break;
                    }
                }
            }
        });

        Self { stop_tx }
    }

    /// Tells the task to exit after any renewal currently in flight.
    /// Never blocks on the task itself.
    pub(crate) fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for RefreshWatchdog {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
