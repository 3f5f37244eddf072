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

use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};

use super::{validate_key, Lock, LockRoutine};
use crate::config::LockOptions;
use crate::errors::LockResult;
use crate::scripts::{MUTEX_REFRESH_SCRIPT, MUTEX_RELEASE_SCRIPT};
use crate::util::num_milliseconds;

/// Exclusive distributed lock over one string key.
///
/// The storage key is `mutex:<key>`; its value is the holder identifier and
/// its TTL is the lease. Acquisition is a plain `SET NX PX`; refresh and
/// release are server-side scripts that check the identifier first.
pub type Mutex<C = ConnectionManager> = Lock<MutexRoutine<C>>;

pub struct MutexRoutine<C> {
    connection: C,
    key: String,
    lock_timeout_ms: u64,
}

impl<C> MutexRoutine<C> {
    pub(crate) fn new(connection: C, key: &str, options: &LockOptions) -> Self {
        Self {
            connection,
            key: format!("mutex:{key}"),
            lock_timeout_ms: num_milliseconds(&options.lock_timeout),
        }
    }
}

#[async_trait]
impl<C> LockRoutine for MutexRoutine<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    fn kind(&self) -> &str {
        "mutex"
    }

    fn key(&self) -> &str {
        &self.key
    }

    async fn attempt(&self, identifier: &str) -> LockResult<bool> {
        let mut connection = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(identifier)
            .arg("PX")
            .arg(self.lock_timeout_ms)
            .arg("NX")
            .query_async(&mut connection)
            .await?;
        Ok(reply.is_some())
    }

    async fn refresh(&self, identifier: &str) -> LockResult<bool> {
        let mut connection = self.connection.clone();
        let refreshed: i64 = MUTEX_REFRESH_SCRIPT
            .key(&self.key)
            .arg(identifier)
            .arg(self.lock_timeout_ms)
            .invoke_async(&mut connection)
            .await?;
        Ok(refreshed == 1)
    }

    async fn release(&self, identifier: &str) -> LockResult<()> {
        let mut connection = self.connection.clone();
        let _: i64 = MUTEX_RELEASE_SCRIPT
            .key(&self.key)
            .arg(identifier)
            .invoke_async(&mut connection)
            .await?;
        Ok(())
    }
}

impl<C> Lock<MutexRoutine<C>>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    /// Creates a mutex guarding `key`.
    pub fn new(connection: C, key: impl Into<String>, options: LockOptions) -> LockResult<Self> {
        let key = key.into();
        validate_key(&key)?;
        Lock::with_routine(MutexRoutine::new(connection, &key, &options), options)
    }
}
