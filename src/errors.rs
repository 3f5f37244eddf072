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

use redis::RedisError;
use thiserror::Error;

pub type LockResult<T> = std::result::Result<T, LockError>;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Redis error: {0}")]
    RedisError(#[from] RedisError),

    /// Acquisition did not succeed within the configured deadline or
    /// attempt budget. `try_acquire` reports this as `Ok(false)` instead.
    #[error("Acquire {kind} {key} timeout")]
    TimeoutError { kind: String, key: String },

    /// A held lease was confirmed gone during background renewal. Delivered
    /// through the `on_lock_lost` callback, never as a method return value.
    #[error("Lost {kind} for key {key}")]
    LostLockError { kind: String, key: String },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl LockError {
    pub(crate) fn timeout(kind: &str, key: &str) -> Self {
        LockError::TimeoutError {
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }

    pub(crate) fn lost(kind: &str, key: &str) -> Self {
        LockError::LostLockError {
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }
}
