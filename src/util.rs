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
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Random fencing identifier, optionally tagged with a caller-supplied
/// suffix for log attribution.
pub fn get_lock_id(suffix: Option<&str>) -> String {
    let uuid = Uuid::new_v4().to_string();
    match suffix {
        Some(suffix) => format!("{uuid}-{suffix}"),
        None => uuid,
    }
}

pub fn num_milliseconds(duration: &Duration) -> u64 {
    duration.as_millis() as u64
}

/// Caller-clock timestamp in milliseconds since the UNIX epoch. Scores and
/// expiry cutoffs are always computed from the client's clock, never the
/// server's.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Majority quorum for `n` independent nodes.
pub fn calculate_quorum(n: usize) -> usize {
    n / 2 + 1
}
