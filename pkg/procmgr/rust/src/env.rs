// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use log::warn;

/// Split `KEY=VALUE` entries into pairs. The value keeps any further `=`.
/// Entries without `=` or with an empty key are skipped.
pub fn parse_env_list(entries: &[String]) -> Vec<(String, String)> {
    let mut vars = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry.split_once('=') {
            Some((key, val)) if !key.is_empty() => {
                vars.push((key.to_string(), val.to_string()));
            }
            _ => warn!("skipping malformed environment entry: {entry:?}"),
        }
    }
    vars
}
