// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a supervised process.
///
/// Serialized as the lowercase name on the wire. The ordinal values match the
/// numeric form older clients used, where anything above `Stopped` counts as
/// active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// Exited on its own while running; a policy layer may relaunch it.
    Respawn,
    /// Child process is alive.
    Running,
    /// Entry inserted, spawn not yet reported.
    Starting,
    /// Deliberately stopped.
    Stopped,
    /// Stop sequence in progress.
    Stopping,
    /// Spawn failed. Terminal.
    Failed,
}

impl ProcessStatus {
    pub fn ordinal(self) -> i8 {
        match self {
            ProcessStatus::Respawn => 3,
            ProcessStatus::Running => 2,
            ProcessStatus::Starting => 1,
            ProcessStatus::Stopped => 0,
            ProcessStatus::Stopping => -1,
            ProcessStatus::Failed => -2,
        }
    }

    /// Whether `delete` has to run a stop sequence before removing the entry.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ProcessStatus::Starting
                | ProcessStatus::Running
                | ProcessStatus::Stopping
                | ProcessStatus::Respawn
        )
    }

    pub(crate) fn can_transition_to(self, next: ProcessStatus) -> bool {
        use ProcessStatus::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Failed)
                | (Running, Stopping)
                | (Running, Respawn)
                | (Stopping, Stopping)
                | (Stopping, Stopped)
                | (Stopped, Stopped)
        )
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Respawn => write!(f, "respawn"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Starting => write!(f, "starting"),
            ProcessStatus::Stopped => write!(f, "stopped"),
            ProcessStatus::Stopping => write!(f, "stopping"),
            ProcessStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ProcessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "respawn" => Ok(ProcessStatus::Respawn),
            "running" => Ok(ProcessStatus::Running),
            "starting" => Ok(ProcessStatus::Starting),
            "stopped" => Ok(ProcessStatus::Stopped),
            "stopping" => Ok(ProcessStatus::Stopping),
            "failed" => Ok(ProcessStatus::Failed),
            other => Err(format!("{other:?} is not a valid status")),
        }
    }
}
