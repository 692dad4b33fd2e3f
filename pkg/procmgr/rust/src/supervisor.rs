// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::SupervisorError;
use crate::process::{LaunchSpec, ManagedProcess};
use crate::protocol::{ProcessSummary, StartProcessParams};
use crate::relay::{DEFAULT_RELAY_CAPACITY, StreamRelay};
use crate::shutdown::{shutdown_all, stop_process};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Everything needed to add a process to the table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartRequest {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub spec: LaunchSpec,
}

impl From<StartProcessParams> for StartRequest {
    fn from(p: StartProcessParams) -> Self {
        Self {
            name: p.name,
            namespace: p.namespace,
            spec: LaunchSpec {
                exec: p.exec,
                args: p.args,
                env: p.env,
                cwd: p.cwd,
            },
        }
    }
}

/// The process table. Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct Supervisor {
    processes: Arc<Mutex<HashMap<String, Arc<ManagedProcess>>>>,
    relay_capacity: usize,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_CAPACITY)
    }
}

impl Supervisor {
    pub fn new(relay_capacity: usize) -> Self {
        Self {
            processes: Arc::new(Mutex::new(HashMap::new())),
            relay_capacity,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<ManagedProcess>>> {
        self.processes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lookup(&self, id: &str) -> Result<Arc<ManagedProcess>, SupervisorError> {
        self.table()
            .get(id)
            .cloned()
            .ok_or_else(|| SupervisorError::NotFound { id: id.to_string() })
    }

    /// Add a process and spawn it.
    ///
    /// A spawn failure leaves the entry in the table as `Failed`.
    pub fn start(&self, req: StartRequest) -> Result<ProcessSummary, SupervisorError> {
        let mut table = self.table();
        let id = next_id(&table);
        let proc = Arc::new(ManagedProcess::new(
            id.clone(),
            req.name,
            req.namespace,
            req.spec,
            self.relay_capacity,
        ));
        table.insert(id, Arc::clone(&proc));

        // The entry's state is locked before it becomes visible and stays locked
        // until the child is attached or the spawn has failed.
        let mut state = proc.state();
        drop(table);

        debug!("[{}] starting {} {:?}", proc.id, proc.spec.exec, proc.spec.args);
        let spawned = proc.spawn_attached(&mut state);
        drop(state);

        proc.serve(spawned?);
        Ok(proc.summary())
    }

    /// Interrupt the process, escalating to a kill after the grace period.
    pub async fn stop(&self, id: &str) -> Result<(), SupervisorError> {
        let proc = self.lookup(id)?;
        stop_process(&proc).await
    }

    /// Stop the process if it is still active, close its relays and forget it.
    pub async fn delete(&self, id: &str) -> Result<(), SupervisorError> {
        let proc = self.lookup(id)?;

        if proc.status().is_active() {
            match stop_process(&proc).await {
                Ok(()) => {}
                // A `Respawn` entry is active but has nothing attached.
                Err(SupervisorError::NotAttached { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        proc.close_relays();
        let mut table = self.table();
        if table.get(id).is_some_and(|cur| Arc::ptr_eq(cur, &proc)) {
            table.remove(id);
        }
        info!("[{id}] deleted");
        Ok(())
    }

    /// Snapshot of every entry, ordered by id.
    pub fn list(&self) -> Vec<ProcessSummary> {
        let procs: Vec<Arc<ManagedProcess>> = self.table().values().cloned().collect();
        let mut summaries: Vec<ProcessSummary> = procs.iter().map(|p| p.summary()).collect();
        summaries.sort_by_key(|s| (s.id.parse::<u64>().unwrap_or(u64::MAX), s.id.clone()));
        summaries
    }

    pub fn get(&self, id: &str) -> Result<ProcessSummary, SupervisorError> {
        Ok(self.lookup(id)?.summary())
    }

    /// Combined stdout/stderr relay of a process.
    pub fn output_relay(&self, id: &str) -> Result<StreamRelay, SupervisorError> {
        Ok(self.lookup(id)?.output_relay().clone())
    }

    /// Relay feeding a process's stdin.
    pub fn input_relay(&self, id: &str) -> Result<StreamRelay, SupervisorError> {
        Ok(self.lookup(id)?.input_relay().clone())
    }

    /// Stop every attached process and close all relays. Entries stay listed.
    pub async fn shutdown(&self) {
        let procs: Vec<Arc<ManagedProcess>> = self.table().values().cloned().collect();
        info!("shutting down {} process(es)", procs.len());
        shutdown_all(procs.clone()).await;
        for proc in &procs {
            proc.close_relays();
        }
    }
}

/// One past the largest numeric id, `0` for an empty table.
fn next_id(table: &HashMap<String, Arc<ManagedProcess>>) -> String {
    table
        .keys()
        .filter_map(|k| k.parse::<u64>().ok())
        .max()
        .map_or(0, |max| max + 1)
        .to_string()
}
