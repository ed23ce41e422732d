//! Set of live machines with lazy background pruning.
//!
//! The prune task starts on the first `add`, removes machines whose link is
//! down every `prune_interval`, and exits once the registry is empty. The
//! next `add` starts it again.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use systek_net::LogSink;
use systek_protocol::{AreaType, LogLevel};

use crate::machine::{Machine, MachineId};

pub struct MachineRegistry {
    machines: RwLock<HashMap<MachineId, Arc<Machine>>>,
    prune_interval: Duration,
    pruning: AtomicBool,
    sink: Arc<dyn LogSink>,
    cancel: CancellationToken,
}

impl MachineRegistry {
    pub fn new(prune_interval: Duration, sink: Arc<dyn LogSink>) -> Arc<Self> {
        Arc::new(Self {
            machines: RwLock::new(HashMap::new()),
            prune_interval,
            pruning: AtomicBool::new(false),
            sink,
            cancel: CancellationToken::new(),
        })
    }

    /// Registers a machine and makes sure the prune task is running.
    pub async fn add(self: &Arc<Self>, machine: Arc<Machine>) {
        let id = machine.id();
        let count = {
            let mut machines = self.machines.write().await;
            machines.insert(id, machine);
            machines.len()
        };
        self.sink.write(
            LogLevel::Info,
            AreaType::ServerTcpListener,
            Some(id),
            &format!("machine registered, {count} connected"),
        );
        self.ensure_pruning();
    }

    pub async fn remove(&self, id: MachineId) -> Option<Arc<Machine>> {
        self.machines.write().await.remove(&id)
    }

    pub async fn get(&self, id: MachineId) -> Option<Arc<Machine>> {
        self.machines.read().await.get(&id).cloned()
    }

    pub async fn find_by_hostname(&self, hostname: &str) -> Option<Arc<Machine>> {
        let machines: Vec<Arc<Machine>> = self.machines.read().await.values().cloned().collect();
        for machine in machines {
            if machine.state().hostname().await == hostname {
                return Some(machine);
            }
        }
        None
    }

    /// Registered ids in ascending order.
    pub async fn ids(&self) -> Vec<MachineId> {
        let mut ids: Vec<_> = self.machines.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn len(&self) -> usize {
        self.machines.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.machines.read().await.is_empty()
    }

    /// Returns `true` while the background prune task is alive.
    pub fn is_pruning(&self) -> bool {
        self.pruning.load(Ordering::SeqCst)
    }

    /// Removes every machine whose link is down and returns their ids.
    pub async fn prune(&self) -> Vec<MachineId> {
        let mut machines = self.machines.write().await;
        self.prune_locked(&mut machines)
    }

    fn prune_locked(&self, machines: &mut HashMap<MachineId, Arc<Machine>>) -> Vec<MachineId> {
        let mut removed: Vec<MachineId> = machines
            .iter()
            .filter(|(_, m)| !m.is_connected())
            .map(|(id, _)| *id)
            .collect();
        removed.sort_unstable();
        for id in &removed {
            machines.remove(id);
            self.sink.write(
                LogLevel::Info,
                AreaType::ServerMachine,
                Some(*id),
                &format!("machine pruned, {} connected", machines.len()),
            );
        }
        removed
    }

    fn ensure_pruning(self: &Arc<Self>) {
        if self.pruning.swap(true, Ordering::SeqCst) {
            return;
        }
        let registry = Arc::clone(self);
        tokio::spawn(async move { registry.prune_loop().await });
    }

    async fn prune_loop(&self) {
        tracing::debug!("prune task started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.pruning.store(false, Ordering::SeqCst);
                    break;
                }
                _ = tokio::time::sleep(self.prune_interval) => {}
            }

            let mut machines = self.machines.write().await;
            self.prune_locked(&mut machines);
            // The flag only drops under the write lock that add() inserts under.
            if machines.is_empty() {
                self.pruning.store(false, Ordering::SeqCst);
                break;
            }
        }
        tracing::debug!("prune task finished");
    }

    /// Stops pruning and closes every machine.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let machines: Vec<Arc<Machine>> = self
            .machines
            .write()
            .await
            .drain()
            .map(|(_, m)| m)
            .collect();
        for machine in machines {
            machine.close().await;
        }
    }
}
