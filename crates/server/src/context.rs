use std::sync::Arc;
use std::time::Duration;

use systek_executor::CommandExecutor;
use systek_net::LogSink;

use crate::auth::Authenticator;
use crate::registry::MachineRegistry;

/// Everything a server needs, built once at startup and handed around.
pub struct ServerContext {
    pub registry: Arc<MachineRegistry>,
    pub auth: Arc<Authenticator>,
    pub executor: Arc<dyn CommandExecutor>,
    pub sink: Arc<dyn LogSink>,
}

impl ServerContext {
    pub fn new(
        auth: Authenticator,
        executor: Arc<dyn CommandExecutor>,
        sink: Arc<dyn LogSink>,
        prune_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: MachineRegistry::new(prune_interval, sink.clone()),
            auth: Arc::new(auth),
            executor,
            sink,
        })
    }
}
