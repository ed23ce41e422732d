//! Wires the server together and runs it until Ctrl-C.

use std::sync::Arc;

use systek_executor::ProcessExecutor;
use systek_net::{LogSink, TracingSink};
use systek_server::{Authenticator, MachineListener, ServerContext};

use crate::config::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let sink: Arc<dyn LogSink> = Arc::new(TracingSink);

    let store = config.machine_store()?;
    if config.auth_key.is_empty() && store.is_empty() {
        tracing::warn!("no auth keys configured, no agent will authenticate");
    }

    let auth = Authenticator::new(&config.auth_key, Arc::new(store));
    let ctx = ServerContext::new(
        auth,
        Arc::new(ProcessExecutor::default()),
        sink,
        config.prune_interval(),
    );

    let listener = MachineListener::new(config.listener(), ctx);
    let runner = Arc::clone(&listener);
    let mut task = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
        result = &mut task => {
            result??;
            return Ok(());
        }
    }

    listener.shutdown();
    task.await??;
    Ok(())
}
