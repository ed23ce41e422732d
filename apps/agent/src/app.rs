//! Wires the agent together and runs it until Ctrl-C.

use std::sync::Arc;

use systek_agent::{AgentDispatcher, AgentState, Supervisor};
use systek_executor::ProcessExecutor;
use systek_net::{LogSink, MessageHandler, TracingSink};

use crate::config::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let sink: Arc<dyn LogSink> = Arc::new(TracingSink);

    let state = Arc::new(AgentState::new(&config.hostname, &config.auth_key));
    state.replace_services(config.services.clone()).await;

    if config.auth_key.is_empty() {
        tracing::warn!("no auth_key configured, the server will not authenticate this agent");
    }

    let handler: Arc<dyn MessageHandler> = Arc::new(AgentDispatcher::new(
        state,
        Arc::new(ProcessExecutor::default()),
        sink.clone(),
    ));
    let supervisor = Supervisor::new(config.supervisor(), handler, sink);

    let runner = Arc::clone(&supervisor);
    let mut task = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
        result = &mut task => {
            result?;
            return Ok(());
        }
    }

    supervisor.shutdown().await;
    task.await?;
    Ok(())
}
