fn main() {
    println!("Run `cargo test -p fleet-e2e` to execute the fleet end-to-end tests.");
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use systek_agent::{AgentDispatcher, AgentState, Supervisor, SupervisorConfig};
    use systek_executor::{
        CommandExecutor, ExecFuture, Execution, ProcessExecutor, run_command_set,
    };
    use systek_net::{
        Connection, ConnectionConfig, HandlerFuture, Link, LogSink, MemorySink, MessageHandler,
        run_event_pump,
    };
    use systek_protocol::{
        AreaType, Command, CommandSet, CommandStatus, CommandType, LogLevel, MessageType,
        ServiceState, WireMessage,
    };
    use systek_server::{
        Authenticator, ListenerConfig, MachineListener, MemoryMachineStore, ServerContext,
    };
    use tokio::net::TcpListener;

    const SECRET: &str = "fleet-secret";

    /// Echoes the command text back as its only output line.
    struct EchoExecutor;

    impl CommandExecutor for EchoExecutor {
        fn execute<'a>(&'a self, command: &'a Command) -> ExecFuture<'a> {
            Box::pin(async move { Ok(Execution::success(vec![command.text.clone()])) })
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<WireMessage>>,
    }

    impl MessageHandler for Recorder {
        fn handle<'a>(&'a self, _link: &'a dyn Link, msg: WireMessage) -> HandlerFuture<'a> {
            Box::pin(async move { self.seen.lock().unwrap().push(msg) })
        }
    }

    async fn eventually<F, Fut>(what: &str, mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let reached = tokio::time::timeout(Duration::from_secs(10), async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "timed out waiting for: {what}");
    }

    struct Fleet {
        listener: Arc<MachineListener>,
        addr: SocketAddr,
        server_log: Arc<MemorySink>,
    }

    async fn start_server(executor: Arc<dyn CommandExecutor>) -> Fleet {
        let server_log = Arc::new(MemorySink::new());
        let store = MemoryMachineStore::new();
        store.insert("db01", "db-only-key");
        let ctx = ServerContext::new(
            Authenticator::new(SECRET, Arc::new(store)),
            executor,
            server_log.clone(),
            Duration::from_millis(100),
        );

        let mut config = ListenerConfig::new(0);
        config.bind_addr = ([127, 0, 0, 1], 0).into();
        config.connection.sync_timeout = Duration::from_secs(3);
        let listener = MachineListener::new(config, ctx);
        let runner = listener.clone();
        tokio::spawn(async move { runner.run().await });

        let addr = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(addr) = listener.local_addr().await {
                    return addr;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("listener bound");
        Fleet {
            listener,
            addr,
            server_log,
        }
    }

    fn start_agent(
        addr: SocketAddr,
        hostname: &str,
        key: &str,
    ) -> (Arc<Supervisor>, Arc<AgentState>, Arc<MemorySink>) {
        let agent_log = Arc::new(MemorySink::new());
        let state = Arc::new(AgentState::new(hostname, key));
        let handler = Arc::new(AgentDispatcher::new(
            state.clone(),
            Arc::new(EchoExecutor),
            agent_log.clone(),
        ));
        let config = SupervisorConfig {
            reconnect_interval: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(1),
            ..SupervisorConfig::new(addr.to_string())
        };
        let supervisor = Supervisor::new(config, handler, agent_log.clone());
        let runner = supervisor.clone();
        tokio::spawn(async move { runner.run().await });
        (supervisor, state, agent_log)
    }

    fn single_command_set(id: i32, text: &str) -> CommandSet {
        let mut set = CommandSet::new(id, 1);
        set.add_command(Command::new(id, 1, CommandType::Console, text))
            .unwrap();
        set
    }

    #[tokio::test]
    async fn command_crosses_the_wire_unchanged() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (a, _a_events) =
            Connection::connect(addr, ConnectionConfig::default(), Duration::from_secs(1))
                .await
                .unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let (b, b_events) = Connection::new(stream, ConnectionConfig::default());
        a.initialize().await.unwrap();
        b.initialize().await.unwrap();

        let recorder = Arc::new(Recorder::default());
        let b: Arc<dyn Link> = Arc::new(b);
        let sink: Arc<dyn LogSink> = Arc::new(MemorySink::new());
        tokio::spawn(run_event_pump(b_events, b, recorder.clone(), sink, None));

        let sent = WireMessage::command(single_command_set(1, "echo hi"));
        a.send(sent.clone()).await.unwrap();

        eventually("COMMAND delivered", || {
            let r = recorder.clone();
            async move { !r.seen.lock().unwrap().is_empty() }
        })
        .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![sent]);
    }

    #[tokio::test]
    async fn agent_authenticates_and_runs_commands() {
        let fleet = start_server(Arc::new(EchoExecutor)).await;
        let (supervisor, state, _agent_log) = start_agent(fleet.addr, "web01", SECRET);
        state.set_service("sshd", ServiceState::Running).await;

        let registry = fleet.listener.context().registry.clone();
        eventually("web01 authenticated", || {
            let registry = registry.clone();
            async move {
                match registry.find_by_hostname("web01").await {
                    Some(m) => m.is_authenticated(),
                    None => false,
                }
            }
        })
        .await;
        let machine = registry.find_by_hostname("web01").await.unwrap();

        let reply = machine
            .send_command_set(single_command_set(7, "uptime"))
            .await
            .unwrap();
        assert_eq!(reply.msg_type, MessageType::Success);
        assert_eq!(reply.command_set_id, 7);
        let executed = reply.command_set.unwrap();
        assert_eq!(executed.get(1).unwrap().status(), CommandStatus::Success);
        assert_eq!(executed.get(1).unwrap().output(), ["uptime"]);

        assert!(machine.refresh_services().await.unwrap());
        assert_eq!(
            machine.state().services().await.get("sshd"),
            Some(&ServiceState::Running.code())
        );

        supervisor.shutdown().await;
        fleet.listener.shutdown();
    }

    #[tokio::test]
    async fn agent_log_lines_reach_the_server_sink() {
        let fleet = start_server(Arc::new(EchoExecutor)).await;
        let (supervisor, _state, _agent_log) = start_agent(fleet.addr, "web01", SECRET);

        let server_log = fleet.server_log.clone();
        eventually("authenticated", || {
            let log = server_log.clone();
            async move { log.contains("web01 authenticated") }
        })
        .await;

        let conn = supervisor.connection().await.unwrap();
        let reply = conn
            .send_sync(
                WireMessage::log(LogLevel::Warning, AreaType::AgentMessageHandler, "disk 93%"),
                Duration::from_secs(3),
            )
            .await
            .unwrap();
        assert_eq!(reply.msg_type, MessageType::Ack);

        let record = fleet
            .server_log
            .records()
            .into_iter()
            .find(|r| r.message == "disk 93%")
            .unwrap();
        assert_eq!(record.level, LogLevel::Warning);
        assert_eq!(record.area, AreaType::AgentMessageHandler);
        assert!(record.server_id.is_some());

        supervisor.shutdown().await;
        fleet.listener.shutdown();
    }

    #[tokio::test]
    async fn per_host_key_overrides_shared_secret() {
        let fleet = start_server(Arc::new(EchoExecutor)).await;
        let (supervisor, _state, _agent_log) = start_agent(fleet.addr, "db01", SECRET);

        let server_log = fleet.server_log.clone();
        eventually("authentication rejected", || {
            let log = server_log.clone();
            async move { log.contains("authentication failed for 'db01'") }
        })
        .await;

        let machine = fleet
            .listener
            .context()
            .registry
            .find_by_hostname("db01")
            .await
            .unwrap();
        assert!(!machine.is_authenticated());
        assert!(machine.send_command_set(single_command_set(1, "id")).await.is_err());

        supervisor.shutdown().await;
        fleet.listener.shutdown();
    }

    #[tokio::test]
    async fn agent_reconnects_after_server_drops_it() {
        let fleet = start_server(Arc::new(EchoExecutor)).await;
        let (supervisor, _state, agent_log) = start_agent(fleet.addr, "web01", SECRET);
        let registry = fleet.listener.context().registry.clone();

        eventually("first session", || {
            let registry = registry.clone();
            async move {
                registry
                    .get(1)
                    .await
                    .is_some_and(|m| m.is_authenticated())
            }
        })
        .await;

        registry.get(1).await.unwrap().close().await;

        eventually("second session replaces the first", || {
            let registry = registry.clone();
            async move {
                let ids = registry.ids().await;
                ids == vec![2]
                    && registry
                        .get(2)
                        .await
                        .is_some_and(|m| m.is_authenticated())
            }
        })
        .await;
        assert!(agent_log.contains("server closed the session"));
        assert!(supervisor.attempts() >= 2);

        supervisor.shutdown().await;
        fleet.listener.shutdown();
    }

    #[tokio::test]
    async fn supervisor_against_closed_port_logs_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (supervisor, _state, agent_log) = start_agent(addr, "web01", SECRET);
        eventually("five failed attempts", || {
            let s = supervisor.clone();
            async move { s.failures() >= 5 }
        })
        .await;
        supervisor.shutdown().await;

        assert_eq!(agent_log.count(LogLevel::Error), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_executor_runs_a_real_shell_command() {
        let mut set = single_command_set(3, "echo hi");
        let outcome = run_command_set(&mut set, &ProcessExecutor::default()).await;
        assert_eq!(outcome, systek_executor::SetOutcome::Succeeded);
        assert_eq!(set.get(1).unwrap().output(), ["hi"]);
    }
}
