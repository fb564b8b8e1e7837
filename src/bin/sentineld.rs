use std::sync::Arc;

use clap::Parser;
use node_sentinel::{
    actors::egress::EgressHandle,
    actors::recovery::{RECOVERY_MODULE, RecoveryHandle},
    bus::HttpBus,
    config::{Config, read_config_file},
    dedup::{AlertGate, DedupStore},
    envelope::THREAD_CONTROLLER_TAG,
    mailbox::MailboxRegistry,
    modules::{build_module, service_watchdog},
    router::IngressRouter,
    runtime::ModuleRuntime,
    store::{MemoryStore, RetryingStore},
    util::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY},
};
use tracing::{debug, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("node_sentinel", LevelFilter::TRACE),
        ("sentineld", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let mailboxes = MailboxRegistry::new();

    let store = Arc::new(RetryingStore::new(
        MemoryStore::new(),
        DEFAULT_RETRY_ATTEMPTS,
        DEFAULT_RETRY_DELAY,
    ));
    let bus = Arc::new(HttpBus::new(config.bus_endpoint.as_str())?);

    let egress = EgressHandle::spawn(
        bus,
        store.clone(),
        config.node.clone(),
        config.signature.clone(),
    );
    let gate = AlertGate::new(DedupStore::new(store), egress.clone());

    let mut runtime = ModuleRuntime::new(mailboxes.clone(), gate.clone());

    let recovery_rx = mailboxes.register(RECOVERY_MODULE)?;
    let recovery = RecoveryHandle::spawn(runtime.controller(), gate, egress.clone(), recovery_rx);

    // Fail fast on unknown module names, before anything starts.
    for name in module_names(&config) {
        let module = build_module(&name, &config)?;
        runtime.register(module, vec![], config.module(&name))?;
    }

    let router = build_router(&config, mailboxes, egress.clone())?;

    runtime.start_all(recovery.clone()).await?;
    info!("sentineld up, {} routes", router.routes().count());

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    runtime.shutdown().await;
    recovery.shutdown().await;
    // Waits for the pipeline's final flush, so backlogged alerts get one
    // last delivery attempt before the process exits.
    egress.shutdown().await;
    debug!("sentineld stopped");
    Ok(())
}

fn module_names(config: &Config) -> Vec<String> {
    let mut names: Vec<String> = config.modules.keys().cloned().collect();
    if !config.services.is_empty() && !names.iter().any(|n| n == service_watchdog::MODULE_NAME) {
        names.push(service_watchdog::MODULE_NAME.to_string());
    }
    names.sort();
    names
}

/// Routing table for inbound control/query envelopes. Every route target
/// must already own a mailbox.
fn build_router(
    config: &Config,
    mailboxes: MailboxRegistry,
    egress: EgressHandle,
) -> anyhow::Result<IngressRouter> {
    let mut router = IngressRouter::new(mailboxes, egress);
    router.add_route(THREAD_CONTROLLER_TAG, RECOVERY_MODULE)?;
    if !config.services.is_empty() {
        router.add_route(
            service_watchdog::SERVICE_QUERY_TAG,
            service_watchdog::MODULE_NAME,
        )?;
    }
    Ok(router)
}
