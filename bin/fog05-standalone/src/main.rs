// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runs a controller and a set of simulated node agents in one process,
//! sharing an in-memory store, and drives FDU manifests through them.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use fog05::manifest::{self, Schema};
use fog05::{Controller, WaitPolicy};
use fog05_api_types::{EntityDescriptor, FduDescriptor};
use serde::de::DeserializeOwned;
use slog::{error, info, warn, Logger};
use uuid::Uuid;

mod cluster;

fn parse_log_level(s: &str) -> anyhow::Result<slog::Level> {
    s.parse().map_err(|_| anyhow::anyhow!("Invalid log level"))
}

#[derive(Debug, Parser)]
#[clap(about, version)]
/// A single-process fog05 system with simulated nodes
struct Args {
    /// Node inventory and controller settings.
    #[clap(value_name = "CONFIG", action)]
    config: PathBuf,

    /// FDU manifest (JSON) to onboard and instantiate on an eligible node.
    /// May be repeated.
    #[clap(long, action)]
    fdu: Vec<PathBuf>,

    /// Application manifest (JSON) to deploy in dependency order.
    #[clap(long, action)]
    entity: Option<PathBuf>,

    /// Live-migrate every instantiated FDU to another eligible node.
    #[clap(long, action)]
    migrate: bool,

    /// Keep everything running until interrupted instead of tearing down.
    #[clap(long, action)]
    hold: bool,

    /// Logging level
    #[clap(
        long,
        default_value_t = slog::Level::Info,
        value_parser = parse_log_level
    )]
    log_level: slog::Level,
}

fn build_logger(level: slog::Level) -> slog::Logger {
    use slog::Drain;

    let main_drain = if atty::is(atty::Stream::Stdout) {
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        slog_async::Async::new(drain)
            .overflow_strategy(slog_async::OverflowStrategy::Block)
            .build_no_guard()
    } else {
        let drain =
            slog_bunyan::with_name("fog05-standalone", std::io::stdout())
                .build()
                .fuse();
        slog_async::Async::new(drain)
            .overflow_strategy(slog_async::OverflowStrategy::Block)
            .build_no_guard()
    };

    let filtered_main = slog::LevelFilter::new(main_drain, level);
    slog::Logger::root(filtered_main.fuse(), slog::o!())
}

/// Reads a JSON manifest and checks it against `schema` before decoding.
fn load_manifest<T: DeserializeOwned>(
    path: &Path,
    schema: impl FnOnce(&serde_json::Value) -> anyhow::Result<Schema>,
) -> anyhow::Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&contents)
        .with_context(|| format!("parsing {}", path.display()))?;
    let schema = schema(&value)?;
    manifest::validate(schema, &value)
        .with_context(|| format!("validating {}", path.display()))?;
    Ok(serde_json::from_value(value)?)
}

fn fdu_schema(value: &serde_json::Value) -> anyhow::Result<Schema> {
    let hypervisor = value
        .get("hypervisor")
        .and_then(|h| h.as_str())
        .context("FDU manifest names no hypervisor")?;
    Schema::for_hypervisor(hypervisor).with_context(|| {
        format!("hypervisor {hypervisor:?} matches no FDU schema")
    })
}

/// What the scenario created and must remove again.
#[derive(Default)]
struct Deployment {
    fdus: Vec<Uuid>,
    instances: Vec<(Uuid, Uuid)>,
    entity: Option<Uuid>,
}

async fn deploy(
    ctl: &Controller,
    args: &Args,
    log: &Logger,
) -> anyhow::Result<Deployment> {
    let mut deployment = Deployment::default();

    for path in &args.fdu {
        let fdu: FduDescriptor = load_manifest(path, fdu_schema)?;
        ctl.onboard(&fdu).await?;
        deployment.fdus.push(fdu.uuid);

        let (node, instance) = ctl.instantiate_anywhere(fdu.uuid).await?;
        info!(log, "instance running"; "fdu" => &fdu.name,
              "instance_id" => %instance, "node_id" => %node);
        deployment.instances.push((fdu.uuid, instance));
    }

    if args.migrate {
        for &(fdu_id, instance) in &deployment.instances {
            let current = ctl.instance_info(instance).await?.node;
            let target = ctl
                .eligible_nodes(fdu_id)
                .await?
                .into_iter()
                .find(|n| *n != current);
            let Some(target) = target else {
                warn!(log, "no other eligible node; not migrating";
                      "instance_id" => %instance);
                continue;
            };
            let landed = ctl.migrate(instance, target).await?;
            info!(log, "instance migrated"; "instance_id" => %instance,
                  "from" => %current, "to" => %landed.node);
        }
    }

    if let Some(path) = &args.entity {
        let entity: EntityDescriptor =
            load_manifest(path, |_| Ok(Schema::Entity))?;
        for component in ctl.deploy_entity(&entity).await? {
            info!(log, "component running"; "entity" => &entity.name,
                  "component" => &component.name,
                  "instance_id" => %component.instance,
                  "node_id" => %component.node);
        }
        deployment.entity = Some(entity.uuid);
    }

    Ok(deployment)
}

async fn tear_down(
    ctl: &Controller,
    deployment: Deployment,
) -> anyhow::Result<()> {
    if let Some(entity) = deployment.entity {
        ctl.undeploy_entity(entity).await?;
    }
    for (_, instance) in deployment.instances {
        ctl.terminate(instance).await?;
    }
    for fdu in deployment.fdus {
        ctl.offload(fdu).await?;
    }
    Ok(())
}

async fn run(args: Args, log: Logger) -> anyhow::Result<()> {
    let config = fog05_config::parse(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    anyhow::ensure!(
        !config.nodes.is_empty(),
        "configuration declares no nodes"
    );

    let policy = WaitPolicy {
        timeout: config.controller.transition_timeout(),
        poll_interval: config.controller.poll_interval(),
    };
    let cluster = cluster::Cluster::start(&config, policy, &log).await?;
    let ctl = cluster.controller();

    let outcome = match deploy(ctl, &args, &log).await {
        Ok(deployment) => {
            if args.hold {
                info!(log, "holding; interrupt to tear down");
                tokio::signal::ctrl_c().await?;
            }
            tear_down(ctl, deployment).await
        }
        Err(e) => Err(e),
    };

    cluster.shutdown().await;
    outcome
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log = build_logger(args.log_level);

    let rt =
        tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let result = rt.block_on(run(args, log.clone()));
    if let Err(e) = &result {
        error!(log, "standalone run failed"; "error" => format!("{e:#}"));
    }
    result
}
