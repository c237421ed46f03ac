//! alba-demo CLI - Main entry point.

use std::sync::Arc;

use alba_demo::cli::{Cli, Commands, PackageArgs};
use alba_demo::cluster::claims::{self, local_ip};
use alba_demo::cluster::smoke::fuser_needs_sudo;
use alba_demo::cluster::{
    ClaimSelector, ClusterBringup, ClusterContext, ClusterTeardown, FuserInspector, GatewayFleet,
    LoopDevices, SmokeCheck, StorageFleet,
};
use alba_demo::config::OrchestratorConfig;
use alba_demo::output;
use alba_demo::packaging::{PackageFormat, PackageVersions, PackagedIntegrationTest, JUNIT_FILE};
use alba_demo::poller::PollConfig;
use alba_demo::process::{CommandRunner, SystemRunner};
use alba_demo::tls::CertificateAuthority;
use alba_demo::types::{ClaimState, NodeRole, RunPrefix};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    let mut config = match &cli.config {
        Some(path) => OrchestratorConfig::from_file(path)?,
        None => OrchestratorConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }
    config.observability.json_logs |= cli.json_logs;
    alba_demo::observability::init(&config.observability)?;

    if let Err(e) = run(cli.command, config).await {
        output::error(format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}

async fn run(command: Commands, config: OrchestratorConfig) -> anyhow::Result<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
    let ctx = ClusterContext::new(config.env.clone(), Arc::clone(&runner));

    match command {
        Commands::ArakoonStart { topology } => {
            let topology = topology.topology();
            topology.validate()?;
            let arakoon = ctx.with_tls(topology.tls).arakoon();
            arakoon.prepare_tls(&topology.metadata_nodes).await?;
            for handle in arakoon.start(&topology.metadata_nodes).await? {
                output::success(format!(
                    "Started metadata node {} on port {}",
                    handle.index,
                    handle.port.unwrap_or_default()
                ));
            }
        }

        Commands::ArakoonStop { nodes } => {
            ctx.arakoon().stop(&nodes).await;
            output::success("Metadata nodes stopped");
        }

        Commands::WhoMaster { tls } => match ctx.with_tls(tls).arakoon().who_master().await? {
            Some(master) => output::print_kv("master", master),
            None => output::warning("No leader elected"),
        },

        Commands::StartOsds { topology, prefix } => {
            let topology = topology.topology();
            let ctx = ctx.with_tls(topology.tls);
            let prefix = prefix.map(RunPrefix::from_string).unwrap_or_else(RunPrefix::generate);
            let fleet = StorageFleet::new(&ctx);
            let mut loops = LoopDevices::new();
            for index in 0..topology.storage_daemons {
                let kind = topology.storage_kind.for_index(index);
                fleet
                    .start(&mut loops, &prefix, index, kind, topology.multicast)
                    .await?;
            }
            output::success(format!("Started {} storage daemons", topology.storage_daemons));
            output::print_kv("prefix", &prefix);
        }

        Commands::OsdStop { port } => {
            if StorageFleet::new(&ctx).stop(port).await {
                output::success(format!("Stopped daemon on port {}", port));
            } else {
                output::warning(format!("Nothing stopped on port {}", port));
            }
        }

        Commands::OsdRestart { index, kind } => {
            let handle = StorageFleet::new(&ctx).restart(index, kind).await?;
            output::success(format!(
                "Restarted daemon {} on port {}",
                index,
                handle.port.unwrap_or_default()
            ));
        }

        Commands::ClaimOsds { topology, prefix } => {
            let topology = topology.topology();
            let ctx = ctx.with_tls(topology.tls);
            let selector = ClaimSelector::new(
                RunPrefix::from_string(prefix),
                topology.claim_policy,
                local_ip(),
            );
            let mut state = ClaimState::new(topology.storage_daemons);
            let budget = PollConfig::new(config.polling.claim_attempts, config.polling.claim_interval);
            claims::converge(&ctx.alba(), &selector, &mut state, budget).await?;
            output::success(format!("Claimed {} storage daemons", state.claimed()));
        }

        Commands::ProxyStart { proxy_id, topology } => {
            let topology = topology.topology();
            let ctx = ctx.with_tls(topology.tls);
            let handle = GatewayFleet::new(&ctx)
                .start_proxy(proxy_id, topology.chattiness())
                .await?;
            output::success(format!(
                "Started proxy {} on port {}",
                proxy_id,
                handle.port.unwrap_or_default()
            ));
        }

        Commands::ProxyStop { proxy_id } => {
            GatewayFleet::new(&ctx).stop_proxy(proxy_id).await;
            output::success(format!("Proxy {} stopped", proxy_id));
        }

        Commands::MaintenanceStart { topology } => {
            let topology = topology.topology();
            let ctx = ctx.with_tls(topology.tls);
            let handles = GatewayFleet::new(&ctx)
                .start_maintenance(topology.maintenance_agents)
                .await?;
            output::success(format!("Started {} maintenance agents", handles.len()));
        }

        Commands::MaintenanceStop => {
            GatewayFleet::new(&ctx).stop_maintenance().await;
            output::success("Maintenance agents stopped");
        }

        Commands::CreateNamespace { name, tls } => {
            ctx.with_tls(tls).alba().create_namespace(&name).await?;
            output::success(format!("Created namespace {}", name));
        }

        Commands::MakeCa => {
            let ca = CertificateAuthority::new(&config.env.tls_root);
            ca.create(runner.as_ref()).await?;
            output::print_kv("ca", ca.ca_cert().display());
        }

        Commands::MakeCert { name } => {
            let ca = CertificateAuthority::new(&config.env.tls_root);
            let leaf = ca.sign(runner.as_ref(), &name).await?;
            output::print_kv("cert", leaf.cert.display());
            output::print_kv("key", leaf.key.display());
        }

        Commands::DemoSetup { topology } => {
            output::print_kv("arakoon", ctx.arakoon().version().await?.trim());
            output::print_kv("alba", ctx.alba().version().await?.trim());

            let started = std::time::Instant::now();
            let mut bringup = ClusterBringup::new(ctx, topology.topology(), config.polling.clone())?;
            bringup.run().await?;

            output::print_header("Cluster ready");
            output::print_kv("prefix", bringup.prefix());
            output::print_kv("leader", bringup.leader().unwrap_or("-"));
            output::print_kv("claimed", bringup.claim_state().claimed());
            for role in [
                NodeRole::MetadataNode,
                NodeRole::StorageDaemon,
                NodeRole::Proxy,
                NodeRole::MaintenanceAgent,
            ] {
                output::print_kv(&role.to_string(), bringup.processes().count(role));
            }
            output::success(format!(
                "Bringup finished in {}",
                output::format_duration(started.elapsed())
            ));
        }

        Commands::DemoKill { osds, wipe_tls } => {
            let report = ClusterTeardown::new(&ctx, osds).wipe_tls(wipe_tls).run().await;
            if report.is_clean() {
                output::success(format!("Teardown finished ({} steps)", report.steps));
            } else {
                for failure in &report.failures {
                    output::warning(failure);
                }
            }
        }

        Commands::SmokeTest { osds, sudo, tls } => {
            match ctx.clone().with_tls(tls).arakoon().who_master().await {
                Ok(Some(master)) => output::print_kv("master", master),
                Ok(None) => output::warning("No leader elected"),
                Err(e) => output::warning(format!("Leader query failed: {}", e)),
            }

            let sudo = sudo || config.env.sudo_fuser || fuser_needs_sudo();
            let inspector = FuserInspector::new(Arc::clone(&runner), sudo);
            let report = SmokeCheck::new(&inspector, osds).run().await?;
            output::print_kv("daemons", format!("{}/{}", report.daemons_listening, report.daemons_expected));
            output::print_kv(
                &format!("proxy {}", report.proxy_port),
                output::listening_indicator(report.proxy_listening),
            );
            output::success("Smoke test passed");
        }

        Commands::DebIntegrationTest { package } => {
            packaged(PackageFormat::Deb, package, &config, runner).await?;
        }

        Commands::RpmIntegrationTest { package } => {
            packaged(PackageFormat::Rpm, package, &config, runner).await?;
        }

        Commands::Version => {
            println!("alba-demo v{}", env!("CARGO_PKG_VERSION"));
            output::print_kv("arakoon", ctx.arakoon().version().await?.trim());
            output::print_kv("alba", ctx.alba().version().await?.trim());
        }
    }

    Ok(())
}

async fn packaged(
    format: PackageFormat,
    args: PackageArgs,
    config: &OrchestratorConfig,
    runner: Arc<dyn CommandRunner>,
) -> anyhow::Result<()> {
    let junit = args.xml.then(|| args.download_dir.join(JUNIT_FILE));
    let test = PackagedIntegrationTest {
        format,
        versions: PackageVersions {
            arakoon: args.arakoon_version,
            alba: args.alba_version,
            alba_revision: args.alba_revision,
        },
        alba_url_base: args.alba_url,
        download_dir: args.download_dir,
        junit,
        topology: args.topology.topology(),
        polling: config.polling.clone(),
    };

    let suite = test.run(&config.env, runner).await?;
    output::success(format!(
        "{} passed {} cases",
        suite.name,
        suite.cases.len()
    ));
    Ok(())
}
