//! Cluster bringup state machine.
//!
//! Stages run strictly in order, each awaited to completion before the
//! next begins. A failing stage aborts the bringup and is attached to the
//! returned error; nothing already launched is rolled back.

use super::claims::{self, local_ip, ClaimSelector};
use super::gateway::GatewayFleet;
use super::storage::{LoopDevices, StorageFleet};
use super::ClusterContext;
use crate::config::{ClusterTopology, PollingConfig};
use crate::error::Result;
use crate::poller::{PollConfig, ReadinessPoller};
use crate::types::{ClaimState, ProcessTable, RunPrefix, DEMO_NAMESPACE};
use std::fmt;
use tracing::{error, info};

/// One step of the bringup sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BringupStage {
    StartMetadataCluster,
    AwaitLeader,
    RegisterMetadataHost,
    StartStorageDaemons,
    ConvergeClaims,
    CreateNamespace,
    StartProxies,
    StartMaintenanceAgents,
}

impl BringupStage {
    /// Every stage, in execution order.
    pub const ALL: [BringupStage; 8] = [
        BringupStage::StartMetadataCluster,
        BringupStage::AwaitLeader,
        BringupStage::RegisterMetadataHost,
        BringupStage::StartStorageDaemons,
        BringupStage::ConvergeClaims,
        BringupStage::CreateNamespace,
        BringupStage::StartProxies,
        BringupStage::StartMaintenanceAgents,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BringupStage::StartMetadataCluster => "start-metadata-cluster",
            BringupStage::AwaitLeader => "await-leader",
            BringupStage::RegisterMetadataHost => "register-metadata-host",
            BringupStage::StartStorageDaemons => "start-storage-daemons",
            BringupStage::ConvergeClaims => "converge-claims",
            BringupStage::CreateNamespace => "create-namespace",
            BringupStage::StartProxies => "start-proxies",
            BringupStage::StartMaintenanceAgents => "start-maintenance-agents",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BringupStage::StartMetadataCluster => "Metadata nodes launched",
            BringupStage::AwaitLeader => "Metadata leader elected",
            BringupStage::RegisterMetadataHost => "Namespace manager host registered",
            BringupStage::StartStorageDaemons => "Storage daemons launched",
            BringupStage::ConvergeClaims => "Storage daemons claimed",
            BringupStage::CreateNamespace => "Demo namespace created",
            BringupStage::StartProxies => "Proxies launched",
            BringupStage::StartMaintenanceAgents => "Maintenance agents launched",
        }
    }
}

impl fmt::Display for BringupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal state of a bringup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringupOutcome {
    Ready,
    Aborted(BringupStage),
}

/// Drives one cluster from nothing to ready.
pub struct ClusterBringup {
    ctx: ClusterContext,
    topology: ClusterTopology,
    polling: PollingConfig,
    prefix: RunPrefix,
    local_ip: Option<String>,
    loops: LoopDevices,
    processes: ProcessTable,
    claims: ClaimState,
    leader: Option<String>,
    completed: Vec<BringupStage>,
    outcome: Option<BringupOutcome>,
}

impl ClusterBringup {
    /// Prepare a bringup of `topology`. TLS follows the topology flag.
    pub fn new(ctx: ClusterContext, topology: ClusterTopology, polling: PollingConfig) -> Result<Self> {
        topology.validate()?;
        let ctx = ctx.with_tls(topology.tls);
        let claims = ClaimState::new(topology.storage_daemons);

        Ok(Self {
            ctx,
            topology,
            polling,
            prefix: RunPrefix::generate(),
            local_ip: local_ip(),
            loops: LoopDevices::new(),
            processes: ProcessTable::new(),
            claims,
            leader: None,
            completed: Vec::new(),
            outcome: None,
        })
    }

    /// Use a known run prefix instead of a random one.
    pub fn with_prefix(mut self, prefix: RunPrefix) -> Self {
        self.prefix = prefix;
        self
    }

    /// Override the detected outbound address.
    pub fn with_local_ip(mut self, local_ip: Option<String>) -> Self {
        self.local_ip = local_ip;
        self
    }

    pub fn prefix(&self) -> &RunPrefix {
        &self.prefix
    }

    pub fn topology(&self) -> &ClusterTopology {
        &self.topology
    }

    pub fn context(&self) -> &ClusterContext {
        &self.ctx
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn claim_state(&self) -> &ClaimState {
        &self.claims
    }

    pub fn leader(&self) -> Option<&str> {
        self.leader.as_deref()
    }

    pub fn completed_stages(&self) -> &[BringupStage] {
        &self.completed
    }

    /// `None` until [`run`](Self::run) has finished.
    pub fn outcome(&self) -> Option<BringupOutcome> {
        self.outcome
    }

    /// Run every stage in order.
    pub async fn run(&mut self) -> Result<BringupOutcome> {
        info!(
            prefix = %self.prefix,
            storage_daemons = self.topology.storage_daemons,
            proxies = self.topology.proxies,
            maintenance_agents = self.topology.maintenance_agents,
            tls = self.topology.tls,
            "Starting cluster bringup"
        );

        for stage in BringupStage::ALL {
            info!(stage = %stage, "Entering stage");
            if let Err(e) = self.run_stage(stage).await {
                error!(stage = %stage, error = %e, "Bringup aborted");
                self.outcome = Some(BringupOutcome::Aborted(stage));
                return Err(e.at_stage(stage));
            }
            info!(stage = %stage, "{}", stage.description());
            self.completed.push(stage);
        }

        self.outcome = Some(BringupOutcome::Ready);
        info!(prefix = %self.prefix, "Cluster ready");
        Ok(BringupOutcome::Ready)
    }

    async fn run_stage(&mut self, stage: BringupStage) -> Result<()> {
        match stage {
            BringupStage::StartMetadataCluster => self.start_metadata_cluster().await,
            BringupStage::AwaitLeader => self.await_leader().await,
            BringupStage::RegisterMetadataHost => {
                let config = self.ctx.env.arakoon_config_file();
                self.ctx.alba().add_nsm_host(&config).await
            }
            BringupStage::StartStorageDaemons => self.start_storage_daemons().await,
            BringupStage::ConvergeClaims => self.converge_claims().await,
            BringupStage::CreateNamespace => self.ctx.alba().create_namespace(DEMO_NAMESPACE).await,
            BringupStage::StartProxies => self.start_proxies().await,
            BringupStage::StartMaintenanceAgents => {
                let handles = GatewayFleet::new(&self.ctx)
                    .start_maintenance(self.topology.maintenance_agents)
                    .await?;
                for handle in handles {
                    self.processes.insert(handle);
                }
                Ok(())
            }
        }
    }

    async fn start_metadata_cluster(&mut self) -> Result<()> {
        let arakoon = self.ctx.arakoon();
        arakoon.prepare_tls(&self.topology.metadata_nodes).await?;
        for handle in arakoon.start(&self.topology.metadata_nodes).await? {
            self.processes.insert(handle);
        }
        Ok(())
    }

    async fn await_leader(&mut self) -> Result<()> {
        let arakoon = self.ctx.arakoon();
        let budget = PollConfig::new(self.polling.leader_attempts, self.polling.leader_interval);
        let leader = ReadinessPoller::new("metadata leader", budget)
            .poll(|| arakoon.who_master())
            .await?;
        info!(leader = %leader, "Metadata leader elected");
        self.leader = Some(leader);
        Ok(())
    }

    async fn start_storage_daemons(&mut self) -> Result<()> {
        let fleet = StorageFleet::new(&self.ctx);
        for index in 0..self.topology.storage_daemons {
            let kind = self.topology.storage_kind.for_index(index);
            let handle = fleet
                .start(
                    &mut self.loops,
                    &self.prefix,
                    index,
                    kind,
                    self.topology.multicast,
                )
                .await?;
            self.processes.insert(handle);
        }
        Ok(())
    }

    async fn converge_claims(&mut self) -> Result<()> {
        let alba = self.ctx.alba();
        let selector = ClaimSelector::new(
            self.prefix.clone(),
            self.topology.claim_policy,
            self.local_ip.clone(),
        );
        let budget = PollConfig::new(self.polling.claim_attempts, self.polling.claim_interval);
        claims::converge(&alba, &selector, &mut self.claims, budget).await
    }

    async fn start_proxies(&mut self) -> Result<()> {
        let gateway = GatewayFleet::new(&self.ctx);
        let chattiness = self.topology.chattiness();
        for proxy_id in 0..self.topology.proxies {
            let handle = gateway.start_proxy(proxy_id, chattiness).await?;
            self.processes.insert(handle);
        }
        Ok(())
    }
}
