//! Claim convergence for the storage daemon fleet.
//!
//! Selection is a pure function of what the metadata cluster reports as
//! available and what this run already claimed. The convergence loop only
//! feeds it fresh listings until the target count is reached.

use super::control::AlbaCli;
use crate::error::{OrchestratorError, Result};
use crate::poller::PollConfig;
use crate::types::{AvailableOsd, ClaimState, RunPrefix};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, UdpSocket};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Which unclaimed daemons a run may take ownership of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimPolicy {
    /// Only daemons whose node id carries this run's prefix.
    PrefixOnly,
    /// Prefix match, or a daemon advertising this host's outbound address.
    #[default]
    PrefixOrLocalAddress,
}

/// The address this host uses to reach the outside world.
///
/// Connecting a UDP socket sends nothing; it only asks the kernel for a
/// route.
pub fn local_ip() -> Option<String> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip().to_string())
}

/// Decides which available daemons belong to this run.
#[derive(Debug, Clone)]
pub struct ClaimSelector {
    prefix: RunPrefix,
    local_ip: Option<String>,
    policy: ClaimPolicy,
}

impl ClaimSelector {
    pub fn new(prefix: RunPrefix, policy: ClaimPolicy, local_ip: Option<String>) -> Self {
        Self {
            prefix,
            local_ip,
            policy,
        }
    }

    pub fn matches(&self, osd: &AvailableOsd) -> bool {
        if osd.node_id.starts_with(self.prefix.as_str()) {
            return true;
        }
        match (self.policy, self.local_ip.as_deref()) {
            (ClaimPolicy::PrefixOrLocalAddress, Some(ip)) => osd.ips.iter().any(|a| a == ip),
            _ => false,
        }
    }

    /// Daemons to claim next: matching, not yet claimed, first listing wins.
    pub fn select(&self, available: &[AvailableOsd], state: &ClaimState) -> Vec<AvailableOsd> {
        let mut selected: Vec<AvailableOsd> = Vec::new();
        for osd in available {
            if !self.matches(osd) || state.is_claimed(&osd.long_id) {
                continue;
            }
            if selected.iter().any(|s| s.long_id == osd.long_id) {
                continue;
            }
            selected.push(osd.clone());
        }
        selected
    }
}

/// Claim daemons until `state` reaches its target or the budget runs out.
pub async fn converge(
    alba: &AlbaCli,
    selector: &ClaimSelector,
    state: &mut ClaimState,
    budget: PollConfig,
) -> Result<()> {
    if state.is_converged() {
        return Ok(());
    }

    let mut attempt = 0;
    while attempt < budget.max_attempts {
        attempt += 1;
        crate::observability::record_poll_attempt("storage daemon claims");

        match claim_round(alba, selector, state).await {
            Ok(Some(())) => {
                info!(claimed = state.claimed(), attempt, "All storage daemons claimed");
                return Ok(());
            }
            Ok(None) => debug!(
                claimed = state.claimed(),
                expected = state.target(),
                attempt,
                "Claims not converged yet"
            ),
            Err(e) => debug!(attempt, error = %e, "Claim round failed"),
        }

        if attempt < budget.max_attempts {
            sleep(budget.interval).await;
        }
    }

    warn!(claimed = state.claimed(), expected = state.target(), "Claim budget exhausted");
    Err(OrchestratorError::ClaimsNotConverged {
        claimed: state.claimed(),
        expected: state.target(),
        attempts: attempt,
    })
}

async fn claim_round(
    alba: &AlbaCli,
    selector: &ClaimSelector,
    state: &mut ClaimState,
) -> Result<Option<()>> {
    let available = alba.list_available_osds().await?;
    for osd in selector.select(&available, state) {
        match alba.claim_osd(&osd.long_id).await {
            Ok(()) => {
                if state.record(osd.long_id.clone()) {
                    crate::observability::record_claims(1);
                    info!(
                        long_id = %osd.long_id,
                        claimed = state.claimed(),
                        expected = state.target(),
                        "Claimed storage daemon"
                    );
                }
            }
            Err(e) => warn!(long_id = %osd.long_id, error = %e, "Claim failed, retrying later"),
        }
    }
    Ok(state.is_converged().then_some(()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn osd(long_id: &str, node_id: &str, ips: &[&str]) -> AvailableOsd {
        AvailableOsd {
            long_id: long_id.to_string(),
            node_id: node_id.to_string(),
            ips: ips.iter().map(|ip| ip.to_string()).collect(),
            port: None,
        }
    }

    fn selector(policy: ClaimPolicy) -> ClaimSelector {
        ClaimSelector::new(
            RunPrefix::from_string("run1"),
            policy,
            Some("10.0.0.5".to_string()),
        )
    }

    #[test]
    fn test_foreign_daemon_never_selected() {
        let available = vec![osd("x", "other_2000", &["10.0.0.9"])];
        for policy in [ClaimPolicy::PrefixOnly, ClaimPolicy::PrefixOrLocalAddress] {
            let picked = selector(policy).select(&available, &ClaimState::new(1));
            assert!(picked.is_empty());
        }
    }

    #[test]
    fn test_local_address_respects_policy() {
        let available = vec![osd("k", "kinetic", &["10.0.0.5"])];
        let state = ClaimState::new(1);

        assert_eq!(selector(ClaimPolicy::PrefixOrLocalAddress).select(&available, &state).len(), 1);
        assert!(selector(ClaimPolicy::PrefixOnly).select(&available, &state).is_empty());
    }

    #[test]
    fn test_already_claimed_and_duplicates_skipped() {
        let available = vec![
            osd("a", "run1_2000", &[]),
            osd("b", "run1_2000", &[]),
            osd("b", "run1_2000", &[]),
        ];
        let mut state = ClaimState::new(2);
        state.record("a");

        let picked = selector(ClaimPolicy::PrefixOnly).select(&available, &state);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].long_id, "b");
    }

    #[test]
    fn test_no_local_ip_falls_back_to_prefix() {
        let selector = ClaimSelector::new(
            RunPrefix::from_string("run1"),
            ClaimPolicy::PrefixOrLocalAddress,
            None,
        );
        assert!(!selector.matches(&osd("k", "kinetic", &["10.0.0.5"])));
        assert!(selector.matches(&osd("a", "run1_2001", &[])));
    }

    #[test]
    fn test_policy_serde() {
        let json = serde_json::to_string(&ClaimPolicy::PrefixOnly).unwrap();
        assert_eq!(json, "\"prefix_only\"");
        assert_eq!(ClaimPolicy::default(), ClaimPolicy::PrefixOrLocalAddress);
    }
}
