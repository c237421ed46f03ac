// Simulated host for driving the orchestrator without real binaries

use alba_demo::cluster::PortInspector;
use alba_demo::config_writer::{AsdConfig, ProxyConfig};
use alba_demo::error::Result;
use alba_demo::process::{CommandLine, CommandOutput, CommandRunner};
use alba_demo::types::AvailableOsd;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;

/// How the metadata cluster answers `--who-master`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderMode {
    Immediate,
    AfterAttempts(u32),
    Never,
}

/// A process the simulated host believes is listening.
#[derive(Debug, Clone)]
struct Listener {
    pid: u32,
    command: String,
    daemon: Option<AvailableOsd>,
}

#[derive(Default)]
struct HostState {
    log: Vec<CommandLine>,
    commands: Vec<CommandLine>,
    spawned: Vec<CommandLine>,
    listening: BTreeMap<u16, Listener>,
    foreign: Vec<AvailableOsd>,
    claimed: BTreeSet<String>,
    namespaces: Vec<String>,
    who_master_calls: u32,
    next_pid: u32,
}

/// Fake of every external binary the orchestrator shells out to.
///
/// Spawned daemons and proxies start "listening" on the port from their
/// config; pattern kills stop all of them.
pub struct SimulatedHost {
    state: Mutex<HostState>,
    leader: LeaderMode,
    local_ip: String,
    failing: Vec<String>,
    hide_daemons: bool,
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HostState {
                next_pid: 1000,
                ..HostState::default()
            }),
            leader: LeaderMode::Immediate,
            local_ip: "10.0.0.1".to_string(),
            failing: Vec::new(),
            hide_daemons: false,
        }
    }

    pub fn with_leader(mut self, leader: LeaderMode) -> Self {
        self.leader = leader;
        self
    }

    /// Make every `alba <subcommand>` call fail.
    pub fn failing(mut self, subcommand: &str) -> Self {
        self.failing.push(subcommand.to_string());
        self
    }

    /// Never report spawned daemons as available.
    pub fn hiding_daemons(mut self) -> Self {
        self.hide_daemons = true;
        self
    }

    /// An unclaimed daemon that belongs to someone else.
    pub fn with_foreign_daemon(self, long_id: &str, node_id: &str, ip: &str) -> Self {
        self.state.lock().unwrap().foreign.push(AvailableOsd {
            long_id: long_id.to_string(),
            node_id: node_id.to_string(),
            ips: vec![ip.to_string()],
            port: None,
        });
        self
    }

    pub fn local_ip(&self) -> String {
        self.local_ip.clone()
    }

    pub fn commands(&self) -> Vec<CommandLine> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn spawned(&self) -> Vec<CommandLine> {
        self.state.lock().unwrap().spawned.clone()
    }

    /// Every command, run or spawned, in issue order.
    pub fn everything(&self) -> Vec<CommandLine> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn who_master_calls(&self) -> u32 {
        self.state.lock().unwrap().who_master_calls
    }

    pub fn claimed(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().claimed.clone()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.state.lock().unwrap().namespaces.clone()
    }

    pub fn listening_ports(&self) -> Vec<u16> {
        self.state.lock().unwrap().listening.keys().copied().collect()
    }

    /// Number of `alba <subcommand>` invocations.
    pub fn alba_calls(&self, subcommand: &str) -> usize {
        self.everything()
            .iter()
            .filter(|c| c.invokes("alba") && alba_subcommand(c) == Some(subcommand))
            .count()
    }

    fn answer_alba(&self, command: &CommandLine) -> CommandOutput {
        let subcommand = alba_subcommand(command).unwrap_or_default();
        if self.failing.iter().any(|f| f == subcommand) {
            return CommandOutput::failed(1, format!("{} refused", subcommand));
        }

        let mut state = self.state.lock().unwrap();
        match subcommand {
            "version" => CommandOutput::ok("1.5.0\n"),
            "list-available-osds" => {
                let mut available: Vec<AvailableOsd> = if self.hide_daemons {
                    Vec::new()
                } else {
                    state
                        .listening
                        .values()
                        .filter_map(|l| l.daemon.clone())
                        .collect()
                };
                available.extend(state.foreign.iter().cloned());
                available.retain(|osd| !state.claimed.contains(&osd.long_id));
                let body = serde_json::json!({ "success": true, "result": available });
                CommandOutput::ok(body.to_string())
            }
            "claim-osd" => match value_after(command, "--long-id") {
                Some(long_id) => {
                    state.claimed.insert(long_id);
                    CommandOutput::ok("{\"success\":true,\"result\":null}")
                }
                None => CommandOutput::failed(2, "missing --long-id"),
            },
            "create-namespace" => {
                let name = command.arguments()[1].clone();
                state.namespaces.push(name);
                CommandOutput::ok("")
            }
            "list-namespaces" => {
                let result: Vec<_> = state
                    .namespaces
                    .iter()
                    .map(|name| serde_json::json!({ "name": name }))
                    .collect();
                CommandOutput::ok(serde_json::json!({ "result": result }).to_string())
            }
            _ => CommandOutput::ok(""),
        }
    }
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

fn alba_subcommand(command: &CommandLine) -> Option<&str> {
    command.arguments().first().map(String::as_str)
}

fn value_after(command: &CommandLine, flag: &str) -> Option<String> {
    let args = command.arguments();
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// `--config=<path>` or `--config <path>`.
fn config_path(command: &CommandLine) -> Option<String> {
    command
        .arguments()
        .iter()
        .find_map(|a| a.strip_prefix("--config=").map(str::to_string))
        .or_else(|| value_after(command, "--config"))
}

#[async_trait]
impl CommandRunner for SimulatedHost {
    async fn run(&self, command: &CommandLine) -> Result<CommandOutput> {
        {
            let mut state = self.state.lock().unwrap();
            state.log.push(command.clone());
            state.commands.push(command.clone());
        }

        if command.mentions("--who-master") {
            let mut state = self.state.lock().unwrap();
            state.who_master_calls += 1;
            let elected = match self.leader {
                LeaderMode::Immediate => true,
                LeaderMode::AfterAttempts(n) => state.who_master_calls >= n,
                LeaderMode::Never => false,
            };
            return Ok(if elected {
                CommandOutput::ok("arakoon_0\n")
            } else {
                CommandOutput::failed(1, "No master")
            });
        }

        if command.invokes("openssl") {
            for pair in command.arguments().windows(2) {
                if pair[0] == "-out" || pair[0] == "-keyout" {
                    std::fs::write(&pair[1], "pem")?;
                }
            }
            return Ok(CommandOutput::ok(""));
        }

        if command.invokes("alba") {
            return Ok(self.answer_alba(command));
        }

        if command.invokes("pkill") {
            let mut state = self.state.lock().unwrap();
            let pattern = command.arguments().last().cloned().unwrap_or_default();
            let prefix = pattern.trim_start_matches('^').to_string();
            let before = state.listening.len();
            state.listening.retain(|_, l| !l.command.starts_with(&prefix));
            return Ok(if state.listening.len() < before {
                CommandOutput::ok("")
            } else {
                CommandOutput::failed(1, "")
            });
        }

        if command.invokes("kill") {
            let pid: Option<u32> = command.arguments().last().and_then(|p| p.parse().ok());
            let mut state = self.state.lock().unwrap();
            let before = state.listening.len();
            state.listening.retain(|_, l| Some(l.pid) != pid);
            return Ok(if state.listening.len() < before {
                CommandOutput::ok("")
            } else {
                CommandOutput::failed(1, "No such process")
            });
        }

        if command.invokes("fuser") && command.mentions("-k") {
            let port: Option<u16> = command.arguments().last().and_then(|p| p.parse().ok());
            let mut state = self.state.lock().unwrap();
            return Ok(match port.and_then(|p| state.listening.remove(&p)) {
                Some(_) => CommandOutput::ok(""),
                None => CommandOutput::failed(1, ""),
            });
        }

        Ok(CommandOutput::ok(""))
    }

    async fn spawn_detached(&self, command: &CommandLine, _output: &Path) -> Result<Option<u32>> {
        let mut state = self.state.lock().unwrap();
        state.log.push(command.clone());
        state.spawned.push(command.clone());
        state.next_pid += 1;
        let pid = state.next_pid;
        let program = Path::new(command.program())
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let listener = match alba_subcommand(command) {
            Some("asd-start") => {
                let path = config_path(command).unwrap_or_default();
                let config: AsdConfig = serde_json::from_str(&std::fs::read_to_string(path)?)?;
                Some((
                    config.port,
                    Some(AvailableOsd {
                        long_id: config.asd_id,
                        node_id: config.node_id,
                        ips: vec![self.local_ip.clone()],
                        port: Some(config.port),
                    }),
                ))
            }
            Some("proxy-start") => {
                let path = config_path(command).unwrap_or_default();
                let config: ProxyConfig = serde_json::from_str(&std::fs::read_to_string(path)?)?;
                Some((config.port, None))
            }
            Some(port) if program.contains("kinetic") => port.parse::<u16>().ok().map(|port| {
                (
                    port,
                    Some(AvailableOsd {
                        long_id: format!("kinetic_{}", port),
                        node_id: "kinetic".to_string(),
                        ips: vec![self.local_ip.clone()],
                        port: Some(port),
                    }),
                )
            }),
            _ => None,
        };

        if let Some((port, daemon)) = listener {
            state.listening.insert(
                port,
                Listener {
                    pid,
                    command: format!("{} {}", program, command.arguments().join(" ")),
                    daemon,
                },
            );
        }
        Ok(Some(pid))
    }
}

#[async_trait]
impl PortInspector for SimulatedHost {
    async fn owners(&self, port: u16) -> Result<Vec<u32>> {
        let state = self.state.lock().unwrap();
        Ok(state.listening.get(&port).map(|l| vec![l.pid]).unwrap_or_default())
    }
}
