//! Packaged integration tests.
//!
//! Installs released arakoon and alba packages with the system package
//! manager, brings a cluster up on the installed binaries, pokes it, tears
//! it down and uninstalls again. Each phase becomes a JUnit test case.

use crate::cluster::{ClusterBringup, ClusterContext, ClusterTeardown};
use crate::config::{ClusterTopology, EnvironmentConfig, PollingConfig};
use crate::error::{OrchestratorError, Result};
use crate::process::{run_best_effort, run_checked, CommandLine, CommandRunner};
use crate::types::asd_port;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write as _;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Where arakoon release packages are published.
pub const ARAKOON_RELEASES: &str = "https://github.com/openvstorage/arakoon/releases/download";

/// Default JUnit report file name.
pub const JUNIT_FILE: &str = "testresults.xml";

/// System package flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFormat {
    Deb,
    Rpm,
}

impl PackageFormat {
    pub fn name(&self) -> &'static str {
        match self {
            PackageFormat::Deb => "deb",
            PackageFormat::Rpm => "rpm",
        }
    }

    /// Rpm runs require a Red Hat family host.
    pub fn check_platform(&self) -> Result<()> {
        match self {
            PackageFormat::Rpm if !Path::new("/etc/redhat-release").exists() => Err(
                OrchestratorError::UnsupportedPlatform("rpm tests must run on redhat".to_string()),
            ),
            _ => Ok(()),
        }
    }

    pub fn arakoon_artifact(&self, version: &str) -> String {
        match self {
            PackageFormat::Deb => format!("arakoon_{}_amd64.deb", version),
            PackageFormat::Rpm => format!("arakoon-{}-3.el7.centos.x86_64.rpm", version),
        }
    }

    pub fn alba_artifact(&self, package: &str) -> String {
        match self {
            PackageFormat::Deb => format!("alba_{}_amd64.deb", package),
            PackageFormat::Rpm => format!("alba-{}.el7.centos.x86_64.rpm", package),
        }
    }

    pub fn remove_command(&self, package: &str) -> CommandLine {
        let command = match self {
            PackageFormat::Deb => CommandLine::new("dpkg").args(["-r", package]),
            PackageFormat::Rpm => CommandLine::new("yum").args(["-y", "erase", package]),
        };
        command.with_sudo()
    }

    pub fn install_command(&self, file: &Path) -> CommandLine {
        let command = match self {
            PackageFormat::Deb => CommandLine::new("gdebi").arg("-n").arg(file),
            PackageFormat::Rpm => CommandLine::new("yum")
                .args(["-y", "--nogpgcheck", "localinstall"])
                .arg(file),
        };
        command.with_sudo()
    }

    /// `base` pointed at the binaries and plugins the packages install.
    pub fn installed_env(&self, base: &EnvironmentConfig) -> EnvironmentConfig {
        let (bin_dir, plugin_dir) = match self {
            PackageFormat::Deb => ("/usr/bin", "/usr/lib/alba"),
            PackageFormat::Rpm => ("/bin", "/usr/lib64/alba"),
        };
        EnvironmentConfig {
            arakoon_bin: Path::new(bin_dir).join("arakoon"),
            alba_bin: Path::new(bin_dir).join("alba"),
            plugin_dir: PathBuf::from(plugin_dir),
            ..base.clone()
        }
    }
}

/// Versions of the packages under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageVersions {
    pub arakoon: String,
    pub alba: String,
    /// Package revision appended to the alba version.
    pub alba_revision: Option<String>,
}

impl PackageVersions {
    /// Full alba package version, `<version>[-<revision>]`.
    pub fn alba_package(&self) -> String {
        match self.alba_revision.as_deref() {
            Some(revision) if !revision.is_empty() => format!("{}-{}", self.alba, revision),
            _ => self.alba.clone(),
        }
    }
}

/// One JUnit test case.
#[derive(Debug, Clone, PartialEq)]
pub struct JunitCase {
    pub name: String,
    pub classname: String,
    pub duration: Duration,
    pub failure: Option<String>,
}

/// A JUnit test suite.
#[derive(Debug, Clone)]
pub struct JunitSuite {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub cases: Vec<JunitCase>,
}

impl JunitSuite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timestamp: Utc::now(),
            cases: Vec::new(),
        }
    }

    pub fn failures(&self) -> usize {
        self.cases.iter().filter(|c| c.failure.is_some()).count()
    }

    pub fn to_xml(&self) -> String {
        let total: f64 = self.cases.iter().map(|c| c.duration.as_secs_f64()).sum();
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<testsuites>\n");
        let _ = writeln!(
            xml,
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"0\" time=\"{:.3}\" timestamp=\"{}\">",
            escape(&self.name),
            self.cases.len(),
            self.failures(),
            total,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        for case in &self.cases {
            let _ = write!(
                xml,
                "    <testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\"",
                escape(&case.name),
                escape(&case.classname),
                case.duration.as_secs_f64()
            );
            match &case.failure {
                Some(message) => {
                    let _ = writeln!(
                        xml,
                        ">\n      <failure message=\"{}\"/>\n    </testcase>",
                        escape(message)
                    );
                }
                None => xml.push_str("/>\n"),
            }
        }
        xml.push_str("  </testsuite>\n</testsuites>\n");
        xml
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_xml())?;
        info!(path = %path.display(), cases = self.cases.len(), "Wrote JUnit report");
        Ok(())
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Install, exercise and uninstall one pair of packages.
pub struct PackagedIntegrationTest {
    pub format: PackageFormat,
    pub versions: PackageVersions,
    /// Base URL the alba package is downloaded from.
    pub alba_url_base: String,
    /// Where packages are downloaded to.
    pub download_dir: PathBuf,
    /// Write a JUnit report here when set.
    pub junit: Option<PathBuf>,
    pub topology: ClusterTopology,
    pub polling: PollingConfig,
}

impl PackagedIntegrationTest {
    pub async fn run(
        &self,
        base_env: &EnvironmentConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<JunitSuite> {
        let mut suite = JunitSuite::new(format!("{} integration test", self.format.name()));
        let outcome = self.phases(base_env, runner, &mut suite).await;

        if let Some(path) = &self.junit {
            suite.write(path)?;
        }
        outcome.map(|()| suite)
    }

    async fn phases(
        &self,
        base_env: &EnvironmentConfig,
        runner: Arc<dyn CommandRunner>,
        suite: &mut JunitSuite,
    ) -> Result<()> {
        let classname = format!("alba.{}", self.format.name());
        self.format.check_platform()?;

        let arakoon_file = self
            .download_dir
            .join(self.format.arakoon_artifact(&self.versions.arakoon));
        let alba_file = self
            .download_dir
            .join(self.format.alba_artifact(&self.versions.alba_package()));

        case(suite, &classname, "install", async {
            for package in ["arakoon", "alba"] {
                run_best_effort(runner.as_ref(), &self.format.remove_command(package)).await;
            }
            std::fs::create_dir_all(&self.download_dir)?;
            for file in [&arakoon_file, &alba_file] {
                remove_stale(file)?;
            }

            let arakoon_url = format!(
                "{}/{}/{}",
                ARAKOON_RELEASES,
                self.versions.arakoon,
                self.format.arakoon_artifact(&self.versions.arakoon)
            );
            let alba_url = format!(
                "{}/{}",
                self.alba_url_base.trim_end_matches('/'),
                self.format.alba_artifact(&self.versions.alba_package())
            );
            for (url, file) in [(&arakoon_url, &arakoon_file), (&alba_url, &alba_file)] {
                let download = CommandLine::new("wget").arg("-O").arg(file).arg(url);
                run_checked(runner.as_ref(), &download).await?;
            }
            for file in [&arakoon_file, &alba_file] {
                run_checked(runner.as_ref(), &self.format.install_command(file)).await?;
            }
            Ok(())
        })
        .await?;

        let env = self.format.installed_env(base_env);
        let ctx = ClusterContext::new(env, Arc::clone(&runner)).with_tls(self.topology.tls);
        let teardown = ClusterTeardown::new(&ctx, self.topology.storage_daemons);

        case(suite, &classname, "bringup", async {
            teardown.run().await;
            let mut bringup =
                ClusterBringup::new(ctx.clone(), self.topology.clone(), self.polling.clone())?;
            bringup.run().await.map(|_| ())
        })
        .await?;

        case(suite, &classname, "list-namespaces", async {
            let namespaces = ctx.alba().list_namespaces().await?;
            info!(namespaces = ?namespaces, "Namespaces");
            Ok(())
        })
        .await?;

        for index in 0..self.topology.storage_daemons {
            let port = asd_port(index);
            case(suite, &classname, &format!("asd-statistics-{}", port), async {
                ctx.alba().asd_statistics(port).await.map(|_| ())
            })
            .await?;
        }

        case(suite, &classname, "uninstall", async {
            teardown.run().await;
            for package in ["arakoon", "alba"] {
                run_checked(runner.as_ref(), &self.format.remove_command(package)).await?;
            }
            Ok(())
        })
        .await
    }
}

/// Time `phase` and record it in `suite`.
async fn case<F>(suite: &mut JunitSuite, classname: &str, name: &str, phase: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    info!(case = name, "Running");
    let started = Instant::now();
    let result = phase.await;
    let failure = result.as_ref().err().map(|e| e.to_string());
    if let Some(message) = &failure {
        error!(case = name, error = %message, "Failed");
    }
    suite.cases.push(JunitCase {
        name: name.to_string(),
        classname: classname.to_string(),
        duration: started.elapsed(),
        failure,
    });
    result
}

fn remove_stale(file: &Path) -> Result<()> {
    match std::fs::remove_file(file) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
