//! TLS material for a test cluster.
//!
//! A self-signed certificate authority lives under the TLS root; every
//! node gets a leaf certificate signed by it. Signing shells out to
//! `openssl`. Serial numbers come from a counter file next to the CA so
//! they never repeat for the lifetime of that CA, across orchestrator runs
//! included.

use crate::config_writer::TlsClient;
use crate::error::{OrchestratorError, Result};
use crate::process::{run_checked, CommandLine, CommandRunner};
use std::path::{Path, PathBuf};

/// Name of the client identity used by the orchestrator itself.
pub const CLIENT_NAME: &str = "my_client";

const SUBJECT_BASE: &str = "/C=BE/ST=Vl-Br/L=Leuven/O=openvstorage.com/OU=AlbaTest";

/// Persisted running serial number.
#[derive(Debug, Clone)]
pub struct SerialCounter {
    path: PathBuf,
}

impl SerialCounter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The serial the next call to [`next`](Self::next) will hand out.
    pub fn peek(&self) -> Result<u64> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => content.trim().parse::<u64>().map_err(|e| {
                OrchestratorError::Config(format!(
                    "Corrupt serial counter {}: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Hand out a serial and persist its successor.
    pub fn next(&self) -> Result<u64> {
        let serial = self.peek()?;
        std::fs::write(&self.path, format!("{}\n", serial + 1))?;
        Ok(serial)
    }
}

/// Certificate and key of one signed identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCert {
    pub name: String,
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// The run's certificate authority.
#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    root: PathBuf,
}

impl CertificateAuthority {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ca_cert(&self) -> PathBuf {
        self.root.join("cacert.pem")
    }

    pub fn ca_key(&self) -> PathBuf {
        self.root.join("cacert.key")
    }

    fn serials(&self) -> SerialCounter {
        SerialCounter::new(self.root.join("cacert-serial.seq"))
    }

    /// True once both the CA certificate and key exist.
    pub fn exists(&self) -> bool {
        self.ca_cert().exists() && self.ca_key().exists()
    }

    /// Paths of the leaf identity `name`, signed or not.
    pub fn leaf(&self, name: &str) -> LeafCert {
        let dir = self.root.join(name);
        LeafCert {
            name: name.to_string(),
            cert: dir.join(format!("{}.pem", name)),
            key: dir.join(format!("{}.key", name)),
        }
    }

    /// Create the self-signed authority. A no-op if it already exists.
    pub async fn create(&self, runner: &dyn CommandRunner) -> Result<()> {
        if self.exists() {
            tracing::debug!(root = %self.root.display(), "Certificate authority already present");
            return Ok(());
        }
        std::fs::create_dir_all(&self.root)?;

        let request = self.root.join("cacert-req.pem");
        let subject = format!("{}/CN=AlbaTest CA", SUBJECT_BASE);
        run_checked(
            runner,
            &CommandLine::new("openssl")
                .args(["req", "-new", "-nodes", "-out"])
                .arg(&request)
                .arg("-keyout")
                .arg(self.ca_key())
                .arg("-subj")
                .arg(subject),
        )
        .await?;

        run_checked(
            runner,
            &CommandLine::new("openssl")
                .args(["x509", "-signkey"])
                .arg(self.ca_key())
                .args(["-req", "-in"])
                .arg(&request)
                .arg("-out")
                .arg(self.ca_cert()),
        )
        .await?;

        remove_if_present(&request)?;
        tracing::info!(root = %self.root.display(), "Created certificate authority");
        Ok(())
    }

    /// Sign a leaf certificate for `name` with the next serial.
    pub async fn sign(&self, runner: &dyn CommandRunner, name: &str) -> Result<LeafCert> {
        if !self.exists() {
            return Err(OrchestratorError::MissingAuthority(
                self.root.display().to_string(),
            ));
        }

        let leaf = self.leaf(name);
        let dir = self.root.join(name);
        std::fs::create_dir_all(&dir)?;
        let request = dir.join(format!("{}-req.pem", name));

        run_checked(
            runner,
            &CommandLine::new("openssl")
                .args(["req", "-out"])
                .arg(&request)
                .args(["-new", "-nodes", "-keyout"])
                .arg(&leaf.key)
                .arg("-subj")
                .arg(format!("{}/CN={}", SUBJECT_BASE, name)),
        )
        .await?;

        let serial = self.serials().next()?;
        run_checked(
            runner,
            &CommandLine::new("openssl")
                .args(["x509", "-req", "-in"])
                .arg(&request)
                .arg("-CA")
                .arg(self.ca_cert())
                .arg("-CAkey")
                .arg(self.ca_key())
                .arg("-out")
                .arg(&leaf.cert)
                .arg("-set_serial")
                .arg(serial.to_string()),
        )
        .await?;

        remove_if_present(&request)?;

        run_checked(
            runner,
            &CommandLine::new("openssl")
                .arg("verify")
                .arg("-CAfile")
                .arg(self.ca_cert())
                .arg(&leaf.cert),
        )
        .await?;

        tracing::info!(name, serial, "Signed leaf certificate");
        Ok(leaf)
    }

    /// Client material for proxy and maintenance configs.
    pub fn client_tls(&self) -> TlsClient {
        let client = self.leaf(CLIENT_NAME);
        TlsClient {
            ca_cert: self.ca_cert(),
            creds: (client.cert, client.key),
        }
    }

    /// TLS flags understood by the arakoon client.
    pub fn arakoon_flags(&self) -> Vec<String> {
        let client = self.leaf(CLIENT_NAME);
        vec![
            "-tls-ca-cert".to_string(),
            self.ca_cert().display().to_string(),
            "-tls-cert".to_string(),
            client.cert.display().to_string(),
            "-tls-key".to_string(),
            client.key.display().to_string(),
        ]
    }

    /// TLS flag understood by the alba client.
    pub fn alba_flag(&self) -> String {
        let client = self.leaf(CLIENT_NAME);
        format!(
            "--tls={},{},{}",
            self.ca_cert().display(),
            client.cert.display(),
            client.key.display()
        )
    }

    /// Remove the authority and everything it signed.
    pub fn wipe(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Pretends to be openssl: touches every file named after -out/-keyout.
    #[derive(Default)]
    struct FakeOpenssl {
        commands: Mutex<Vec<CommandLine>>,
    }

    #[async_trait]
    impl CommandRunner for FakeOpenssl {
        async fn run(&self, command: &CommandLine) -> Result<CommandOutput> {
            let args = command.arguments();
            for pair in args.windows(2) {
                if pair[0] == "-out" || pair[0] == "-keyout" {
                    std::fs::write(&pair[1], "pem").unwrap();
                }
            }
            self.commands.lock().unwrap().push(command.clone());
            Ok(CommandOutput::ok(""))
        }

        async fn spawn_detached(&self, _command: &CommandLine, _output: &Path) -> Result<Option<u32>> {
            Ok(None)
        }
    }

    fn serials_used(runner: &FakeOpenssl) -> Vec<String> {
        runner
            .commands
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| {
                let args = c.arguments();
                args.iter()
                    .position(|a| a == "-set_serial")
                    .map(|i| args[i + 1].clone())
            })
            .collect()
    }

    #[test]
    fn test_serial_counter_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("serial.seq");

        let counter = SerialCounter::new(&path);
        assert_eq!(counter.next().unwrap(), 0);
        assert_eq!(counter.next().unwrap(), 1);

        let reopened = SerialCounter::new(&path);
        assert_eq!(reopened.peek().unwrap(), 2);
        assert_eq!(reopened.next().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sign_requires_authority() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::new(dir.path().join("tls"));
        let runner = FakeOpenssl::default();

        let result = ca.sign(&runner, "arakoon_0").await;
        assert!(matches!(result, Err(OrchestratorError::MissingAuthority(_))));
        assert!(runner.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_serials_never_repeat() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::new(dir.path().join("tls"));
        let runner = FakeOpenssl::default();

        ca.create(&runner).await.unwrap();
        assert!(ca.exists());
        assert!(!ca.root().join("cacert-req.pem").exists());

        for name in ["arakoon_0", "arakoon_1", CLIENT_NAME] {
            let leaf = ca.sign(&runner, name).await.unwrap();
            assert!(leaf.cert.ends_with(format!("{}/{}.pem", name, name)));
        }

        // a second authority handle over the same root continues the sequence
        let again = CertificateAuthority::new(ca.root());
        again.sign(&runner, "8000_2000_p").await.unwrap();

        assert_eq!(serials_used(&runner), vec!["0", "1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::new(dir.path().join("tls"));
        let runner = FakeOpenssl::default();

        ca.create(&runner).await.unwrap();
        let after_first = runner.commands.lock().unwrap().len();
        ca.create(&runner).await.unwrap();
        assert_eq!(runner.commands.lock().unwrap().len(), after_first);
    }

    #[test]
    fn test_client_flags() {
        let ca = CertificateAuthority::new("/tls");
        assert_eq!(
            ca.alba_flag(),
            "--tls=/tls/cacert.pem,/tls/my_client/my_client.pem,/tls/my_client/my_client.key"
        );
        assert_eq!(ca.arakoon_flags()[0], "-tls-ca-cert");
        assert_eq!(ca.client_tls().creds.1, PathBuf::from("/tls/my_client/my_client.key"));
    }

    #[test]
    fn test_wipe_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::new(dir.path().join("tls"));
        std::fs::create_dir_all(ca.root()).unwrap();
        ca.wipe().unwrap();
        ca.wipe().unwrap();
        assert!(!ca.root().exists());
    }
}
