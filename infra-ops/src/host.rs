//! Inspection and preparation of a managed host: packages, processes and
//! tool versions.

use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::{
    errors::{Error, Result},
    remote::{
        ps::{self, Process},
        registry::DEFAULT_STOP_TIMEOUT,
        transport::{Privilege, Transport},
    },
};

/// Prefix bash adds to errors of non-interactive commands.
const BASH_ERROR_PREFIX: &str = "bash: line 1: ";

pub struct Host<'a, T> {
    transport: &'a T,
    stop_timeout: Duration,
}

impl<'a, T: Transport> Host<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self {
            transport,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Runs a command whose tools log progress on stderr (apt, pip), so only
    /// the exit status decides.
    async fn run_to_completion(&self, command: &str, privilege: Privilege) -> Result<String> {
        let out = self.transport.invoke(command, privilege).await?;
        if out.status != Some(0) {
            return Err(Error::RemoteExecution {
                command: command.to_string(),
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out.stdout.trim().to_string())
    }

    /// Returns stderr (minus the bash prefix) when the probe wrote any,
    /// otherwise passes stdout through "parse".
    async fn probe(&self, command: &str, parse: impl Fn(&str) -> String) -> Result<String> {
        let (stdout, stderr) = self.transport.execute_unchecked(command).await?;
        if !stderr.is_empty() {
            return Ok(stderr.replace(BASH_ERROR_PREFIX, "").trim().to_string());
        }
        Ok(parse(&stdout))
    }

    pub async fn operating_system(&self) -> Result<String> {
        let (stdout, _) = self.transport.execute("uname -s").await?;
        Ok(stdout)
    }

    pub async fn installed_apt_packages(&self) -> Result<Vec<String>> {
        // apt warns about its unstable CLI on stderr
        let (stdout, _) = self
            .transport
            .execute_unchecked("apt list --installed")
            .await?;
        Ok(parse_apt_list(&stdout))
    }

    pub async fn apt_package_is_installed(&self, package: &str) -> Result<bool> {
        Ok(self
            .installed_apt_packages()
            .await?
            .iter()
            .any(|p| p == package))
    }

    pub async fn update_apt_packages(&self) -> Result<()> {
        self.run_to_completion("apt-get -y update", Privilege::Root)
            .await?;
        Ok(())
    }

    /// Returns "false" when the package was already installed and skipped.
    pub async fn install_apt_package(&self, package: &str, force: bool) -> Result<bool> {
        if !force && self.apt_package_is_installed(package).await? {
            log::info!("{} already installed", package);
            return Ok(false);
        }
        log::info!("installing {}", package);
        self.run_to_completion(&format!("apt-get -y install {package}"), Privilege::Root)
            .await?;
        Ok(true)
    }

    pub async fn install_apt_packages(&self, packages: &[&str], force: bool) -> Result<()> {
        for p in packages {
            self.install_apt_package(p, force).await?;
        }
        Ok(())
    }

    pub async fn installed_pip_packages(&self, with_versions: bool) -> Result<Vec<String>> {
        let (stdout, _) = self
            .transport
            .execute_unchecked("pip list --format freeze")
            .await?;
        Ok(parse_pip_freeze(&stdout, with_versions))
    }

    /// "name==version" queries match the pinned version only.
    pub async fn pip_package_is_installed(&self, package: &str) -> Result<bool> {
        let with_versions = package.contains("==");
        Ok(self
            .installed_pip_packages(with_versions)
            .await?
            .iter()
            .any(|p| p == package))
    }

    pub async fn install_pip_package(&self, package: &str, force: bool) -> Result<bool> {
        if !force && self.pip_package_is_installed(package).await? {
            log::info!("{} already installed", package);
            return Ok(false);
        }
        log::info!("installing {}", package);
        self.run_to_completion(&format!("pip install {package}"), Privilege::Root)
            .await?;
        Ok(true)
    }

    pub async fn install_pip_packages(&self, packages: &[&str], force: bool) -> Result<()> {
        for p in packages {
            self.install_pip_package(p, force).await?;
        }
        Ok(())
    }

    pub async fn uninstall_pip_package(&self, package: &str) -> Result<()> {
        self.run_to_completion(&format!("pip uninstall -y {package}"), Privilege::Root)
            .await?;
        Ok(())
    }

    pub async fn uninstall_pip_packages(&self, packages: &[&str]) -> Result<()> {
        for p in packages {
            self.uninstall_pip_package(p).await?;
        }
        Ok(())
    }

    pub async fn running_processes(&self) -> Result<Vec<Process>> {
        ps::list(self.transport).await
    }

    pub async fn process_is_running(&self, name: &str) -> Result<bool> {
        Ok(self.running_process_id(name).await?.is_some())
    }

    /// PID of the first process whose command line contains "name".
    pub async fn running_process_id(&self, name: &str) -> Result<Option<u32>> {
        Ok(self
            .running_processes()
            .await?
            .into_iter()
            .find(|p| p.command.contains(name))
            .map(|p| p.pid))
    }

    /// Kills every process whose command line contains "name", retrying
    /// until none is left or the stop budget runs out.
    pub async fn stop_processes(&self, name: &str) -> Result<()> {
        log::info!("stopping the '{}' processes if there are any", name);
        let deadline = Instant::now() + self.stop_timeout;
        let mut attempts = 0;
        loop {
            let matching: Vec<Process> = self
                .running_processes()
                .await?
                .into_iter()
                .filter(|p| p.command.contains(name))
                .collect();
            if matching.is_empty() {
                return Ok(());
            }
            if Instant::now() > deadline {
                return Err(Error::TimeoutExceeded {
                    message: format!("'{name}' processes survived"),
                    attempts,
                    last_observed: format!("{:?}", matching),
                });
            }
            attempts += 1;

            for p in matching {
                self.transport
                    .execute(&format!("kill -9 {}", p.pid))
                    .await?;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }

    pub async fn python_version(&self) -> Result<String> {
        self.probe("python --version", |s| s.replace("Python ", ""))
            .await
    }

    pub async fn pip_version(&self) -> Result<String> {
        self.probe("pip --version", parse_pip_version).await
    }

    pub async fn git_version(&self) -> Result<String> {
        self.probe("git --version", |s| s.replace("git version ", ""))
            .await
    }

    /// nginx reports its version on stderr even on success.
    pub async fn nginx_version(&self) -> Result<String> {
        let (stdout, stderr) = self.transport.sudo_unchecked("nginx -v").await?;
        let out = if stderr.is_empty() { stdout } else { stderr };
        match out.strip_prefix("nginx version: nginx/") {
            Some(v) => Ok(v.split(' ').next().unwrap_or(v).to_string()),
            None => Ok(out.replace(BASH_ERROR_PREFIX, "").trim().to_string()),
        }
    }

    pub async fn firewall_status(&self) -> Result<String> {
        let (stdout, stderr) = self.transport.sudo_unchecked("ufw status").await?;
        if !stderr.is_empty() {
            return Ok(stderr.replace(BASH_ERROR_PREFIX, "").trim().to_string());
        }
        Ok(stdout)
    }
}

/// Package names from "apt list --installed" ("name/suite,now version arch [...]").
pub fn parse_apt_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|l| l.contains('/'))
        .filter_map(|l| l.split('/').next())
        .map(|s| s.trim().to_string())
        .collect()
}

pub fn parse_pip_freeze(output: &str, with_versions: bool) -> Vec<String> {
    output
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| {
            if with_versions {
                l.to_string()
            } else {
                l.split("==").next().unwrap_or(l).to_string()
            }
        })
        .collect()
}

/// "pip 22.0.2 from /usr/lib/python3/dist-packages/pip (python 3.10)" -> "22.0.2/3.10"
pub fn parse_pip_version(output: &str) -> String {
    output
        .replace(['(', ')'], "")
        .split(' ')
        .filter(|t| t.starts_with(|c: char| c.is_ascii_digit()))
        .collect::<Vec<&str>>()
        .join("/")
}

/// RUST_LOG=debug cargo test --package infra-ops --lib -- host::test_parsers --exact --show-output
#[test]
fn test_parsers() {
    let apt = "Listing...
adduser/jammy,now 3.118ubuntu5 all [installed,automatic]
nginx/jammy-updates,jammy-security,now 1.18.0-6ubuntu14.4 amd64 [installed]
screen/jammy,now 4.9.0-1 amd64 [installed]
";
    assert_eq!(parse_apt_list(apt), vec!["adduser", "nginx", "screen"]);

    let pip = "attrs==21.2.0\nrequests==2.25.1\n\n";
    assert_eq!(parse_pip_freeze(pip, false), vec!["attrs", "requests"]);
    assert_eq!(
        parse_pip_freeze(pip, true),
        vec!["attrs==21.2.0", "requests==2.25.1"]
    );

    assert_eq!(
        parse_pip_version("pip 22.0.2 from /usr/lib/python3/dist-packages/pip (python 3.10)"),
        "22.0.2/3.10"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeHost;

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- host::tests::test_packages --exact --show-output
    #[tokio::test]
    async fn test_packages() {
        let _ = env_logger::builder().is_test(true).try_init();

        let t = FakeHost::default();
        t.script(
            "apt list --installed",
            "Listing...\nscreen/jammy,now 4.9.0-1 amd64 [installed]\n",
            "WARNING: apt does not have a stable CLI interface. Use with caution in scripts.",
        );
        t.script("apt-get -y install nginx", "Setting up nginx ...", "");
        t.script("pip list --format freeze", "requests==2.25.1\n", "");
        t.script("pip install requests==2.31.0", "Successfully installed", "");

        let host = Host::new(&t);
        assert!(host.apt_package_is_installed("screen").await.unwrap());
        assert!(!host.install_apt_package("screen", false).await.unwrap());
        assert!(host.install_apt_package("nginx", false).await.unwrap());

        assert!(host.pip_package_is_installed("requests").await.unwrap());
        assert!(!host.pip_package_is_installed("requests==2.31.0").await.unwrap());
        assert!(!host.install_pip_package("requests", false).await.unwrap());
        assert!(host.install_pip_package("requests==2.31.0", false).await.unwrap());

        let installs: Vec<(String, Privilege)> = t
            .invoked()
            .into_iter()
            .filter(|(c, _)| c.contains("install "))
            .collect();
        assert_eq!(
            installs,
            vec![
                (String::from("apt-get -y install nginx"), Privilege::Root),
                (String::from("pip install requests==2.31.0"), Privilege::Root),
            ]
        );

        // unscripted commands fail like a real shell would
        assert!(host.update_apt_packages().await.is_err());
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- host::tests::test_versions --exact --show-output
    #[tokio::test]
    async fn test_versions() {
        let t = FakeHost::default();
        t.script("python --version", "Python 3.10.12", "");
        t.script("git --version", "git version 2.34.1", "");
        t.script("nginx -v", "", "nginx version: nginx/1.18.0 (Ubuntu)");
        t.script("uname -s", "Linux", "");

        let host = Host::new(&t);
        assert_eq!(host.operating_system().await.unwrap(), "Linux");
        assert_eq!(host.python_version().await.unwrap(), "3.10.12");
        assert_eq!(host.git_version().await.unwrap(), "2.34.1");
        assert_eq!(host.nginx_version().await.unwrap(), "1.18.0");
        assert_eq!(
            host.pip_version().await.unwrap(),
            "pip: command not found"
        );
    }

    /// RUST_LOG=debug cargo test --package infra-ops --lib -- host::tests::test_stop_processes --exact --show-output
    #[tokio::test(start_paused = true)]
    async fn test_stop_processes() {
        let t = FakeHost::default();
        t.spawn("python3 ticker.py --id 1");
        t.spawn("python3 ticker.py --id 2");
        t.spawn("/usr/sbin/sshd -D");

        let host = Host::new(&t);
        assert!(host.process_is_running("ticker.py").await.unwrap());
        let pid = host.running_process_id("sshd").await.unwrap();
        assert!(pid.is_some());

        host.stop_processes("ticker.py").await.unwrap();
        assert!(!host.process_is_running("ticker.py").await.unwrap());
        assert_eq!(host.running_process_id("sshd").await.unwrap(), pid);
    }
}
