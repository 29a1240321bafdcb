// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Machine provisioning ahead of linking.
//!
//! Bootstrapping makes sure a fresh machine has everything the linked dotfiles
//! expect to find: a package manager, the packages listed in the dotfile
//! repository's package manifest, a shell framework, and the framework's
//! plugins. All of the heavy lifting is offloaded to external tools.
//!
//! # Failure Policy
//!
//! Failing to install the package manager, the declared packages, or the
//! shell framework aborts bootstrapping. Plugins are optional, so a plugin
//! that fails to clone only gets reported, and the rest carry on.

use crate::{config::{BootstrapSettings, Plugin}, path::resolve_under};

use auth_git2::GitAuthenticator;
use git2::{build::RepoBuilder, Config, FetchOptions, RemoteCallbacks};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    env,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
    time,
};
use tracing::{debug, info, instrument, warn};

/// Directories searched for programs after the `PATH` when the package manager
/// installs itself outside of it.
const FALLBACK_BIN_DIRS: &[&str] = &[
    "/opt/homebrew/bin",
    "/usr/local/bin",
    "/home/linuxbrew/.linuxbrew/bin",
];

/// External command to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Syscall {
    /// Program to execute, either a bare name looked up in `PATH` or a path.
    pub program: PathBuf,

    /// Arguments passed to program, in order.
    pub args: Vec<String>,

    /// Extra environment variables set on top of inherited environment.
    pub envs: Vec<(String, String)>,
}

impl Syscall {
    /// Construct new command with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set environment variable for command.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl Display for Syscall {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}", self.program.display())?;
        for arg in &self.args {
            write!(fmt, " {arg}")?;
        }
        Ok(())
    }
}

/// Layer of indirection for the outside world.
pub trait Provisioner {
    /// Locate program by name.
    fn locate(&self, program: &str) -> Option<PathBuf>;

    /// Run command to completion, sharing current process's stdio.
    fn run(&self, syscall: &Syscall) -> Result<(), ProvisionError>;

    /// Clone remote repository into path.
    fn clone_repo(&self, url: &str, path: &Path) -> Result<(), ProvisionError>;
}

/// Provisioning through real processes and libgit2.
#[derive(Debug, Default)]
pub struct SystemProvisioner;

impl Provisioner for SystemProvisioner {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        let program = Path::new(program);
        if program.components().count() > 1 {
            return program.is_file().then(|| program.to_path_buf());
        }

        let search = env::var_os("PATH")
            .map(|paths| env::split_paths(&paths).collect::<Vec<_>>())
            .unwrap_or_default();

        search
            .into_iter()
            .chain(FALLBACK_BIN_DIRS.iter().map(PathBuf::from))
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    }

    #[instrument(skip(self), level = "debug")]
    fn run(&self, syscall: &Syscall) -> Result<(), ProvisionError> {
        info!("run {syscall}");
        let status = Command::new(&syscall.program)
            .args(&syscall.args)
            .envs(syscall.envs.iter().map(|(key, value)| (key, value)))
            .spawn()
            .and_then(|mut child| child.wait())
            .map_err(|err| ProvisionError::Spawn {
                source: err,
                command: syscall.to_string(),
            })?;

        if !status.success() {
            return Err(ProvisionError::Failed {
                command: syscall.to_string(),
                status,
            });
        }

        Ok(())
    }

    fn clone_repo(&self, url: &str, path: &Path) -> Result<(), ProvisionError> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.set_message(url.to_string());
        bar.enable_steady_tick(time::Duration::from_millis(100));

        let authenticator = GitAuthenticator::default();
        let config = Config::open_default()?;

        let mut throttle = time::Instant::now();
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(authenticator.credentials(&config));
        callbacks.transfer_progress(|progress| {
            if throttle.elapsed() > time::Duration::from_millis(10) {
                throttle = time::Instant::now();
                bar.set_length(progress.total_objects() as u64);
                bar.set_position(progress.received_objects() as u64);
            }
            true
        });

        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(callbacks);
        let result = RepoBuilder::new().fetch_options(fetch).clone(url, path);
        bar.finish_and_clear();
        result?;

        Ok(())
    }
}

/// Provisioning of package manager, packages, shell framework, and plugins.
#[derive(Debug)]
pub struct Bootstrap<P = SystemProvisioner>
where
    P: Provisioner,
{
    repo_root: PathBuf,
    home: PathBuf,
    settings: BootstrapSettings,
    provisioner: P,
}

impl<P> Bootstrap<P>
where
    P: Provisioner,
{
    /// Construct new bootstrapper.
    pub fn new(
        repo_root: impl Into<PathBuf>,
        home: impl Into<PathBuf>,
        settings: BootstrapSettings,
        provisioner: P,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            home: home.into(),
            settings,
            provisioner,
        }
    }

    /// Provisioner used to reach the outside world.
    pub fn provisioner(&self) -> &P {
        &self.provisioner
    }

    /// Absolute path of shell framework installation.
    pub fn framework_dir(&self) -> PathBuf {
        resolve_under(&self.home, &self.settings.framework_dir)
    }

    /// Absolute path a plugin gets cloned to.
    pub fn plugin_dir(&self, plugin: &Plugin) -> PathBuf {
        self.framework_dir()
            .join("custom")
            .join("plugins")
            .join(&plugin.name)
    }

    /// Check if package manager needs installing.
    pub fn needs_package_manager(&self) -> bool {
        self.provisioner
            .locate(&self.settings.package_manager)
            .is_none()
    }

    /// Check if shell framework needs installing.
    pub fn needs_framework(&self) -> bool {
        !self.framework_dir().exists()
    }

    /// Provision everything in order.
    ///
    /// # Errors
    ///
    /// - Return [`BootstrapError::PackageManager`] or
    ///   [`BootstrapError::PackageManagerMissing`] if package manager cannot be
    ///   installed.
    /// - Return [`BootstrapError::Packages`] if packages cannot be installed.
    /// - Return [`BootstrapError::Framework`] if shell framework cannot be
    ///   installed.
    #[instrument(skip(self), level = "debug")]
    pub fn run(&self) -> Result<BootstrapReport> {
        let mut report = BootstrapReport::default();
        let package_manager = self.ensure_package_manager(&mut report)?;
        self.install_packages(&package_manager, &mut report)?;
        self.ensure_framework(&mut report)?;
        self.install_plugins(&mut report);

        Ok(report)
    }

    fn ensure_package_manager(&self, report: &mut BootstrapReport) -> Result<PathBuf> {
        let name = &self.settings.package_manager;
        if let Some(found) = self.provisioner.locate(name) {
            debug!("{name} found at {}", found.display());
            return Ok(found);
        }

        info!("{name} not found, installing it");
        let syscall = Syscall::new("/bin/bash")
            .arg("-c")
            .arg(format!(
                "/bin/bash -c \"$(curl -fsSL {})\"",
                self.settings.package_manager_installer
            ))
            .env("NONINTERACTIVE", "1");
        self.provisioner
            .run(&syscall)
            .map_err(BootstrapError::PackageManager)?;
        report.package_manager_installed = true;

        self.provisioner
            .locate(name)
            .ok_or_else(|| BootstrapError::PackageManagerMissing {
                program: name.clone(),
            })
    }

    fn install_packages(&self, package_manager: &Path, report: &mut BootstrapReport) -> Result<()> {
        let manifest = resolve_under(&self.repo_root, &self.settings.package_manifest);
        if !manifest.is_file() {
            warn!("no package manifest at {}, skipping packages", manifest.display());
            return Ok(());
        }

        self.provisioner
            .run(&Syscall::new(package_manager).arg("update"))
            .map_err(BootstrapError::Packages)?;

        let bundle = Syscall::new(package_manager)
            .arg("bundle")
            .arg(format!("--file={}", manifest.display()));
        self.provisioner
            .run(&bundle)
            .map_err(BootstrapError::Packages)?;
        report.packages_installed = true;

        Ok(())
    }

    fn ensure_framework(&self, report: &mut BootstrapReport) -> Result<()> {
        let framework_dir = self.framework_dir();
        if framework_dir.exists() {
            debug!("shell framework found at {}", framework_dir.display());
            return Ok(());
        }

        info!("installing shell framework to {}", framework_dir.display());
        let syscall = Syscall::new("/bin/sh")
            .arg("-c")
            .arg(format!(
                "sh -c \"$(curl -fsSL {})\" \"\" --unattended",
                self.settings.framework_installer
            ))
            .env("ZSH", framework_dir.to_string_lossy())
            .env("RUNZSH", "no")
            .env("KEEP_ZSHRC", "yes");
        self.provisioner
            .run(&syscall)
            .map_err(BootstrapError::Framework)?;
        report.framework_installed = true;

        Ok(())
    }

    fn install_plugins(&self, report: &mut BootstrapReport) {
        for plugin in &self.settings.plugins {
            let path = self.plugin_dir(plugin);
            if path.exists() {
                debug!("plugin {} already installed", plugin.name);
                continue;
            }

            info!("clone plugin {} from {}", plugin.name, plugin.url);
            match self.provisioner.clone_repo(&plugin.url, &path) {
                Ok(()) => report.plugins_installed.push(plugin.name.clone()),
                Err(error) => {
                    warn!("failed to install plugin {}: {error}", plugin.name);
                    report.plugins_failed.push(plugin.name.clone());
                }
            }
        }
    }
}

/// Summary of bootstrapping.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Package manager had to be installed during this run.
    pub package_manager_installed: bool,

    /// Packages of package manifest were installed.
    pub packages_installed: bool,

    /// Shell framework had to be installed during this run.
    pub framework_installed: bool,

    /// Names of plugins cloned during this run.
    pub plugins_installed: Vec<String>,

    /// Names of plugins that failed to clone.
    pub plugins_failed: Vec<String>,
}

/// External tool error types.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Command cannot be started.
    #[error("failed to run {command:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        command: String,
    },

    /// Command exited unsuccessfully.
    #[error("command {command:?} failed with {status}")]
    Failed { command: String, status: ExitStatus },

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

/// Bootstrap error types.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// Package manager installation fails.
    #[error("failed to install package manager")]
    PackageManager(#[source] ProvisionError),

    /// Package manager installed but cannot be found afterwards.
    #[error("package manager {program:?} still not found after installing it")]
    PackageManagerMissing { program: String },

    /// Declared packages fail to install.
    #[error("failed to install packages")]
    Packages(#[source] ProvisionError),

    /// Shell framework installation fails.
    #[error("failed to install shell framework")]
    Framework(#[source] ProvisionError),
}

/// Friendly result alias :3
pub type Result<T, E = BootstrapError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{
        cell::RefCell,
        collections::HashSet,
        env::current_dir,
        fs,
    };

    #[derive(Debug, Default)]
    struct FakeProvisioner {
        programs: RefCell<HashSet<String>>,
        failing: HashSet<String>,
        calls: RefCell<Vec<Syscall>>,
        clones: RefCell<Vec<(String, PathBuf)>>,
    }

    impl FakeProvisioner {
        fn with_program(self, program: &str) -> Self {
            self.programs.borrow_mut().insert(program.into());
            self
        }

        fn failing_on(mut self, needle: &str) -> Self {
            self.failing.insert(needle.into());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().iter().map(ToString::to_string).collect()
        }
    }

    impl Provisioner for FakeProvisioner {
        fn locate(&self, program: &str) -> Option<PathBuf> {
            self.programs
                .borrow()
                .contains(program)
                .then(|| PathBuf::from("/fake/bin").join(program))
        }

        fn run(&self, syscall: &Syscall) -> Result<(), ProvisionError> {
            self.calls.borrow_mut().push(syscall.clone());
            let line = syscall.to_string();
            if self.failing.iter().any(|needle| line.contains(needle)) {
                return Err(ProvisionError::Spawn {
                    source: std::io::Error::other("refused"),
                    command: line,
                });
            }

            if line.contains("Homebrew/install") {
                self.programs.borrow_mut().insert("brew".into());
            }

            Ok(())
        }

        fn clone_repo(&self, url: &str, path: &Path) -> Result<(), ProvisionError> {
            if self.failing.iter().any(|needle| url.contains(needle)) {
                return Err(ProvisionError::Git2(git2::Error::from_str("unreachable")));
            }

            fs::create_dir_all(path).map_err(|err| ProvisionError::Spawn {
                source: err,
                command: format!("clone {url}"),
            })?;
            self.clones
                .borrow_mut()
                .push((url.into(), path.to_path_buf()));
            Ok(())
        }
    }

    fn bootstrap(provisioner: FakeProvisioner) -> anyhow::Result<Bootstrap<FakeProvisioner>> {
        let cwd = current_dir()?;
        let repo = cwd.join("dotfiles");
        fs::create_dir_all(&repo)?;
        fs::write(repo.join("Brewfile"), "brew \"ripgrep\"\n")?;

        Ok(Bootstrap::new(
            repo,
            cwd.join("home"),
            BootstrapSettings::default(),
            provisioner,
        ))
    }

    #[sealed_test]
    fn install_everything_on_fresh_machine() -> anyhow::Result<()> {
        let bootstrap = bootstrap(FakeProvisioner::default())?;
        assert!(bootstrap.needs_package_manager());
        assert!(bootstrap.needs_framework());

        let result = bootstrap.run()?;
        let expect = BootstrapReport {
            package_manager_installed: true,
            packages_installed: true,
            framework_installed: true,
            plugins_installed: vec![
                "zsh-autosuggestions".into(),
                "zsh-syntax-highlighting".into(),
            ],
            plugins_failed: vec![],
        };
        assert_eq!(result, expect);

        let calls = bootstrap.provisioner().calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[0].contains("Homebrew/install"));
        assert_eq!(calls[1], "/fake/bin/brew update");
        assert!(calls[2].starts_with("/fake/bin/brew bundle --file="));
        assert!(calls[3].contains("--unattended"));
        assert!(bootstrap
            .plugin_dir(&Plugin::new("zsh-autosuggestions", ""))
            .ends_with(".oh-my-zsh/custom/plugins/zsh-autosuggestions"));

        Ok(())
    }

    #[sealed_test]
    fn skip_what_is_already_there() -> anyhow::Result<()> {
        let bootstrap = bootstrap(FakeProvisioner::default().with_program("brew"))?;
        for plugin in &BootstrapSettings::default().plugins {
            fs::create_dir_all(bootstrap.plugin_dir(plugin))?;
        }

        let result = bootstrap.run()?;
        assert_eq!(
            result,
            BootstrapReport {
                packages_installed: true,
                ..Default::default()
            }
        );
        assert_eq!(
            bootstrap.provisioner().calls()[0],
            "/fake/bin/brew update"
        );
        assert!(bootstrap.provisioner().clones.borrow().is_empty());

        Ok(())
    }

    #[sealed_test]
    fn abort_when_package_manager_fails_to_install() -> anyhow::Result<()> {
        let bootstrap = bootstrap(FakeProvisioner::default().failing_on("Homebrew/install"))?;

        let result = bootstrap.run();
        assert!(matches!(result, Err(BootstrapError::PackageManager(_))));
        assert_eq!(bootstrap.provisioner().calls().len(), 1);
        assert!(!bootstrap.framework_dir().exists());

        Ok(())
    }

    #[sealed_test]
    fn continue_when_plugin_fails_to_clone() -> anyhow::Result<()> {
        let bootstrap = bootstrap(
            FakeProvisioner::default()
                .with_program("brew")
                .failing_on("zsh-autosuggestions"),
        )?;

        let result = bootstrap.run()?;
        assert_eq!(result.plugins_failed, vec!["zsh-autosuggestions".to_string()]);
        assert_eq!(
            result.plugins_installed,
            vec!["zsh-syntax-highlighting".to_string()]
        );

        Ok(())
    }

    #[sealed_test]
    fn skip_packages_without_manifest() -> anyhow::Result<()> {
        let bootstrap = bootstrap(FakeProvisioner::default().with_program("brew"))?;
        fs::remove_file(current_dir()?.join("dotfiles/Brewfile"))?;

        let result = bootstrap.run()?;
        assert!(!result.packages_installed);
        assert!(bootstrap
            .provisioner()
            .calls()
            .iter()
            .all(|call| !call.contains("brew update")));

        Ok(())
    }
}
