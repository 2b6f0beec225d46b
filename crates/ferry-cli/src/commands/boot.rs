//! Boot command - run the bootstrap stages against files on disk.

use anyhow::{Context, Result};
use clap::Args;
use ferry_loader::params::extend_params;
use ferry_loader::{BootConfig, ImporterKind, Loader, QueueConfig};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::config::{Config, HostKind};
use crate::fs_host::FsHost;

#[derive(Args)]
pub struct BootCommand {
    /// Directory resource URLs are mapped under (defaults to the current directory)
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Loading mechanism to offer
    #[arg(long, value_enum)]
    pub host: Option<HostKind>,

    /// Boot parameters, `name=value;flag;...`
    #[arg(long)]
    pub param: Option<String>,

    /// Resource imported before the bootstrap callback (repeatable)
    #[arg(long = "before", value_name = "NAME")]
    pub before: Vec<String>,

    /// Resource imported after the bootstrap callback (repeatable)
    #[arg(long = "after", value_name = "NAME")]
    pub after: Vec<String>,

    /// Delay between queued executions in milliseconds
    #[arg(long)]
    pub delay_ms: Option<i64>,
}

/// Outcome of a bootstrap run
#[derive(Debug)]
pub struct BootReport {
    pub importer: Option<ImporterKind>,
    pub trace: Vec<String>,
    pub requested: usize,
    pub imported: usize,
    pub progress: f64,
    pub output: Value,
}

impl BootCommand {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let report = self.execute(config).await?;

        if let Some(kind) = report.importer {
            println!("importer: {kind}");
        }
        for (i, url) in report.trace.iter().enumerate() {
            println!("{:>4}. {url}", i + 1);
        }
        println!(
            "progress: {:.2} ({}/{})",
            report.progress, report.imported, report.requested
        );
        if !report.output.is_null() {
            println!("params: {}", report.output);
        }
        Ok(())
    }

    pub async fn execute(&self, config: &Config) -> Result<BootReport> {
        let base_dir = match self.base_dir.clone().or_else(|| config.host.base_dir.clone()) {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        let kind = self.host.unwrap_or(config.host.kind);

        let host = FsHost::new(base_dir)?;
        let loader = Loader::new(host.environment(kind, config.host.queue_runtime.as_deref()));
        host.attach(&loader);

        let boot = self.boot_config(config)?;
        loader
            .init(boot)
            .await
            .with_context(|| format!("bootstrap from {} failed", host.base_dir().display()))
            .map(|output| BootReport {
                importer: loader.importer().map(|importer| importer.kind()),
                trace: host.trace(),
                requested: loader.num_requested(),
                imported: loader.num_imported(),
                progress: loader.load_progress(),
                output,
            })
    }

    fn boot_config(&self, config: &Config) -> Result<BootConfig> {
        let mut boot = BootConfig::from(config.boot.clone())
            .before_boot(self.before.iter().cloned())
            .after_boot(self.after.iter().cloned());

        if let Some(delay) = self.delay_ms {
            boot = boot.queue(QueueConfig {
                execute_delay_ms: delay,
            });
        }

        let mut params = match &boot.boot_param {
            Value::Object(params) => params.clone(),
            Value::Null => Map::new(),
            other => anyhow::bail!("boot_param must be a table, found {other}"),
        };
        if let Some(input) = &self.param {
            extend_params(&mut params, input, &config.host.conversions()?);
        }

        // The bootstrap callback hands the merged parameters back as output.
        Ok(boot
            .boot_param(Value::Object(params))
            .bootstrap(|loader, param| async move {
                tracing::info!(root = %loader.root_path(), "booting");
                Ok(param)
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, source: &str) {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, source).unwrap();
    }

    fn command(dir: &Path, host: HostKind) -> BootCommand {
        BootCommand {
            base_dir: Some(dir.to_path_buf()),
            host: Some(host),
            param: None,
            before: Vec::new(),
            after: Vec::new(),
            delay_ms: None,
        }
    }

    #[tokio::test]
    async fn test_boot_queue_host_in_order() {
        let dir = tempdir().unwrap();
        write(dir.path(), "scripts/s1.js", r#"imports("shared.js");"#);
        write(dir.path(), "scripts/s2.js", "");
        write(dir.path(), "scripts/shared.js", "");
        write(dir.path(), "scripts/main.js", r#"imports("shared.js");"#);

        let mut cmd = command(dir.path(), HostKind::Queue);
        cmd.before = vec!["s1.js".into(), "s2.js".into()];
        cmd.after = vec!["main.js".into()];
        cmd.delay_ms = Some(0);

        let report = cmd.execute(&Config::default()).await.unwrap();
        assert_eq!(report.importer, Some(ImporterKind::Queue));
        assert_eq!(report.trace[..2], ["scripts/s1.js", "scripts/s2.js"]);
        assert_eq!(
            report.trace.iter().filter(|url| url.ends_with("shared.js")).count(),
            1
        );
        assert!(report.trace.contains(&"scripts/main.js".to_string()));
    }

    #[tokio::test]
    async fn test_boot_params_are_merged() {
        let dir = tempdir().unwrap();
        let mut config: Config = toml::from_str(
            "[boot.boot_param]\nname = \"demo\"\n\n[host.param_types]\nlevel = \"int\"\n",
        )
        .unwrap();
        config.host.kind = HostKind::Worker;

        let mut cmd = command(dir.path(), HostKind::Worker);
        cmd.host = None;
        cmd.param = Some("level=3;verbose".into());

        let report = cmd.execute(&config).await.unwrap();
        assert_eq!(report.importer, Some(ImporterKind::Worker));
        assert_eq!(
            report.output,
            json!({ "name": "demo", "level": 3, "verbose": true })
        );
        assert_eq!(report.progress, 0.0);
    }

    #[tokio::test]
    async fn test_boot_reports_missing_resource() {
        let dir = tempdir().unwrap();
        let mut cmd = command(dir.path(), HostKind::Module);
        cmd.after = vec!["absent.js".into()];

        let err = cmd.execute(&Config::default()).await.unwrap_err();
        assert!(err.to_string().contains("bootstrap from"));
        assert!(format!("{err:#}").contains("afterBoot: 1 of 1 imports failed"));
    }
}
