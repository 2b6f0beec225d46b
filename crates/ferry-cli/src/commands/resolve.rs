//! Resolve command - print the URLs logical names map to.

use anyhow::Result;
use clap::Args;
use ferry_loader::{HostEnvironment, Loader};

use crate::config::Config;

#[derive(Args)]
pub struct ResolveCommand {
    /// Names to resolve (`!abs`, `/origin`, `@alias` or bucket-relative)
    #[arg(required = true)]
    pub names: Vec<String>,

    /// Bucket to resolve in (defaults to `scripts`)
    #[arg(long, short = 'b')]
    pub bucket: Option<String>,
}

impl ResolveCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        for url in self.resolve(config) {
            println!("{url}");
        }
        Ok(())
    }

    pub fn resolve(&self, config: &Config) -> Vec<String> {
        let loader = Loader::new(HostEnvironment::new());
        loader.configure(config.boot.paths.clone());
        loader.resolve_all(&self.names, self.bucket.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_loader::PathConfig;

    #[test]
    fn test_resolve_with_config_paths() {
        let mut config = Config::default();
        config.boot.paths = PathConfig::new("/app/").with_bucket("scripts", "js");

        let command = ResolveCommand {
            names: vec!["foo.js".into(), "/raw.js".into(), "!http://x".into()],
            bucket: Some("scripts".into()),
        };
        assert_eq!(
            command.resolve(&config),
            vec!["/app/js/foo.js", "/raw.js", "http://x"]
        );
    }

    #[test]
    fn test_resolve_in_loader_bucket() {
        let command = ResolveCommand {
            names: vec!["queue.js".into()],
            bucket: Some("loader".into()),
        };
        assert_eq!(
            command.resolve(&Config::default()),
            vec!["scripts/loader/queue.js"]
        );
    }
}
