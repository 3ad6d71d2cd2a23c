// SPDX-License-Identifier: GPL-3.0-only

//! `storage-plan` site configuration

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use storage_resolver::ResolveOptions;
use storage_types::{DiskLabelType, FormatKind, SyntaxVersion};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/storage-plan/config.toml";
pub const CONFIG_ENV: &str = "STORAGE_PLAN_CONFIG";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    /// Level for `count` repetitions of `-v`.
    pub fn from_verbosity(count: u8) -> Self {
        match count {
            0 => Self::Warn,
            1 => Self::Info,
            2 => Self::Debug,
            _ => Self::Trace,
        }
    }

    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub disklabel: Option<DiskLabelType>,
    pub default_fs_type: Option<String>,
    pub default_boot_fs_type: Option<String>,
    /// Helper program run for `script` match criteria.
    pub probe_script: Option<PathBuf>,
    /// Escrow certificate files keyed by the URL scripts refer to them by.
    pub escrow_certificates: BTreeMap<String, PathBuf>,
    /// Directory for a daily rolling log file, in addition to stderr.
    pub log_dir: Option<PathBuf>,
    /// Syntax version for command lists that do not name one.
    pub syntax_version: Option<SyntaxVersion>,
}

impl AppConfig {
    /// Load from `explicit`, `$STORAGE_PLAN_CONFIG` or the default path.
    ///
    /// Only the default path may be missing; an explicitly named file must
    /// exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(path) => (PathBuf::from(path), true),
                None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
            },
        };
        if !required && !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading configuration {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing configuration {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Resolver options; escrow certificates are read from disk here.
    pub fn resolve_options(&self) -> Result<ResolveOptions> {
        let mut options = ResolveOptions::default();
        if let Some(disklabel) = self.disklabel {
            options.disklabel = disklabel;
        }
        if let Some(fs_type) = &self.default_fs_type {
            options.default_fs_type = parse_format(fs_type)?;
        }
        if let Some(fs_type) = &self.default_boot_fs_type {
            options.default_boot_fs_type = parse_format(fs_type)?;
        }
        for (url, path) in &self.escrow_certificates {
            let certificate = fs::read_to_string(path)
                .with_context(|| format!("reading escrow certificate {}", path.display()))?;
            options.escrow_certificates.insert(url.clone(), certificate);
        }
        Ok(options)
    }
}

fn parse_format(name: &str) -> Result<FormatKind> {
    match FormatKind::parse(name) {
        Some(kind) => Ok(kind),
        None => bail!("unsupported filesystem type '{name}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_keeps_resolver_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config, AppConfig::default());
        let options = config.resolve_options().unwrap();
        assert_eq!(options.disklabel, DiskLabelType::Gpt);
    }

    #[test]
    fn site_defaults_are_applied() {
        let config = AppConfig::parse(
            r#"
            disklabel = "msdos"
            default_fs_type = "xfs"
            syntax_version = "F19"
            log_dir = "/var/log/storage-plan"
            "#,
        )
        .unwrap();
        assert_eq!(config.syntax_version, Some(SyntaxVersion::F19));
        let options = config.resolve_options().unwrap();
        assert_eq!(options.disklabel, DiskLabelType::Msdos);
        assert_eq!(options.default_fs_type.name(), "xfs");
    }

    #[test]
    fn unknown_filesystems_are_rejected() {
        let config = AppConfig::parse("default_fs_type = \"zfs9\"").unwrap();
        assert!(config.resolve_options().is_err());
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(LoggingLevel::from_verbosity(0), LoggingLevel::Warn);
        assert_eq!(LoggingLevel::from_verbosity(1), LoggingLevel::Info);
        assert_eq!(LoggingLevel::from_verbosity(5).as_directive(), "trace");
    }
}
