// SPDX-License-Identifier: GPL-3.0-only

//! Reading the configuration or command list to resolve

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use storage_types::{KickstartScript, StorageConfig, SyntaxVersion};

#[derive(Debug)]
pub enum Input {
    Config(StorageConfig),
    Script(KickstartScript),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Toml,
    Json,
}

impl Encoding {
    fn decode<T: DeserializeOwned>(self, text: &str) -> Result<T> {
        Ok(match self {
            Self::Toml => toml::from_str(text)?,
            Self::Json => serde_json::from_str(text)?,
        })
    }
}

/// Only the `version` key, to tell an omitted version from the default one.
#[derive(Deserialize)]
struct ScriptHeader {
    #[serde(default)]
    version: Option<SyntaxVersion>,
}

pub fn read(
    path: &Path,
    encoding: Encoding,
    kickstart: bool,
    default_version: Option<SyntaxVersion>,
) -> Result<Input> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse(&text, encoding, kickstart, default_version)
        .with_context(|| format!("parsing {}", path.display()))
}

pub fn parse(
    text: &str,
    encoding: Encoding,
    kickstart: bool,
    default_version: Option<SyntaxVersion>,
) -> Result<Input> {
    if !kickstart {
        return Ok(Input::Config(encoding.decode(text)?));
    }
    let mut script: KickstartScript = encoding.decode(text)?;
    let header: ScriptHeader = encoding.decode(text)?;
    if let (None, Some(version)) = (header.version, default_version) {
        script.version = version;
    }
    Ok(Input::Script(script))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_configurations() {
        let input = parse(
            r#"{
                "storage": {
                    "disk": { "sda": { "match": { "name": "sda" } } },
                    "partition": {},
                    "btrfs": {}
                },
                "fileSystems": {}
            }"#,
            Encoding::Json,
            false,
            None,
        )
        .unwrap();
        let Input::Config(config) = input else {
            panic!("expected a configuration");
        };
        assert!(config.storage.disk.contains_key("sda"));
    }

    #[test]
    fn scripts_take_the_site_version_only_when_unversioned() {
        let unversioned = "[[commands]]\ncommand = \"clearpart\"\ntype = \"all\"\n";
        let Input::Script(script) =
            parse(unversioned, Encoding::Toml, true, Some(SyntaxVersion::F18)).unwrap()
        else {
            panic!("expected a script");
        };
        assert_eq!(script.version, SyntaxVersion::F18);

        let versioned = format!("version = \"F19\"\n{unversioned}");
        let Input::Script(script) =
            parse(&versioned, Encoding::Toml, true, Some(SyntaxVersion::F18)).unwrap()
        else {
            panic!("expected a script");
        };
        assert_eq!(script.version, SyntaxVersion::F19);
    }

    #[test]
    fn configurations_need_their_required_sections() {
        assert!(parse("[storage.disk]\n", Encoding::Toml, false, None).is_err());
    }
}
