// SPDX-License-Identifier: GPL-3.0-only

//! Storage actions registered with the engine

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Bytes, DeviceId, DeviceLayout, DeviceNode, DeviceRequest, FormatSpec, bytes_to_pretty};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Destroy,
    CreateFormat,
    DestroyFormat,
    ResizeDevice,
    ResizeFormat,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create device",
            Self::Destroy => "destroy device",
            Self::CreateFormat => "create format",
            Self::DestroyFormat => "destroy format",
            Self::ResizeDevice => "resize device",
            Self::ResizeFormat => "resize format",
        }
    }

    pub fn is_destructive(self) -> bool {
        matches!(
            self,
            Self::Destroy | Self::DestroyFormat | Self::ResizeDevice | Self::ResizeFormat
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ActionParams {
    Device { request: Box<DeviceRequest> },
    Format { format: FormatSpec },
    Resize { from: Bytes, to: Bytes },
    /// Snapshot of a destroyed device, taken when it left the working tree.
    Removed { node: Box<DeviceNode> },
    None,
}

/// One step of the ordered action graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAction {
    pub kind: ActionKind,
    pub device: DeviceId,
    /// Device name at registration time.
    pub target: String,
    /// Parent device names, for display.
    pub parents: Vec<String>,
    pub params: ActionParams,
}

impl StorageAction {
    pub fn new(kind: ActionKind, device: DeviceId, target: impl Into<String>) -> Self {
        Self {
            kind,
            device,
            target: target.into(),
            parents: Vec::new(),
            params: ActionParams::None,
        }
    }

    pub fn with_params(mut self, params: ActionParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_parents(mut self, parents: Vec<String>) -> Self {
        self.parents = parents;
        self
    }

    pub fn format(&self) -> Option<&FormatSpec> {
        match &self.params {
            ActionParams::Format { format } => Some(format),
            _ => None,
        }
    }

    pub fn request(&self) -> Option<&DeviceRequest> {
        match &self.params {
            ActionParams::Device { request } => Some(request),
            _ => None,
        }
    }
}

impl fmt::Display for StorageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.target)?;
        match &self.params {
            ActionParams::Device { request } => {
                write!(f, " ({})", request.kind())?;
                if !self.parents.is_empty() {
                    write!(f, " on {}", self.parents.join(", "))?;
                }
                if request.grow {
                    write!(f, " grow")?;
                }
                if let Some(size) = request.size {
                    write!(f, " size={}", bytes_to_pretty(size, false))?;
                }
                if let Some(max_size) = request.max_size {
                    write!(f, " max={}", bytes_to_pretty(max_size, false))?;
                }
                match &request.layout {
                    DeviceLayout::MdArray { level, .. } => write!(f, " level={level}")?,
                    DeviceLayout::LogicalVolume {
                        percent: Some(percent),
                    } => write!(f, " percent={percent}")?,
                    _ => {}
                }
                Ok(())
            }
            ActionParams::Format { format } => write!(f, " as {format}"),
            ActionParams::Resize { from, to } => write!(
                f,
                " from {} to {}",
                bytes_to_pretty(*from, false),
                bytes_to_pretty(*to, false)
            ),
            ActionParams::Removed { node } => write!(f, " ({})", node.kind),
            ActionParams::None => Ok(()),
        }
    }
}
