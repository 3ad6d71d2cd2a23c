// SPDX-License-Identifier: GPL-3.0-only

//! LUKS wrapping of requested devices

use storage_contracts::StorageEngine;
use storage_types::{
    DeviceId, DeviceLayout, DeviceRequest, EncryptionEntry, EncryptionOptions, FormatKind,
    FormatSpec, LuksParams,
};
use tracing::debug;

use crate::context::ResolveContext;
use crate::error::{ResolveError, Result, SpecLocation, Violation};

/// Encryption settings common to both input forms.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EncryptionRequest {
    pub passphrase: Option<String>,
    pub cipher: Option<String>,
    /// Escrow certificate URL.
    pub escrow_cert: Option<String>,
    pub backup_passphrase: bool,
}

impl std::fmt::Debug for EncryptionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionRequest")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("cipher", &self.cipher)
            .field("escrow_cert", &self.escrow_cert)
            .field("backup_passphrase", &self.backup_passphrase)
            .finish()
    }
}

impl From<&EncryptionEntry> for EncryptionRequest {
    fn from(entry: &EncryptionEntry) -> Self {
        Self {
            passphrase: entry.passphrase.clone(),
            cipher: entry.cipher.clone(),
            escrow_cert: entry.escrow_cert.clone(),
            backup_passphrase: entry.backup_passphrase,
        }
    }
}

impl EncryptionRequest {
    /// `None` unless the command asked for encryption.
    pub fn from_options(options: &EncryptionOptions) -> Option<Self> {
        options.encrypted.then(|| Self {
            passphrase: options.passphrase.clone(),
            cipher: options.cipher.clone(),
            escrow_cert: options.escrow_cert.clone(),
            backup_passphrase: options.backup_passphrase,
        })
    }
}

/// Format `device` as LUKS and stack a mapped device on top of it.
///
/// `inner` is the format for the mapped device. Returns the mapped device,
/// which takes the place of `device` for everything built on top of it.
pub fn wrap<E: StorageEngine + ?Sized>(
    engine: &mut E,
    ctx: &mut ResolveContext,
    device: DeviceId,
    inner: Option<FormatSpec>,
    request: &EncryptionRequest,
    location: &SpecLocation,
) -> Result<DeviceId> {
    ctx.adopt_passphrase(request.passphrase.as_deref());
    let passphrase = request
        .passphrase
        .clone()
        .filter(|p| !p.is_empty())
        .or_else(|| ctx.passphrase().map(str::to_string));
    let escrow_cert = ctx.escrow_certificate(request.escrow_cert.as_deref());
    if passphrase.is_none() && escrow_cert.is_none() {
        return Err(ResolveError::spec(
            location.clone(),
            Violation::MissingPassphrase,
        ));
    }

    let params = LuksParams {
        passphrase,
        cipher: request.cipher.clone(),
        escrow_cert,
        backup_passphrase: request.backup_passphrase,
    };
    engine.format_device(device, FormatSpec::luks(params))?;

    let name = ctx.next_luks_name(&*engine);
    debug!("{location}: encrypting as {name}");
    let mapped = engine.create_device(
        DeviceRequest::new(DeviceLayout::Luks, vec![device])
            .named(name)
            .with_format(inner),
    )?;
    Ok(mapped)
}

/// The device to build on instead of `id`: the first child of a LUKS device,
/// `id` itself otherwise. `None` when a LUKS device has no mapping yet.
pub fn cleartext<E: StorageEngine + ?Sized>(engine: &E, id: DeviceId) -> Option<DeviceId> {
    match engine.device(id)?.format_kind() {
        Some(FormatKind::Luks) => engine.children(id).first().copied(),
        _ => Some(id),
    }
}
