use std::path::PathBuf;
use std::sync::Arc;

use armature_core::state::{NET_INTERNAL_ERROR_LOG, UPDATE_INTERNAL_ERROR_LOG};
use armature_core::{
    Fetcher, FrameworkConfig, FrameworkState, LogThrough, Logger, ProgressHandle, ReleaseInfo,
    SourceInfo, UpdaterAppConfig,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::apply::{apply, ApplyOptions, BsdiffPatcher, EcdsaVerifier};
use crate::error::UpdateError;
use crate::forge::ForgeUpdateFetcher;

/// Checks for and applies updates from the configured release catalog.
pub struct Updater {
    app: UpdaterAppConfig,
    fetcher: Arc<dyn Fetcher>,
    logger: Arc<dyn Logger>,
    state: Arc<FrameworkState>,
    forge: Option<ForgeUpdateFetcher>,
    target_path: Option<PathBuf>,
}

impl Updater {
    /// Requires `config.updater` to be present. A forge fetcher is wired
    /// automatically when the repo is configured as `owner/repo`.
    pub fn new(
        config: Arc<FrameworkConfig>,
        fetcher: Arc<dyn Fetcher>,
        logger: Arc<dyn Logger>,
        state: Arc<FrameworkState>,
    ) -> Result<Self, UpdateError> {
        let app = config
            .updater
            .clone()
            .ok_or_else(|| UpdateError::Config("updater configuration is missing".into()))?;

        let forge = app.forge_repo.as_deref().and_then(|repo| {
            repo.split_once('/').map(|(owner, name)| {
                ForgeUpdateFetcher::new(
                    owner,
                    name,
                    Arc::clone(&fetcher),
                    Arc::clone(&logger),
                    Arc::clone(&state),
                )
            })
        });

        Ok(Updater {
            app,
            fetcher,
            logger,
            state,
            forge,
            target_path: None,
        })
    }

    /// Override where the updated binary is written. Defaults to the
    /// running executable.
    pub fn set_target_path(&mut self, path: PathBuf) {
        self.target_path = Some(path);
    }

    pub fn app_config(&self) -> &UpdaterAppConfig {
        &self.app
    }

    fn log_through_update(&self, err: UpdateError) -> UpdateError {
        if self.state.flags.is_enabled(UPDATE_INTERNAL_ERROR_LOG) {
            self.logger.log_through(err)
        } else {
            err
        }
    }

    /// Resolve the newest release compatible with the running channel and
    /// target triple. The channel prefix selects the catalog: `ugit.` for
    /// forge releases with embedded `__upmeta__`, `git.` for asset-named
    /// forge releases, anything else for the JSON deploy manifest.
    pub async fn get_latest_version(&self) -> Result<ReleaseInfo, UpdateError> {
        if self.app.channel.starts_with("ugit.") {
            let Some(forge) = &self.forge else {
                return Err(self.log_through_update(UpdateError::Config(
                    "forge update meta repo not configured for 'ugit.' channel".into(),
                )));
            };
            self.latest_from_forge(forge, true).await
        } else if self.app.channel.starts_with("git.") {
            let Some(forge) = &self.forge else {
                return Err(self.log_through_update(UpdateError::Config(
                    "forge update meta repo not configured for 'git.' channel".into(),
                )));
            };
            self.latest_from_forge(forge, false).await
        } else {
            self.latest_from_json_deploy().await
        }
    }

    async fn latest_from_json_deploy(&self) -> Result<ReleaseInfo, UpdateError> {
        let deploy_url = match self.app.deploy_url.as_deref() {
            Some(url) if !url.is_empty() => url,
            _ => {
                return Err(self.log_through_update(UpdateError::Config(
                    "deploy manifest URL is not configured".into(),
                )));
            }
        };

        let report = {
            let _quiet = self.state.flags.suppress(NET_INTERNAL_ERROR_LOG);
            self.fetcher
                .get(deploy_url, false, false, None)
                .await
                .map_err(|e| {
                    self.log_through_update(UpdateError::Fetch(format!(
                        "failed to fetch deploy manifest from {deploy_url}: {e}"
                    )))
                })?
        };

        if report.status() != 200 {
            return Err(self.log_through_update(UpdateError::Fetch(format!(
                "failed to fetch deploy manifest, status code: {}",
                report.status()
            ))));
        }
        let content = report.content_bytes().ok_or_else(|| {
            self.log_through_update(UpdateError::Fetch(
                "received empty content for deploy manifest".into(),
            ))
        })?;

        let deploy: armature_core::DeployFile = serde_json::from_slice(content).map_err(|e| {
            self.log_through_update(UpdateError::Decode(format!(
                "failed to parse deploy manifest: {e}"
            )))
        })?;

        let releases = deploy
            .channels
            .get(&self.app.channel)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                self.log_through_update(UpdateError::Config(format!(
                    "no releases found for channel '{}'",
                    self.app.channel
                )))
            })?;

        let latest = releases
            .iter()
            .filter(|release| release.sources.contains_key(&self.app.target))
            .max_by_key(|release| release.uind);

        latest.cloned().ok_or_else(|| {
            self.log_through_update(UpdateError::Config(format!(
                "no compatible releases found for channel '{}' on {}",
                self.app.channel, self.app.target
            )))
        })
    }

    async fn latest_from_forge(
        &self,
        forge: &ForgeUpdateFetcher,
        upmeta: bool,
    ) -> Result<ReleaseInfo, UpdateError> {
        let releases = if upmeta {
            forge.fetch_upmeta_releases().await
        } else {
            forge.fetch_asset_releases().await
        }
        .map_err(|e| self.log_through_update(e))?;

        let latest = releases
            .into_iter()
            .filter_map(|release| {
                let upmeta = release.upmeta?;
                if upmeta.channel != self.app.channel {
                    return None;
                }
                if !upmeta.sources.contains_key(&self.app.target) {
                    return None;
                }
                Some(ReleaseInfo {
                    uind: upmeta.uind,
                    semver: upmeta.semver,
                    released: release.released,
                    notes: release.notes,
                    sources: upmeta.sources,
                })
            })
            .max_by_key(|release| release.uind);

        latest.ok_or_else(|| {
            self.log_through_update(UpdateError::Config(format!(
                "no compatible forge releases found for channel '{}' on {}",
                self.app.channel, self.app.target
            )))
        })
    }

    /// Pick what to download for this source: the patch when it applies
    /// to the installed ordinal and is fully described, else the full
    /// binary. Returns `(url, checksum_hex, signature, is_patch)`.
    fn select_download(
        &self,
        source: &SourceInfo,
    ) -> Result<(String, String, Vec<u8>, bool), UpdateError> {
        let patch_applicable = source.is_patch
            && source.patch_url.as_deref().is_some_and(|u| !u.is_empty())
            && source.patch_for.is_some()
            && source.patch_checksum.as_deref().is_some_and(|c| !c.is_empty())
            && (source.patch_signature.as_deref().is_some_and(|s| !s.is_empty())
                || source.patch_signature_bytes.is_some());

        if patch_applicable {
            if source.patch_for == Some(self.app.uind) {
                let url = source.patch_url.clone().unwrap_or_default();
                let checksum = source.patch_checksum.clone().unwrap_or_default();
                let signature = self.decode_signature(
                    source.patch_signature.as_deref(),
                    source.patch_signature_bytes.as_deref(),
                    "patch",
                )?;
                return Ok((url, checksum, signature, true));
            }
            let _ = self.logger.warn(&format!(
                "patch is for uind {}, but current uind is {}; falling back to full update",
                source.patch_for.unwrap_or(-1),
                self.app.uind
            ));
        } else if source.is_patch {
            let _ = self.logger.warn(
                "release is marked as patch but the patch is not fully described; falling back to full update",
            );
        }

        let signature = self.decode_signature(
            source.signature.as_deref(),
            source.signature_bytes.as_deref(),
            "full binary",
        )?;
        Ok((source.url.clone(), source.checksum.clone(), signature, false))
    }

    /// The string (base64) form is preferred when both are present.
    fn decode_signature(
        &self,
        encoded: Option<&str>,
        raw: Option<&[u8]>,
        what: &str,
    ) -> Result<Vec<u8>, UpdateError> {
        if let Some(encoded) = encoded.filter(|s| !s.is_empty()) {
            return BASE64.decode(encoded).map_err(|e| {
                self.log_through_update(UpdateError::Decode(format!(
                    "failed to decode {what} signature: {e}"
                )))
            });
        }
        if let Some(raw) = raw {
            return Ok(raw.to_vec());
        }
        Err(self.log_through_update(UpdateError::Config(format!(
            "{what} signature is missing for {}",
            self.app.target
        ))))
    }

    /// Download and apply the given release: patch when possible, full
    /// binary otherwise, always checksum- and signature-verified with
    /// atomic on-disk replacement.
    pub async fn perform_update(&self, release: &ReleaseInfo) -> Result<(), UpdateError> {
        let source = release.sources.get(&self.app.target).ok_or_else(|| {
            self.log_through_update(UpdateError::Config(format!(
                "no update source found for current platform: {}",
                self.app.target
            )))
        })?;

        let (download_url, checksum_hex, signature, is_patch) = self.select_download(source)?;

        let checksum = hex::decode(checksum_hex.trim()).map_err(|e| {
            self.log_through_update(UpdateError::Decode(format!(
                "failed to decode checksum: {e}"
            )))
        })?;

        let verifier = EcdsaVerifier::from_pem(&self.app.public_key_pem)
            .map_err(|e| self.log_through_update(e))?;

        let target_path = match &self.target_path {
            Some(path) => path.clone(),
            None => std::env::current_exe()?,
        };

        let options = ApplyOptions {
            target_path,
            checksum,
            signature,
            verifier: Box::new(verifier),
            patcher: if is_patch {
                Some(Box::new(BsdiffPatcher))
            } else {
                None
            },
        };

        let mut report = {
            let _quiet = self.state.flags.suppress(NET_INTERNAL_ERROR_LOG);
            self.fetcher
                .get(&download_url, true, false, None)
                .await
                .map_err(|e| {
                    self.log_through_update(UpdateError::Fetch(format!(
                        "failed to download update from {download_url}: {e}"
                    )))
                })?
        };

        if report.status() != 200 {
            report.close().await.ok();
            return Err(self.log_through_update(UpdateError::Fetch(format!(
                "failed to download update from {download_url}, status code: {}",
                report.status()
            ))));
        }

        let result = apply(report.as_mut(), options).await;
        report.close().await.ok();
        result.map_err(|e| self.log_through_update(e))
    }
}
