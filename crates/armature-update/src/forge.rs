use std::sync::Arc;

use armature_core::state::NET_INTERNAL_ERROR_LOG;
use armature_core::{
    Fetcher, FetchOptions, ForgeAsset, ForgeRelease, FrameworkState, Logger, ProgressHandle,
    ReleaseData, SourceInfo, UpMeta,
};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::UpdateError;

static YAML_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```yaml\s*\n(.*?)```").expect("yaml block pattern"));

/// Fetches releases from a source forge and turns them into processed
/// [`ReleaseData`], either from `__upmeta__` YAML embedded in release
/// notes or from tag and asset naming conventions.
pub struct ForgeUpdateFetcher {
    owner: String,
    repo: String,
    fetcher: Arc<dyn Fetcher>,
    logger: Arc<dyn Logger>,
    state: Arc<FrameworkState>,
}

impl ForgeUpdateFetcher {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        fetcher: Arc<dyn Fetcher>,
        logger: Arc<dyn Logger>,
        state: Arc<FrameworkState>,
    ) -> Self {
        ForgeUpdateFetcher {
            owner: owner.into(),
            repo: repo.into(),
            fetcher,
            logger,
            state,
        }
    }

    /// Forge APIs reject anonymous requests without a user agent.
    fn request_options(&self) -> FetchOptions {
        FetchOptions::default().header("User-Agent", "armature-update")
    }

    async fn fetch_releases(&self) -> Result<Vec<ForgeRelease>, UpdateError> {
        let url = format!(
            "https://api.github.com/repos/{}/{}/releases",
            self.owner, self.repo
        );

        // Release probing interprets its own failures; keep the engine
        // from double-logging them.
        let _quiet = self.state.flags.suppress(NET_INTERNAL_ERROR_LOG);
        let report = self
            .fetcher
            .fetch(
                armature_core::HttpMethod::Get,
                &url,
                false,
                false,
                None,
                None,
                None,
                Some("Fw.Update.Releases".into()),
                None,
                Some(self.request_options()),
            )
            .await
            .map_err(|e| UpdateError::Fetch(format!("fetcher GET failed for {url}: {e}")))?;

        if report.status() != 200 {
            let body = report.content().unwrap_or_else(|| "No body".into());
            return Err(UpdateError::Fetch(format!(
                "HTTP status {}: {body}",
                report.status()
            )));
        }
        let content = report
            .content_bytes()
            .ok_or_else(|| UpdateError::Fetch(format!("received empty content for {url}")))?;
        serde_json::from_slice(content).map_err(|e| UpdateError::Decode(e.to_string()))
    }

    async fn fetch_binary_content(&self, url: &str) -> Result<Vec<u8>, UpdateError> {
        let _quiet = self.state.flags.suppress(NET_INTERNAL_ERROR_LOG);
        let mut report = self
            .fetcher
            .fetch(
                armature_core::HttpMethod::Get,
                url,
                true,
                false,
                None,
                None,
                None,
                Some("Fw.Update.Asset".into()),
                None,
                Some(self.request_options()),
            )
            .await
            .map_err(|e| UpdateError::Fetch(format!("failed to fetch content from {url}: {e}")))?;

        if report.status() != 200 {
            report.close().await.ok();
            return Err(UpdateError::Fetch(format!(
                "HTTP status {} fetching {url}",
                report.status()
            )));
        }
        let content = report.read_to_end().await?;
        report.close().await.ok();
        Ok(content)
    }

    /// Releases whose bodies embed `__upmeta__` YAML; asset URLs are
    /// attached by filename afterwards.
    pub async fn fetch_upmeta_releases(&self) -> Result<Vec<ReleaseData>, UpdateError> {
        let releases = self.fetch_releases().await?;

        let mut results = Vec::new();
        for release in releases {
            let (notes, upmeta) = match parse_release_body_for_upmeta(&release.body) {
                Ok(parsed) => parsed,
                Err(e) => {
                    let _ = self.logger.error(&format!(
                        "parsing release body for tag {}: {e}",
                        release.tag_name
                    ));
                    continue;
                }
            };

            let upmeta = upmeta.map(|mut upmeta| {
                for source in upmeta.sources.values_mut() {
                    if let Some(url) = find_asset_url(&release.assets, &source.filename) {
                        source.url = url;
                    }
                    source.patch_url = source
                        .patch_asset
                        .as_deref()
                        .and_then(|asset| find_asset_url(&release.assets, asset));
                }
                upmeta
            });

            results.push(ReleaseData {
                tag: release.tag_name,
                notes,
                released: release.released,
                upmeta,
            });
        }
        Ok(results)
    }

    /// Releases described purely by `ci-` tag shape and asset naming;
    /// checksums come from asset digests and signatures from eagerly
    /// fetched `.sig` siblings.
    pub async fn fetch_asset_releases(&self) -> Result<Vec<ReleaseData>, UpdateError> {
        let releases = self.fetch_releases().await?;

        let mut results = Vec::new();
        for release in releases {
            let mut upmeta = if release.tag_name.starts_with("ci-") {
                match parse_asset_release_for_meta(&release.tag_name) {
                    Ok(meta) => Some(meta),
                    Err(e) => {
                        let _ = self
                            .logger
                            .error(&format!("parsing tag {}: {e}", release.tag_name));
                        None
                    }
                }
            } else {
                None
            };

            let notes = release
                .body
                .split("<details>")
                .next()
                .unwrap_or_default()
                .trim()
                .to_string();

            if let Some(meta) = upmeta.as_mut() {
                for asset in &release.assets {
                    if asset.name.ends_with(".sig") || asset.name.contains(".patch") {
                        continue;
                    }

                    let source_key = extract_platform_arch(&asset.name);
                    if source_key.is_empty() {
                        let _ = self.logger.warn(&format!(
                            "could not determine platform-arch for asset '{}', skipping",
                            asset.name
                        ));
                        continue;
                    }

                    let mut source = SourceInfo {
                        url: asset.browser_download_url.clone(),
                        filename: asset.name.clone(),
                        checksum: match digest_sha256(&asset.digest) {
                            Some(checksum) => checksum,
                            None => {
                                let _ = self.logger.warn(&format!(
                                    "unexpected digest format for asset {}: {}",
                                    asset.name, asset.digest
                                ));
                                String::new()
                            }
                        },
                        ..SourceInfo::default()
                    };

                    let sig_name = format!("{}.sig", asset.name);
                    if let Some(sig_url) = find_asset_url(&release.assets, &sig_name) {
                        match self.fetch_binary_content(&sig_url).await {
                            Ok(bytes) => source.signature_bytes = Some(bytes),
                            Err(e) => {
                                let _ = self.logger.error(&format!(
                                    "fetching signature for {}: {e}",
                                    asset.name
                                ));
                            }
                        }
                    }

                    self.attach_patch(&release.assets, asset, &mut source).await;

                    meta.sources.insert(source_key, source);
                }
            }

            results.push(ReleaseData {
                tag: release.tag_name,
                notes,
                released: release.released,
                upmeta,
            });
        }
        Ok(results)
    }

    /// Pair `<basename>_<patchFor>t<uind>.patch` assets (and their `.sig`
    /// siblings) with their main asset.
    async fn attach_patch(&self, assets: &[ForgeAsset], main: &ForgeAsset, source: &mut SourceInfo) {
        let base = main
            .name
            .strip_suffix(file_extension(&main.name))
            .unwrap_or(&main.name);
        let pattern = format!("^{}_(\\d+)t(\\d+)\\.patch$", regex::escape(base));
        let Ok(patch_re) = Regex::new(&pattern) else {
            return;
        };

        for candidate in assets {
            if !candidate.name.ends_with(".patch") {
                continue;
            }
            let Some(captures) = patch_re.captures(&candidate.name) else {
                continue;
            };

            source.is_patch = true;
            source.patch_url = Some(candidate.browser_download_url.clone());
            source.patch_checksum = digest_sha256(&candidate.digest);
            source.patch_for = captures[1].parse::<i64>().ok();
            source.patch_asset = Some(candidate.name.clone());

            let patch_sig_name = format!("{}.sig", candidate.name);
            if let Some(sig_url) = find_asset_url(assets, &patch_sig_name) {
                match self.fetch_binary_content(&sig_url).await {
                    Ok(bytes) => source.patch_signature_bytes = Some(bytes),
                    Err(e) => {
                        let _ = self.logger.error(&format!(
                            "fetching patch signature for {}: {e}",
                            candidate.name
                        ));
                    }
                }
            }
            break;
        }
    }
}

/// Split the notes (everything before the first `<details>`) from the
/// first fenced YAML block carrying a top-level `__upmeta__` key.
pub(crate) fn parse_release_body_for_upmeta(
    body: &str,
) -> Result<(String, Option<UpMeta>), UpdateError> {
    let notes = body
        .split("<details>")
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    for captures in YAML_BLOCK.captures_iter(body) {
        let yaml_content = captures[1].trim();
        if yaml_content.contains("__upmeta__") {
            let upmeta: UpMeta = serde_yaml::from_str(yaml_content)
                .map_err(|e| UpdateError::Decode(format!("failed to parse UpMeta YAML: {e}")))?;
            return Ok((notes, Some(upmeta)));
        }
    }
    Ok((notes, None))
}

/// Parse a `ci-<channel-with-dashes>-<uind>-<semver>` tag into metadata
/// with an empty source map.
pub(crate) fn parse_asset_release_for_meta(tag_name: &str) -> Result<UpMeta, UpdateError> {
    let stripped = tag_name.trim_start_matches("ci-");
    let parts: Vec<&str> = stripped.split('-').collect();
    if parts.len() < 3 {
        return Err(UpdateError::Decode(format!(
            "invalid tag format for '{tag_name}': expected at least 3 parts after 'ci-' (channel-uind-semver)"
        )));
    }

    let semver = parts[parts.len() - 1].to_string();
    let uind_str = parts[parts.len() - 2];
    let channel = parts[..parts.len() - 2].join("-");

    let uind: i64 = uind_str.parse().map_err(|e| {
        UpdateError::Decode(format!("invalid uind '{uind_str}' in tag '{tag_name}': {e}"))
    })?;

    // Validate the semver portion eagerly so malformed tags surface here
    // instead of at comparison time.
    semver::Version::parse(&semver)
        .map_err(|e| UpdateError::Decode(format!("invalid semver in tag '{tag_name}': {e}")))?;

    Ok(UpMeta {
        upmeta_ver: "unknown".into(),
        format: 1,
        uind,
        semver,
        channel,
        sources: Default::default(),
    })
}

/// `sha256:<hex>` digest to bare hex.
fn digest_sha256(digest: &str) -> Option<String> {
    match digest.split_once(':') {
        Some(("sha256", hex)) if !hex.is_empty() => Some(hex.to_string()),
        _ => None,
    }
}

fn find_asset_url(assets: &[ForgeAsset], name: &str) -> Option<String> {
    assets
        .iter()
        .find(|a| a.name == name)
        .map(|a| a.browser_download_url.clone())
}

/// Everything from the final dot, or empty when there is no extension.
fn file_extension(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(i) if i + 1 < filename.len() => &filename[i..],
        _ => "",
    }
}

/// Recover `<platform>-<arch>` from the last two delimited tokens of an
/// asset filename, e.g. `app_v2_linux_amd64.tar` -> `linux-amd64`.
pub(crate) fn extract_platform_arch(filename: &str) -> String {
    let stem = filename
        .strip_suffix(file_extension(filename))
        .unwrap_or(filename);
    let tokens: Vec<&str> = stem
        .split(['-', '_'])
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() < 2 {
        return String::new();
    }
    format!("{}-{}", tokens[tokens.len() - 2], tokens[tokens.len() - 1])
}
