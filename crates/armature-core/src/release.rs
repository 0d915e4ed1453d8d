use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The `__upmeta__` YAML structure embedded in release bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpMeta {
    #[serde(rename = "__upmeta__")]
    pub upmeta_ver: String,
    #[serde(default)]
    pub format: i64,
    pub uind: i64,
    pub semver: String,
    pub channel: String,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceInfo>,
}

/// Details about one update source: a binary for a platform-arch target.
///
/// The single source of truth for update file metadata, shared between the
/// `__upmeta__` layer and the normalized release catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub signature: Option<String>,
    /// Raw signature bytes fetched from a `.sig` asset; never serialized.
    #[serde(skip)]
    pub signature_bytes: Option<Vec<u8>>,
    /// Reserved for future manifest formats; never populated.
    #[serde(skip)]
    pub signature_url: Option<String>,
    #[serde(default)]
    pub is_patch: bool,
    #[serde(default)]
    pub patch_for: Option<i64>,
    #[serde(default)]
    pub patch_checksum: Option<String>,
    #[serde(default)]
    pub patch_signature: Option<String>,
    #[serde(skip)]
    pub patch_signature_bytes: Option<Vec<u8>>,
    /// Reserved for future manifest formats; never populated.
    #[serde(skip)]
    pub patch_signature_url: Option<String>,
    #[serde(default)]
    pub patch_url: Option<String>,
    #[serde(default)]
    pub filename: String,
    /// Name of the patch asset; only used while parsing `__upmeta__`.
    #[serde(default)]
    pub patch_asset: Option<String>,
}

/// A processed release: its tag, human notes, and optional update metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseData {
    pub tag: String,
    pub notes: String,
    pub released: String,
    pub upmeta: Option<UpMeta>,
}

/// A raw source-forge release as returned by the releases API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgeRelease {
    pub tag_name: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub assets: Vec<ForgeAsset>,
    #[serde(rename = "published_at", default)]
    pub released: String,
}

/// A release asset from the source-forge API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgeAsset {
    pub name: String,
    pub browser_download_url: String,
    /// Content digest in `<algo>:<hex>` form, when the forge provides one.
    #[serde(default)]
    pub digest: String,
}

/// Normalized details about one release, independent of catalog source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub uind: i64,
    pub semver: String,
    #[serde(default)]
    pub released: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceInfo>,
}

/// Shape of the JSON deploy manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployFile {
    #[serde(default)]
    pub format: i64,
    pub channels: BTreeMap<String, Vec<ReleaseInfo>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deploy_manifest_parses() {
        let raw = r#"{
            "format": 1,
            "channels": {
                "stable": [
                    {
                        "uind": 4,
                        "semver": "1.2.0",
                        "released": "2025-05-01",
                        "notes": "fixes",
                        "sources": {
                            "linux-amd64": {
                                "url": "https://dl.example.com/app",
                                "checksum": "aa",
                                "signature": null,
                                "is_patch": false,
                                "patch_for": null,
                                "patch_checksum": null,
                                "patch_signature": null,
                                "patch_url": null
                            }
                        }
                    }
                ]
            }
        }"#;
        let deploy: DeployFile = serde_json::from_str(raw).unwrap();
        let releases = &deploy.channels["stable"];
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].uind, 4);
        assert!(releases[0].sources.contains_key("linux-amd64"));
        assert!(!releases[0].sources["linux-amd64"].is_patch);
    }

    #[test]
    fn source_info_skips_reserved_fields() {
        let source = SourceInfo {
            url: "u".into(),
            checksum: "c".into(),
            signature_bytes: Some(vec![1, 2, 3]),
            signature_url: Some("never".into()),
            ..SourceInfo::default()
        };
        let value = serde_json::to_value(&source).unwrap();
        assert!(value.get("signature_bytes").is_none());
        assert!(value.get("signature_url").is_none());

        let back: SourceInfo = serde_json::from_value(value).unwrap();
        assert_eq!(back.signature_bytes, None);
        assert_eq!(back.signature_url, None);
    }
}
