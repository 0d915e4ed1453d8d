//! Updater flow against a mock fetcher: catalog selection, patch-vs-full
//! choice, and end-to-end verified application.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use armature_core::{
    Fetcher, FetchOptions, FrameworkConfig, FrameworkState, Headers, HttpMethod, Initiator,
    LogError, LogLevel, Logger, NetError, NetworkEvent, ProgressHandle, Progressor,
    UpdaterAppConfig,
};
use armature_update::{UpdateError, Updater};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use p256::ecdsa::signature::hazmat::PrehashSigner as _;
use p256::ecdsa::SigningKey;
use p256::pkcs8::EncodePublicKey as _;
use sha2::{Digest, Sha256};

struct SilentLogger;

impl Logger for SilentLogger {
    fn log(&self, _level: LogLevel, _message: &str) -> Result<(), LogError> {
        Ok(())
    }

    fn log_through_line(&self, _line: &str) {}
}

/// Serves canned bodies by URL and records what was requested.
#[derive(Default)]
struct MockFetcher {
    responses: Mutex<HashMap<String, Vec<u8>>>,
    requested: Mutex<Vec<String>>,
}

impl MockFetcher {
    fn insert(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), body.into());
    }

    fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

/// A fully-buffered progress handle over canned bytes.
struct MockHandle {
    event: NetworkEvent,
    buffer: Vec<u8>,
    offset: usize,
    status: u16,
    url: String,
}

#[async_trait]
impl ProgressHandle for MockHandle {
    fn event(&self) -> &NetworkEvent {
        &self.event
    }

    fn event_mut(&mut self) -> &mut NetworkEvent {
        &mut self.event
    }

    fn status(&self) -> u16 {
        self.status
    }

    fn resp_headers(&self) -> Option<&Headers> {
        None
    }

    fn final_url(&self) -> &str {
        &self.url
    }

    fn content(&self) -> Option<String> {
        Some(String::from_utf8_lossy(&self.buffer).into_owned())
    }

    fn content_bytes(&self) -> Option<&[u8]> {
        Some(&self.buffer)
    }

    fn set_step_max(&mut self, _max: u32) {}
    fn set_step_current(&mut self, _current: u32) {}
    fn unset_step_max(&mut self) {}
    fn unset_step_current(&mut self) {}
    fn incr_step_current(&mut self) {}
    fn reset_step_current(&mut self) {}

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        let n = buf.len().min(self.buffer.len() - self.offset);
        buf[..n].copy_from_slice(&self.buffer[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }

    async fn close(&mut self) -> Result<(), NetError> {
        Ok(())
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(
        &self,
        method: HttpMethod,
        url: &str,
        _stream: bool,
        _as_file: bool,
        _file_path: Option<PathBuf>,
        _progressor: Option<Progressor>,
        _body: Option<Bytes>,
        _context: Option<String>,
        _initiator: Option<Initiator>,
        options: Option<FetchOptions>,
    ) -> Result<Box<dyn ProgressHandle>, NetError> {
        self.requested.lock().unwrap().push(url.to_string());
        let body = self
            .responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| NetError::Transport(format!("mock has no response for {url}")))?;
        let event = NetworkEvent::outgoing(
            format!("Fw.Net.Fetch:{}", 0),
            method,
            url.to_string(),
            options.unwrap_or_default(),
        );
        Ok(Box::new(MockHandle {
            event,
            buffer: body,
            offset: 0,
            status: 200,
            url: url.to_string(),
        }))
    }
}

struct Fixture {
    fetcher: Arc<MockFetcher>,
    signing: SigningKey,
    public_pem: String,
}

impl Fixture {
    fn new() -> Self {
        let signing = SigningKey::from_slice(&[23u8; 32]).unwrap();
        let public_pem = signing
            .verifying_key()
            .to_public_key_pem(p256::pkcs8::LineEnding::LF)
            .unwrap();
        Fixture {
            fetcher: Arc::new(MockFetcher::default()),
            signing,
            public_pem,
        }
    }

    fn sign(&self, payload: &[u8]) -> String {
        let digest = Sha256::digest(payload);
        let signature: p256::ecdsa::Signature = self.signing.sign_prehash(&digest).unwrap();
        BASE64.encode(signature.to_der().as_bytes())
    }

    fn updater(&self, uind: i64, target_path: PathBuf) -> Updater {
        self.updater_on_channel(uind, "stable", target_path)
    }

    fn updater_on_channel(&self, uind: i64, channel: &str, target_path: PathBuf) -> Updater {
        let config = FrameworkConfig {
            updater: Some(UpdaterAppConfig {
                semver: "1.0.0".into(),
                uind,
                channel: channel.into(),
                released: "2025-01-01".into(),
                commit: "deadbeef".into(),
                public_key_pem: self.public_pem.clone(),
                deploy_url: Some("https://deploy.example/deploy.json".into()),
                forge_repo: Some("acme/app".into()),
                target: "linux-amd64".into(),
            }),
            ..FrameworkConfig::default()
        };
        let mut updater = Updater::new(
            Arc::new(config),
            self.fetcher.clone(),
            Arc::new(SilentLogger),
            Arc::new(FrameworkState::default()),
        )
        .unwrap();
        updater.set_target_path(target_path);
        updater
    }

    fn sign_der(&self, payload: &[u8]) -> Vec<u8> {
        let digest = Sha256::digest(payload);
        let signature: p256::ecdsa::Signature = self.signing.sign_prehash(&digest).unwrap();
        signature.to_der().as_bytes().to_vec()
    }

    /// Deploy manifest with one release (uind 5) carrying both a patch
    /// against uind 4 and a full binary.
    fn mount_catalog(&self, full: &[u8], patch: &[u8]) {
        let manifest = serde_json::json!({
            "format": 1,
            "channels": {
                "stable": [
                    {
                        "uind": 4,
                        "semver": "0.9.0",
                        "released": "2024-11-01",
                        "notes": "previous",
                        "sources": {
                            "linux-amd64": {
                                "url": "https://dl.example/app-4",
                                "checksum": "00",
                                "signature": null,
                                "is_patch": false,
                                "patch_for": null,
                                "patch_checksum": null,
                                "patch_signature": null,
                                "patch_url": null
                            }
                        }
                    },
                    {
                        "uind": 5,
                        "semver": "1.1.0",
                        "released": "2025-02-01",
                        "notes": "latest",
                        "sources": {
                            "linux-amd64": {
                                "url": "https://dl.example/app-5",
                                "checksum": hex::encode(Sha256::digest(full)),
                                "signature": self.sign(full),
                                "is_patch": true,
                                "patch_for": 4,
                                "patch_checksum": hex::encode(Sha256::digest(patch)),
                                "patch_signature": self.sign(patch),
                                "patch_url": "https://dl.example/app-4t5.patch"
                            },
                            "windows-amd64": {
                                "url": "https://dl.example/app-5.exe",
                                "checksum": "00",
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
        });
        self.fetcher.insert(
            "https://deploy.example/deploy.json",
            serde_json::to_vec(&manifest).unwrap(),
        );
        self.fetcher.insert("https://dl.example/app-5", full);
        self.fetcher
            .insert("https://dl.example/app-4t5.patch", patch);
    }
}

fn binaries() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let old = b"installed binary v4 ........ padding".to_vec();
    let new = b"installed binary v5 !!!!!!!! padding".to_vec();
    let mut patch = Vec::new();
    bsdiff::diff(&old, &new, &mut patch).unwrap();
    (old, new, patch)
}

#[tokio::test]
async fn newest_compatible_release_wins() {
    let fixture = Fixture::new();
    let (_, new, patch) = binaries();
    fixture.mount_catalog(&new, &patch);

    let dir = tempfile::tempdir().unwrap();
    let updater = fixture.updater(4, dir.path().join("app"));
    let latest = updater.get_latest_version().await.unwrap();

    assert_eq!(latest.uind, 5);
    assert_eq!(latest.semver, "1.1.0");
    assert!(latest.sources.contains_key("linux-amd64"));
}

#[tokio::test]
async fn matching_uind_downloads_the_patch() {
    let fixture = Fixture::new();
    let (old, new, patch) = binaries();
    fixture.mount_catalog(&new, &patch);

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("app");
    std::fs::write(&target, &old).unwrap();

    let updater = fixture.updater(4, target.clone());
    let latest = updater.get_latest_version().await.unwrap();
    updater.perform_update(&latest).await.unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), new);
    let requested = fixture.fetcher.requested();
    assert!(requested.contains(&"https://dl.example/app-4t5.patch".to_string()));
    assert!(!requested.contains(&"https://dl.example/app-5".to_string()));
}

#[tokio::test]
async fn mismatched_uind_falls_back_to_full_binary() {
    let fixture = Fixture::new();
    let (old, new, patch) = binaries();
    fixture.mount_catalog(&new, &patch);

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("app");
    std::fs::write(&target, &old).unwrap();

    // Installed ordinal 3; the patch targets 4.
    let updater = fixture.updater(3, target.clone());
    let latest = updater.get_latest_version().await.unwrap();
    updater.perform_update(&latest).await.unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), new);
    let requested = fixture.fetcher.requested();
    assert!(requested.contains(&"https://dl.example/app-5".to_string()));
    assert!(!requested.contains(&"https://dl.example/app-4t5.patch".to_string()));
}

#[tokio::test]
async fn corrupted_download_is_rejected() {
    let fixture = Fixture::new();
    let (old, new, patch) = binaries();
    fixture.mount_catalog(&new, &patch);
    // Swap the full binary for tampered bytes after signing.
    fixture
        .fetcher
        .insert("https://dl.example/app-5", b"tampered".to_vec());

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("app");
    std::fs::write(&target, &old).unwrap();

    let updater = fixture.updater(3, target.clone());
    let latest = updater.get_latest_version().await.unwrap();
    let err = updater.perform_update(&latest).await.unwrap_err();

    assert!(matches!(err, UpdateError::Verify(_)));
    // The installed binary is untouched.
    assert_eq!(std::fs::read(&target).unwrap(), old);
}

#[tokio::test]
async fn missing_target_source_is_a_config_error() {
    let fixture = Fixture::new();
    let (_, new, patch) = binaries();
    fixture.mount_catalog(&new, &patch);

    let dir = tempfile::tempdir().unwrap();
    let updater = fixture.updater(4, dir.path().join("app"));
    let mut latest = updater.get_latest_version().await.unwrap();
    latest.sources.remove("linux-amd64");

    let err = updater.perform_update(&latest).await.unwrap_err();
    assert!(matches!(err, UpdateError::Config(_)));
}

#[tokio::test]
async fn ugit_channel_reads_upmeta_from_release_notes() {
    let fixture = Fixture::new();
    let (_, new, _) = binaries();

    let body = format!(
        "Nightly build.\n\n<details>\n```yaml\n__upmeta__: \"1\"\nformat: 1\nuind: 6\nsemver: \"1.2.0\"\nchannel: ugit.dev\nsources:\n  linux-amd64:\n    filename: app_linux_amd64.bin\n    checksum: \"{}\"\n    signature: \"{}\"\n    is_patch: false\n    patch_for: null\n    patch_checksum: null\n    patch_signature: null\n```\n</details>",
        hex::encode(Sha256::digest(&new)),
        fixture.sign(&new),
    );
    let releases = serde_json::json!([
        {
            "tag_name": "v1.2.0",
            "body": body,
            "published_at": "2025-03-01",
            "assets": [
                {
                    "name": "app_linux_amd64.bin",
                    "browser_download_url": "https://forge.example/app_linux_amd64.bin",
                    "digest": ""
                }
            ]
        }
    ]);
    fixture.fetcher.insert(
        "https://api.github.com/repos/acme/app/releases",
        serde_json::to_vec(&releases).unwrap(),
    );
    fixture
        .fetcher
        .insert("https://forge.example/app_linux_amd64.bin", new.clone());

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("app");
    std::fs::write(&target, b"anything").unwrap();

    let updater = fixture.updater_on_channel(5, "ugit.dev", target.clone());
    let latest = updater.get_latest_version().await.unwrap();
    assert_eq!(latest.uind, 6);
    assert_eq!(latest.notes, "Nightly build.");
    assert_eq!(
        latest.sources["linux-amd64"].url,
        "https://forge.example/app_linux_amd64.bin"
    );

    updater.perform_update(&latest).await.unwrap();
    assert_eq!(std::fs::read(&target).unwrap(), new);
}

#[tokio::test]
async fn git_channel_builds_sources_from_asset_names() {
    let fixture = Fixture::new();
    let (old, new, patch) = binaries();

    let releases = serde_json::json!([
        {
            "tag_name": "ci-git.main-6-1.2.0",
            "body": "Automated build.\n<details>internals</details>",
            "published_at": "2025-03-02",
            "assets": [
                {
                    "name": "app_linux_amd64.bin",
                    "browser_download_url": "https://forge.example/app_linux_amd64.bin",
                    "digest": format!("sha256:{}", hex::encode(Sha256::digest(&new)))
                },
                {
                    "name": "app_linux_amd64.bin.sig",
                    "browser_download_url": "https://forge.example/app_linux_amd64.bin.sig",
                    "digest": ""
                },
                {
                    "name": "app_linux_amd64_5t6.patch",
                    "browser_download_url": "https://forge.example/app_linux_amd64_5t6.patch",
                    "digest": format!("sha256:{}", hex::encode(Sha256::digest(&patch)))
                },
                {
                    "name": "app_linux_amd64_5t6.patch.sig",
                    "browser_download_url": "https://forge.example/app_linux_amd64_5t6.patch.sig",
                    "digest": ""
                }
            ]
        }
    ]);
    fixture.fetcher.insert(
        "https://api.github.com/repos/acme/app/releases",
        serde_json::to_vec(&releases).unwrap(),
    );
    fixture
        .fetcher
        .insert("https://forge.example/app_linux_amd64.bin", new.clone());
    fixture.fetcher.insert(
        "https://forge.example/app_linux_amd64.bin.sig",
        fixture.sign_der(&new),
    );
    fixture.fetcher.insert(
        "https://forge.example/app_linux_amd64_5t6.patch",
        patch.clone(),
    );
    fixture.fetcher.insert(
        "https://forge.example/app_linux_amd64_5t6.patch.sig",
        fixture.sign_der(&patch),
    );

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("app");
    std::fs::write(&target, &old).unwrap();

    let updater = fixture.updater_on_channel(5, "git.main", target.clone());
    let latest = updater.get_latest_version().await.unwrap();
    assert_eq!(latest.uind, 6);
    assert_eq!(latest.notes, "Automated build.");

    let source = &latest.sources["linux-amd64"];
    assert!(source.is_patch);
    assert_eq!(source.patch_for, Some(5));
    assert!(source.signature_bytes.is_some());
    assert!(source.patch_signature_bytes.is_some());

    // Installed ordinal matches the patch target, so the patch is used.
    updater.perform_update(&latest).await.unwrap();
    assert_eq!(std::fs::read(&target).unwrap(), new);
    assert!(fixture
        .fetcher
        .requested()
        .contains(&"https://forge.example/app_linux_amd64_5t6.patch".to_string()));
}

#[tokio::test]
async fn unknown_channel_is_reported() {
    let fixture = Fixture::new();
    fixture.fetcher.insert(
        "https://deploy.example/deploy.json",
        serde_json::to_vec(&serde_json::json!({ "format": 1, "channels": {} })).unwrap(),
    );

    let dir = tempfile::tempdir().unwrap();
    let updater = fixture.updater(4, dir.path().join("app"));
    let err = updater.get_latest_version().await.unwrap_err();
    assert!(matches!(err, UpdateError::Config(_)));
}
