use std::collections::HashMap;
use std::path::PathBuf;

use armature_core::{
    FetchOptions, HashAlgorithm, HttpMethod, Initiator, NetError, NetState, NetworkEvent,
    ProgressHandle, Progressor,
};
use bytes::{Bytes, BytesMut};
use serde_json::Value;

use crate::engine::FetchEngine;
use crate::report::ProgressReport;

/// Chibit index format revisions. 1.0 and 1.1 are identical today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChibitVersion {
    V1_0,
    V1_1,
    V2_0,
}

/// How a chibit's content is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChibitType {
    Single,
    Split,
    Redirect,
}

#[derive(Debug, Clone)]
pub struct ChibitChecksum {
    pub algorithm: HashAlgorithm,
    pub hash: String,
}

/// Parsed per-entry metadata: an ordered chunk list plus the expected
/// size and checksum of the reassembled content.
#[derive(Debug, Clone)]
pub struct ChibitMetadata {
    pub filename: String,
    pub checksum: ChibitChecksum,
    pub size: i64,
    pub kind: ChibitType,
    pub chunks: Vec<String>,
    pub max_size: i64,
    pub version: ChibitVersion,
}

/// `chibit:<uuid>[@<repo>][;<fallback>]`
fn parse_chibit_url(raw: &str) -> (String, Option<String>, Option<String>) {
    let rest = raw.trim().trim_start_matches("chibit:");
    let (rest, fallback) = match rest.split_once(';') {
        Some((head, tail)) if !tail.is_empty() => (head, Some(tail.to_string())),
        Some((head, _)) => (head, None),
        None => (rest, None),
    };
    let (uuid, repo) = match rest.split_once('@') {
        Some((uuid, repo)) if !repo.is_empty() => (uuid, Some(repo.to_string())),
        Some((uuid, _)) => (uuid, None),
        None => (rest, None),
    };
    (uuid.to_string(), repo, fallback)
}

fn parse_hash_algorithm(raw: &str) -> Result<HashAlgorithm, NetError> {
    match raw {
        "crc32" => Ok(HashAlgorithm::Crc32),
        "sha1" => Ok(HashAlgorithm::Sha1),
        "sha256" => Ok(HashAlgorithm::Sha256),
        other => Err(NetError::Decode(format!(
            "unsupported hash algorithm for parsing: {other}"
        ))),
    }
}

/// Parse a v1.0/v1.1 entry document.
fn parse_chibit_entry(content: &[u8]) -> Result<ChibitMetadata, NetError> {
    let raw: Value = serde_json::from_slice(content)
        .map_err(|e| NetError::Decode(format!("malformed chibit entry: {e}")))?;

    let version = match raw.get("chibit-version").and_then(Value::as_str) {
        Some("1.0") => ChibitVersion::V1_0,
        Some("1.1") => ChibitVersion::V1_1,
        Some("2.0") => {
            return Err(NetError::Decode("unsupported chibit version: 2.0".into()));
        }
        Some(other) => {
            return Err(NetError::Decode(format!("unknown chibit version: {other}")));
        }
        None => return Err(NetError::Decode("chibit entry missing version".into())),
    };

    let field_str = |key: &str| -> Result<String, NetError> {
        raw.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| NetError::Decode(format!("chibit entry missing {key}")))
    };

    let kind = match field_str("type")?.as_str() {
        "single" => ChibitType::Single,
        "split" => ChibitType::Split,
        "redirect" => ChibitType::Redirect,
        other => {
            return Err(NetError::Decode(format!("unknown chibit type: {other}")));
        }
    };

    let checksum_raw = raw
        .get("checksum")
        .and_then(Value::as_object)
        .ok_or_else(|| NetError::Decode("chibit entry missing checksum".into()))?;
    let algorithm = parse_hash_algorithm(
        checksum_raw
            .get("algorithm")
            .and_then(Value::as_str)
            .unwrap_or_default(),
    )?;
    let hash_value = checksum_raw.get("hash");
    let hash = match algorithm {
        // CRC32 sums arrive as JSON numbers or strings; numbers are
        // coerced to the decimal form of the unsigned 32-bit value.
        HashAlgorithm::Crc32 => match hash_value {
            Some(Value::Number(n)) => {
                let n = n
                    .as_u64()
                    .or_else(|| n.as_f64().map(|f| f as u64))
                    .ok_or_else(|| NetError::Decode("unexpected type for CRC32 hash".into()))?;
                format!("{}", n as u32)
            }
            Some(Value::String(s)) => s.clone(),
            _ => return Err(NetError::Decode("unexpected type for CRC32 hash".into())),
        },
        _ => match hash_value {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(NetError::Decode("unexpected type for SHA hash".into())),
        },
    };

    let chunks = raw
        .get("chunks")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Ok(ChibitMetadata {
        filename: field_str("filename")?,
        checksum: ChibitChecksum { algorithm, hash },
        size: raw.get("size").and_then(Value::as_i64).unwrap_or(-1),
        kind,
        chunks,
        max_size: raw.get("max-size").and_then(Value::as_i64).unwrap_or(-1),
        version,
    })
}

impl FetchEngine {
    /// Fetch a `chibit:` URL by resolving its two-hop index and
    /// reassembling the ordered, checksum-verified chunks; any other URL
    /// delegates straight to [`fetch`](FetchEngine::fetch).
    #[allow(clippy::too_many_arguments)]
    pub async fn fetch_with_chibits(
        &self,
        method: HttpMethod,
        url: &str,
        stream: bool,
        as_file: bool,
        file_path: Option<PathBuf>,
        progressor: Option<Progressor>,
        body: Option<Bytes>,
        context: Option<String>,
        initiator: Option<Initiator>,
        options: Option<FetchOptions>,
        default_repo: Option<&str>,
    ) -> Result<ProgressReport, NetError> {
        if !url.trim().starts_with("chibit:") {
            return self
                .fetch(
                    method, url, stream, as_file, file_path, progressor, body, context, initiator,
                    options,
                )
                .await;
        }

        let (uuid, parsed_repo, fallback) = parse_chibit_url(url);
        let repo = match parsed_repo.or_else(|| default_repo.map(str::to_string)) {
            Some(repo) => repo,
            None => {
                return Err(self.log_through_net(NetError::Decode(
                    "no chibit repository configured".into(),
                )));
            }
        };

        // Synthetic start/stop pair so the debugger shows the resolution
        // as one interrupted-and-finished entry.
        let deb_id = format!("Fw.Net.Chibit:{}", self.state.indexes.next("netevent"));
        let mut deb_event = NetworkEvent::outgoing(
            deb_id.clone(),
            method,
            url.to_string(),
            options
                .clone()
                .unwrap_or_else(|| self.config.fetch_options.clone()),
        );
        deb_event.interrupted = true;
        deb_event.event_success = true;
        deb_event.event_state = NetState::Finished;
        deb_event.event_step_current = Some(1);
        deb_event.event_step_max = Some(1);
        let _ = self.emitter.net_start(&deb_event);
        let _ = self.emitter.net_stop(&deb_id);

        let entry = match self
            .fetch_chibit_entry(
                &uuid,
                progressor.clone(),
                context.clone(),
                initiator.as_ref(),
                options.clone(),
                &repo,
            )
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                if let Some(fallback) = fallback {
                    return self
                        .fetch(
                            method,
                            &fallback,
                            stream,
                            as_file,
                            file_path,
                            progressor,
                            body,
                            context,
                            Some(Initiator::prepend(
                                initiator.as_ref(),
                                "Fw.Net.Chibit.Fallback",
                            )),
                            options,
                        )
                        .await;
                }
                return Err(self.log_through_net(NetError::Decode(format!(
                    "failed to fetch chibit repo, and no fallback provided: {e}"
                ))));
            }
        };

        match entry.kind {
            ChibitType::Redirect => {
                let target = entry.chunks.first().cloned().ok_or_else(|| {
                    self.log_through_net(NetError::Decode(
                        "chibit redirect entry has no target".into(),
                    ))
                })?;
                self.fetch(
                    method,
                    &target,
                    stream,
                    as_file,
                    file_path,
                    progressor,
                    body,
                    context,
                    Some(Initiator::prepend(
                        initiator.as_ref(),
                        "Fw.Net.Chibit.Redirect",
                    )),
                    options,
                )
                .await
            }
            ChibitType::Single | ChibitType::Split => {
                let mut buffer: Vec<u8> = Vec::new();
                for (i, chunk_url) in entry.chunks.iter().enumerate() {
                    let chunk_initiator = Initiator::prepend(
                        Some(&Initiator::prepend(
                            initiator.as_ref(),
                            &format!("{uuid}.{i}"),
                        )),
                        "Fw.Net.Chibit.Chunk",
                    );
                    let chunk_report = self
                        .fetch(
                            method,
                            chunk_url,
                            false,
                            false,
                            None,
                            progressor.clone(),
                            None,
                            context.clone(),
                            Some(chunk_initiator),
                            options.clone(),
                        )
                        .await?;
                    let content = chunk_report.content_bytes().ok_or_else(|| {
                        self.log_through_net(NetError::Decode("chunk returned no content".into()))
                    })?;
                    buffer.extend_from_slice(content);
                }

                // The partial buffer is never exposed on failure.
                if buffer.len() as i64 != entry.size {
                    return Err(self.log_through_net(NetError::Verify(
                        "chibit size mismatch".into(),
                    )));
                }
                if !self
                    .chck
                    .check_buf(&buffer, &entry.checksum.hash, entry.checksum.algorithm)
                {
                    return Err(self.log_through_net(NetError::Verify(
                        "chibit checksum mismatch".into(),
                    )));
                }

                let id = format!("Fw.Net.Chibit:{}", self.state.indexes.next("netevent"));
                let opts = options.unwrap_or_else(|| self.config.fetch_options.clone());
                let mut event = NetworkEvent::outgoing(id, method, url.to_string(), opts);
                event.context = context;
                event.initiator = Some(Initiator::prepend(
                    initiator.as_ref(),
                    "Fw.Net.Chibit.Result",
                ));
                event.meta_is_stream = stream;
                event.meta_as_file = as_file;
                event.size = buffer.len() as i64;
                event.event_state = NetState::Finished;
                event.event_success = true;

                let mut report = ProgressReport::new(
                    event,
                    progressor,
                    std::sync::Arc::clone(&self.emitter),
                    std::sync::Arc::clone(&self.logger),
                    std::sync::Arc::clone(&self.state),
                );
                report.leftover = BytesMut::from(buffer.as_slice());
                report.content = Some(Bytes::from(buffer));

                if !stream && !as_file {
                    report.event.transferred = report.event.size;
                    return Ok(report);
                }
                if stream && !as_file {
                    report.event.meta_is_stream = true;
                    return Ok(report);
                }
                self.deliver(report, stream, as_file, file_path, Some(entry.filename))
                    .await
            }
        }
    }

    /// Resolve a chibit UUID through `<repo>/chibits/chibits.json` and its
    /// per-entry document.
    async fn fetch_chibit_entry(
        &self,
        uuid: &str,
        progressor: Option<Progressor>,
        context: Option<String>,
        _initiator: Option<&Initiator>,
        options: Option<FetchOptions>,
        repo: &str,
    ) -> Result<ChibitMetadata, NetError> {
        let index_url = format!("{repo}/chibits/chibits.json");
        let index_report = self
            .fetch(
                HttpMethod::Get,
                &index_url,
                false,
                false,
                None,
                progressor.clone(),
                None,
                context.clone(),
                Some(Initiator::Path(format!("Fw.Net.Chibit.Index::{uuid}"))),
                options.clone(),
            )
            .await?;
        let index_content = index_report
            .content_bytes()
            .ok_or_else(|| NetError::Decode("index fetch returned no content".into()))?;
        let index: HashMap<String, String> = serde_json::from_slice(index_content)
            .map_err(|e| NetError::Decode(format!("malformed chibit index: {e}")))?;

        let entry_url = index
            .get(uuid)
            .ok_or_else(|| NetError::Decode("chibit UUID not found".into()))?;

        let entry_report = self
            .fetch(
                HttpMethod::Get,
                entry_url,
                false,
                false,
                None,
                progressor,
                None,
                context,
                Some(Initiator::Path(format!("Fw.Net.Chibit.Entry::{uuid}"))),
                options,
            )
            .await?;
        let entry_content = entry_report
            .content_bytes()
            .ok_or_else(|| NetError::Decode("entry fetch returned no content".into()))?;

        parse_chibit_entry(entry_content)
    }
}
