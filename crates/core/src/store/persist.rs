// SPDX-License-Identifier: Apache-2.0

//! On-disk persistence: one JSON file per device plus a `systemProperties`
//! file (spec.md §6). Saves are write-temp-then-rename; device load falls
//! back from a strict parse to a permissive, best-effort one that keeps
//! only verifiably valid sub-entities (spec.md §4.1).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{CachingPolicy, Device, Endpoint, Metadata, Resource, ResourceMode};
use crate::store::protect::SensitiveValueProtector;

const SYSTEM_PROPERTIES_FILE: &str = "systemProperties";
const TMP_SUFFIX: &str = ".tmp";

// -- Wire DTOs ----------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct ResourceDoc {
    id: String,
    uri: String,
    #[serde(rename = "type")]
    resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "value_enc")]
    value_enc: Option<String>,
    mode: u16,
    #[serde(rename = "cachingPolicy")]
    caching_policy: CachingPolicyDoc,
    #[serde(rename = "dateOfLastSyncMillis", default)]
    date_of_last_sync_millis: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum CachingPolicyDoc {
    Never,
    Always,
}

impl From<CachingPolicy> for CachingPolicyDoc {
    fn from(p: CachingPolicy) -> Self {
        match p {
            CachingPolicy::Never => Self::Never,
            CachingPolicy::Always => Self::Always,
        }
    }
}

impl From<CachingPolicyDoc> for CachingPolicy {
    fn from(p: CachingPolicyDoc) -> Self {
        match p {
            CachingPolicyDoc::Never => Self::Never,
            CachingPolicyDoc::Always => Self::Always,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataDoc {
    id: String,
    uri: String,
    value: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct EndpointDoc {
    id: String,
    profile: String,
    #[serde(rename = "profileVersion")]
    profile_version: u8,
    enabled: bool,
    uri: String,
    #[serde(default)]
    resources: HashMap<String, ResourceDoc>,
    #[serde(default)]
    metadatas: HashMap<String, MetadataDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DeviceDoc {
    #[serde(rename = "deviceDriver")]
    device_driver: String,
    #[serde(rename = "deviceClass")]
    device_class: String,
    #[serde(rename = "deviceClassVersion")]
    device_class_version: u8,
    uri: String,
    uuid: String,
    #[serde(rename = "deviceEndpoints", default)]
    device_endpoints: HashMap<String, EndpointDoc>,
    #[serde(rename = "deviceResources", default)]
    device_resources: HashMap<String, ResourceDoc>,
    #[serde(default)]
    metadatas: HashMap<String, MetadataDoc>,
}

fn resource_to_doc(r: &Resource, protector: &dyn SensitiveValueProtector) -> ResourceDoc {
    let (value, value_enc) = match &r.value {
        None => (None, None),
        Some(v) if r.mode.contains(ResourceMode::SENSITIVE) => {
            (None, Some(protector.protect(&r.uri, v)))
        }
        Some(v) => (Some(v.clone()), None),
    };
    ResourceDoc {
        id: r.id.clone(),
        uri: r.uri.clone(),
        resource_type: r.resource_type.clone(),
        value,
        value_enc,
        mode: r.mode.bits(),
        caching_policy: r.caching_policy.into(),
        date_of_last_sync_millis: r.date_of_last_sync_millis,
    }
}

fn doc_to_resource(
    doc: ResourceDoc,
    device_uuid: &str,
    endpoint_id: Option<String>,
    protector: &dyn SensitiveValueProtector,
) -> Option<Resource> {
    let mode = ResourceMode::from_bits_truncate(doc.mode);
    let value = if mode.contains(ResourceMode::SENSITIVE) {
        doc.value_enc.as_deref().and_then(|enc| protector.unprotect(&doc.uri, enc).ok())
    } else {
        doc.value
    };
    Some(Resource {
        id: doc.id,
        device_uuid: device_uuid.to_owned(),
        endpoint_id,
        uri: doc.uri,
        resource_type: doc.resource_type,
        value,
        mode,
        caching_policy: doc.caching_policy.into(),
        date_of_last_sync_millis: doc.date_of_last_sync_millis,
    })
}

fn metadata_to_doc(m: &Metadata) -> MetadataDoc {
    MetadataDoc { id: m.id.clone(), uri: m.uri.clone(), value: m.value.clone() }
}

fn doc_to_metadata(doc: MetadataDoc, device_uuid: &str, endpoint_id: Option<String>) -> Metadata {
    Metadata {
        id: doc.id,
        device_uuid: device_uuid.to_owned(),
        endpoint_id,
        uri: doc.uri,
        value: Metadata::canonicalize_value(&doc.value),
    }
}

fn endpoint_to_doc(e: &Endpoint, protector: &dyn SensitiveValueProtector) -> EndpointDoc {
    EndpointDoc {
        id: e.id.clone(),
        profile: e.profile.clone(),
        profile_version: e.profile_version,
        enabled: e.enabled,
        uri: e.uri.clone(),
        resources: e
            .resources
            .iter()
            .map(|r| (r.id.clone(), resource_to_doc(r, protector)))
            .collect(),
        metadatas: e.metadatas.iter().map(|m| (m.id.clone(), metadata_to_doc(m))).collect(),
    }
}

fn doc_to_endpoint(
    id: String,
    doc: EndpointDoc,
    device_uuid: &str,
    protector: &dyn SensitiveValueProtector,
) -> Option<Endpoint> {
    let resources: Vec<Resource> = doc
        .resources
        .into_iter()
        .filter_map(|(_, rd)| doc_to_resource(rd, device_uuid, Some(id.clone()), protector))
        .collect();
    let metadatas: Vec<Metadata> = doc
        .metadatas
        .into_iter()
        .map(|(_, md)| doc_to_metadata(md, device_uuid, Some(id.clone())))
        .collect();
    Some(Endpoint {
        id,
        device_uuid: device_uuid.to_owned(),
        profile: doc.profile,
        profile_version: doc.profile_version,
        enabled: doc.enabled,
        uri: doc.uri,
        resources,
        metadatas,
    })
}

fn device_to_doc(d: &Device, protector: &dyn SensitiveValueProtector) -> DeviceDoc {
    DeviceDoc {
        device_driver: d.managing_device_driver.clone(),
        device_class: d.device_class.clone(),
        device_class_version: d.device_class_version,
        uri: d.uri.clone(),
        uuid: d.uuid.clone(),
        device_endpoints: d
            .endpoints
            .iter()
            .map(|e| (e.id.clone(), endpoint_to_doc(e, protector)))
            .collect(),
        device_resources: d
            .resources
            .iter()
            .map(|r| (r.id.clone(), resource_to_doc(r, protector)))
            .collect(),
        metadatas: d.metadatas.iter().map(|m| (m.id.clone(), metadata_to_doc(m))).collect(),
    }
}

/// Convert a fully-typed `DeviceDoc` into a `Device`. Used by the strict
/// parse path, where a structural failure anywhere rejects the whole file.
fn doc_to_device_strict(
    doc: DeviceDoc,
    protector: &dyn SensitiveValueProtector,
) -> Option<Device> {
    let endpoints: Vec<Endpoint> = doc
        .device_endpoints
        .into_iter()
        .filter_map(|(id, ed)| doc_to_endpoint(id, ed, &doc.uuid, protector))
        .collect();
    let resources: Vec<Resource> = doc
        .device_resources
        .into_iter()
        .filter_map(|(_, rd)| doc_to_resource(rd, &doc.uuid, None, protector))
        .collect();
    let metadatas: Vec<Metadata> =
        doc.metadatas.into_iter().map(|(_, md)| doc_to_metadata(md, &doc.uuid, None)).collect();

    Some(Device {
        uuid: doc.uuid,
        device_class: doc.device_class,
        device_class_version: doc.device_class_version,
        managing_device_driver: doc.device_driver,
        uri: doc.uri,
        endpoints,
        resources,
        metadatas,
        dirty: false,
    })
}

/// Rebuild a device by walking the raw JSON `Value`, keeping only
/// sub-entities that parse cleanly. Devices with zero valid endpoints or
/// zero valid resources (across device + all endpoints) are rejected.
fn permissive_parse(raw: &Value, protector: &dyn SensitiveValueProtector) -> Option<Device> {
    let obj = raw.as_object()?;
    let uuid = obj.get("uuid")?.as_str()?.to_owned();
    let uri = obj.get("uri")?.as_str()?.to_owned();
    if crate::model::uri::parse(&uri).ok()?.uuid != uuid {
        return None;
    }
    let device_class = obj.get("deviceClass")?.as_str()?.to_owned();
    let device_class_version = obj.get("deviceClassVersion")?.as_u64()? as u8;
    let device_driver = obj.get("deviceDriver")?.as_str()?.to_owned();

    let mut endpoints = Vec::new();
    if let Some(eps) = obj.get("deviceEndpoints").and_then(|v| v.as_object()) {
        for (id, ep_val) in eps {
            if let Ok(doc) = serde_json::from_value::<EndpointDoc>(ep_val.clone()) {
                if let Some(ep) = doc_to_endpoint(id.clone(), doc, &uuid, protector) {
                    endpoints.push(ep);
                }
            }
        }
    }

    let mut resources = Vec::new();
    if let Some(res) = obj.get("deviceResources").and_then(|v| v.as_object()) {
        for rd in res.values() {
            if let Ok(doc) = serde_json::from_value::<ResourceDoc>(rd.clone()) {
                if let Some(r) = doc_to_resource(doc, &uuid, None, protector) {
                    resources.push(r);
                }
            }
        }
    }

    let mut metadatas = Vec::new();
    if let Some(mds) = obj.get("metadatas").and_then(|v| v.as_object()) {
        for md in mds.values() {
            if let Ok(doc) = serde_json::from_value::<MetadataDoc>(md.clone()) {
                metadatas.push(doc_to_metadata(doc, &uuid, None));
            }
        }
    }

    let total_resources: usize =
        resources.len() + endpoints.iter().map(|e| e.resources.len()).sum::<usize>();
    if endpoints.is_empty() || total_resources == 0 {
        return None;
    }

    Some(Device {
        uuid,
        device_class,
        device_class_version,
        managing_device_driver: device_driver,
        uri,
        endpoints,
        resources,
        metadatas,
        dirty: false,
    })
}

// -- Storage --------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreResult {
    None,
    NewDirMissing,
    OldConfigDeleteFailed,
    FailedCopy,
}

/// One-file-per-device JSON persistence under a fixed namespace directory.
#[derive(Debug, Clone)]
pub struct Storage {
    namespace: PathBuf,
}

impl Storage {
    pub fn new(namespace: impl Into<PathBuf>) -> Self {
        Self { namespace: namespace.into() }
    }

    pub async fn ensure_namespace(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.namespace).await
    }

    fn device_path(&self, uuid: &str) -> PathBuf {
        self.namespace.join(uuid)
    }

    fn system_properties_path(&self) -> PathBuf {
        self.namespace.join(SYSTEM_PROPERTIES_FILE)
    }

    async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("tmp");
        let tmp_path = path.with_file_name(format!("{file_name}{TMP_SUFFIX}"));
        tokio::fs::write(&tmp_path, contents).await?;
        tokio::fs::rename(&tmp_path, path).await
    }

    pub async fn save_device(
        &self,
        device: &Device,
        protector: &dyn SensitiveValueProtector,
    ) -> std::io::Result<()> {
        self.ensure_namespace().await?;
        let doc = device_to_doc(device, protector);
        let json = serde_json::to_vec_pretty(&doc)?;
        Self::write_atomic(&self.device_path(&device.uuid), &json).await
    }

    pub async fn remove_device(&self, uuid: &str) -> std::io::Result<()> {
        match tokio::fs::remove_file(self.device_path(uuid)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Load every device file in the namespace. Returns `(devices,
    /// failed_uuids)`: files that fail both the strict and permissive
    /// parse are skipped and their file name reported so the caller can
    /// emit a `deviceDatabaseFailure` event.
    pub async fn load_all_devices(
        &self,
        protector: &dyn SensitiveValueProtector,
    ) -> std::io::Result<(Vec<Device>, Vec<String>)> {
        self.ensure_namespace().await?;
        let mut devices = Vec::new();
        let mut failed = Vec::new();

        let mut read_dir = tokio::fs::read_dir(&self.namespace).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            let file_name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) if n != SYSTEM_PROPERTIES_FILE && !n.ends_with(TMP_SUFFIX) => {
                    n.to_owned()
                }
                _ => continue,
            };

            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(_) => {
                    failed.push(file_name);
                    continue;
                }
            };

            if let Some(device) = serde_json::from_str::<DeviceDoc>(&contents)
                .ok()
                .and_then(|doc| doc_to_device_strict(doc, protector))
            {
                devices.push(device);
                continue;
            }

            // Strict parse failed; attempt the permissive recovery pass.
            if let Ok(raw) = serde_json::from_str::<Value>(&contents) {
                if let Some(device) = permissive_parse(&raw, protector) {
                    devices.push(device);
                    continue;
                }
            }

            failed.push(file_name);
        }

        Ok((devices, failed))
    }

    pub async fn save_system_properties(
        &self,
        props: &HashMap<String, String>,
    ) -> std::io::Result<()> {
        self.ensure_namespace().await?;
        let json = serde_json::to_vec_pretty(props)?;
        Self::write_atomic(&self.system_properties_path(), &json).await
    }

    pub async fn load_system_properties(&self) -> std::io::Result<HashMap<String, String>> {
        self.ensure_namespace().await?;
        match tokio::fs::read_to_string(self.system_properties_path()).await {
            Ok(contents) => Ok(serde_json::from_str(&contents).unwrap_or_default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e),
        }
    }

    /// Atomic swap-directory restore: deletes the current namespace and
    /// copies everything from `staging_dir` into it.
    pub async fn restore(&self, staging_dir: &Path) -> RestoreResult {
        if !staging_dir.exists() {
            return RestoreResult::NewDirMissing;
        }
        if self.namespace.exists() && tokio::fs::remove_dir_all(&self.namespace).await.is_err() {
            return RestoreResult::OldConfigDeleteFailed;
        }
        if tokio::fs::create_dir_all(&self.namespace).await.is_err() {
            return RestoreResult::FailedCopy;
        }

        let mut entries = match tokio::fs::read_dir(staging_dir).await {
            Ok(e) => e,
            Err(_) => return RestoreResult::FailedCopy,
        };
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let dest = self.namespace.join(entry.file_name());
                    if tokio::fs::copy(entry.path(), &dest).await.is_err() {
                        return RestoreResult::FailedCopy;
                    }
                }
                Ok(None) => break,
                Err(_) => return RestoreResult::FailedCopy,
            }
        }
        RestoreResult::None
    }
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
