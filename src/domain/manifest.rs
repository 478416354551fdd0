//! Manifest rendering
//!
//! Three static templates (storage, workload+service, proxy) are cloned and
//! the computed fields written into them. Rendering is pure: the same
//! service and proxy state always serialize to the same bytes.

use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

use crate::config::{ServiceSpec, VolumeSpec};
use crate::error::{ConfigError, RenderError};

const STORAGE_TEMPLATE: &str = "storage.json";
const SERVICE_TEMPLATE: &str = "service.json";
const PROXY_TEMPLATE: &str = "proxy.json";

const PROBES: [&str; 2] = ["readinessProbe", "startupProbe"];

/// Parsed template documents, never mutated after load
#[derive(Debug, Clone)]
pub struct Templates {
    storage: Value,
    service: Value,
    proxy: Value,
}

impl Templates {
    /// Load `storage.json`, `service.json` and `proxy.json` from `dir`
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        Ok(Self {
            storage: read_template(&dir.join(STORAGE_TEMPLATE))?,
            service: read_template(&dir.join(SERVICE_TEMPLATE))?,
            proxy: read_template(&dir.join(PROXY_TEMPLATE))?,
        })
    }

    #[cfg(test)]
    pub fn from_values(storage: Value, service: Value, proxy: Value) -> Self {
        Self {
            storage,
            service,
            proxy,
        }
    }

    /// Templates shipped in the repository
    #[cfg(test)]
    pub fn builtin() -> Self {
        Self::from_values(
            serde_json::from_str(include_str!("../../templates/storage.json")).unwrap(),
            serde_json::from_str(include_str!("../../templates/service.json")).unwrap(),
            serde_json::from_str(include_str!("../../templates/proxy.json")).unwrap(),
        )
    }
}

fn read_template(path: &Path) -> Result<Value, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|_| ConfigError::TemplateMissing {
        path: path.display().to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Values written into the proxy container's environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyState {
    /// Packed routing string (`SITES`)
    pub sites: String,
    /// Certificate allow-list pattern (`ALLOWED_DOMAINS`)
    pub allowed_domains: String,
    /// ACME directory (`LETSENCRYPT_URL`)
    pub acme_url: String,
}

/// Rendered documents for one service
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedManifests {
    /// Absent when the service has no volumes
    pub storage: Option<Value>,
    pub workload: Value,
    pub proxy: Value,
}

/// Where the rendered documents were written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestPaths {
    pub storage: Option<PathBuf>,
    pub workload: PathBuf,
    pub proxy: PathBuf,
}

impl RenderedManifests {
    /// Write each document to `<dir>/<service>-{storage,service,proxy}.json`
    pub async fn write(&self, dir: &Path, service: &str) -> Result<ManifestPaths, RenderError> {
        let storage = match &self.storage {
            Some(doc) => Some(write_manifest(dir, &format!("{}-storage.json", service), doc).await?),
            None => None,
        };

        Ok(ManifestPaths {
            storage,
            workload: write_manifest(dir, &format!("{}-service.json", service), &self.workload)
                .await?,
            proxy: write_manifest(dir, &format!("{}-proxy.json", service), &self.proxy).await?,
        })
    }
}

/// Serialize and write one manifest
pub async fn write_manifest(dir: &Path, file: &str, doc: &Value) -> Result<PathBuf, RenderError> {
    let path = dir.join(file);
    let bytes = serde_json::to_vec_pretty(doc)?;
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|source| RenderError::Write {
            path: path.display().to_string(),
            source,
        })?;
    Ok(path)
}

/// Render all three manifests for a service
pub fn render(
    service: &ServiceSpec,
    templates: &Templates,
    proxy: &ProxyState,
) -> Result<RenderedManifests, RenderError> {
    let volumes = namespaced_volumes(service);
    Ok(RenderedManifests {
        storage: render_storage(templates, &volumes)?,
        workload: render_workload(templates, service)?,
        proxy: render_proxy(templates, proxy)?,
    })
}

/// Volumes renamed to `${service}-${volume}`
pub fn namespaced_volumes(service: &ServiceSpec) -> Vec<VolumeSpec> {
    service
        .volumes
        .iter()
        .map(|v| VolumeSpec {
            name: service.volume_name(v),
            container_path: v.container_path.clone(),
            size: v.size,
        })
        .collect()
}

/// PersistentVolume + claim pair per volume; `None` without volumes
pub fn render_storage(
    templates: &Templates,
    volumes: &[VolumeSpec],
) -> Result<Option<Value>, RenderError> {
    if volumes.is_empty() {
        return Ok(None);
    }

    let mut doc = templates.storage.clone();
    let volume_template = slot(&mut doc, "/items/0", STORAGE_TEMPLATE)?.clone();
    let claim_template = slot(&mut doc, "/items/1", STORAGE_TEMPLATE)?.clone();

    let mut items = Vec::with_capacity(volumes.len() * 2);
    for volume in volumes {
        let size = json!(format!("{}Gi", volume.size));
        let claim_name = format!("{}-claim", volume.name);

        let mut pv = volume_template.clone();
        set(&mut pv, "/metadata/name", json!(volume.name), STORAGE_TEMPLATE)?;
        set(
            &mut pv,
            "/spec/hostPath/path",
            json!(format!("/mnt/{}", volume.name)),
            STORAGE_TEMPLATE,
        )?;
        set(&mut pv, "/spec/capacity/storage", size.clone(), STORAGE_TEMPLATE)?;

        let mut pvc = claim_template.clone();
        set(&mut pvc, "/metadata/name", json!(claim_name), STORAGE_TEMPLATE)?;
        insert(&mut pvc, "/spec", "volumeName", json!(volume.name), STORAGE_TEMPLATE)?;
        set(&mut pvc, "/spec/resources/requests/storage", size, STORAGE_TEMPLATE)?;

        items.push(pv);
        items.push(pvc);
    }

    set(&mut doc, "/items", Value::Array(items), STORAGE_TEMPLATE)?;
    Ok(Some(doc))
}

/// Service (NodePort) + Deployment
pub fn render_workload(templates: &Templates, service: &ServiceSpec) -> Result<Value, RenderError> {
    const T: &str = SERVICE_TEMPLATE;

    let mut doc = templates.service.clone();
    let name = json!(service.name);

    let mut svc = slot(&mut doc, "/items/0", T)?.clone();
    set(&mut svc, "/metadata/name", name.clone(), T)?;
    insert(&mut svc, "/metadata/labels", "app", name.clone(), T)?;
    insert(&mut svc, "/spec/selector", "app", name.clone(), T)?;

    let mut port = json!({
        "name": format!("{}-{}", service.app_port, service.app_port),
        "protocol": "TCP",
        "port": service.app_port,
        "targetPort": service.app_port,
    });
    if let (Some(node_port), Some(port)) = (service.service_port, port.as_object_mut()) {
        port.insert("nodePort".to_string(), json!(node_port));
    }
    insert(&mut svc, "/spec", "ports", json!([port]), T)?;

    let mut deployment = slot(&mut doc, "/items/1", T)?.clone();
    set(&mut deployment, "/metadata/name", name.clone(), T)?;
    insert(&mut deployment, "/metadata/labels", "app", name.clone(), T)?;
    insert(&mut deployment, "/spec", "replicas", json!(service.instances), T)?;
    insert(&mut deployment, "/spec/selector/matchLabels", "app", name.clone(), T)?;
    insert(&mut deployment, "/spec/template/metadata/labels", "app", name.clone(), T)?;

    let mut container = slot(&mut deployment, "/spec/template/spec/containers/0", T)?.clone();
    insert(&mut container, "", "name", name, T)?;
    insert(&mut container, "", "image", json!(service.image), T)?;
    insert(
        &mut container,
        "",
        "ports",
        json!([{ "containerPort": service.app_port }]),
        T,
    )?;

    for probe in PROBES {
        let pointer = format!("/{}", probe);
        if service.health_check.disabled {
            remove(&mut container, "", probe, T)?;
            continue;
        }
        // Templates may omit the startup probe
        if container.pointer(&pointer).is_none() {
            continue;
        }
        insert(
            &mut container,
            &format!("{}/httpGet", pointer),
            "port",
            json!(service.app_port),
            T,
        )?;
        if let Some(path) = &service.health_check.path {
            insert(
                &mut container,
                &format!("{}/httpGet", pointer),
                "path",
                json!(path),
                T,
            )?;
        }
    }

    let volumes = namespaced_volumes(service);
    if volumes.is_empty() {
        remove(&mut container, "", "volumeMounts", T)?;
        remove(&mut deployment, "/spec/template/spec", "volumes", T)?;
    } else {
        let mounts: Vec<Value> = volumes
            .iter()
            .map(|v| json!({ "mountPath": v.container_path, "name": v.name }))
            .collect();
        let claims: Vec<Value> = volumes
            .iter()
            .map(|v| {
                json!({
                    "name": v.name,
                    "persistentVolumeClaim": { "claimName": format!("{}-claim", v.name) },
                })
            })
            .collect();
        insert(&mut container, "", "volumeMounts", Value::Array(mounts), T)?;
        insert(
            &mut deployment,
            "/spec/template/spec",
            "volumes",
            Value::Array(claims),
            T,
        )?;
    }

    if service.env.is_empty() {
        remove(&mut container, "", "env", T)?;
    } else {
        // BTreeMap iteration keeps the list sorted by name
        let env: Vec<Value> = service
            .env
            .iter()
            .map(|(k, v)| json!({ "name": k, "value": v }))
            .collect();
        insert(&mut container, "", "env", Value::Array(env), T)?;
    }

    insert(
        &mut deployment,
        "/spec/template/spec",
        "containers",
        json!([container]),
        T,
    )?;
    set(&mut doc, "/items", json!([svc, deployment]), T)?;
    Ok(doc)
}

/// Proxy workload with `SITES`, `ALLOWED_DOMAINS` and `LETSENCRYPT_URL` set
pub fn render_proxy(templates: &Templates, state: &ProxyState) -> Result<Value, RenderError> {
    const T: &str = PROXY_TEMPLATE;

    let mut doc = templates.proxy.clone();
    let mut container = slot(&mut doc, "/spec/template/spec/containers/0", T)?.clone();

    let container_obj = object(&mut container, "", T)?;
    let env = container_obj
        .entry("env")
        .or_insert_with(|| Value::Array(Vec::new()));
    let env = env.as_array_mut().ok_or(RenderError::TemplateShape {
        template: T,
        pointer: "/spec/template/spec/containers/0/env".to_string(),
    })?;

    for (key, value) in [
        ("SITES", &state.sites),
        ("ALLOWED_DOMAINS", &state.allowed_domains),
        ("LETSENCRYPT_URL", &state.acme_url),
    ] {
        upsert_env(env, key, value);
    }

    insert(
        &mut doc,
        "/spec/template/spec",
        "containers",
        json!([container]),
        T,
    )?;
    Ok(doc)
}

fn upsert_env(env: &mut Vec<Value>, key: &str, value: &str) {
    let entry = json!({ "name": key, "value": value });
    match env
        .iter_mut()
        .find(|e| e.get("name").and_then(Value::as_str) == Some(key))
    {
        Some(existing) => *existing = entry,
        None => env.push(entry),
    }
}

fn shape_error(template: &'static str, pointer: &str) -> RenderError {
    RenderError::TemplateShape {
        template,
        pointer: pointer.to_string(),
    }
}

fn slot<'a>(
    doc: &'a mut Value,
    pointer: &str,
    template: &'static str,
) -> Result<&'a mut Value, RenderError> {
    doc.pointer_mut(pointer)
        .ok_or_else(|| shape_error(template, pointer))
}

fn object<'a>(
    doc: &'a mut Value,
    pointer: &str,
    template: &'static str,
) -> Result<&'a mut Map<String, Value>, RenderError> {
    slot(doc, pointer, template)?
        .as_object_mut()
        .ok_or_else(|| shape_error(template, pointer))
}

/// Overwrite an existing slot
fn set(
    doc: &mut Value,
    pointer: &str,
    value: Value,
    template: &'static str,
) -> Result<(), RenderError> {
    *slot(doc, pointer, template)? = value;
    Ok(())
}

/// Set `key` on the object at `parent`, creating the key if needed
fn insert(
    doc: &mut Value,
    parent: &str,
    key: &str,
    value: Value,
    template: &'static str,
) -> Result<(), RenderError> {
    object(doc, parent, template)?.insert(key.to_string(), value);
    Ok(())
}

fn remove(
    doc: &mut Value,
    parent: &str,
    key: &str,
    template: &'static str,
) -> Result<(), RenderError> {
    object(doc, parent, template)?.remove(key);
    Ok(())
}
