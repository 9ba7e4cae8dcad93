//! RuntimeService handlers: pod sandboxes become function versions,
//! containers become function aliases.
//!
//! Methods with no counterpart in the function provider (exec, attach,
//! stats, checkpoints, events, metrics) are left to the router's
//! Unimplemented stub.

use std::sync::Arc;

use rpcweb_lite::ServiceBuilder;
use tonic::Status;
use tracing::info;

use super::store::{AliasState, FunctionAlias, FunctionStore, FunctionVersion};
use crate::cri;
use crate::proto::*;

/// The kubelet-facing CRI version string.
const API_VERSION: &str = "0.1.0";
const RUNTIME_NAME: &str = "funcri";

pub fn service(store: Arc<FunctionStore>) -> ServiceBuilder {
    cri::runtime_service()
        .handle("Version", |_req: VersionRequest| async move {
            Ok(VersionResponse {
                version: API_VERSION.to_owned(),
                runtime_name: RUNTIME_NAME.to_owned(),
                runtime_version: env!("CARGO_PKG_VERSION").to_owned(),
                runtime_api_version: "v1".to_owned(),
            })
        })
        .handle("RunPodSandbox", {
            let store = Arc::clone(&store);
            move |req: RunPodSandboxRequest| {
                let store = Arc::clone(&store);
                async move {
                    let config = req
                        .config
                        .ok_or_else(|| Status::invalid_argument("sandbox config is required"))?;
                    let metadata = config
                        .metadata
                        .ok_or_else(|| Status::invalid_argument("sandbox metadata is required"))?;

                    let version = store.publish_version(
                        metadata.name,
                        metadata.uid,
                        metadata.namespace,
                        metadata.attempt,
                        req.runtime_handler,
                        config.labels,
                        config.annotations,
                    );
                    info!(version_id = %version.id, name = %version.name, "published function version");

                    Ok(RunPodSandboxResponse {
                        pod_sandbox_id: version.id,
                    })
                }
            }
        })
        .handle("StopPodSandbox", {
            let store = Arc::clone(&store);
            move |req: StopPodSandboxRequest| {
                let store = Arc::clone(&store);
                async move {
                    store.retire_version(&req.pod_sandbox_id)?;
                    Ok(StopPodSandboxResponse {})
                }
            }
        })
        .handle("RemovePodSandbox", {
            let store = Arc::clone(&store);
            move |req: RemovePodSandboxRequest| {
                let store = Arc::clone(&store);
                async move {
                    store.remove_version(&req.pod_sandbox_id);
                    Ok(RemovePodSandboxResponse {})
                }
            }
        })
        .handle("PodSandboxStatus", {
            let store = Arc::clone(&store);
            move |req: PodSandboxStatusRequest| {
                let store = Arc::clone(&store);
                async move {
                    let version = store.get_version(&req.pod_sandbox_id)?;
                    let mut info = std::collections::HashMap::new();
                    if req.verbose {
                        info.insert("runtimeName".to_owned(), RUNTIME_NAME.to_owned());
                    }
                    Ok(PodSandboxStatusResponse {
                        status: Some(sandbox_status(&version)),
                        info,
                    })
                }
            }
        })
        .handle("ListPodSandbox", {
            let store = Arc::clone(&store);
            move |req: ListPodSandboxRequest| {
                let store = Arc::clone(&store);
                async move {
                    let mut items: Vec<_> = store
                        .list_versions()
                        .iter()
                        .filter(|v| sandbox_matches(req.filter.as_ref(), v))
                        .map(pod_sandbox)
                        .collect();
                    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                    Ok(ListPodSandboxResponse { items })
                }
            }
        })
        .handle("CreateContainer", {
            let store = Arc::clone(&store);
            move |req: CreateContainerRequest| {
                let store = Arc::clone(&store);
                async move {
                    let config = req
                        .config
                        .ok_or_else(|| Status::invalid_argument("container config is required"))?;
                    let metadata = config
                        .metadata
                        .ok_or_else(|| Status::invalid_argument("container metadata is required"))?;
                    let image = config
                        .image
                        .map(|spec| spec.image)
                        .filter(|image| !image.is_empty())
                        .ok_or_else(|| Status::invalid_argument("container image is required"))?;

                    let alias = store.create_alias(
                        &req.pod_sandbox_id,
                        metadata.name,
                        metadata.attempt,
                        image,
                        config.labels,
                        config.annotations,
                    )?;
                    info!(alias_id = %alias.id, version_id = %alias.version_id, "created function alias");

                    Ok(CreateContainerResponse {
                        container_id: alias.id,
                    })
                }
            }
        })
        .handle("StartContainer", {
            let store = Arc::clone(&store);
            move |req: StartContainerRequest| {
                let store = Arc::clone(&store);
                async move {
                    store.start_alias(&req.container_id)?;
                    Ok(StartContainerResponse {})
                }
            }
        })
        .handle("StopContainer", {
            let store = Arc::clone(&store);
            move |req: StopContainerRequest| {
                let store = Arc::clone(&store);
                async move {
                    store.stop_alias(&req.container_id)?;
                    Ok(StopContainerResponse {})
                }
            }
        })
        .handle("RemoveContainer", {
            let store = Arc::clone(&store);
            move |req: RemoveContainerRequest| {
                let store = Arc::clone(&store);
                async move {
                    store.remove_alias(&req.container_id);
                    Ok(RemoveContainerResponse {})
                }
            }
        })
        .handle("ListContainers", {
            let store = Arc::clone(&store);
            move |req: ListContainersRequest| {
                let store = Arc::clone(&store);
                async move {
                    let mut containers: Vec<_> = store
                        .list_aliases()
                        .iter()
                        .filter(|a| container_matches(req.filter.as_ref(), a))
                        .map(container)
                        .collect();
                    containers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                    Ok(ListContainersResponse { containers })
                }
            }
        })
        .handle("ContainerStatus", {
            let store = Arc::clone(&store);
            move |req: ContainerStatusRequest| {
                let store = Arc::clone(&store);
                async move {
                    let alias = store.get_alias(&req.container_id)?;
                    Ok(ContainerStatusResponse {
                        status: Some(container_status(&alias)),
                        info: std::collections::HashMap::new(),
                    })
                }
            }
        })
        .handle("UpdateRuntimeConfig", {
            move |req: UpdateRuntimeConfigRequest| async move {
                if let Some(cidr) = req
                    .runtime_config
                    .and_then(|c| c.network_config)
                    .map(|n| n.pod_cidr)
                {
                    info!(pod_cidr = %cidr, "runtime config updated");
                }
                Ok(UpdateRuntimeConfigResponse {})
            }
        })
        .handle("Status", |_req: StatusRequest| async move {
            let conditions = vec![
                RuntimeCondition {
                    r#type: "RuntimeReady".to_owned(),
                    status: true,
                    ..Default::default()
                },
                RuntimeCondition {
                    r#type: "NetworkReady".to_owned(),
                    status: true,
                    ..Default::default()
                },
            ];
            Ok(StatusResponse {
                status: Some(RuntimeStatus { conditions }),
                info: std::collections::HashMap::new(),
            })
        })
}

fn sandbox_state(version: &FunctionVersion) -> i32 {
    if version.ready {
        PodSandboxState::SandboxReady as i32
    } else {
        PodSandboxState::SandboxNotready as i32
    }
}

fn sandbox_metadata(version: &FunctionVersion) -> PodSandboxMetadata {
    PodSandboxMetadata {
        name: version.name.clone(),
        uid: version.uid.clone(),
        namespace: version.namespace.clone(),
        attempt: version.attempt,
    }
}

fn pod_sandbox(version: &FunctionVersion) -> PodSandbox {
    PodSandbox {
        id: version.id.clone(),
        metadata: Some(sandbox_metadata(version)),
        state: sandbox_state(version),
        created_at: version.created_at,
        labels: version.labels.clone(),
        annotations: version.annotations.clone(),
        runtime_handler: version.runtime_handler.clone(),
    }
}

fn sandbox_status(version: &FunctionVersion) -> PodSandboxStatus {
    PodSandboxStatus {
        id: version.id.clone(),
        metadata: Some(sandbox_metadata(version)),
        state: sandbox_state(version),
        created_at: version.created_at,
        labels: version.labels.clone(),
        annotations: version.annotations.clone(),
        runtime_handler: version.runtime_handler.clone(),
    }
}

fn container_state(alias: &FunctionAlias) -> i32 {
    match alias.state {
        AliasState::Created => ContainerState::ContainerCreated as i32,
        AliasState::Routing => ContainerState::ContainerRunning as i32,
        AliasState::Stopped => ContainerState::ContainerExited as i32,
    }
}

fn container(alias: &FunctionAlias) -> Container {
    Container {
        id: alias.id.clone(),
        pod_sandbox_id: alias.version_id.clone(),
        metadata: Some(ContainerMetadata {
            name: alias.name.clone(),
            attempt: alias.attempt,
        }),
        image: Some(ImageSpec {
            image: alias.image.clone(),
            annotations: Default::default(),
        }),
        image_ref: alias.image_ref.clone(),
        state: container_state(alias),
        created_at: alias.created_at,
        labels: alias.labels.clone(),
        annotations: alias.annotations.clone(),
    }
}

fn container_status(alias: &FunctionAlias) -> ContainerStatus {
    ContainerStatus {
        id: alias.id.clone(),
        metadata: Some(ContainerMetadata {
            name: alias.name.clone(),
            attempt: alias.attempt,
        }),
        state: container_state(alias),
        created_at: alias.created_at,
        started_at: alias.started_at,
        finished_at: alias.finished_at,
        exit_code: alias.exit_code,
        image: Some(ImageSpec {
            image: alias.image.clone(),
            annotations: Default::default(),
        }),
        image_ref: alias.image_ref.clone(),
        reason: String::new(),
        message: String::new(),
        labels: alias.labels.clone(),
        annotations: alias.annotations.clone(),
    }
}

fn labels_match(
    selector: &std::collections::HashMap<String, String>,
    labels: &std::collections::HashMap<String, String>,
) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

fn sandbox_matches(filter: Option<&PodSandboxFilter>, version: &FunctionVersion) -> bool {
    let Some(filter) = filter else { return true };
    if !filter.id.is_empty() && filter.id != version.id {
        return false;
    }
    if let Some(state) = &filter.state {
        if state.state != sandbox_state(version) {
            return false;
        }
    }
    labels_match(&filter.label_selector, &version.labels)
}

fn container_matches(filter: Option<&ContainerFilter>, alias: &FunctionAlias) -> bool {
    let Some(filter) = filter else { return true };
    if !filter.id.is_empty() && filter.id != alias.id {
        return false;
    }
    if !filter.pod_sandbox_id.is_empty() && filter.pod_sandbox_id != alias.version_id {
        return false;
    }
    if let Some(state) = &filter.state {
        if state.state != container_state(alias) {
            return false;
        }
    }
    labels_match(&filter.label_selector, &alias.labels)
}
