//! CRI v1 service descriptor tables.
//!
//! Declares every RuntimeService and ImageService method with its schema
//! pair, unbound. The backend attaches handlers for the operations it
//! supports; everything else resolves to the router's Unimplemented stub.

use rpcweb_lite::ServiceBuilder;

use crate::proto::*;

pub const RUNTIME_SERVICE: &str = "runtime.v1.RuntimeService";
pub const IMAGE_SERVICE: &str = "runtime.v1.ImageService";

/// The 30 methods of `runtime.v1.RuntimeService`.
pub fn runtime_service() -> ServiceBuilder {
    ServiceBuilder::new(RUNTIME_SERVICE)
        .unary::<VersionRequest, VersionResponse>("Version")
        .unary::<RunPodSandboxRequest, RunPodSandboxResponse>("RunPodSandbox")
        .unary::<StopPodSandboxRequest, StopPodSandboxResponse>("StopPodSandbox")
        .unary::<RemovePodSandboxRequest, RemovePodSandboxResponse>("RemovePodSandbox")
        .unary::<PodSandboxStatusRequest, PodSandboxStatusResponse>("PodSandboxStatus")
        .unary::<ListPodSandboxRequest, ListPodSandboxResponse>("ListPodSandbox")
        .unary::<CreateContainerRequest, CreateContainerResponse>("CreateContainer")
        .unary::<StartContainerRequest, StartContainerResponse>("StartContainer")
        .unary::<StopContainerRequest, StopContainerResponse>("StopContainer")
        .unary::<RemoveContainerRequest, RemoveContainerResponse>("RemoveContainer")
        .unary::<ListContainersRequest, ListContainersResponse>("ListContainers")
        .unary::<ContainerStatusRequest, ContainerStatusResponse>("ContainerStatus")
        .unary::<UpdateContainerResourcesRequest, UpdateContainerResourcesResponse>(
            "UpdateContainerResources",
        )
        .unary::<ReopenContainerLogRequest, ReopenContainerLogResponse>("ReopenContainerLog")
        .unary::<ExecSyncRequest, ExecSyncResponse>("ExecSync")
        .unary::<ExecRequest, ExecResponse>("Exec")
        .unary::<AttachRequest, AttachResponse>("Attach")
        .unary::<PortForwardRequest, PortForwardResponse>("PortForward")
        .unary::<ContainerStatsRequest, ContainerStatsResponse>("ContainerStats")
        .unary::<ListContainerStatsRequest, ListContainerStatsResponse>("ListContainerStats")
        .unary::<PodSandboxStatsRequest, PodSandboxStatsResponse>("PodSandboxStats")
        .unary::<ListPodSandboxStatsRequest, ListPodSandboxStatsResponse>("ListPodSandboxStats")
        .unary::<UpdateRuntimeConfigRequest, UpdateRuntimeConfigResponse>("UpdateRuntimeConfig")
        .unary::<StatusRequest, StatusResponse>("Status")
        .unary::<CheckpointContainerRequest, CheckpointContainerResponse>("CheckpointContainer")
        .server_streaming::<GetEventsRequest, ContainerEventResponse>("GetContainerEvents")
        .unary::<ListMetricDescriptorsRequest, ListMetricDescriptorsResponse>(
            "ListMetricDescriptors",
        )
        .unary::<ListPodSandboxMetricsRequest, ListPodSandboxMetricsResponse>(
            "ListPodSandboxMetrics",
        )
        .unary::<RuntimeConfigRequest, RuntimeConfigResponse>("RuntimeConfig")
        .unary::<UpdatePodSandboxResourcesRequest, UpdatePodSandboxResourcesResponse>(
            "UpdatePodSandboxResources",
        )
}

/// The 5 methods of `runtime.v1.ImageService`.
pub fn image_service() -> ServiceBuilder {
    ServiceBuilder::new(IMAGE_SERVICE)
        .unary::<ListImagesRequest, ListImagesResponse>("ListImages")
        .unary::<ImageStatusRequest, ImageStatusResponse>("ImageStatus")
        .unary::<PullImageRequest, PullImageResponse>("PullImage")
        .unary::<RemoveImageRequest, RemoveImageResponse>("RemoveImage")
        .unary::<ImageFsInfoRequest, ImageFsInfoResponse>("ImageFsInfo")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpcweb_lite::Router;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_descriptor_tables_install_thirty_five_paths() {
        let router = Router::new(CancellationToken::new())
            .install(runtime_service())
            .unwrap();
        assert_eq!(router.path_count(), 30);

        let router = router.install(image_service()).unwrap();
        assert_eq!(router.path_count(), 35);
    }

    #[test]
    fn test_canonical_cri_paths() {
        let router = Router::new(CancellationToken::new())
            .install(runtime_service().chain(image_service()))
            .unwrap();

        let paths: Vec<_> = router.paths().collect();
        assert!(paths.contains(&"/runtime.v1.RuntimeService/RunPodSandbox"));
        assert!(paths.contains(&"/runtime.v1.ImageService/ListImages"));
    }
}
