//! ImageService handlers: pulls mirror registry images into the
//! provider, removals drop them from the mirror.

use std::collections::HashMap;
use std::sync::Arc;

use rpcweb_lite::ServiceBuilder;
use tonic::Status;
use tracing::info;

use super::store::{self, FunctionStore, MirroredImage};
use crate::cri;
use crate::proto::*;

const IMAGE_MOUNTPOINT: &str = "/var/lib/funcri/images";

pub fn service(store: Arc<FunctionStore>) -> ServiceBuilder {
    cri::image_service()
        .handle("ListImages", {
            let store = Arc::clone(&store);
            move |req: ListImagesRequest| {
                let store = Arc::clone(&store);
                async move {
                    let wanted = req
                        .filter
                        .and_then(|f| f.image)
                        .map(|spec| spec.image)
                        .filter(|image| !image.is_empty());

                    let mut images: Vec<_> = store
                        .list_images()
                        .iter()
                        .filter(|img| match &wanted {
                            Some(key) => img.id == *key || img.reference == *key,
                            None => true,
                        })
                        .map(image)
                        .collect();
                    images.sort_by(|a, b| a.id.cmp(&b.id));
                    Ok(ListImagesResponse { images })
                }
            }
        })
        .handle("ImageStatus", {
            let store = Arc::clone(&store);
            move |req: ImageStatusRequest| {
                let store = Arc::clone(&store);
                async move {
                    let key = req
                        .image
                        .map(|spec| spec.image)
                        .ok_or_else(|| Status::invalid_argument("image spec is required"))?;

                    // An unknown image is reported as absent, not as an error.
                    Ok(ImageStatusResponse {
                        image: store.find_image(&key).as_ref().map(image),
                        info: HashMap::new(),
                    })
                }
            }
        })
        .handle("PullImage", {
            let store = Arc::clone(&store);
            move |req: PullImageRequest| {
                let store = Arc::clone(&store);
                async move {
                    let reference = req
                        .image
                        .map(|spec| spec.image)
                        .filter(|image| !image.is_empty())
                        .ok_or_else(|| Status::invalid_argument("image reference is required"))?;
                    let username = req.auth.map(|auth| auth.username).unwrap_or_default();

                    let mirrored = store.mirror_image(&reference, username);
                    info!(reference = %reference, id = %mirrored.id, "mirrored image");

                    Ok(PullImageResponse {
                        image_ref: mirrored.id,
                    })
                }
            }
        })
        .handle("RemoveImage", {
            let store = Arc::clone(&store);
            move |req: RemoveImageRequest| {
                let store = Arc::clone(&store);
                async move {
                    let key = req
                        .image
                        .map(|spec| spec.image)
                        .ok_or_else(|| Status::invalid_argument("image spec is required"))?;

                    // Removing an absent image succeeds.
                    store.remove_image(&key);
                    Ok(RemoveImageResponse {})
                }
            }
        })
        .handle("ImageFsInfo", {
            let store = Arc::clone(&store);
            move |_req: ImageFsInfoRequest| {
                let store = Arc::clone(&store);
                async move {
                    Ok(ImageFsInfoResponse {
                        image_filesystems: vec![FilesystemUsage {
                            timestamp: store::now_nanos(),
                            fs_id: Some(FilesystemIdentifier {
                                mountpoint: IMAGE_MOUNTPOINT.to_owned(),
                            }),
                            used_bytes: Some(UInt64Value {
                                value: store.mirror_bytes(),
                            }),
                            inodes_used: Some(UInt64Value {
                                value: store.list_images().len() as u64,
                            }),
                        }],
                    })
                }
            }
        })
}

fn image(mirrored: &MirroredImage) -> Image {
    Image {
        id: mirrored.id.clone(),
        repo_tags: vec![mirrored.reference.clone()],
        repo_digests: vec![mirrored.id.clone()],
        size: mirrored.size,
        uid: None,
        username: mirrored.username.clone(),
        spec: Some(ImageSpec {
            image: mirrored.reference.clone(),
            annotations: Default::default(),
        }),
        pinned: mirrored.pinned,
    }
}
