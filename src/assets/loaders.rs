//! Resource-Manager Loaders
//!
//! Packages the asset pipeline as [`ResourceLoader`] implementations. The
//! image loader decodes to capped RGBA8; the model loader delegates parsing
//! to an injected parser (the wavefront format itself is an external
//! collaborator) and reports the model's textures as dependencies. Those
//! edges are recorded in the dependency tracker when the load completes, so
//! they order dependency-aware loads from the resource's second load
//! onward; for a cold first load to pull textures in first, declare the
//! edges up front with
//! [`ResourceManager::add_dependency`](crate::resources::ResourceManager::add_dependency).

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::assets::geometry::ModelData;
use crate::assets::image::decode_rgba8;
use crate::assets::io::{fetch_blob, AssetSource};
use crate::errors::{CathodeError, Result};
use crate::resources::entry::Resource;
use crate::resources::manager::{LoadOptions, ResourceLoader};

pub const KIND_TEXTURE: &str = "texture";
pub const KIND_MODEL: &str = "model";

/// Decodes fetched image bytes into [`ImagePixels`](crate::assets::ImagePixels).
#[derive(Default)]
pub struct ImageLoader;

impl ResourceLoader for ImageLoader {
    fn can_load(&self, id: &str) -> bool {
        let lower = id.to_ascii_lowercase();
        lower.ends_with(".png") || lower.ends_with(".jpg") || lower.ends_with(".jpeg")
    }

    fn load(&self, id: &str, _options: &LoadOptions) -> BoxFuture<'static, Result<Resource>> {
        let id = id.to_string();
        Box::pin(async move {
            let bytes = fetch_blob(&AssetSource::from_id(&id)).await?;
            let pixels = decode_rgba8(&bytes)?;
            let size = pixels.byte_size() as u64;
            Ok(Resource {
                id,
                kind: KIND_TEXTURE.to_string(),
                data: Arc::new(pixels),
                size,
                dependencies: Vec::new(),
            })
        })
    }
}

/// Parses raw model bytes into the geometry/material records.
pub type ModelParser = Arc<dyn Fn(&[u8]) -> Result<ModelData> + Send + Sync>;

/// Fetches model bytes and hands them to the injected parser.
pub struct ModelLoader {
    parser: ModelParser,
}

impl ModelLoader {
    #[must_use]
    pub fn new(parser: ModelParser) -> Self {
        Self { parser }
    }
}

impl ResourceLoader for ModelLoader {
    fn load(&self, id: &str, _options: &LoadOptions) -> BoxFuture<'static, Result<Resource>> {
        let id = id.to_string();
        let parser = Arc::clone(&self.parser);
        Box::pin(async move {
            let bytes = fetch_blob(&AssetSource::from_id(&id)).await?;
            let model = parser(&bytes).map_err(|e| CathodeError::LoaderFailure {
                id: id.clone(),
                reason: e.to_string(),
            })?;
            let size = model.byte_size() as u64;
            let dependencies = model.texture_paths();
            Ok(Resource {
                id,
                kind: KIND_MODEL.to_string(),
                data: Arc::new(model),
                size,
                dependencies,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_loader_filters_by_extension() {
        let loader = ImageLoader;
        assert!(loader.can_load("textures/wall.PNG"));
        assert!(loader.can_load("photo.jpeg"));
        assert!(!loader.can_load("mesh.obj"));
    }
}
