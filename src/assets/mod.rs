//! Asset Layer
//!
//! The data records the opaque model loader produces, the image decode
//! pipeline (RGBA8, 256×256 cap, transparency statistics), blob fetching by
//! URL or path, and the [`ResourceLoader`](crate::resources::ResourceLoader)
//! implementations that plug both into the resource manager.

pub mod geometry;
pub mod image;
pub mod io;
pub mod loaders;

pub use geometry::{GeometryData, Indices, MaterialRecord, ModelData};
pub use image::{decode_rgba8, ImagePixels, MAX_TEXTURE_DIMENSION};
pub use io::{fetch_blob, AssetSource};
pub use loaders::{ImageLoader, ModelLoader, ModelParser, KIND_MODEL, KIND_TEXTURE};
