//! Frame Rendering Core
//!
//! The per-frame orchestration over the GPU abstraction: scene pass with
//! opacity classification and sorting, the bloom mip pyramid, the composite
//! stage, and the CRT pass, all parameterised by fixed-layout uniform
//! blocks and runtime-settable tunables.

pub mod bloom;
pub mod frame;
pub mod material;
pub mod params;
pub mod settings;

pub use frame::{RenderObject, Renderer};
pub use material::{classify_material, MaterialInfo, RenderMode};
pub use params::{BloomExtractParams, CameraUniforms, CompositeParams, CrtParams, DownsampleParams, UpsampleParams};
pub use settings::{CrtSettings, RendererSettings, RetroPostProcessor};
