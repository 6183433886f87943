#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod assets;
pub mod ecs;
pub mod engine;
pub mod errors;
pub mod gpu;
pub mod math;
pub mod render;
pub mod resources;
pub mod scene;
pub mod utils;

pub use ecs::{ComponentData, ComponentDesc, Entity, Query, QueryFilter, ScalarType, World};
pub use engine::Engine;
pub use errors::{CathodeError, Result};
pub use gpu::{DrawCommand, DrawCommandBuilder, GpuBackend, NullBackend, WgpuBackend};
pub use render::{Renderer, RendererSettings};
pub use resources::{CacheConfig, EvictionPolicy, ResourceHandle, ResourceManager};
pub use scene::{Camera, Light, OrbitParams, Transform, TransformSystem};
pub use utils::Timer;
