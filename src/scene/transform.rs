//! Transform Component Schema
//!
//! Nine floats of TRS, three signed ints of hierarchy links (singly-linked
//! sibling list, −1 = none), one dirty byte, and two matrix-pool indices.
//! The schema is registered by [`TransformSystem`](super::transform_system)
//! so the field positions below are fixed and the system can use the typed
//! column fast path.

use glam::Vec3;

use crate::ecs::component::{ComponentData, ComponentDesc, ScalarType};

/// Component type name.
pub const TRANSFORM: &str = "Transform";

/// Field positions within the Transform schema, in declaration order.
pub mod field {
    pub const PX: usize = 0;
    pub const PY: usize = 1;
    pub const PZ: usize = 2;
    pub const RX: usize = 3;
    pub const RY: usize = 4;
    pub const RZ: usize = 5;
    pub const SX: usize = 6;
    pub const SY: usize = 7;
    pub const SZ: usize = 8;
    pub const PARENT: usize = 9;
    pub const FIRST_CHILD: usize = 10;
    pub const NEXT_SIBLING: usize = 11;
    pub const DIRTY: usize = 12;
    pub const LOCAL_MATRIX: usize = 13;
    pub const WORLD_MATRIX: usize = 14;
}

/// Builds the Transform component descriptor.
#[must_use]
pub fn descriptor() -> ComponentDesc {
    ComponentDesc::builder(TRANSFORM)
        .field("px", ScalarType::F32, 0.0)
        .field("py", ScalarType::F32, 0.0)
        .field("pz", ScalarType::F32, 0.0)
        .field("rx", ScalarType::F32, 0.0)
        .field("ry", ScalarType::F32, 0.0)
        .field("rz", ScalarType::F32, 0.0)
        .field("sx", ScalarType::F32, 1.0)
        .field("sy", ScalarType::F32, 1.0)
        .field("sz", ScalarType::F32, 1.0)
        .field("parent", ScalarType::I32, -1.0)
        .field("first_child", ScalarType::I32, -1.0)
        .field("next_sibling", ScalarType::I32, -1.0)
        .field("dirty", ScalarType::U8, 1.0)
        .field("local_matrix", ScalarType::I32, -1.0)
        .field("world_matrix", ScalarType::I32, -1.0)
        .build()
        .expect("transform schema is valid")
}

/// Convenience value builder for spawning an entity with a transform.
#[derive(Debug, Clone, Copy)]
pub struct Transform {
    pub position: Vec3,
    /// Euler rotation, XYZ order, radians.
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    #[must_use]
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    #[must_use]
    pub fn with_rotation(mut self, euler: Vec3) -> Self {
        self.rotation = euler;
        self
    }

    /// Spawn-time component values. Hierarchy and matrix fields start at
    /// their schema defaults (unparented, unallocated, dirty).
    #[must_use]
    pub fn into_data(self) -> ComponentData {
        ComponentData::new(TRANSFORM)
            .with("px", f64::from(self.position.x))
            .with("py", f64::from(self.position.y))
            .with("pz", f64::from(self.position.z))
            .with("rx", f64::from(self.rotation.x))
            .with("ry", f64::from(self.rotation.y))
            .with("rz", f64::from(self.rotation.z))
            .with("sx", f64::from(self.scale.x))
            .with("sy", f64::from(self.scale.y))
            .with("sz", f64::from(self.scale.z))
    }
}
