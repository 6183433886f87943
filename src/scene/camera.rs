//! Camera Component
//!
//! Tagged projection union plus the orbit parameters the renderer uses to
//! place the eye each frame.

use glam::{Mat4, Vec3};

/// Projection variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        /// Vertical field of view, radians.
        fov_y: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        /// Vertical extent of the view volume.
        height: f32,
        near: f32,
        far: f32,
    },
}

/// Camera component.
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub projection: Projection,
}

impl Camera {
    #[must_use]
    pub fn perspective(fov_y: f32, near: f32, far: f32) -> Self {
        Self {
            projection: Projection::Perspective { fov_y, near, far },
        }
    }

    #[must_use]
    pub fn orthographic(height: f32, near: f32, far: f32) -> Self {
        Self {
            projection: Projection::Orthographic { height, near, far },
        }
    }

    /// Projection matrix for the given aspect ratio (width / height).
    #[must_use]
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        match self.projection {
            Projection::Perspective { fov_y, near, far } => {
                Mat4::perspective_rh(fov_y, aspect, near, far)
            }
            Projection::Orthographic { height, near, far } => {
                let half_h = height * 0.5;
                let half_w = half_h * aspect;
                Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, near, far)
            }
        }
    }
}

/// Spherical orbit parameters: the renderer derives the eye from these each
/// frame.
#[derive(Debug, Clone, Copy)]
pub struct OrbitParams {
    pub distance: f32,
    /// Rotation around +Y, radians.
    pub azimuth: f32,
    /// Elevation above the horizon, radians.
    pub elevation: f32,
    pub target: Vec3,
}

impl Default for OrbitParams {
    fn default() -> Self {
        Self {
            distance: 10.0,
            azimuth: 0.0,
            elevation: 0.4,
            target: Vec3::ZERO,
        }
    }
}

impl OrbitParams {
    /// Eye position on the orbit sphere.
    #[must_use]
    pub fn eye(&self) -> Vec3 {
        let (sin_az, cos_az) = self.azimuth.sin_cos();
        let (sin_el, cos_el) = self.elevation.sin_cos();
        self.target
            + Vec3::new(
                self.distance * cos_el * sin_az,
                self.distance * sin_el,
                self.distance * cos_el * cos_az,
            )
    }

    /// Right-handed view matrix looking at the target.
    #[must_use]
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), self.target, Vec3::Y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orbit_eye_at_zero_angles_sits_on_z() {
        let orbit = OrbitParams {
            distance: 5.0,
            azimuth: 0.0,
            elevation: 0.0,
            target: Vec3::ZERO,
        };
        let eye = orbit.eye();
        assert!((eye - Vec3::new(0.0, 0.0, 5.0)).length() < 1e-5);
    }

    #[test]
    fn orbit_elevation_lifts_eye() {
        let orbit = OrbitParams {
            distance: 2.0,
            azimuth: 0.0,
            elevation: std::f32::consts::FRAC_PI_2,
            target: Vec3::new(1.0, 0.0, 0.0),
        };
        let eye = orbit.eye();
        assert!((eye - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-5);
    }
}
