//! Light Components
//!
//! Lights are a tagged union: a `kind` discriminant plus the fields each
//! variant uses, packed into a flat numeric schema so they live in SoA
//! columns like every other component. The factory constructors validate
//! domain constraints up front — an invalid light never reaches a column.

use glam::Vec3;

use crate::ecs::component::{ComponentData, ComponentDesc, ScalarType};
use crate::errors::{CathodeError, Result};

/// Component type name.
pub const LIGHT: &str = "Light";

const DIRECTION_EPS: f32 = 1e-6;
const TAU: f32 = std::f32::consts::TAU;

/// Light variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Directional { direction: Vec3 },
    Point { radius: f32 },
    Spot {
        direction: Vec3,
        radius: f32,
        /// Full cone angle, radians, in `(0, 2π]`.
        angle: f32,
        /// Soft-edge fraction of the cone, `[0, 1]`.
        penumbra: f32,
    },
    Ambient,
}

impl LightKind {
    /// Discriminant stored in the `kind` column.
    #[must_use]
    pub fn tag(&self) -> u32 {
        match self {
            LightKind::Directional { .. } => 0,
            LightKind::Point { .. } => 1,
            LightKind::Spot { .. } => 2,
            LightKind::Ambient => 3,
        }
    }
}

/// A validated light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub color: Vec3,
    pub intensity: f32,
    pub kind: LightKind,
}

impl Light {
    /// Directional light. Fails on negative intensity or zero direction.
    pub fn directional(color: Vec3, intensity: f32, direction: Vec3) -> Result<Self> {
        check_intensity(intensity)?;
        check_direction(direction)?;
        Ok(Self {
            color,
            intensity,
            kind: LightKind::Directional {
                direction: direction.normalize(),
            },
        })
    }

    /// Point light. Fails on negative intensity or non-positive radius.
    pub fn point(color: Vec3, intensity: f32, radius: f32) -> Result<Self> {
        check_intensity(intensity)?;
        check_radius(radius)?;
        Ok(Self {
            color,
            intensity,
            kind: LightKind::Point { radius },
        })
    }

    /// Spot light. Fails on negative intensity, zero-length direction,
    /// non-positive radius, angle outside `(0, 2π]`, or penumbra outside
    /// `[0, 1]`.
    pub fn spot(
        color: Vec3,
        intensity: f32,
        direction: Vec3,
        radius: f32,
        angle: f32,
        penumbra: f32,
    ) -> Result<Self> {
        check_intensity(intensity)?;
        check_direction(direction)?;
        check_radius(radius)?;
        if angle <= 0.0 || angle > TAU {
            return Err(CathodeError::InvalidLight(format!(
                "spot angle {angle} outside (0, 2\u{3c0}]"
            )));
        }
        if !(0.0..=1.0).contains(&penumbra) {
            return Err(CathodeError::InvalidLight(format!(
                "penumbra {penumbra} outside [0, 1]"
            )));
        }
        Ok(Self {
            color,
            intensity,
            kind: LightKind::Spot {
                direction: direction.normalize(),
                radius,
                angle,
                penumbra,
            },
        })
    }

    /// Ambient term. Fails on negative intensity.
    pub fn ambient(color: Vec3, intensity: f32) -> Result<Self> {
        check_intensity(intensity)?;
        Ok(Self {
            color,
            intensity,
            kind: LightKind::Ambient,
        })
    }

    /// Packs the light into component values for spawning.
    #[must_use]
    pub fn into_data(self) -> ComponentData {
        let mut data = ComponentData::new(LIGHT)
            .with("kind", f64::from(self.kind.tag()))
            .with("r", f64::from(self.color.x))
            .with("g", f64::from(self.color.y))
            .with("b", f64::from(self.color.z))
            .with("intensity", f64::from(self.intensity));
        match self.kind {
            LightKind::Directional { direction } => {
                data = data
                    .with("dx", f64::from(direction.x))
                    .with("dy", f64::from(direction.y))
                    .with("dz", f64::from(direction.z));
            }
            LightKind::Point { radius } => {
                data = data.with("radius", f64::from(radius));
            }
            LightKind::Spot {
                direction,
                radius,
                angle,
                penumbra,
            } => {
                data = data
                    .with("dx", f64::from(direction.x))
                    .with("dy", f64::from(direction.y))
                    .with("dz", f64::from(direction.z))
                    .with("radius", f64::from(radius))
                    .with("angle", f64::from(angle))
                    .with("penumbra", f64::from(penumbra));
            }
            LightKind::Ambient => {}
        }
        data
    }
}

/// Builds the Light component descriptor.
#[must_use]
pub fn descriptor() -> ComponentDesc {
    ComponentDesc::builder(LIGHT)
        .field("kind", ScalarType::U32, 3.0)
        .field("r", ScalarType::F32, 1.0)
        .field("g", ScalarType::F32, 1.0)
        .field("b", ScalarType::F32, 1.0)
        .field("intensity", ScalarType::F32, 1.0)
        .field("dx", ScalarType::F32, 0.0)
        .field("dy", ScalarType::F32, -1.0)
        .field("dz", ScalarType::F32, 0.0)
        .field("radius", ScalarType::F32, 1.0)
        .field("angle", ScalarType::F32, std::f64::consts::FRAC_PI_4)
        .field("penumbra", ScalarType::F32, 0.0)
        .build()
        .expect("light schema is valid")
}

fn check_intensity(intensity: f32) -> Result<()> {
    if intensity < 0.0 {
        return Err(CathodeError::InvalidLight(format!(
            "negative intensity {intensity}"
        )));
    }
    Ok(())
}

fn check_direction(direction: Vec3) -> Result<()> {
    if direction.length_squared() < DIRECTION_EPS {
        return Err(CathodeError::InvalidLight(
            "zero-length direction".to_string(),
        ));
    }
    Ok(())
}

fn check_radius(radius: f32) -> Result<()> {
    if radius <= 0.0 {
        return Err(CathodeError::InvalidLight(format!(
            "radius {radius} must be positive"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spot_rejects_zero_direction() {
        let err = Light::spot(Vec3::ONE, 1.0, Vec3::ZERO, 5.0, 1.0, 0.2).unwrap_err();
        assert!(err.to_string().contains("zero-length direction"));
    }

    #[test]
    fn spot_angle_bounds() {
        assert!(Light::spot(Vec3::ONE, 1.0, Vec3::NEG_Z, 5.0, 0.0, 0.2).is_err());
        assert!(Light::spot(Vec3::ONE, 1.0, Vec3::NEG_Z, 5.0, TAU, 0.2).is_ok());
        assert!(Light::spot(Vec3::ONE, 1.0, Vec3::NEG_Z, 5.0, TAU + 0.1, 0.2).is_err());
    }

    #[test]
    fn penumbra_bounds() {
        assert!(Light::spot(Vec3::ONE, 1.0, Vec3::NEG_Z, 5.0, 1.0, 1.1).is_err());
        assert!(Light::spot(Vec3::ONE, 1.0, Vec3::NEG_Z, 5.0, 1.0, 1.0).is_ok());
    }

    #[test]
    fn point_rejects_zero_radius() {
        assert!(Light::point(Vec3::ONE, 1.0, 0.0).is_err());
    }

    #[test]
    fn negative_intensity_rejected_everywhere() {
        assert!(Light::ambient(Vec3::ONE, -0.1).is_err());
        assert!(Light::directional(Vec3::ONE, -1.0, Vec3::NEG_Y).is_err());
    }

    #[test]
    fn directional_normalizes() {
        let light = Light::directional(Vec3::ONE, 1.0, Vec3::new(0.0, -2.0, 0.0)).unwrap();
        match light.kind {
            LightKind::Directional { direction } => {
                assert!((direction.length() - 1.0).abs() < 1e-6);
            }
            _ => unreachable!(),
        }
    }
}
