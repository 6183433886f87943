//! Motion and Light-Animation Components
//!
//! Velocity integration plus the three light modulators (flicker, pulse,
//! orbit). All four are flat numeric schemas; their systems run in the
//! UPDATE band and stream SoA columns directly — this is the typed-span
//! fast path the storage layer exists for.

use rand::RngExt;

use crate::ecs::component::{ComponentData, ComponentDesc, ScalarType};
use crate::ecs::schedule::{priority, Scheduler, SystemDesc};
use crate::ecs::world::World;
use crate::errors::{CathodeError, Result};
use crate::scene::light::LIGHT;
use crate::scene::transform::{field as tf, TRANSFORM};

pub const VELOCITY: &str = "Velocity";
pub const FLICKERING_LIGHT: &str = "FlickeringLight";
pub const PULSING_LIGHT: &str = "PulsingLight";
pub const ORBITING_LIGHT: &str = "OrbitingLight";

/// Velocity component values.
#[derive(Debug, Clone, Copy, Default)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Velocity {
    #[must_use]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[must_use]
    pub fn into_data(self) -> ComponentData {
        ComponentData::new(VELOCITY)
            .with("vx", f64::from(self.x))
            .with("vy", f64::from(self.y))
            .with("vz", f64::from(self.z))
    }
}

/// Random per-frame intensity jitter. `amplitude` is the fraction of the
/// base intensity the flicker may remove.
#[derive(Debug, Clone, Copy)]
pub struct FlickeringLight {
    pub base_intensity: f32,
    pub amplitude: f32,
    pub speed: f32,
}

impl FlickeringLight {
    /// Fails when amplitude is outside `[0, 1]` or speed is non-positive.
    pub fn new(base_intensity: f32, amplitude: f32, speed: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&amplitude) {
            return Err(CathodeError::InvalidLight(format!(
                "flicker amplitude {amplitude} outside [0, 1]"
            )));
        }
        if speed <= 0.0 {
            return Err(CathodeError::InvalidLight(format!(
                "flicker speed {speed} must be positive"
            )));
        }
        Ok(Self {
            base_intensity,
            amplitude,
            speed,
        })
    }

    #[must_use]
    pub fn into_data(self) -> ComponentData {
        ComponentData::new(FLICKERING_LIGHT)
            .with("base_intensity", f64::from(self.base_intensity))
            .with("amplitude", f64::from(self.amplitude))
            .with("speed", f64::from(self.speed))
            .with("timer", 0.0)
    }
}

/// Sinusoidal intensity modulation.
#[derive(Debug, Clone, Copy)]
pub struct PulsingLight {
    pub base_intensity: f32,
    pub amplitude: f32,
    pub speed: f32,
    pub phase: f32,
}

impl PulsingLight {
    /// Fails when amplitude is outside `[0, 1]`.
    pub fn new(base_intensity: f32, amplitude: f32, speed: f32, phase: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&amplitude) {
            return Err(CathodeError::InvalidLight(format!(
                "pulse amplitude {amplitude} outside [0, 1]"
            )));
        }
        Ok(Self {
            base_intensity,
            amplitude,
            speed,
            phase,
        })
    }

    #[must_use]
    pub fn into_data(self) -> ComponentData {
        ComponentData::new(PULSING_LIGHT)
            .with("base_intensity", f64::from(self.base_intensity))
            .with("amplitude", f64::from(self.amplitude))
            .with("speed", f64::from(self.speed))
            .with("phase", f64::from(self.phase))
            .with("time", 0.0)
    }
}

/// Circular orbit of the entity's transform around a center point.
#[derive(Debug, Clone, Copy)]
pub struct OrbitingLight {
    pub center_x: f32,
    pub center_y: f32,
    pub center_z: f32,
    pub radius: f32,
    pub speed: f32,
}

impl OrbitingLight {
    /// Fails when radius is non-positive.
    pub fn new(center: [f32; 3], radius: f32, speed: f32) -> Result<Self> {
        if radius <= 0.0 {
            return Err(CathodeError::InvalidLight(format!(
                "orbit radius {radius} must be positive"
            )));
        }
        Ok(Self {
            center_x: center[0],
            center_y: center[1],
            center_z: center[2],
            radius,
            speed,
        })
    }

    #[must_use]
    pub fn into_data(self) -> ComponentData {
        ComponentData::new(ORBITING_LIGHT)
            .with("cx", f64::from(self.center_x))
            .with("cy", f64::from(self.center_y))
            .with("cz", f64::from(self.center_z))
            .with("radius", f64::from(self.radius))
            .with("speed", f64::from(self.speed))
            .with("angle", 0.0)
    }
}

// ============================================================================
// Schema registration
// ============================================================================

fn velocity_descriptor() -> ComponentDesc {
    ComponentDesc::builder(VELOCITY)
        .field("vx", ScalarType::F32, 0.0)
        .field("vy", ScalarType::F32, 0.0)
        .field("vz", ScalarType::F32, 0.0)
        .build()
        .expect("velocity schema is valid")
}

fn flicker_descriptor() -> ComponentDesc {
    ComponentDesc::builder(FLICKERING_LIGHT)
        .field("base_intensity", ScalarType::F32, 1.0)
        .field("amplitude", ScalarType::F32, 0.5)
        .field("speed", ScalarType::F32, 10.0)
        .field("timer", ScalarType::F32, 0.0)
        .build()
        .expect("flicker schema is valid")
}

fn pulse_descriptor() -> ComponentDesc {
    ComponentDesc::builder(PULSING_LIGHT)
        .field("base_intensity", ScalarType::F32, 1.0)
        .field("amplitude", ScalarType::F32, 0.5)
        .field("speed", ScalarType::F32, 1.0)
        .field("phase", ScalarType::F32, 0.0)
        .field("time", ScalarType::F32, 0.0)
        .build()
        .expect("pulse schema is valid")
}

fn orbit_descriptor() -> ComponentDesc {
    ComponentDesc::builder(ORBITING_LIGHT)
        .field("cx", ScalarType::F32, 0.0)
        .field("cy", ScalarType::F32, 0.0)
        .field("cz", ScalarType::F32, 0.0)
        .field("radius", ScalarType::F32, 1.0)
        .field("speed", ScalarType::F32, 1.0)
        .field("angle", ScalarType::F32, 0.0)
        .build()
        .expect("orbit schema is valid")
}

/// Registers the motion schemas and their UPDATE-band systems.
pub fn register_motion_systems(world: &mut World, scheduler: &mut Scheduler) -> Result<()> {
    world.register_component(velocity_descriptor());
    world.register_component(flicker_descriptor());
    world.register_component(pulse_descriptor());
    world.register_component(orbit_descriptor());

    scheduler.register(
        SystemDesc::new("velocity_integrate", priority::UPDATE).on_update(integrate_velocities),
    )?;
    scheduler.register(
        SystemDesc::new("light_flicker", priority::UPDATE).on_update(flicker_lights),
    )?;
    scheduler.register(SystemDesc::new("light_pulse", priority::UPDATE).on_update(pulse_lights))?;
    scheduler.register(SystemDesc::new("light_orbit", priority::UPDATE).on_update(orbit_lights))?;
    Ok(())
}

// ============================================================================
// Systems
// ============================================================================

fn integrate_velocities(world: &mut World, dt: f32) {
    for id in 0..world.archetypes().len() {
        let arch = world.archetypes_mut().get_mut(id);
        if !(arch.has_component(VELOCITY) && arch.has_component(TRANSFORM)) {
            continue;
        }
        let Ok((vel, tr)) = arch.component_pair_mut(VELOCITY, TRANSFORM) else {
            continue;
        };
        let count = vel.len();
        for row in 0..count {
            let vx = vel.get(row, 0).unwrap_or(0.0) as f32;
            let vy = vel.get(row, 1).unwrap_or(0.0) as f32;
            let vz = vel.get(row, 2).unwrap_or(0.0) as f32;
            if vx == 0.0 && vy == 0.0 && vz == 0.0 {
                continue;
            }
            for (f, v) in [(tf::PX, vx), (tf::PY, vy), (tf::PZ, vz)] {
                let cur = tr.get(row, f).unwrap_or(0.0);
                let _ = tr.set(row, f, cur + f64::from(v * dt));
            }
            let _ = tr.set(row, tf::DIRTY, 1.0);
        }
    }
}

fn flicker_lights(world: &mut World, dt: f32) {
    let mut rng = rand::rng();
    for id in 0..world.archetypes().len() {
        let arch = world.archetypes_mut().get_mut(id);
        if !(arch.has_component(FLICKERING_LIGHT) && arch.has_component(LIGHT)) {
            continue;
        }
        let Ok((flicker, light)) = arch.component_pair_mut(FLICKERING_LIGHT, LIGHT) else {
            continue;
        };
        for row in 0..flicker.len() {
            let base = flicker.get(row, 0).unwrap_or(0.0);
            let amplitude = flicker.get(row, 1).unwrap_or(0.0);
            let speed = flicker.get(row, 2).unwrap_or(1.0);
            let timer = flicker.get(row, 3).unwrap_or(0.0) + f64::from(dt) * speed;
            let _ = flicker.set(row, 3, timer);
            // Re-roll once per accumulated unit of flicker time.
            if timer >= 1.0 {
                let _ = flicker.set(row, 3, timer.fract());
                let jitter: f64 = rng.random_range(0.0..=1.0);
                let intensity = base * (1.0 - amplitude * jitter);
                let _ = light.set_named(row, "intensity", intensity.max(0.0));
            }
        }
    }
}

fn pulse_lights(world: &mut World, dt: f32) {
    for id in 0..world.archetypes().len() {
        let arch = world.archetypes_mut().get_mut(id);
        if !(arch.has_component(PULSING_LIGHT) && arch.has_component(LIGHT)) {
            continue;
        }
        let Ok((pulse, light)) = arch.component_pair_mut(PULSING_LIGHT, LIGHT) else {
            continue;
        };
        for row in 0..pulse.len() {
            let base = pulse.get(row, 0).unwrap_or(0.0);
            let amplitude = pulse.get(row, 1).unwrap_or(0.0);
            let speed = pulse.get(row, 2).unwrap_or(1.0);
            let phase = pulse.get(row, 3).unwrap_or(0.0);
            let time = pulse.get(row, 4).unwrap_or(0.0) + f64::from(dt);
            let _ = pulse.set(row, 4, time);
            let wave = (time * speed + phase).sin();
            let intensity = base * (1.0 + amplitude * wave);
            let _ = light.set_named(row, "intensity", intensity.max(0.0));
        }
    }
}

fn orbit_lights(world: &mut World, dt: f32) {
    for id in 0..world.archetypes().len() {
        let arch = world.archetypes_mut().get_mut(id);
        if !(arch.has_component(ORBITING_LIGHT) && arch.has_component(TRANSFORM)) {
            continue;
        }
        let Ok((orbit, tr)) = arch.component_pair_mut(ORBITING_LIGHT, TRANSFORM) else {
            continue;
        };
        for row in 0..orbit.len() {
            let cx = orbit.get(row, 0).unwrap_or(0.0);
            let cy = orbit.get(row, 1).unwrap_or(0.0);
            let cz = orbit.get(row, 2).unwrap_or(0.0);
            let radius = orbit.get(row, 3).unwrap_or(1.0);
            let speed = orbit.get(row, 4).unwrap_or(1.0);
            let angle = orbit.get(row, 5).unwrap_or(0.0) + f64::from(dt) * speed;
            let _ = orbit.set(row, 5, angle);
            let _ = tr.set(row, tf::PX, cx + radius * angle.cos());
            let _ = tr.set(row, tf::PY, cy);
            let _ = tr.set(row, tf::PZ, cz + radius * angle.sin());
            let _ = tr.set(row, tf::DIRTY, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flicker_validates_amplitude() {
        assert!(FlickeringLight::new(1.0, 1.5, 1.0).is_err());
        assert!(FlickeringLight::new(1.0, 0.5, 0.0).is_err());
        assert!(FlickeringLight::new(1.0, 1.0, 2.0).is_ok());
    }

    #[test]
    fn orbit_validates_radius() {
        assert!(OrbitingLight::new([0.0; 3], 0.0, 1.0).is_err());
        assert!(OrbitingLight::new([0.0; 3], 2.0, 1.0).is_ok());
    }

    #[test]
    fn pulse_validates_amplitude() {
        assert!(PulsingLight::new(1.0, -0.1, 1.0, 0.0).is_err());
        assert!(PulsingLight::new(1.0, 0.25, 1.0, 0.0).is_ok());
    }
}
