// ============================================================================
// camera.rs — Linestream
// Orbit camera around the emitter: yaw/pitch/distance navigation and the
// view-projection matrix handed to the particle material.
// ============================================================================

use glam::{Mat4, Vec3};

const MIN_DISTANCE: f32 = 0.5;
const MAX_DISTANCE: f32 = 500.0;
const PITCH_LIMIT: f32 = 1.5;

/// CPU-side camera state tracked between frames.
#[derive(Clone, Debug)]
pub struct OrbitCamera {
    pub target: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub distance: f32,
    pub fov_y: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            yaw: 0.6,
            pitch: 0.35,
            distance: 30.0,
            fov_y: 45f32.to_radians(),
        }
    }
}

impl OrbitCamera {
    pub fn looking_at(target: [f32; 3]) -> Self {
        Self {
            target: Vec3::from(target),
            ..Default::default()
        }
    }

    /// Apply continuous orbit from held keys.
    pub fn apply_orbit(&mut self, up: bool, down: bool, left: bool, right: bool, dt: f32) {
        let speed = 1.5 * dt;
        if left {
            self.yaw -= speed;
        }
        if right {
            self.yaw += speed;
        }
        if up {
            self.pitch += speed;
        }
        if down {
            self.pitch -= speed;
        }
        self.pitch = self.pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    /// Apply continuous dolly from held keys.
    pub fn apply_zoom_keys(&mut self, zoom_in: bool, zoom_out: bool) {
        if zoom_in {
            self.distance = (self.distance * 0.98).max(MIN_DISTANCE);
        }
        if zoom_out {
            self.distance = (self.distance * 1.02).min(MAX_DISTANCE);
        }
    }

    /// Apply scroll-wheel dolly.
    pub fn apply_scroll(&mut self, scroll_y: f32) {
        self.distance *= 1.0 - scroll_y * 0.1;
        self.distance = self.distance.clamp(MIN_DISTANCE, MAX_DISTANCE);
    }

    pub fn eye(&self) -> Vec3 {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        self.target + Vec3::new(cp * sy, sp, cp * cy) * self.distance
    }

    pub fn view_proj(&self, aspect: f32) -> Mat4 {
        let view = Mat4::look_at_rh(self.eye(), self.target, Vec3::Y);
        let proj = Mat4::perspective_rh(self.fov_y, aspect.max(1e-3), 0.05, 2000.0);
        proj * view
    }
}
