//! Perspective camera and trackball controller.
//!
//! The camera keeps its projection in sync with its parameters: every setter
//! recomputes it, so `projection_view()` is always consistent with the last
//! write. The trackball orbits the camera transform around a fixed point.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec2, Vec3};

use crate::pointer::Pointer;

// ============================================================================
// Camera
// ============================================================================

#[derive(Clone, Debug)]
pub struct Camera {
    near: f32,
    far: f32,
    aspect: f32,
    /// Vertical field of view in radians.
    fov: f32,
    /// Camera-to-world transform.
    pub transform: Mat4,
    projection: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(0.01, 1000.0, 1.0, std::f32::consts::FRAC_PI_3)
    }
}

impl Camera {
    pub fn new(near: f32, far: f32, aspect: f32, fov: f32) -> Self {
        let mut camera = Self {
            near,
            far,
            aspect,
            fov,
            transform: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        };
        camera.update_projection();
        camera
    }

    fn update_projection(&mut self) {
        self.projection = Mat4::perspective_rh(self.fov, self.aspect.max(1.0e-6), self.near, self.far);
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn set_near(&mut self, near: f32) {
        self.near = near;
        self.update_projection();
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    pub fn set_far(&mut self, far: f32) {
        self.far = far;
        self.update_projection();
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
        self.update_projection();
    }

    pub fn fov(&self) -> f32 {
        self.fov
    }

    pub fn set_fov(&mut self, fov: f32) {
        self.fov = fov;
        self.update_projection();
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn inverse_transform(&self) -> Mat4 {
        self.transform.inverse()
    }

    pub fn projection_view(&self) -> Mat4 {
        self.projection * self.inverse_transform()
    }

    pub fn uniforms(&self) -> CameraUniforms {
        CameraUniforms {
            projection_view: self.projection_view().to_cols_array_2d(),
        }
    }
}

/// Camera data as the grain display shader reads it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CameraUniforms {
    pub projection_view: [[f32; 4]; 4],
}

// ============================================================================
// Trackball
// ============================================================================

/// Orbits a transform around a point with eased zoom and drag rotation.
#[derive(Clone, Debug)]
pub struct TrackballController {
    pub enabled: bool,
    pub invert_rotation: bool,
    pub rotation_ease: f32,
    pub zoom_speed: f32,
    pub zoom_ease: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    distance: f32,
    next_distance: f32,
    velocity: Vec2,
    position_offset: Vec3,
}

impl TrackballController {
    /// Build a controller and place `transform` at `distance` on its local +z.
    pub fn new(transform: &mut Mat4, distance: f32) -> Self {
        let mut controller = Self {
            enabled: true,
            invert_rotation: true,
            rotation_ease: 0.04,
            zoom_speed: 0.1,
            zoom_ease: 0.1,
            min_distance: 0.0,
            max_distance: f32::INFINITY,
            distance,
            next_distance: distance,
            velocity: Vec2::ZERO,
            position_offset: Vec3::ZERO,
        };
        controller.orbit(transform, None);
        controller
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }

    /// Jump to a distance without easing.
    pub fn set_distance(&mut self, distance: f32) {
        self.distance = distance;
        self.next_distance = distance;
    }

    /// Wheel zoom. Positive `delta_y` moves away.
    pub fn on_wheel(&mut self, delta_y: f32) {
        if !self.enabled {
            return;
        }
        let ratio = 1.0 + (delta_y * self.zoom_speed * 0.01).abs();
        self.next_distance = if delta_y > 0.0 {
            self.next_distance * ratio
        } else {
            self.next_distance / ratio
        };
        self.next_distance = self.next_distance.clamp(self.min_distance, self.max_distance);
    }

    pub fn update(&mut self, transform: &mut Mat4, pointer: &Pointer) {
        if !self.enabled {
            return;
        }
        let drag = pointer.is_down().then(|| pointer.velocity());
        self.orbit(transform, drag);
    }

    fn orbit(&mut self, transform: &mut Mat4, drag: Option<Vec2>) {
        self.distance += (self.next_distance - self.distance) * self.zoom_ease;

        let (_, rotation, translation) = transform.to_scale_rotation_translation();
        let position = translation - self.position_offset;

        if let Some(velocity) = drag {
            self.velocity = velocity * 0.003;
        }
        self.velocity = self.velocity.lerp(Vec2::ZERO, self.rotation_ease);

        let sign = if self.invert_rotation { -1.0 } else { 1.0 };
        let spin = Quat::from_rotation_y(sign * self.velocity.x) * Quat::from_rotation_x(sign * self.velocity.y);
        let rotation = (rotation * spin).normalize();

        self.position_offset = rotation * Vec3::Z * self.distance;
        *transform = Mat4::from_rotation_translation(rotation, position + self.position_offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_size() {
        assert_eq!(std::mem::size_of::<CameraUniforms>(), 64);
    }

    #[test]
    fn test_setters_recompute_projection() {
        let mut camera = Camera::default();
        let before = camera.projection();
        camera.set_aspect(2.0);
        assert_ne!(camera.projection(), before);
        assert_eq!(
            camera.projection(),
            Mat4::perspective_rh(std::f32::consts::FRAC_PI_3, 2.0, 0.01, 1000.0)
        );
        camera.set_fov(1.0);
        camera.set_near(0.5);
        camera.set_far(10.0);
        assert_eq!(camera.projection(), Mat4::perspective_rh(1.0, 2.0, 0.5, 10.0));
    }

    #[test]
    fn test_projection_view_uses_inverse_transform() {
        let mut camera = Camera::default();
        camera.transform = Mat4::from_translation(Vec3::new(0.0, 0.0, 3.0));
        let clip = camera.projection_view() * Vec3::ZERO.extend(1.0);
        // origin is in front of a camera looking down -z
        assert!(clip.w > 0.0);
        assert!((clip.x / clip.w).abs() < 1e-6 && (clip.y / clip.w).abs() < 1e-6);
    }

    #[test]
    fn test_trackball_places_camera_at_distance() {
        let mut transform = Mat4::IDENTITY;
        let trackball = TrackballController::new(&mut transform, 3.0_f32.sqrt()).with_enabled(false);
        let (_, _, t) = transform.to_scale_rotation_translation();
        assert!((t - Vec3::new(0.0, 0.0, 3.0_f32.sqrt())).length() < 1e-5);
        assert!(!trackball.enabled);
    }

    #[test]
    fn test_disabled_trackball_ignores_input() {
        let mut transform = Mat4::IDENTITY;
        let mut trackball = TrackballController::new(&mut transform, 2.0).with_enabled(false);
        let before = transform;
        trackball.on_wheel(500.0);
        let mut pointer = Pointer::new(100.0, 100.0);
        pointer.on_down(10.0, 10.0);
        pointer.on_move(60.0, 10.0);
        pointer.tick();
        trackball.update(&mut transform, &pointer);
        assert_eq!(transform, before);
        assert_eq!(trackball.distance(), 2.0);
    }

    #[test]
    fn test_wheel_zoom_eases() {
        let mut transform = Mat4::IDENTITY;
        let mut trackball = TrackballController::new(&mut transform, 1.0);
        let pointer = Pointer::new(100.0, 100.0);
        trackball.on_wheel(100.0);
        trackball.update(&mut transform, &pointer);
        assert!((trackball.distance() - 1.01).abs() < 1e-5);
        for _ in 0..200 {
            trackball.update(&mut transform, &pointer);
        }
        assert!((trackball.distance() - 1.1).abs() < 1e-4);
        let (_, _, t) = transform.to_scale_rotation_translation();
        assert!((t.length() - trackball.distance()).abs() < 1e-4);
    }

    #[test]
    fn test_wheel_respects_limits() {
        let mut transform = Mat4::IDENTITY;
        let mut trackball = TrackballController::new(&mut transform, 1.0);
        trackball.max_distance = 1.05;
        trackball.on_wheel(1000.0);
        let pointer = Pointer::new(1.0, 1.0);
        for _ in 0..300 {
            trackball.update(&mut transform, &pointer);
        }
        assert!(trackball.distance() <= 1.05 + 1e-5);
    }

    #[test]
    fn test_drag_rotates_then_settles() {
        let mut transform = Mat4::IDENTITY;
        let mut trackball = TrackballController::new(&mut transform, 2.0);
        let mut pointer = Pointer::new(100.0, 100.0);
        pointer.on_down(50.0, 50.0);
        pointer.on_move(80.0, 50.0);
        pointer.tick();
        trackball.update(&mut transform, &pointer);

        let (_, rotation, translation) = transform.to_scale_rotation_translation();
        assert!(rotation.angle_between(Quat::IDENTITY) > 0.0);
        // orbiting keeps the distance to the pivot
        assert!((translation.length() - 2.0).abs() < 1e-4);

        pointer.on_up(80.0, 50.0);
        pointer.tick();
        for _ in 0..500 {
            trackball.update(&mut transform, &pointer);
        }
        let settled = transform;
        trackball.update(&mut transform, &pointer);
        let (_, a, _) = settled.to_scale_rotation_translation();
        let (_, b, _) = transform.to_scale_rotation_translation();
        assert!(a.angle_between(b) < 1e-5);
    }
}
