//! Orbit camera and the mapping of pointer input onto it.
//!
//! The render builder only relies on [`ViewCamera`]; the orbit camera is the
//! default implementation the viewer ships with.

use cgmath::{Deg, EuclideanSpace, InnerSpace, Matrix4, Point3, Rad, Vector3};
use winit::event::{MouseButton, MouseScrollDelta};

/// wgpu's clip space has a depth range of 0..1 while cgmath produces
/// OpenGL style -1..1 projections.
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

const SAFE_PITCH: f32 = std::f32::consts::FRAC_PI_2 - 0.0001;

/// Rectangle of the render target in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
        }
    }

    pub fn aspect(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            1.0
        }
    }
}

/// What the render builder needs from a camera.
pub trait ViewCamera {
    fn world_to_camera_matrix(&self) -> Matrix4<f32>;

    fn projection_matrix(&self, viewport: Viewport) -> Matrix4<f32>;
}

#[derive(Clone, Debug)]
pub struct OrbitCamera {
    pub position: Point3<f32>,
    pub target: Point3<f32>,
    pub fovy: Rad<f32>,
    pub znear: f32,
    pub zfar: f32,
    /// Degrees per pixel of drag.
    pub orbit_speed: f32,
    /// World units per pixel of drag.
    pub pan_speed: f32,
    pub zoom_speed: f32,
    orbit_anchor: Option<(f32, f32, f32)>,
    pan_anchor: Option<(f32, f32, f32)>,
}

impl OrbitCamera {
    pub fn new<P: Into<Point3<f32>>>(position: P) -> Self {
        Self {
            position: position.into(),
            target: Point3::origin(),
            fovy: Deg(45.0).into(),
            znear: 0.01,
            zfar: 100.0,
            orbit_speed: 0.1,
            pan_speed: 0.01,
            zoom_speed: 0.1,
            orbit_anchor: None,
            pan_anchor: None,
        }
    }

    pub fn distance(&self) -> f32 {
        (self.position - self.target).magnitude()
    }

    fn axes(&self) -> (Vector3<f32>, Vector3<f32>, Vector3<f32>) {
        let forward = (self.target - self.position).normalize();
        let mut right = forward.cross(Vector3::unit_y());
        if right.magnitude2() < f32::EPSILON {
            right = Vector3::unit_x();
        }
        let right = right.normalize();
        let up = right.cross(forward);
        (right, up, forward)
    }

    /**
     * Rotates the camera around its target. `x`/`y` are pointer positions;
     * `first_click` starts a new drag at that position without moving.
     */
    pub fn orbit(&mut self, x: f32, y: f32, z: f32, first_click: bool) {
        let Some((dx, dy, _)) = drag_delta(&mut self.orbit_anchor, (x, y, z), first_click) else {
            return;
        };
        let offset = self.position - self.target;
        let radius = offset.magnitude();
        if radius <= f32::EPSILON {
            return;
        }
        let yaw = offset.x.atan2(offset.z) + Rad::from(Deg(dx * self.orbit_speed)).0;
        let pitch = ((offset.y / radius).asin() + Rad::from(Deg(dy * self.orbit_speed)).0)
            .clamp(-SAFE_PITCH, SAFE_PITCH);
        let offset = Vector3::new(
            radius * pitch.cos() * yaw.sin(),
            radius * pitch.sin(),
            radius * pitch.cos() * yaw.cos(),
        );
        self.position = self.target + offset;
    }

    /// Moves camera and target along the camera's own right/up/forward axes.
    pub fn pan_local(&mut self, x: f32, y: f32, z: f32, first_click: bool) {
        let Some((dx, dy, dz)) = drag_delta(&mut self.pan_anchor, (x, y, z), first_click) else {
            return;
        };
        let (right, up, forward) = self.axes();
        let delta = (right * dx + up * dy + forward * dz) * self.pan_speed;
        self.position += delta;
        self.target += delta;
    }

    /// Positive values move away from the target.
    pub fn zoom(&mut self, amount: f32) {
        let offset = self.position - self.target;
        let radius = offset.magnitude();
        if radius <= f32::EPSILON {
            return;
        }
        let new_radius = (radius * (1.0 + amount * self.zoom_speed)).max(self.znear * 2.0);
        self.position = self.target + offset * (new_radius / radius);
    }
}

impl ViewCamera for OrbitCamera {
    fn world_to_camera_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(self.position, self.target, Vector3::unit_y())
    }

    fn projection_matrix(&self, viewport: Viewport) -> Matrix4<f32> {
        OPENGL_TO_WGPU_MATRIX * cgmath::perspective(self.fovy, viewport.aspect(), self.znear, self.zfar)
    }
}

fn drag_delta(
    anchor: &mut Option<(f32, f32, f32)>,
    current: (f32, f32, f32),
    first_click: bool,
) -> Option<(f32, f32, f32)> {
    let previous = anchor.replace(current);
    match previous {
        Some(previous) if !first_click => Some((
            current.0 - previous.0,
            current.1 - previous.1,
            current.2 - previous.2,
        )),
        _ => None,
    }
}

/// Maps pointer events to camera movement: left button orbits, right button
/// pans, middle button pans forward/backward and the wheel zooms.
#[derive(Clone, Copy, Debug)]
pub struct CameraInput {
    pub pan_mult: f32,
    pub zoom_mult: f32,
}

impl Default for CameraInput {
    fn default() -> Self {
        Self {
            pan_mult: 2.0,
            zoom_mult: 1.0,
        }
    }
}

impl CameraInput {
    pub fn on_mouse_down(&self, camera: &mut OrbitCamera, x: f32, y: f32, button: MouseButton) {
        self.drive(camera, x, y, button, true);
    }

    pub fn on_mouse_move(&self, camera: &mut OrbitCamera, x: f32, y: f32, button: Option<MouseButton>) {
        if let Some(button) = button {
            self.drive(camera, x, y, button, false);
        }
    }

    pub fn on_mouse_scroll(&self, camera: &mut OrbitCamera, delta: MouseScrollDelta) {
        let scroll_y = match delta {
            MouseScrollDelta::LineDelta(_, y) => y,
            // roughly one line per 20 pixels
            MouseScrollDelta::PixelDelta(position) => position.y as f32 / 20.0,
        };
        camera.zoom(scroll_y * -self.zoom_mult);
    }

    fn drive(&self, camera: &mut OrbitCamera, x: f32, y: f32, button: MouseButton, first_click: bool) {
        let x = x * self.pan_mult;
        let y = y * self.pan_mult;
        match button {
            MouseButton::Left => camera.orbit(-x, y, 0.0, first_click),
            MouseButton::Right => camera.pan_local(-x, y, 0.0, first_click),
            MouseButton::Middle => camera.pan_local(-x, 0.0, y, first_click),
            _ => (),
        }
    }
}
