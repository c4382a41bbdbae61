//! Camera used for LOD selection and patch culling

use crate::core::types::{Vec3, Mat4, Quat, EPSILON};
use crate::math::Frustum;

/// Camera with position, rotation, and projection parameters
#[derive(Clone, Debug)]
pub struct Camera {
    /// World position
    pub position: Vec3,
    /// Rotation as quaternion
    pub rotation: Quat,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Aspect ratio (width / height)
    pub aspect: f32,
    /// Near clip plane
    pub near: f32,
    /// Far clip plane
    pub far: f32,
    /// Use an orthographic projection instead of perspective
    pub orthographic: bool,
    /// Vertical extent of the orthographic view volume
    pub ortho_size: f32,
    /// Zoom factor, scales LOD distances the same way it scales the image
    pub zoom: f32,
    /// Global LOD bias; higher values keep finer LODs further away
    pub lod_bias: f32,
}

impl Camera {
    /// Create a new perspective camera
    pub fn new(position: Vec3, fov_y_degrees: f32, aspect: f32) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near: 0.1,
            far: 1000.0,
            orthographic: false,
            ortho_size: 20.0,
            zoom: 1.0,
            lod_bias: 1.0,
        }
    }

    /// Perspective camera at `position` facing `target`
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3) -> Self {
        let view = Mat4::look_at_rh(position, target, up);
        let rotation = Quat::from_mat4(&view.inverse());

        Self {
            rotation,
            ..Self::new(position, 60.0, 16.0 / 9.0)
        }
    }

    /// World to view space
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_quat(self.rotation.conjugate()) * Mat4::from_translation(-self.position)
    }

    /// View to clip space, depth in [0, 1]
    pub fn projection_matrix(&self) -> Mat4 {
        if self.orthographic {
            let half_h = self.ortho_size * 0.5 / self.zoom.max(EPSILON);
            let half_w = half_h * self.aspect;
            Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, self.near, self.far)
        } else {
            Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
        }
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// View frustum in world space
    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_projection())
    }

    /// Distance from the camera to a world-space point
    pub fn distance(&self, point: Vec3) -> f32 {
        (point - self.position).length()
    }

    /// Convert a view distance into a LOD distance.
    ///
    /// `scale` is the object's world scale and `bias` its own LOD bias; both
    /// shrink the returned value so finer detail is kept further away.
    pub fn lod_distance(&self, distance: f32, scale: f32, bias: f32) -> f32 {
        let d = (self.lod_bias * bias * scale * self.zoom).max(EPSILON);
        if self.orthographic {
            self.ortho_size / d
        } else {
            distance / d
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 0.0, 5.0), 60.0, 16.0 / 9.0)
    }
}
