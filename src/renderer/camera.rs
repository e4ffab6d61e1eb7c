use ash::vk;
use glam::{Mat4, Vec3};

/// Perspective camera looking at a pivot point, rendering into a fixed viewport.
#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    forward: Vec3,
    up: Vec3,
    world_up: Vec3,
    fov_y_deg: f32,
    near: f32,
    far: f32,
    pivot: Vec3,
    viewport: vk::Extent2D,
}

impl Camera {
    const DEFAULT_FOV_Y_DEG: f32 = 45.0;

    pub fn new(viewport: vk::Extent2D) -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            world_up: Vec3::Y,
            fov_y_deg: Self::DEFAULT_FOV_Y_DEG,
            near: 0.1,
            far: 100.0,
            pivot: Vec3::ZERO,
            viewport,
        }
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.look_at(self.pivot);
    }

    pub fn look_at(&mut self, target: Vec3) {
        if target == self.position {
            return;
        }
        self.pivot = target;
        self.forward = (target - self.position).normalize();
        let right = self.forward.cross(self.world_up).normalize();
        self.up = right.cross(self.forward).normalize();
    }

    pub fn get_view_mat(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward, self.up)
    }

    pub fn get_proj_mat(&self) -> Mat4 {
        let aspect_ratio = self.viewport.width as f32 / self.viewport.height.max(1) as f32;
        Mat4::perspective_rh(
            self.fov_y_deg.to_radians(),
            aspect_ratio,
            self.near,
            self.far,
        )
    }

    pub fn get_forward(&self) -> Vec3 {
        self.forward
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn look_at_points_forward_at_target() {
        let mut camera = Camera::new(vk::Extent2D { width: 2048, height: 1024 });
        camera.set_position(Vec3::new(0.0, 0.0, 10.0));
        camera.look_at(Vec3::new(0.0, 0.0, 0.0));

        assert!((camera.get_forward() - Vec3::NEG_Z).length() < 1e-6);
    }

    #[test]
    fn projection_uses_viewport_aspect() {
        let camera = Camera::new(vk::Extent2D { width: 2048, height: 1024 });
        let proj = camera.get_proj_mat();

        // x scale is y scale divided by the 2:1 aspect ratio
        assert!((proj.x_axis.x * 2.0 - proj.y_axis.y).abs() < 1e-5);
    }
}
