//! Left-handed 3D transforms using the row-vector convention, so that
//! `a.then(&b)` applies `a` first. Matrices upload to shaders as-is when the
//! shader declares them `row_major`.

pub type Vec3 = euclid::default::Vector3D<f32>;
pub type Mat4 = euclid::default::Transform3D<f32>;

/// Scale, rotate (Euler angles in radians, applied X then Y then Z), then
/// translate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub scale: Vec3,
    pub rotate: Vec3,
    pub translate: Vec3,
}

impl Transform {
    #[must_use]
    pub fn identity() -> Self {
        Self {
            scale: Vec3::new(1.0, 1.0, 1.0),
            rotate: Vec3::zero(),
            translate: Vec3::zero(),
        }
    }

    #[must_use]
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::scale(self.scale.x, self.scale.y, self.scale.z)
            .then(&rotation_x(self.rotate.x))
            .then(&rotation_y(self.rotate.y))
            .then(&rotation_z(self.rotate.z))
            .then_translate(self.translate)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

fn rotation_x(radians: f32) -> Mat4 {
    let (s, c) = radians.sin_cos();
    #[rustfmt::skip]
    let m = Mat4::new(
        1.0, 0.0, 0.0, 0.0,
        0.0,   c,   s, 0.0,
        0.0,  -s,   c, 0.0,
        0.0, 0.0, 0.0, 1.0,
    );
    m
}

fn rotation_y(radians: f32) -> Mat4 {
    let (s, c) = radians.sin_cos();
    #[rustfmt::skip]
    let m = Mat4::new(
          c, 0.0,  -s, 0.0,
        0.0, 1.0, 0.0, 0.0,
          s, 0.0,   c, 0.0,
        0.0, 0.0, 0.0, 1.0,
    );
    m
}

fn rotation_z(radians: f32) -> Mat4 {
    let (s, c) = radians.sin_cos();
    #[rustfmt::skip]
    let m = Mat4::new(
          c,   s, 0.0, 0.0,
         -s,   c, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    );
    m
}

/// Left-handed perspective projection mapping view-space depth `near..far`
/// to `0..1`.
#[must_use]
pub fn perspective_fov(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let y = 1.0 / (fov_y * 0.5).tan();
    let x = y / aspect;
    let z = far / (far - near);
    #[rustfmt::skip]
    let m = Mat4::new(
          x, 0.0,          0.0, 0.0,
        0.0,   y,          0.0, 0.0,
        0.0, 0.0,            z, 1.0,
        0.0, 0.0, -near * z, 0.0,
    );
    m
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub transform: Transform,
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            transform: Transform {
                translate: Vec3::new(0.0, 0.0, -5.0),
                ..Transform::identity()
            },
            fov_y: 0.45,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    #[must_use]
    pub fn view(&self) -> Mat4 {
        // A camera transform with zero scale is the only non-invertible case.
        self.transform
            .to_matrix()
            .inverse()
            .unwrap_or_else(Mat4::identity)
    }

    #[must_use]
    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.view()
            .then(&perspective_fov(self.fov_y, aspect, self.near, self.far))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    #[test]
    fn identity_transform() {
        assert_eq!(Transform::identity().to_matrix(), Mat4::identity());
    }

    #[test]
    fn scale_rotate_translate_order() {
        let transform = Transform {
            scale: Vec3::new(2.0, 2.0, 2.0),
            rotate: Vec3::new(0.0, std::f32::consts::FRAC_PI_2, 0.0),
            translate: Vec3::new(0.0, 1.0, 0.0),
        };

        // (1, 0, 0) -> scaled (2, 0, 0) -> rotated about Y (0, 0, -2) -> moved up.
        let p = transform
            .to_matrix()
            .transform_point3d(euclid::default::Point3D::new(1.0, 0.0, 0.0))
            .unwrap();

        assert!(close(p.x, 0.0), "{p:?}");
        assert!(close(p.y, 1.0), "{p:?}");
        assert!(close(p.z, -2.0), "{p:?}");
    }

    #[test]
    fn perspective_depth_range() {
        let projection = perspective_fov(0.45, 16.0 / 9.0, 0.1, 100.0);

        let near = projection
            .transform_point3d(euclid::default::Point3D::new(0.0, 0.0, 0.1))
            .unwrap();
        let far = projection
            .transform_point3d(euclid::default::Point3D::new(0.0, 0.0, 100.0))
            .unwrap();

        assert!(close(near.z, 0.0), "{near:?}");
        assert!(close(far.z, 1.0), "{far:?}");
    }

    #[test]
    fn camera_view_undoes_camera_transform() {
        let camera = Camera::default();
        let eye = camera
            .view()
            .transform_point3d(euclid::default::Point3D::new(0.0, 0.0, -5.0))
            .unwrap();

        assert!(close(eye.x, 0.0) && close(eye.y, 0.0) && close(eye.z, 0.0));
    }
}
