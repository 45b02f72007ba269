use num_traits::Float;
use std::{
    fmt::{self, Display, Formatter},
    ops::*,
};

/// A vector in 3D space, used for ray origins, directions and hit points. The y axis points up.
#[derive(Clone, Copy, PartialEq, PartialOrd, Debug, Default)]
pub struct Vector<T> {
    /// The x component of the vector.
    pub x: T,
    /// The y component of the vector.
    pub y: T,
    /// The z component of the vector.
    pub z: T,
}

impl Vector<f64> {
    /// Returns the zero vector, or the vector with all components equaling zero.
    pub const fn zero() -> Self {
        Vector {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }
}

impl<T: Float> Vector<T> {
    /// Creates a vector using rectangular coordinates.
    pub fn rect(x: T, y: T, z: T) -> Self {
        Vector { x, y, z }
    }

    /// Creates a vector from a length and two angles in radians. Yaw is a measure of clockwise
    /// rotation about the y axis from the positive z axis. Pitch is the angle below the x-z plane.
    ///
    /// # Examples
    ///
    /// ```
    /// # use voxel_util::Vector;
    /// let look = Vector::principal_axes(1.0f64, 0.0, 0.0);
    /// assert!((look - Vector::rect(0.0, 0.0, 1.0)).len_sq() < 1e-10);
    /// ```
    pub fn principal_axes(radius: T, yaw: T, pitch: T) -> Self {
        let r_proj_xz = radius * pitch.cos();

        Vector {
            x: -r_proj_xz * yaw.sin(),
            y: -radius * pitch.sin(),
            z: r_proj_xz * yaw.cos(),
        }
    }

    /// Computes the squared length of this vector.
    ///
    /// # Examples
    ///
    /// ```
    /// # use voxel_util::Vector;
    /// let u = Vector::<f64>::rect(3.0, 4.0, 12.0);
    /// assert!((u.len_sq() - 169.0).abs() < 1e-10);
    /// ```
    pub fn len_sq(&self) -> T {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    /// Computes the length of this vector.
    pub fn len(&self) -> T {
        self.len_sq().sqrt()
    }

    /// Copies this vector and scales the copy to unit length. The zero vector is returned as-is.
    ///
    /// # Examples
    ///
    /// ```
    /// # use voxel_util::Vector;
    /// let u = Vector::<f64>::rect(0.0, 3.0, 4.0).normalized();
    /// assert!((u.len_sq() - 1.0).abs() < 1e-10);
    /// assert_eq!(Vector::<f64>::zero().normalized(), Vector::zero());
    /// ```
    pub fn normalized(self) -> Self {
        let len = self.len();
        if len == T::zero() {
            self
        } else {
            self / len
        }
    }

    /// Computes the dot product between this vector and the given vector.
    pub fn dot(&self, other: &Self) -> T {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Computes the squared distance between the points described by this vector and the given
    /// vector.
    pub fn distance_sq(&self, other: &Self) -> T {
        (*self - *other).len_sq()
    }

    /// Returns true if every component is finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl<T: Display> Display for Vector<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "<")?;
        self.x.fmt(f)?;
        write!(f, ", ")?;
        self.y.fmt(f)?;
        write!(f, ", ")?;
        self.z.fmt(f)?;
        write!(f, ">")
    }
}

impl<T: Add<Output = T> + Copy> Add for Vector<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Vector {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            z: self.z + rhs.z,
        }
    }
}

impl<T: Sub<Output = T> + Copy> Sub for Vector<T> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Vector {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

impl<T: Neg<Output = T>> Neg for Vector<T> {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Vector {
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }
}

impl<T: Mul<Output = T> + Copy> Mul<T> for Vector<T> {
    type Output = Self;

    fn mul(self, rhs: T) -> Self::Output {
        Vector {
            x: self.x * rhs,
            y: self.y * rhs,
            z: self.z * rhs,
        }
    }
}

impl<T: Div<Output = T> + Copy> Div<T> for Vector<T> {
    type Output = Self;

    fn div(self, rhs: T) -> Self::Output {
        Vector {
            x: self.x / rhs,
            y: self.y / rhs,
            z: self.z / rhs,
        }
    }
}
