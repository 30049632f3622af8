//! Orientation math shared by both camera generations.

use super::Facing;

/// Discrete preview rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Self {
        match degrees % 360 {
            90 => Rotation::Deg90,
            180 => Rotation::Deg180,
            270 => Rotation::Deg270,
            _ => Rotation::Deg0,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Whether this rotation swaps width and height.
    pub fn is_transposed(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Rotation plus mirror flags, recomputed whenever the camera is opened,
/// switched, or the display rotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotationState {
    pub rotation: Rotation,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

impl RotationState {
    /// Front sensors compose by addition, back sensors by subtraction.
    /// The front camera also mirrors horizontally.
    pub fn for_camera(sensor_degrees: u32, display_degrees: u32, facing: Facing) -> Self {
        let sensor = sensor_degrees % 360;
        let display = display_degrees % 360;
        let degrees = match facing {
            Facing::Front => (sensor + display) % 360,
            Facing::Back => (sensor + 360 - display) % 360,
        };
        RotationState {
            rotation: Rotation::from_degrees(degrees),
            flip_horizontal: facing == Facing::Front,
            flip_vertical: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANGLES: [u32; 4] = [0, 90, 180, 270];

    #[test]
    fn composition_is_total() {
        for sensor in ANGLES {
            for display in ANGLES {
                for facing in [Facing::Front, Facing::Back] {
                    let state = RotationState::for_camera(sensor, display, facing);
                    assert!(ANGLES.contains(&state.rotation.degrees()));
                }
            }
        }
    }

    #[test]
    fn front_adds_back_subtracts() {
        for sensor in ANGLES {
            for display in ANGLES {
                let front = RotationState::for_camera(sensor, display, Facing::Front);
                assert_eq!(front.rotation.degrees(), (sensor + display) % 360);
                let back = RotationState::for_camera(sensor, display, Facing::Back);
                assert_eq!(back.rotation.degrees(), (sensor + 360 - display) % 360);
            }
        }
    }

    #[test]
    fn front_mirrors_horizontally() {
        assert!(RotationState::for_camera(90, 0, Facing::Front).flip_horizontal);
        assert!(!RotationState::for_camera(90, 0, Facing::Back).flip_horizontal);
    }

    #[test]
    fn transposed_rotations() {
        assert!(Rotation::Deg90.is_transposed());
        assert!(Rotation::Deg270.is_transposed());
        assert!(!Rotation::Deg0.is_transposed());
        assert!(!Rotation::Deg180.is_transposed());
    }
}
