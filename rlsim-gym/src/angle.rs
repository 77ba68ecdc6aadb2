use std::f32::consts::PI;

/// Folds an angle in radians back into `[-PI, PI]`.
pub(crate) fn wrap_angle(mut theta: f32) -> f32 {
    while theta > PI {
        theta -= 2. * PI;
    }
    while theta < -PI {
        theta += 2. * PI;
    }
    theta
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn angles_fold_into_a_single_turn() {
        assert_eq!(wrap_angle(0.5), 0.5);
        assert_eq!(wrap_angle(PI), PI);
        assert!((wrap_angle(PI + 0.25) - (-PI + 0.25)).abs() < 1e-5);
        assert!((wrap_angle(-PI - 0.25) - (PI - 0.25)).abs() < 1e-5);
        assert!((wrap_angle(5. * PI + 0.1) - (-PI + 0.1)).abs() < 1e-4);
    }
}
