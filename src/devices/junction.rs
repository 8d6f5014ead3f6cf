//! Helpers shared by pn-junction devices.

use crate::ROOT_2;

/// Critical voltage of a junction, above which the exponential is limited.
pub fn vcrit(vt: f64, saturation_current: f64) -> f64 {
    vt * (vt / (ROOT_2 * saturation_current)).ln()
}

/// Limit the change of a junction voltage between two iterations.
///
/// Returns the limited voltage and whether limiting was applied.
pub fn pnjlim(vnew: f64, vold: f64, vt: f64, vcrit: f64) -> (f64, bool) {
    if vnew > vcrit && (vnew - vold).abs() > 2.0 * vt {
        let limited = if vold > 0.0 {
            let arg = 1.0 + (vnew - vold) / vt;
            if arg > 0.0 {
                vold + vt * arg.ln()
            } else {
                vcrit
            }
        } else {
            vt * (vnew / vt).ln()
        };
        return (limited, true);
    }

    if vnew < 0.0 {
        let floor = if vold > 0.0 { -vold - 1.0 } else { 2.0 * vold - 1.0 };
        if vnew < floor {
            return (floor, true);
        }
    }

    (vnew, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const VT: f64 = 0.025864186384551715;

    #[test]
    fn test_small_steps_pass_through() {
        assert_eq!(pnjlim(0.65, 0.64, VT, 0.6), (0.65, false));
        assert_eq!(pnjlim(-0.5, 0.0, VT, 0.6), (-0.5, false));
    }

    #[test]
    fn test_forward_step_is_compressed() {
        let (v, limited) = pnjlim(5.0, 0.6, VT, 0.6);
        assert!(limited);
        assert_relative_eq!(v, 0.6 + VT * (1.0 + 4.4 / VT).ln());
        assert!(v < 1.0);
    }

    #[test]
    fn test_start_from_zero() {
        let (v, limited) = pnjlim(2.0, 0.0, VT, 0.6);
        assert!(limited);
        assert_relative_eq!(v, VT * (2.0 / VT).ln());
    }

    #[test]
    fn test_reverse_step_is_floored() {
        assert_eq!(pnjlim(-10.0, 0.5, VT, 0.6), (-1.5, true));
        assert_eq!(pnjlim(-10.0, -1.0, VT, 0.6), (-3.0, true));
    }

    #[test]
    fn test_vcrit() {
        let v = vcrit(VT, 1e-14);
        assert!(v > 0.6 && v < 0.8);
    }
}
