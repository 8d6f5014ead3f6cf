//! Time-dependent values of independent sources.

use std::f64::consts::PI;

/// Shape of an independent source over time.
#[derive(Debug, Clone, PartialEq)]
pub enum Waveform {
    /// Trapezoidal pulse train
    ///
    /// ```text
    ///   v2       ┌─────┐
    ///           /       \
    ///   v1 ────┘         └──────
    ///       delay rise width fall
    /// ```
    Pulse {
        v1: f64,
        v2: f64,
        delay: f64,
        rise: f64,
        fall: f64,
        width: f64,
        /// Repetition period, 0 for a single pulse
        period: f64,
    },
    /// Damped sine: `offset + amplitude * sin(2 pi f (t - delay)) * exp(-damping (t - delay))`
    Sine {
        offset: f64,
        amplitude: f64,
        frequency: f64,
        delay: f64,
        damping: f64,
    },
}

impl Waveform {
    /// Single pulse from `v1` to `v2`.
    pub fn pulse(v1: f64, v2: f64, delay: f64, rise: f64, fall: f64, width: f64) -> Self {
        Waveform::Pulse {
            v1,
            v2,
            delay,
            rise,
            fall,
            width,
            period: 0.0,
        }
    }

    /// Undamped sine starting at t = 0.
    pub fn sine(offset: f64, amplitude: f64, frequency: f64) -> Self {
        Waveform::Sine {
            offset,
            amplitude,
            frequency,
            delay: 0.0,
            damping: 0.0,
        }
    }

    /// Value at time `t`.
    pub fn value(&self, t: f64) -> f64 {
        match *self {
            Waveform::Pulse {
                v1,
                v2,
                delay,
                rise,
                fall,
                width,
                period,
            } => {
                if t < delay {
                    return v1;
                }
                let t = if period > 0.0 {
                    (t - delay) % period
                } else {
                    t - delay
                };
                if t < rise {
                    v1 + (v2 - v1) * t / rise
                } else if t < rise + width {
                    v2
                } else if t < rise + width + fall {
                    v2 - (v2 - v1) * (t - rise - width) / fall
                } else {
                    v1
                }
            }
            Waveform::Sine {
                offset,
                amplitude,
                frequency,
                delay,
                damping,
            } => {
                if t < delay {
                    return offset;
                }
                let t = t - delay;
                offset + amplitude * (2.0 * PI * frequency * t).sin() * (-damping * t).exp()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pulse_phases() {
        let w = Waveform::pulse(0.0, 5.0, 1.0, 1.0, 2.0, 3.0);
        assert_eq!(w.value(0.0), 0.0);
        assert_relative_eq!(w.value(1.5), 2.5);
        assert_eq!(w.value(3.0), 5.0);
        assert_relative_eq!(w.value(6.0), 2.5);
        assert_eq!(w.value(10.0), 0.0);
    }

    #[test]
    fn test_periodic_pulse() {
        let w = Waveform::Pulse {
            v1: -1.0,
            v2: 1.0,
            delay: 0.0,
            rise: 0.0,
            fall: 0.0,
            width: 0.5,
            period: 1.0,
        };
        assert_eq!(w.value(0.25), 1.0);
        assert_eq!(w.value(0.75), -1.0);
        assert_eq!(w.value(2.25), 1.0);
    }

    #[test]
    fn test_sine() {
        let w = Waveform::sine(1.0, 2.0, 50.0);
        assert_eq!(w.value(0.0), 1.0);
        assert_relative_eq!(w.value(0.005), 3.0, epsilon = 1e-12);
    }
}
