//! Trapezoidal canal hydraulics under Manning's equation.
//!
//! For a section with bottom width `b`, side slope `m`, roughness `n`, and
//! bed slope `S0` carrying flow `Q`, the normal depth `y_n` satisfies
//!
//! ```text
//! Q = (1/n) · A(y) · R(y)^(2/3) · S0^(1/2)
//! A = b·y + m·y²    P = b + 2y·√(1+m²)    R = A/P
//! ```
//!
//! Manning discharge grows monotonically with depth, so `y_n` is found by
//! bisection on `y ∈ [0.01, 10] m`. Head loss over a reach of length `L` is
//! `h_f = S_f · L` with friction slope `S_f = (n·v)² / R^(4/3)` evaluated at
//! the normal depth.

use sluice_core::Reach;

const Y_MIN: f64 = 0.01;
const Y_MAX: f64 = 10.0;
const BISECTION_STEPS: usize = 60;

/// Flow area at depth `y`.
fn area(reach: &Reach, y: f64) -> f64 {
    let b = reach.bottom_width_m.value();
    b * y + reach.side_slope * y * y
}

/// Wetted perimeter at depth `y`.
fn wetted_perimeter(reach: &Reach, y: f64) -> f64 {
    let b = reach.bottom_width_m.value();
    b + 2.0 * y * (1.0 + reach.side_slope * reach.side_slope).sqrt()
}

/// Hydraulic radius at depth `y`.
fn hydraulic_radius(reach: &Reach, y: f64) -> f64 {
    let p = wetted_perimeter(reach, y);
    if p > 0.0 {
        area(reach, y) / p
    } else {
        0.1
    }
}

/// Manning discharge at depth `y`.
fn manning_flow(reach: &Reach, y: f64) -> f64 {
    let a = area(reach, y);
    let r = hydraulic_radius(reach, y);
    a * r.powf(2.0 / 3.0) * reach.bed_slope.sqrt() / reach.manning_n
}

/// Normal depth for the given flow, by bisection on `[0.01, 10] m`.
///
/// Clamps to the bracket ends when the flow is below the capacity at 1 cm
/// depth or above the capacity at 10 m.
pub fn normal_depth(reach: &Reach, flow_m3s: f64) -> f64 {
    if flow_m3s <= 0.0 {
        return Y_MIN;
    }
    if manning_flow(reach, Y_MAX) <= flow_m3s {
        return Y_MAX;
    }
    let (mut lo, mut hi) = (Y_MIN, Y_MAX);
    for _ in 0..BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        if manning_flow(reach, mid) < flow_m3s {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Mean velocity at normal depth (m/s).
pub fn velocity(reach: &Reach, flow_m3s: f64) -> f64 {
    if flow_m3s <= 0.0 {
        return 0.0;
    }
    let y = normal_depth(reach, flow_m3s);
    flow_m3s / area(reach, y)
}

/// Friction head loss over the reach (m).
pub fn head_loss(reach: &Reach, flow_m3s: f64) -> f64 {
    if flow_m3s <= 0.0 {
        return 0.0;
    }
    let y = normal_depth(reach, flow_m3s);
    let v = flow_m3s / area(reach, y);
    let r = hydraulic_radius(reach, y);
    let sf = (reach.manning_n * v).powi(2) / r.powf(4.0 / 3.0);
    sf * reach.length_m.value()
}

/// Water travel time through the reach at the given flow (minutes).
pub fn travel_time_minutes(reach: &Reach, flow_m3s: f64) -> f64 {
    let v = velocity(reach, flow_m3s);
    if v <= 0.0 {
        // Standing water; planning code treats this as a nominal lag.
        return 15.0;
    }
    reach.length_m.value() / v / 60.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section() -> Reach {
        Reach::new(1000.0, 4.0, 1.5, 0.025, 0.0003)
    }

    #[test]
    fn test_normal_depth_satisfies_manning() {
        let reach = section();
        let q = 3.0;
        let y = normal_depth(&reach, q);
        assert!((manning_flow(&reach, y) - q).abs() < 1e-6);
        assert!(y > 0.01 && y < 10.0);
    }

    #[test]
    fn test_normal_depth_monotone_in_flow() {
        let reach = section();
        let y1 = normal_depth(&reach, 1.0);
        let y2 = normal_depth(&reach, 4.0);
        assert!(y2 > y1);
    }

    #[test]
    fn test_zero_flow() {
        let reach = section();
        assert_eq!(normal_depth(&reach, 0.0), 0.01);
        assert_eq!(velocity(&reach, 0.0), 0.0);
        assert_eq!(head_loss(&reach, 0.0), 0.0);
    }

    #[test]
    fn test_head_loss_positive_and_scales_with_length() {
        let short = section();
        let long = Reach::new(2000.0, 4.0, 1.5, 0.025, 0.0003);
        let hf_short = head_loss(&short, 3.0);
        let hf_long = head_loss(&long, 3.0);
        assert!(hf_short > 0.0);
        assert!((hf_long / hf_short - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_velocity_reasonable_for_earth_canal() {
        // Irrigation canals run well under 3 m/s.
        let v = velocity(&section(), 3.0);
        assert!(v > 0.1 && v < 3.0, "velocity {}", v);
    }

    #[test]
    fn test_travel_time() {
        let reach = section();
        let v = velocity(&reach, 3.0);
        let t = travel_time_minutes(&reach, 3.0);
        assert!((t - 1000.0 / v / 60.0).abs() < 1e-9);
        // Standing water falls back to the nominal lag.
        assert_eq!(travel_time_minutes(&reach, 0.0), 15.0);
    }

    #[test]
    fn test_flow_beyond_bracket_clamps() {
        let reach = section();
        assert_eq!(normal_depth(&reach, 1.0e9), 10.0);
    }
}
