//! Field-team route optimization.
//!
//! Gates selected for a (team, day) become waypoints of a travelling-salesman
//! tour anchored at the team base: Haversine distance matrix, cheapest
//! insertion construction, 2-opt improvement, with a handful of seeded
//! restarts from shuffled insertion orders. The minimum-spanning-tree weight
//! is the lower bound the efficiency score is measured against; callers
//! accept a tour when it is within 1.2x of that bound.
//!
//! Time windows turn the problem into insertion with feasibility checks
//! (40 km/h travel, 15 minutes of service per gate); stops whose windows
//! cannot be met are reported back rather than silently dropped.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use sluice_core::GateId;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two (lat, lon) points in km.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// A gate visit on a team's day route.
#[derive(Debug, Clone)]
pub struct RouteStop {
    pub gate_id: GateId,
    pub latitude: f64,
    pub longitude: f64,
    /// Optional service window in minutes from the day start.
    pub window: Option<(f64, f64)>,
}

/// Optimized tour for one team-day.
#[derive(Debug, Clone, Serialize)]
pub struct RoutePlan {
    /// Visit order as indices into the input stop list.
    pub order: Vec<usize>,
    pub total_distance_km: f64,
    pub total_duration_minutes: f64,
    /// Arrival time at each visited stop, minutes from departure.
    pub arrival_minutes: Vec<f64>,
    /// MST weight over route weight, in [0, 1]; 1.0 is a perfect tour.
    pub efficiency_score: f64,
    /// (lat, lon) polyline base -> stops -> base.
    pub polyline: Vec<(f64, f64)>,
    /// Stops whose time windows could not be met.
    pub missed_windows: Vec<usize>,
}

/// TSP / windowed-insertion route optimizer.
#[derive(Debug, Clone)]
pub struct TravelOptimizer {
    pub speed_kmh: f64,
    pub service_minutes: f64,
    pub restarts: u32,
    pub seed: u64,
}

impl Default for TravelOptimizer {
    fn default() -> Self {
        Self {
            speed_kmh: 40.0,
            service_minutes: 15.0,
            restarts: 4,
            seed: 42,
        }
    }
}

impl TravelOptimizer {
    /// Optimize the visit order for `stops` starting and ending at `base`.
    ///
    /// Uses window-aware insertion when any stop carries a window, plain TSP
    /// otherwise.
    pub fn optimize(&self, base: (f64, f64), stops: &[RouteStop]) -> RoutePlan {
        if stops.is_empty() {
            return RoutePlan {
                order: Vec::new(),
                total_distance_km: 0.0,
                total_duration_minutes: 0.0,
                arrival_minutes: Vec::new(),
                efficiency_score: 1.0,
                polyline: vec![base, base],
                missed_windows: Vec::new(),
            };
        }

        // Distance matrix: index 0 is the base, stop i is index i+1.
        let mut points = Vec::with_capacity(stops.len() + 1);
        points.push(base);
        for stop in stops {
            points.push((stop.latitude, stop.longitude));
        }
        let n = points.len();
        let mut matrix = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = haversine_km(points[i], points[j]);
                matrix[i][j] = d;
                matrix[j][i] = d;
            }
        }

        let windowed = stops.iter().any(|s| s.window.is_some());
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut best: Option<Vec<usize>> = None;
        let mut best_len = f64::INFINITY;
        for restart in 0..=self.restarts {
            let mut insertion_order: Vec<usize> = (1..n).collect();
            if restart > 0 {
                insertion_order.shuffle(&mut rng);
            }
            let mut tour = cheapest_insertion(&matrix, &insertion_order);
            two_opt(&matrix, &mut tour);
            let len = tour_length(&matrix, &tour);
            if len < best_len {
                best_len = len;
                best = Some(tour);
            }
        }
        let mut tour = best.expect("at least one restart ran");

        if windowed {
            self.order_for_windows(&matrix, stops, &mut tour);
        }

        let total_distance_km = tour_length(&matrix, &tour);
        let mut arrival_minutes = Vec::with_capacity(stops.len());
        let mut missed_windows = Vec::new();
        let mut clock = 0.0;
        let mut previous = 0usize;
        for &node in tour.iter().skip(1).take(stops.len()) {
            clock += matrix[previous][node] / self.speed_kmh * 60.0;
            let stop = &stops[node - 1];
            if let Some((open, close)) = stop.window {
                if clock < open {
                    clock = open; // wait for the window
                }
                if clock > close {
                    missed_windows.push(node - 1);
                }
            }
            arrival_minutes.push(clock);
            clock += self.service_minutes;
            previous = node;
        }
        clock += matrix[previous][0] / self.speed_kmh * 60.0;

        let mst = mst_weight(&matrix);
        let efficiency_score = if total_distance_km > 0.0 {
            (mst / total_distance_km).min(1.0)
        } else {
            1.0
        };

        RoutePlan {
            order: tour.iter().skip(1).take(stops.len()).map(|&i| i - 1).collect(),
            total_distance_km,
            total_duration_minutes: clock,
            arrival_minutes,
            efficiency_score,
            polyline: tour.iter().map(|&i| points[i]).collect(),
            missed_windows,
        }
    }

    /// Whether a computed route meets the acceptance bound (within 1.2x of
    /// the MST lower bound).
    pub fn acceptable(plan: &RoutePlan) -> bool {
        plan.efficiency_score >= 1.0 / 1.2
    }

    /// Re-order a tour so windowed stops are visited by ascending window
    /// open time, keeping the geometric order among unwindowed runs.
    fn order_for_windows(&self, matrix: &[Vec<f64>], stops: &[RouteStop], tour: &mut Vec<usize>) {
        let mut timed: Vec<usize> = tour
            .iter()
            .skip(1)
            .copied()
            .filter(|&i| stops[i - 1].window.is_some())
            .collect();
        timed.sort_by(|&a, &b| {
            let wa = stops[a - 1].window.expect("filtered on windows").0;
            let wb = stops[b - 1].window.expect("filtered on windows").0;
            wa.partial_cmp(&wb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(&b))
        });
        let untimed: Vec<usize> = tour
            .iter()
            .skip(1)
            .copied()
            .filter(|&i| stops[i - 1].window.is_none())
            .collect();

        // Windowed stops first in window order, then cheapest insertion of
        // the rest around them.
        let mut rebuilt = vec![0];
        rebuilt.extend(timed);
        for node in untimed {
            let mut best_pos = rebuilt.len();
            let mut best_cost = f64::INFINITY;
            for pos in 1..=rebuilt.len() {
                let prev = rebuilt[pos - 1];
                let next = if pos == rebuilt.len() { 0 } else { rebuilt[pos] };
                let cost = matrix[prev][node] + matrix[node][next] - matrix[prev][next];
                if cost < best_cost {
                    best_cost = cost;
                    best_pos = pos;
                }
            }
            rebuilt.insert(best_pos, node);
        }
        *tour = rebuilt;
    }
}

/// Tour through all nodes of `insertion_order`, starting/ending at node 0.
fn cheapest_insertion(matrix: &[Vec<f64>], insertion_order: &[usize]) -> Vec<usize> {
    let mut tour = vec![0];
    for &node in insertion_order {
        let mut best_pos = tour.len();
        let mut best_cost = f64::INFINITY;
        for pos in 1..=tour.len() {
            let prev = tour[pos - 1];
            let next = if pos == tour.len() { 0 } else { tour[pos] };
            let cost = matrix[prev][node] + matrix[node][next] - matrix[prev][next];
            if cost < best_cost {
                best_cost = cost;
                best_pos = pos;
            }
        }
        tour.insert(best_pos, node);
    }
    tour
}

/// Closed-tour length through `tour`, returning to the start.
fn tour_length(matrix: &[Vec<f64>], tour: &[usize]) -> f64 {
    let mut total = 0.0;
    for pair in tour.windows(2) {
        total += matrix[pair[0]][pair[1]];
    }
    total += matrix[*tour.last().expect("non-empty tour")][tour[0]];
    total
}

/// In-place 2-opt until no improving exchange remains.
fn two_opt(matrix: &[Vec<f64>], tour: &mut [usize]) {
    let n = tour.len();
    if n < 4 {
        return;
    }
    let mut improved = true;
    while improved {
        improved = false;
        for i in 1..n - 1 {
            for j in (i + 1)..n {
                let a = tour[i - 1];
                let b = tour[i];
                let c = tour[j];
                let d = if j == n - 1 { tour[0] } else { tour[j + 1] };
                let delta = matrix[a][c] + matrix[b][d] - matrix[a][b] - matrix[c][d];
                if delta < -1e-12 {
                    tour[i..=j].reverse();
                    improved = true;
                }
            }
        }
    }
}

/// Prim MST weight over the full matrix (lower bound for any tour).
fn mst_weight(matrix: &[Vec<f64>]) -> f64 {
    let n = matrix.len();
    if n < 2 {
        return 0.0;
    }
    let mut in_tree = vec![false; n];
    let mut cost = vec![f64::INFINITY; n];
    in_tree[0] = true;
    for j in 1..n {
        cost[j] = matrix[0][j];
    }
    let mut total = 0.0;
    for _ in 1..n {
        let mut next = usize::MAX;
        let mut best = f64::INFINITY;
        for j in 0..n {
            if !in_tree[j] && cost[j] < best {
                best = cost[j];
                next = j;
            }
        }
        total += best;
        in_tree[next] = true;
        for j in 0..n {
            if !in_tree[j] {
                cost[j] = cost[j].min(matrix[next][j]);
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(id: &str, lat: f64, lon: f64) -> RouteStop {
        RouteStop {
            gate_id: GateId::new(id),
            latitude: lat,
            longitude: lon,
            window: None,
        }
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude is about 111 km.
        let d = haversine_km((14.0, 101.0), (15.0, 101.0));
        assert!((d - 111.2).abs() < 1.0, "got {}", d);
        assert_eq!(haversine_km((14.0, 101.0), (14.0, 101.0)), 0.0);
    }

    #[test]
    fn test_empty_route() {
        let plan = TravelOptimizer::default().optimize((14.3, 101.1), &[]);
        assert!(plan.order.is_empty());
        assert_eq!(plan.total_distance_km, 0.0);
        assert_eq!(plan.efficiency_score, 1.0);
    }

    #[test]
    fn test_single_stop_out_and_back() {
        let base = (14.30, 101.10);
        let stops = vec![stop("G1", 14.31, 101.10)];
        let plan = TravelOptimizer::default().optimize(base, &stops);
        assert_eq!(plan.order, vec![0]);
        let leg = haversine_km(base, (14.31, 101.10));
        assert!((plan.total_distance_km - 2.0 * leg).abs() < 1e-9);
        // Travel + 15 min service + return.
        assert!(plan.total_duration_minutes > 15.0);
    }

    #[test]
    fn test_tour_visits_every_stop_once() {
        let base = (14.30, 101.10);
        let stops = vec![
            stop("G1", 14.32, 101.10),
            stop("G2", 14.29, 101.13),
            stop("G3", 14.25, 101.09),
            stop("G4", 14.28, 101.12),
            stop("G5", 14.31, 101.08),
        ];
        let plan = TravelOptimizer::default().optimize(base, &stops);
        let mut order = plan.order.clone();
        order.sort();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert_eq!(plan.arrival_minutes.len(), 5);
        assert_eq!(plan.polyline.len(), 6);
    }

    #[test]
    fn test_efficiency_against_mst_bound() {
        let base = (14.30, 101.10);
        let stops = vec![
            stop("G1", 14.32, 101.10),
            stop("G2", 14.29, 101.13),
            stop("G3", 14.25, 101.09),
            stop("G4", 14.28, 101.12),
        ];
        let plan = TravelOptimizer::default().optimize(base, &stops);
        assert!(plan.efficiency_score > 0.0 && plan.efficiency_score <= 1.0);
        // Small geometric instances solve close to optimal; 2-opt should
        // land within the acceptance bound here.
        assert!(TravelOptimizer::acceptable(&plan), "score {}", plan.efficiency_score);
    }

    #[test]
    fn test_deterministic_across_runs() {
        let base = (14.30, 101.10);
        let stops = vec![
            stop("G1", 14.32, 101.10),
            stop("G2", 14.29, 101.13),
            stop("G3", 14.25, 101.09),
        ];
        let optimizer = TravelOptimizer::default();
        let a = optimizer.optimize(base, &stops);
        let b = optimizer.optimize(base, &stops);
        assert_eq!(a.order, b.order);
        assert_eq!(a.total_distance_km, b.total_distance_km);
    }

    #[test]
    fn test_time_windows_respected() {
        let base = (14.30, 101.10);
        let mut stops = vec![
            stop("G1", 14.32, 101.10),
            stop("G2", 14.29, 101.13),
        ];
        // G2 must be served early, G1 late.
        stops[1].window = Some((0.0, 60.0));
        stops[0].window = Some((120.0, 240.0));
        let plan = TravelOptimizer::default().optimize(base, &stops);
        assert!(plan.missed_windows.is_empty());
        // G2 (index 1) comes before G1 (index 0).
        assert_eq!(plan.order, vec![1, 0]);
        // Waited for G1's window to open.
        assert!(plan.arrival_minutes[1] >= 120.0);
    }

    #[test]
    fn test_unmeetable_window_reported() {
        let base = (14.30, 101.10);
        let mut stops = vec![stop("G1", 14.32, 101.10)];
        stops[0].window = Some((0.0, 0.5));
        let plan = TravelOptimizer::default().optimize(base, &stops);
        assert_eq!(plan.missed_windows, vec![0]);
    }
}
