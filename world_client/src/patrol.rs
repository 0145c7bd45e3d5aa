//! Scripted pawn movement for the demo client.
//!
//! A patrol walks a closed loop of waypoints, spending the same time on each leg.

use world_shared::math::Vec3;

#[derive(Debug, Clone)]
pub struct Patrol {
    waypoints: Vec<Vec3>,
    secs_per_leg: f64,
}

impl Patrol {
    pub fn new(waypoints: Vec<Vec3>, secs_per_leg: f64) -> Self {
        Self {
            waypoints,
            secs_per_leg: secs_per_leg.max(f64::EPSILON),
        }
    }

    /// Square of side `size` on the XZ plane, offset along X by `lane`.
    pub fn square(lane: f64, size: f64, secs_per_leg: f64) -> Self {
        Self::new(
            vec![
                Vec3::new(lane, 0.0, 0.0),
                Vec3::new(lane + size, 0.0, 0.0),
                Vec3::new(lane + size, 0.0, size),
                Vec3::new(lane, 0.0, size),
            ],
            secs_per_leg,
        )
    }

    /// Position after `t` seconds.
    pub fn position_at(&self, t: f64) -> Vec3 {
        match self.waypoints.len() {
            0 => Vec3::ZERO,
            1 => self.waypoints[0],
            n => {
                let lap = self.secs_per_leg * n as f64;
                let t = t.rem_euclid(lap);
                let leg = ((t / self.secs_per_leg) as usize).min(n - 1);
                let frac = (t - leg as f64 * self.secs_per_leg) / self.secs_per_leg;
                self.waypoints[leg].lerp(self.waypoints[(leg + 1) % n], frac)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_legs_and_loops() {
        let p = Patrol::square(0.0, 4.0, 1.0);
        assert_eq!(p.position_at(0.0), Vec3::new(0.0, 0.0, 0.0));
        assert_eq!(p.position_at(0.5), Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(p.position_at(1.5), Vec3::new(4.0, 0.0, 2.0));
        assert_eq!(p.position_at(3.5), Vec3::new(0.0, 0.0, 2.0));
        assert_eq!(p.position_at(4.5), p.position_at(0.5));
    }

    #[test]
    fn degenerate_paths() {
        assert_eq!(Patrol::new(Vec::new(), 1.0).position_at(3.0), Vec3::ZERO);
        let one = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(Patrol::new(vec![one], 1.0).position_at(3.0), one);
    }
}
