use crate::{
    point2::Point2,
    random::RandomService,
    settings::{InitPattern, Settings},
    trail::TrailField,
};
use log::{info, trace};
use std::f32::consts::PI;

/// Readings from the left, forward and right sensors, in that order
pub type SensorReading = (f32, f32, f32);

/// A single slime mold particle. `#[repr(C)]` so the agent store can be
/// uploaded to a compute device as-is.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Agent {
    pub x: f32,
    pub y: f32,
    // The heading an agent is facing (in radians). Never wrapped back into [0, 2π).
    pub direction: f32,
}

impl Agent {
    pub fn new(x: f32, y: f32, direction: f32) -> Self {
        Self { x, y, direction }
    }

    pub fn location(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }

    /// Where the agent would end up after one step along its heading.
    pub fn desired_location(&self, step_size: f32) -> Point2 {
        self.location().offset_along(self.direction, step_size)
    }

    pub fn move_to(&mut self, location: Point2) {
        self.x = location.x;
        self.y = location.y;
    }

    pub fn sense(&self, trail: &TrailField, settings: &Settings) -> SensorReading {
        let sense_at = |offset: f32| {
            let probe = self
                .location()
                .offset_along(self.direction + offset, settings.sensor_offset);
            trail.sample_window(probe, settings.sensor_width)
        };

        (
            sense_at(-settings.sensor_angle),
            sense_at(0.0),
            sense_at(settings.sensor_angle),
        )
    }

    /// Reads the trail and turns in response. `coin` is a uniform `[0, 1)`
    /// draw used only when both side sensors beat the forward one.
    pub fn sense_and_turn(&mut self, trail: &TrailField, settings: &Settings, coin: f32) {
        let reading = self.sense(trail, settings);
        self.direction += judge_sensory_input(reading, settings.rotation_angle, coin);
    }
}

/// How far to turn for a given sensor reading.
///
/// Every comparison is strict, so a forward reading that only ties the
/// strongest side, or three equal readings, fall through to the last branch
/// and turn negative, even when the two sides are equal.
pub fn judge_sensory_input(
    (l_reading, c_reading, r_reading): SensorReading,
    rotation_angle: f32,
    coin: f32,
) -> f32 {
    if c_reading > l_reading && c_reading > r_reading {
        trace!("Agent's center value is greatest, doing nothing");
        0.0
    } else if c_reading < l_reading && c_reading < r_reading {
        if coin > 0.5 {
            trace!("Agent is rotating randomly to the left");
            -rotation_angle
        } else {
            trace!("Agent is rotating randomly to the right");
            rotation_angle
        }
    } else if l_reading < r_reading {
        trace!("Agent is rotating right");
        rotation_angle
    } else {
        trace!("Agent is rotating left (final fallthrough case)");
        -rotation_angle
    }
}

/// Creates the whole population up front. It's never resized afterwards.
pub fn init_agents(settings: &Settings, random: &mut RandomService) -> Vec<Agent> {
    let count = settings.population_size();
    info!(
        "generating {} agents in a {:?} pattern",
        count, settings.init_pattern
    );

    let width = settings.width as f32;
    let height = settings.height as f32;

    (0..count)
        .map(|_| match settings.init_pattern {
            InitPattern::Random => {
                let direction = random.random_direction();
                let x = width * random.rand_float();
                let y = height * random.rand_float();
                Agent::new(x, y, direction)
            }
            InitPattern::Circle => {
                let center = Point2::new(width / 2.0, height / 2.0);
                let radius = width.min(height) / 4.0;
                // sqrt keeps the density uniform over the disc
                let r = radius * random.rand_float().sqrt();
                let theta = random.random_direction();
                let location = center.offset_along(theta, r);
                // face the centre
                Agent::new(location.x, location.y, theta + PI)
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    const ROTATION: f32 = 0.5;

    #[test]
    fn forward_strongest_keeps_heading() {
        assert_eq!(judge_sensory_input((2.0, 5.0, 2.0), ROTATION, 0.9), 0.0);
    }

    #[test]
    fn left_weaker_than_right_turns_positive() {
        assert_eq!(judge_sensory_input((2.0, 3.0, 5.0), ROTATION, 0.9), ROTATION);
    }

    #[test]
    fn right_weaker_than_left_turns_negative() {
        assert_eq!(judge_sensory_input((5.0, 4.0, 2.0), ROTATION, 0.9), -ROTATION);
    }

    #[test]
    fn ties_fall_through_to_a_negative_turn() {
        // an empty trail reads the same everywhere
        assert_eq!(judge_sensory_input((0.0, 0.0, 0.0), ROTATION, 0.1), -ROTATION);
        assert_eq!(judge_sensory_input((6.0, 6.0, 6.0), ROTATION, 0.9), -ROTATION);
        // forward only ties the stronger side
        assert_eq!(judge_sensory_input((4.0, 4.0, 2.0), ROTATION, 0.1), -ROTATION);
        assert_eq!(judge_sensory_input((2.0, 4.0, 4.0), ROTATION, 0.1), ROTATION);
    }

    #[test]
    fn forward_weakest_turns_by_coin() {
        assert_eq!(judge_sensory_input((5.0, 1.0, 5.0), ROTATION, 0.9), -ROTATION);
        assert_eq!(judge_sensory_input((5.0, 1.0, 5.0), ROTATION, 0.1), ROTATION);
    }

    #[test]
    fn sense_and_turn_reads_the_trail_at_the_probes() {
        let settings = Settings::builder()
            .width(30)
            .height(30)
            .sensor_offset(5.0)
            .sensor_angle(std::f32::consts::FRAC_PI_2)
            .rotation_angle(ROTATION)
            .build();
        let mut trail = TrailField::new(30, 30, 0.0, settings.max_chemo);
        // facing +x from (10, 10): forward probe (15, 10), left (10, 5), right (10, 15)
        trail.set(15, 10, 1.0);
        trail.set(10, 5, 2.0);
        trail.set(10, 15, 5.0);

        let mut agent = Agent::new(10.5, 10.5, 0.0);
        let (left, forward, right) = agent.sense(&trail, &settings);
        assert_eq!((left, forward, right), (2.0, 1.0, 5.0));

        agent.sense_and_turn(&trail, &settings, 0.0);
        assert!((agent.direction - ROTATION).abs() < 1e-6);
    }

    #[test]
    fn probes_off_the_grid_read_zero() {
        let settings = Settings::builder().width(10).height(10).build();
        let trail = TrailField::new(10, 10, 1.0, settings.max_chemo);
        let agent = Agent::new(9.5, 5.5, 0.0);

        let (_, forward, _) = agent.sense(&trail, &settings);
        assert_eq!(forward, 0.0);
    }

    #[test]
    fn init_agents_places_the_whole_population_on_the_grid() {
        let settings = Settings::builder()
            .width(40)
            .height(20)
            .population_density(0.25)
            .build();
        let mut random = RandomService::from_seed(11);

        let agents = init_agents(&settings, &mut random);

        assert_eq!(agents.len(), 200);
        agents.iter().for_each(|agent| {
            assert!((0.0..40.0).contains(&agent.x));
            assert!((0.0..20.0).contains(&agent.y));
        });
    }

    #[test]
    fn circle_pattern_stays_inside_the_disc() {
        let settings = Settings::builder()
            .width(40)
            .height(40)
            .population_density(0.1)
            .init_pattern(InitPattern::Circle)
            .build();
        let mut random = RandomService::from_seed(2);
        let center = Point2::new(20.0, 20.0);

        let agents = init_agents(&settings, &mut random);

        agents
            .iter()
            .for_each(|agent| assert!(agent.location().distance_to(&center) <= 10.0 + 1e-4));
    }
}
