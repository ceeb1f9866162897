use crate::{
    agent::{init_agents, Agent},
    backend::{Backend, SimulationBackend},
    errors::SlimeError,
    random::RandomService,
    resolver::ArbitrationOutcome,
    settings::{BackendKind, Settings},
    statistics::RunStatistics,
    trail::TrailField,
};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// A whole run: the backend doing the work, the one random service every
/// stochastic decision draws from, and the byte image of the latest step.
pub struct Simulation {
    backend: SimulationBackend,
    random: RandomService,
    render_buffer: Vec<u8>,
    settings: Settings,
    statistics: RunStatistics,
}

impl Simulation {
    pub fn new(settings: Settings) -> Result<Self, SlimeError> {
        settings.validate()?;

        info!(
            r#"
WIDTH	{:?}
HEIGHT	{:?}
POPULATION	{:?}
KERNEL_SIZE	{:?}
DECAY	{:?}
RATIO	{:?}
SENSOR_ANGLE	{:?}
SENSOR_OFFSET	{:?}
ROTATION_ANGLE	{:?}
DEPOSITION	{:?}
BACKEND	{:?}
SEED	{:?}
"#,
            settings.width,
            settings.height,
            settings.population_size(),
            settings.diffusion_kernel_size,
            settings.diffusion_decay,
            settings.diffusion_ratio,
            settings.sensor_angle,
            settings.sensor_offset,
            settings.rotation_angle,
            settings.chemo_deposition,
            settings.backend,
            settings.seed,
        );

        let mut random = RandomService::new(settings.seed);
        let agents = init_agents(&settings, &mut random);
        let backend = SimulationBackend::new(&settings, agents)?;
        let render_buffer = vec![0; settings.num_pixels()];
        debug!("render buffer holds {} bytes", render_buffer.len());

        Ok(Self {
            backend,
            random,
            render_buffer,
            settings,
            statistics: RunStatistics::new(),
        })
    }

    /// Advances exactly one step: diffuse, swap, decay, move, sense, render.
    pub fn run(&mut self) -> Result<ArbitrationOutcome, SlimeError> {
        self.backend.diffuse()?;
        self.backend.swap_buffers();
        self.backend.decay()?;
        let outcome = self.backend.move_agents(&mut self.random)?;
        self.backend.sense(&mut self.random)?;
        self.backend.render(&mut self.render_buffer)?;

        self.statistics.update(outcome);

        Ok(outcome)
    }

    /// Steps until `stop` is raised or `max_steps` more steps have run,
    /// whichever comes first. `stop` is only checked between steps. Returns
    /// how many steps this call ran.
    pub fn run_until(&mut self, stop: &AtomicBool, max_steps: Option<u64>) -> Result<u64, SlimeError> {
        let mut steps = 0;
        let mut last_report = Instant::now();

        while !stop.load(Ordering::Relaxed) && max_steps.map_or(true, |max| steps < max) {
            self.run()?;
            steps += 1;

            if last_report.elapsed() >= STATUS_LOG_INTERVAL {
                info!("{}", self.statistics.status_string());
                last_report = Instant::now();
            }
        }

        info!("stopped after {} steps", steps);
        Ok(steps)
    }

    pub fn render_buffer(&self) -> &[u8] {
        &self.render_buffer
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn statistics(&self) -> &RunStatistics {
        &self.statistics
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn population(&self) -> usize {
        self.backend.population()
    }

    pub fn agents(&mut self) -> Result<&[Agent], SlimeError> {
        self.backend.agents()
    }

    pub fn trail(&mut self) -> Result<&TrailField, SlimeError> {
        self.backend.trail()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;

    fn small_settings(seed: u64, worker_threads: usize) -> Settings {
        Settings::builder()
            .width(48)
            .height(32)
            .population_density(0.3)
            .seed(seed)
            .worker_threads(worker_threads)
            .build()
    }

    fn snapshot(simulation: &mut Simulation) -> (Vec<Agent>, Vec<f32>, Vec<u8>) {
        (
            simulation.agents().unwrap().to_vec(),
            simulation.trail().unwrap().current().to_vec(),
            simulation.render_buffer().to_vec(),
        )
    }

    #[test]
    fn non_finite_settings_never_reach_a_backend() {
        let settings = Settings::builder()
            .width(8)
            .height(8)
            .max_chemo(f32::NAN)
            .build();
        assert!(matches!(
            Simulation::new(settings),
            Err(SlimeError::InvalidSettings(_))
        ));

        let settings = Settings::builder()
            .width(8)
            .height(8)
            .diffusion_decay(f32::NAN)
            .build();
        assert!(matches!(
            Simulation::new(settings),
            Err(SlimeError::InvalidSettings(_))
        ));
    }

    #[test]
    fn invalid_settings_are_rejected_up_front() {
        let settings = Settings::builder().diffusion_kernel_size(4).build();
        assert!(matches!(
            Simulation::new(settings),
            Err(SlimeError::InvalidSettings(_))
        ));
    }

    #[test]
    fn same_seed_same_run_regardless_of_worker_count() {
        let mut one_thread = Simulation::new(small_settings(42, 1)).unwrap();
        let mut four_threads = Simulation::new(small_settings(42, 4)).unwrap();

        for _ in 0..25 {
            assert_eq!(one_thread.run().unwrap(), four_threads.run().unwrap());
        }

        assert_eq!(snapshot(&mut one_thread), snapshot(&mut four_threads));
    }

    #[test]
    fn agents_never_share_a_cell_after_moving() {
        let mut simulation = Simulation::new(small_settings(7, 0)).unwrap();

        for _ in 0..10 {
            simulation.run().unwrap();
            let bounds = *simulation.trail().unwrap().bounds();
            let cells: Vec<usize> = simulation
                .agents()
                .unwrap()
                .iter()
                .filter_map(|agent| bounds.cell_index(&agent.location()))
                .collect();
            let unique: HashSet<usize> = cells.iter().copied().collect();

            // agents are placed independently, so only those that just moved are checked
            let outcome = simulation.statistics().last_outcome();
            assert!(unique.len() >= outcome.accepted);
            assert_eq!(cells.len(), simulation.population());
        }
    }

    #[test]
    fn render_buffer_tracks_the_trail() {
        let mut simulation = Simulation::new(small_settings(3, 2)).unwrap();
        assert_eq!(simulation.settings().num_pixels(), 48 * 32);

        simulation.run().unwrap();

        let expected: Vec<u8> = simulation
            .trail()
            .unwrap()
            .current()
            .iter()
            .map(|chemo| crate::render::quantize(*chemo))
            .collect();
        assert_eq!(simulation.render_buffer(), &expected[..]);
        assert!(simulation.render_buffer().iter().any(|pixel| *pixel > 0));
    }

    #[test]
    fn run_until_honours_the_step_limit_and_the_stop_flag() {
        let mut simulation = Simulation::new(small_settings(1, 1)).unwrap();

        let stop = AtomicBool::new(false);
        assert_eq!(simulation.run_until(&stop, Some(3)).unwrap(), 3);
        assert_eq!(simulation.statistics().steps(), 3);

        stop.store(true, Ordering::Relaxed);
        assert_eq!(simulation.run_until(&stop, None).unwrap(), 0);
    }
}
