use super::Backend;
use crate::{
    agent::Agent,
    errors::SlimeError,
    random::RandomService,
    render,
    resolver::{ArbitrationOutcome, MoveResolver},
    settings::Settings,
    trail::TrailField,
};
use log::{debug, trace};
use rayon::prelude::*;

/// Runs every stage on a dedicated rayon pool. Each stage is its own
/// `install`, so one stage has fully finished before the next starts.
pub struct HostBackend {
    pool: rayon::ThreadPool,
    trail: TrailField,
    agents: Vec<Agent>,
    resolver: MoveResolver,
    coins: Vec<f32>,
    settings: Settings,
}

impl HostBackend {
    pub fn new(settings: &Settings, agents: Vec<Agent>) -> Result<Self, SlimeError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.worker_threads)
            .thread_name(|i| format!("slime-worker-{}", i))
            .build()?;
        debug!(
            "built host worker pool with {} threads",
            pool.current_num_threads()
        );

        let trail = TrailField::new(settings.width, settings.height, 0.0, settings.max_chemo);
        let resolver = MoveResolver::new(trail.len(), agents.len());
        let coins = vec![0.0; agents.len()];

        Ok(Self {
            pool,
            trail,
            agents,
            resolver,
            coins,
            settings: settings.clone(),
        })
    }

    pub fn worker_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Backend for HostBackend {
    fn diffuse(&mut self) -> Result<(), SlimeError> {
        let kernel_size = self.settings.diffusion_kernel_size;
        let ratio = self.settings.diffusion_ratio;
        let trail = &mut self.trail;

        self.pool.install(|| trail.diffuse(kernel_size, ratio));

        Ok(())
    }

    fn swap_buffers(&mut self) {
        self.trail.swap();
    }

    fn decay(&mut self) -> Result<(), SlimeError> {
        let decay = self.settings.diffusion_decay;
        let trail = &mut self.trail;

        self.pool.install(|| trail.decay(decay));

        Ok(())
    }

    fn move_agents(
        &mut self,
        random: &mut RandomService,
    ) -> Result<ArbitrationOutcome, SlimeError> {
        let step_size = self.settings.step_size;
        let deposition = self.settings.chemo_deposition;
        let bounds = *self.trail.bounds();
        let Self {
            pool,
            trail,
            agents,
            resolver,
            ..
        } = self;

        pool.install(|| resolver.propose(&agents[..], &bounds, step_size));
        let outcome = resolver.arbitrate(random);
        pool.install(|| resolver.commit(agents, trail, step_size, deposition));

        trace!(
            "{} agents moved, {} blocked, {} tried to leave the grid",
            outcome.accepted,
            outcome.blocked,
            outcome.out_of_bounds
        );

        Ok(outcome)
    }

    fn sense(&mut self, random: &mut RandomService) -> Result<(), SlimeError> {
        // drawn up front and in agent order so the result doesn't depend on scheduling
        random.fill_floats(&mut self.coins);

        let Self {
            pool,
            trail,
            agents,
            coins,
            settings,
            ..
        } = self;
        let (trail, settings, coins) = (&*trail, &*settings, &*coins);

        pool.install(|| {
            agents
                .par_iter_mut()
                .zip_eq(coins.par_iter())
                .for_each(|(agent, coin)| agent.sense_and_turn(trail, settings, *coin))
        });

        Ok(())
    }

    fn render(&mut self, frame: &mut [u8]) -> Result<(), SlimeError> {
        let trail = self.trail.current();
        self.pool.install(|| render::project(trail, frame))
    }

    fn population(&self) -> usize {
        self.agents.len()
    }

    fn agents(&mut self) -> Result<&[Agent], SlimeError> {
        Ok(&self.agents)
    }

    fn trail(&mut self) -> Result<&TrailField, SlimeError> {
        Ok(&self.trail)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn settings(worker_threads: usize) -> Settings {
        Settings::builder()
            .width(10)
            .height(10)
            .worker_threads(worker_threads)
            .build()
    }

    #[test]
    fn pool_is_sized_from_settings() {
        let backend = HostBackend::new(&settings(3), Vec::new()).unwrap();
        assert_eq!(backend.worker_threads(), 3);
    }

    #[test]
    fn one_move_lands_one_step_ahead_and_deposits() {
        let settings = settings(2);
        let mut backend = HostBackend::new(&settings, vec![Agent::new(5.0, 5.0, 0.0)]).unwrap();
        let mut random = RandomService::from_seed(0);

        let outcome = backend.move_agents(&mut random).unwrap();

        assert_eq!(outcome.accepted, 1);
        let agent = backend.agents().unwrap()[0];
        assert!((agent.x - (5.0 + settings.step_size)).abs() < 1e-5);
        assert!((agent.y - 5.0).abs() < 1e-5);
        assert_eq!(
            backend.trail().unwrap().get(6, 5),
            Some(settings.chemo_deposition)
        );
    }

    #[test]
    fn decay_and_diffuse_work_on_the_right_grid() {
        let mut backend = HostBackend::new(&settings(1), vec![Agent::new(5.0, 5.0, 0.0)]).unwrap();
        let mut random = RandomService::from_seed(0);
        backend.move_agents(&mut random).unwrap();

        backend.diffuse().unwrap();
        // nothing visible until the swap
        assert_eq!(backend.trail().unwrap().get(5, 5), Some(0.0));
        backend.swap_buffers();
        assert!(backend.trail().unwrap().get(5, 5).unwrap() > 0.0);

        backend.decay().unwrap();
        backend
            .trail()
            .unwrap()
            .current()
            .iter()
            .for_each(|chemo| assert!(*chemo >= 0.0));
    }

    #[test]
    fn render_fills_the_frame() {
        let mut backend = HostBackend::new(&settings(1), vec![Agent::new(5.0, 5.0, 0.0)]).unwrap();
        let mut random = RandomService::from_seed(0);
        backend.move_agents(&mut random).unwrap();
        let mut frame = vec![0u8; 100];

        backend.render(&mut frame).unwrap();

        assert_eq!(frame[56], 5);
        assert_eq!(frame.iter().filter(|pixel| **pixel != 0).count(), 1);
    }
}
