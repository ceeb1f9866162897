mod device;
mod host;

pub use device::{ComputeProgram, DeviceBackend};
pub use host::HostBackend;

use crate::{
    agent::Agent,
    errors::SlimeError,
    random::RandomService,
    resolver::ArbitrationOutcome,
    settings::{BackendKind, Settings},
    trail::TrailField,
};

/// The stages of a simulation step. A backend owns the trail field and the
/// agent store; the caller owns the randomness and decides the stage order.
pub trait Backend {
    /// Blurs the active trail grid into the inactive one.
    fn diffuse(&mut self) -> Result<(), SlimeError>;

    fn swap_buffers(&mut self);

    fn decay(&mut self) -> Result<(), SlimeError>;

    /// Proposes, arbitrates and commits one step for every agent.
    fn move_agents(&mut self, random: &mut RandomService)
        -> Result<ArbitrationOutcome, SlimeError>;

    fn sense(&mut self, random: &mut RandomService) -> Result<(), SlimeError>;

    /// Writes one byte per cell of the active trail grid into `frame`.
    fn render(&mut self, frame: &mut [u8]) -> Result<(), SlimeError>;

    fn population(&self) -> usize;

    /// Current agent state. May need to fetch it from wherever the backend
    /// keeps it.
    fn agents(&mut self) -> Result<&[Agent], SlimeError>;

    fn trail(&mut self) -> Result<&TrailField, SlimeError>;
}

pub enum SimulationBackend {
    Host(HostBackend),
    Device(DeviceBackend),
}

impl SimulationBackend {
    pub fn new(settings: &Settings, agents: Vec<Agent>) -> Result<Self, SlimeError> {
        Ok(match settings.backend {
            BackendKind::Host => SimulationBackend::Host(HostBackend::new(settings, agents)?),
            BackendKind::Device => {
                let program = ComputeProgram::from_settings(settings)?;
                SimulationBackend::Device(DeviceBackend::new(settings, agents, &program)?)
            }
        })
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            SimulationBackend::Host(_) => BackendKind::Host,
            SimulationBackend::Device(_) => BackendKind::Device,
        }
    }

    fn inner(&mut self) -> &mut dyn Backend {
        match self {
            SimulationBackend::Host(backend) => backend,
            SimulationBackend::Device(backend) => backend,
        }
    }
}

impl Backend for SimulationBackend {
    fn diffuse(&mut self) -> Result<(), SlimeError> {
        self.inner().diffuse()
    }

    fn swap_buffers(&mut self) {
        self.inner().swap_buffers()
    }

    fn decay(&mut self) -> Result<(), SlimeError> {
        self.inner().decay()
    }

    fn move_agents(
        &mut self,
        random: &mut RandomService,
    ) -> Result<ArbitrationOutcome, SlimeError> {
        self.inner().move_agents(random)
    }

    fn sense(&mut self, random: &mut RandomService) -> Result<(), SlimeError> {
        self.inner().sense(random)
    }

    fn render(&mut self, frame: &mut [u8]) -> Result<(), SlimeError> {
        self.inner().render(frame)
    }

    fn population(&self) -> usize {
        match self {
            SimulationBackend::Host(backend) => backend.population(),
            SimulationBackend::Device(backend) => backend.population(),
        }
    }

    fn agents(&mut self) -> Result<&[Agent], SlimeError> {
        self.inner().agents()
    }

    fn trail(&mut self) -> Result<&TrailField, SlimeError> {
        self.inner().trail()
    }
}
