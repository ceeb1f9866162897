use log::{error, info};
use slime_grid::{settings::DEFAULT_SETTINGS_FILE, SlimeError, Settings, Simulation};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn main() -> Result<(), SlimeError> {
    dotenv::dotenv().ok();
    env_logger::init();

    let settings = Settings::load_from_file(DEFAULT_SETTINGS_FILE)?;
    let max_steps = settings.max_steps;
    let mut simulation = Simulation::new(settings)?;
    info!(
        "running {} agents on the {:?} backend, press Enter to stop",
        simulation.population(),
        simulation.backend_kind()
    );

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                // stdin closed, only the step limit can end the run
                Ok(0) => (),
                Ok(_) => stop.store(true, Ordering::Relaxed),
                Err(e) => error!("couldn't read stdin: {}", e),
            }
        });
    }

    simulation.run_until(&stop, max_steps)?;
    info!("{}", simulation.statistics().status_string());

    Ok(())
}
