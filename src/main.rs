use std::env;
use std::path::PathBuf;
use std::process::exit;

use gridsession::prelude::*;
use tracing::error;
use tracing_subscriber::FmtSubscriber;

/// Trigger steps of the reference load-shedding schedule.
const SHED_STEPS: [u64; 4] = [2500, 3000, 3500, 4000];

fn main() {
    // Diagnostics go to stderr; stdout carries the observation stream.
    let subscriber = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut args = env::args();
    let program = args.next().unwrap_or_else(|| "gridsession".to_string());
    let Some(inname) = args.next() else {
        eprintln!("usage: {program} input.json");
        exit(3);
    };

    if let Err(err) = run(PathBuf::from(inname)) {
        error!(error = %err, "scenario run failed");
        exit(1);
    }
}

fn shed_schedule(buses: &[i64]) -> ScheduledActions {
    let entries = SHED_STEPS
        .iter()
        .flat_map(|&step| {
            buses.iter().map(move |&bus| ScheduledAction {
                trigger_step: step,
                action: Action::load_shed(bus, "1", -0.2),
            })
        })
        .collect();
    ScheduledActions::new(entries)
}

fn run(inname: PathBuf) -> Result<(), SessionError> {
    let env = Environment::acquire()?;

    let module = DefaultEngine::create(env.clone());
    let mut session = ScenarioSession::configure(Box::new(module));

    session.solve_power_flow(&inname)?;

    // First scenario: no faults, 20 % load shed at buses 5 and 7.
    session.start_dynamics(&[], -1)?;
    session.register_actions(shed_schedule(&[5, 7]));
    session.print_observation_lists()?;
    session.run_to_completion()?;

    // Second scenario on the same module: bus fault at bus 7. The state
    // transfer is repeated explicitly; the engine does not reset on its own.
    // The step counter keeps counting, so the bus-5 schedule is evaluated
    // against the continuing count.
    let fault = Event::bus_fault(10.0, 10.2, 0.005, 7);
    session.transfer_state()?;
    session.start_dynamics(std::slice::from_ref(&fault), -1)?;
    session.register_actions(shed_schedule(&[5]));
    session.run_to_completion()?;
    session.print_channel_summary();
    session.teardown();

    // The module can be recreated on the still-live environment.
    let module = DefaultEngine::create(env.clone());
    let mut session = ScenarioSession::configure(Box::new(module));
    session.solve_power_flow(&inname)?;
    session.teardown();

    Ok(())
}
