//! Run Session Example
//!
//! Walks one participant through a small pointing experiment while a
//! dashboard listener receives each completed trial.
//!
//! Run with: cargo run --example run_session
//! Verbose: RUST_LOG=lightmill_core=debug cargo run --example run_session

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use lightmill_core::experiment::{Experiment, Factor, Measure, Run};
use lightmill_core::store::ExperimentStore;
use lightmill_core::{telemetry, Config, MeasureInput, ProgressService, TrialInfo, TrialSubmission};

fn pointing_experiment() -> lightmill_core::Result<Experiment> {
    let size = Factor::builder("size", "String")
        .name("Target size")
        .value("small")
        .value("big")
        .default_value("small")
        .build()?;
    let distance = Factor::builder("distance", "Integer")
        .value("200")
        .value("400")
        .build()?;

    let mut builder = Experiment::builder("pointing", "Pointing study")
        .author("HCI lab")
        .factor(size)
        .factor(distance)
        .measure(Measure::new("time", "Float", true, false)?)
        .measure(Measure::new("cursor.x", "Integer", false, true)?)
        .measure(Measure::new("cursor.y", "Integer", false, true)?);
    for participant in ["S0", "S1"] {
        let mut run = Run::new(participant);
        let practice = run.push_block(true);
        practice.set_factor_value("distance", "200");
        practice.push_trial();
        for size in ["small", "big"] {
            let block = run.push_block(false);
            block.set_factor_value("size", size);
            for distance in ["200", "400"] {
                block.push_trial().set_factor_value("distance", distance);
            }
        }
        builder = builder.run(run);
    }
    builder.build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    println!("=== lightmill-core Run Session ===\n");

    let store = Arc::new(ExperimentStore::new());
    let service = ProgressService::builder()
        .config(Config::from_env())
        .store(Arc::clone(&store))
        .build();
    service.import_experiment(pointing_experiment()?)?;

    // -------------------------------------------------------------------------
    // Pick and lock a run
    // -------------------------------------------------------------------------
    let run = service
        .available_run("pointing")?
        .context("no run available")?;
    let token = service.lock_run("pointing", &run.id)?;
    println!("1. Locked run {} ({} trials)", run.id, run.trial_count);

    // -------------------------------------------------------------------------
    // Attach a dashboard
    // -------------------------------------------------------------------------
    let subscription = service.subscribe("pointing", &run.id, |trial: &TrialInfo| -> anyhow::Result<()> {
        println!(
            "   [dashboard] {} done: {:?}",
            trial.position(),
            trial.factor_values
        );
        Ok(())
    })?;

    // -------------------------------------------------------------------------
    // Execute trials in order
    // -------------------------------------------------------------------------
    println!("\n2. Executing trials...");
    let mut step = 0_i64;
    while let Some(trial) = service.current_trial("pointing", &run.id)? {
        step += 1;
        let block = trial
            .measured_block_number
            .map_or_else(|| "practice".to_string(), |n| format!("block {n}"));
        println!("   {block}, trial {}: {:?}", trial.number, trial.factor_values);

        #[allow(clippy::cast_precision_loss)]
        let time = 350.0 + (step * 37 % 90) as f64;
        let submission = TrialSubmission::new(&token)
            .measures(MeasureInput::map([("time", time)]))
            .event(MeasureInput::map([(
                "cursor",
                MeasureInput::map([("x", step * 10), ("y", 5)]),
            )]))
            .event(MeasureInput::map([(
                "cursor",
                MeasureInput::map([("x", step * 10 + 3), ("y", 7)]),
            )]));
        service.submit_trial_result(
            "pointing",
            &run.id,
            trial.block_number,
            trial.number,
            submission,
        )?;
    }

    // Give the dashboard a moment to drain its queue
    tokio::time::sleep(Duration::from_millis(100)).await;
    service.unsubscribe(subscription);
    service.unlock_run("pointing", &run.id, &token)?;

    // -------------------------------------------------------------------------
    // Status and snapshot
    // -------------------------------------------------------------------------
    println!("\n3. Experiment status:");
    for info in service.experiment_status("pointing")? {
        println!(
            "   {}: started={} completed={} locked={}",
            info.id, info.started, info.completed, info.locked
        );
    }

    let json = store.to_json()?;
    println!("\n4. Snapshot: {} bytes", json.len());
    let replayed = ExperimentStore::from_json(&json)?;
    println!("   Replayed {} experiment(s)", replayed.experiment_count());

    Ok(())
}
