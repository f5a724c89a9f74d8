use anyhow::{Context, Result};
use topolink_algo::{JunctionHint, SkipReason, StitchOutcome, Stitcher};
use topolink_cli::AppConfig;
use topolink_core::TopoError;

use super::{feeder_records, open_store};

pub fn handle(
    config: &AppConfig,
    feeder: &str,
    main_device: Option<String>,
    sub_device: Option<String>,
) -> Result<()> {
    let store = open_store(config)?;
    feeder_records(&store, feeder)?;

    let hint = JunctionHint {
        main_device_id: main_device,
        sub_device_id: sub_device,
    };
    let outcome = Stitcher::new(&store)
        .stitch_feeder(feeder, &hint)
        .with_context(|| format!("stitching feeder '{feeder}'"))?;
    store.save().context("saving store snapshot")?;

    match outcome {
        StitchOutcome::Skipped {
            reason: SkipReason::AlreadyJoined,
        } => println!("Feeder {feeder} is already joined to the main network"),
        StitchOutcome::Skipped {
            reason: SkipReason::NoJunction,
        } => println!("Feeder {feeder} has no main-network junction"),
        StitchOutcome::Stitched {
            sub_device,
            terminal,
            main_node,
        } => match terminal {
            Some(terminal) => println!(
                "Feeder {feeder} stitched: {sub_device} {terminal} endpoint -> {main_node}"
            ),
            None => println!("Feeder {feeder} stitched: {sub_device} already on {main_node}"),
        },
        StitchOutcome::Unresolved { reason } => {
            println!("Feeder {feeder} not stitched: {reason}");
            return Err(TopoError::Unresolved(format!("feeder {feeder}: {reason}")).into());
        }
    }
    Ok(())
}
