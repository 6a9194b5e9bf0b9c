// Copyright (c) 2024 Graphcore Ltd. All rights reserved.

//! Route a fabric and report the result.
//!
//! See `lib.rs` for details.

use std::error::Error;

use fabric_sweep::app::{App, setup_tracker};
use fabric_sweep::config::Config;
use fabric_track::{error, info};

fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::load()?;
    let tracker = setup_tracker(&config)?;

    let mut app = App::build(&config, &tracker)?;
    let statuses = app.run(config.sweeps.unwrap_or(1));
    app.report();

    let routed = statuses.last().is_some_and(|status| status.committed);
    if routed {
        info!(app.top ; "fabric routed after {} sweeps", statuses.len());
    } else {
        error!(app.top ; "fabric not routed after {} sweeps", statuses.len());
    }
    app.engine.destroy();
    tracker.shutdown();

    if routed {
        Ok(())
    } else {
        Err("routing failed".into())
    }
}
