// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Library functions to build trackers as defined by the user.

use std::io::BufWriter;
use std::sync::Arc;
use std::{fs, io};

use crate::tracker::{EntityManager, LogTracker, MultiTracker, TextTracker, TrackConfigError};
use crate::{Tracker, Writer};

/// File name used to select `stdout` for the text tracker.
pub const STDOUT_FILE: &str = "-";

/// Configuration options for an individual tracker.
pub struct TrackerConfig<'a> {
    /// Enable this tracker.
    pub enable: bool,

    /// Set the level at which this tracker should be enabled.
    pub level: log::Level,

    /// A regular expression to match which entities should have this level
    /// applied.
    pub filter_regex: &'a str,

    /// If required, the name of the file to which the tracker will write.
    pub file: Option<&'a str>,
}

impl Default for TrackerConfig<'_> {
    fn default() -> Self {
        Self {
            enable: true,
            level: log::Level::Warn,
            filter_regex: "",
            file: None,
        }
    }
}

/// Configuration options for all tracking.
pub struct TrackersConfig<'a> {
    /// Configuration for the text output (`stdout` or a file).
    pub text: TrackerConfig<'a>,

    /// Configuration for forwarding to the `log` facade.
    pub facade: TrackerConfig<'a>,
}

/// The user can pass a filter regular expression which will set the level only
/// for matching Entities and set all other Entities to only emit errors.
fn build_entity_manager(config: &TrackerConfig) -> Result<EntityManager, TrackConfigError> {
    let default_level = if config.filter_regex.is_empty() {
        config.level
    } else {
        log::Level::Error
    };

    let mut entity_manager = EntityManager::new(default_level);
    if !config.filter_regex.is_empty() {
        entity_manager.add_entity_level_filter(config.filter_regex, config.level)?;
    }
    Ok(entity_manager)
}

/// Create a tracker that prints to stdout or to the configured file.
fn build_text_tracker(config: &TrackerConfig) -> Result<Tracker, TrackConfigError> {
    let entity_manager = build_entity_manager(config)?;

    let writer: Writer = match config.file {
        None | Some(STDOUT_FILE) => Box::new(BufWriter::new(io::stdout())),
        Some(path) => {
            let file = fs::File::create(path).map_err(|e| {
                TrackConfigError(format!("Unable to create log file '{path}': {e}"))
            })?;
            Box::new(BufWriter::new(file))
        }
    };
    Ok(Arc::new(TextTracker::new(entity_manager, writer)))
}

/// Same filtering as the text tracker (see build_text_tracker) except that
/// the messages go to the `log` facade.
fn build_facade_tracker(config: &TrackerConfig) -> Result<Tracker, TrackConfigError> {
    let entity_manager = build_entity_manager(config)?;
    Ok(Arc::new(LogTracker::new(entity_manager)))
}

/// Set up text/facade trackers according to the configuration
pub fn setup_trackers(config: &TrackersConfig) -> Result<Tracker, TrackConfigError> {
    let multi_tracker_required = config.text.enable && config.facade.enable;

    if multi_tracker_required {
        let mut tracker = MultiTracker::default();
        tracker.add_tracker(build_text_tracker(&config.text)?);
        tracker.add_tracker(build_facade_tracker(&config.facade)?);
        Ok(Arc::new(tracker))
    } else if config.text.enable {
        build_text_tracker(&config.text)
    } else if config.facade.enable {
        build_facade_tracker(&config.facade)
    } else {
        build_text_tracker(&TrackerConfig::default())
    }
}
