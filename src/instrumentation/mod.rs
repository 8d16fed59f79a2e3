//! Best-effort auto-instrumentation of third-party libraries
//!
//! Requested library names are resolved against a fixed registry of
//! supported targets. For each supported name the loader
//!
//! 1. locates the library itself,
//! 2. locates the adapter module that instruments it,
//! 3. instantiates the instrumentor,
//! 4. calls [`Instrumentor::instrument`] with the configuration.
//!
//! A failure at any step is logged and recorded in the
//! [`InstrumentationReport`]; the remaining names are still processed.
//! Names outside the registry are skipped without any lookup.

#[cfg(any(feature = "instrument-hyper", feature = "instrument-reqwest"))]
pub mod http_common;
#[cfg(feature = "instrument-hyper")]
pub mod hyper_server;
pub mod locator;
#[cfg(feature = "instrument-reqwest")]
pub mod reqwest_client;

pub use locator::{LinkedModules, ModuleLocator};

use crate::config::DistroConfig;
use std::any::Any;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Adapter module path of the hyper instrumentation
pub const HYPER_ADAPTER: &str = "otel_distro::instrumentation::hyper_server";

/// Adapter module path of the reqwest instrumentation
pub const REQWEST_ADAPTER: &str = "otel_distro::instrumentation::reqwest_client";

/// Errors raised while loading a single instrumentation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InstrumentationError {
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Failed to instantiate instrumentor for {name}: {reason}")]
    Instantiation { name: String, reason: String },

    #[error("Failed to instrument {name}: {reason}")]
    Activation { name: String, reason: String },
}

/// A library instrumentation that can be activated with the distro config
pub trait Instrumentor: Any + Send + Sync {
    /// Library this instrumentor targets
    fn name(&self) -> &'static str;

    /// Activate the instrumentation
    fn instrument(&mut self, config: &DistroConfig) -> Result<(), InstrumentationError>;

    fn as_any(&self) -> &dyn Any;
}

/// Constructor of an instrumentor
pub type InstrumentorFactory = fn() -> Result<Box<dyn Instrumentor>, InstrumentationError>;

/// Registry entry for one supported library
#[derive(Clone, Copy)]
pub struct InstrumentationTarget {
    /// Name accepted in `instrumentations`
    pub name: &'static str,
    /// Module that must be present for the library to be instrumented
    pub library: &'static str,
    /// Module providing the instrumentor
    pub adapter: &'static str,
    pub factory: InstrumentorFactory,
}

impl fmt::Debug for InstrumentationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentationTarget")
            .field("name", &self.name)
            .field("library", &self.library)
            .field("adapter", &self.adapter)
            .finish()
    }
}

/// Libraries that can be auto-instrumented
pub static SUPPORTED_INSTRUMENTATIONS: &[InstrumentationTarget] = &[
    InstrumentationTarget {
        name: "hyper",
        library: "hyper",
        adapter: HYPER_ADAPTER,
        factory: hyper_factory,
    },
    InstrumentationTarget {
        name: "reqwest",
        library: "reqwest",
        adapter: REQWEST_ADAPTER,
        factory: reqwest_factory,
    },
];

/// Names of the supported libraries
pub fn supported_libraries() -> impl Iterator<Item = &'static str> {
    SUPPORTED_INSTRUMENTATIONS.iter().map(|t| t.name)
}

fn hyper_factory() -> Result<Box<dyn Instrumentor>, InstrumentationError> {
    #[cfg(feature = "instrument-hyper")]
    {
        Ok(Box::new(hyper_server::HyperInstrumentor::new()))
    }
    #[cfg(not(feature = "instrument-hyper"))]
    {
        Err(InstrumentationError::Instantiation {
            name: "hyper".to_string(),
            reason: "compiled without the instrument-hyper feature".to_string(),
        })
    }
}

fn reqwest_factory() -> Result<Box<dyn Instrumentor>, InstrumentationError> {
    #[cfg(feature = "instrument-reqwest")]
    {
        Ok(Box::new(reqwest_client::ReqwestInstrumentor::new()))
    }
    #[cfg(not(feature = "instrument-reqwest"))]
    {
        Err(InstrumentationError::Instantiation {
            name: "reqwest".to_string(),
            reason: "compiled without the instrument-reqwest feature".to_string(),
        })
    }
}

/// Step at which loading an instrumentation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Library,
    Adapter,
    Instantiate,
    Instrument,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStage::Library => write!(f, "library"),
            LoadStage::Adapter => write!(f, "adapter"),
            LoadStage::Instantiate => write!(f, "instantiate"),
            LoadStage::Instrument => write!(f, "instrument"),
        }
    }
}

/// Result of one requested instrumentation
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentationOutcome {
    /// Not in the registry; nothing was attempted
    Unsupported { name: String },
    Activated { name: String },
    Failed {
        name: String,
        stage: LoadStage,
        error: InstrumentationError,
    },
}

impl InstrumentationOutcome {
    pub fn name(&self) -> &str {
        match self {
            InstrumentationOutcome::Unsupported { name }
            | InstrumentationOutcome::Activated { name }
            | InstrumentationOutcome::Failed { name, .. } => name,
        }
    }

    pub fn is_activated(&self) -> bool {
        matches!(self, InstrumentationOutcome::Activated { .. })
    }
}

/// Outcomes of a loader run, in request order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentationReport {
    outcomes: Vec<InstrumentationOutcome>,
}

impl InstrumentationReport {
    pub fn outcomes(&self) -> &[InstrumentationOutcome] {
        &self.outcomes
    }

    pub fn activated(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.is_activated())
            .map(|o| o.name())
            .collect()
    }

    pub fn failed(&self) -> Vec<(&str, LoadStage)> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                InstrumentationOutcome::Failed { name, stage, .. } => Some((name.as_str(), *stage)),
                _ => None,
            })
            .collect()
    }

    pub fn unsupported(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, InstrumentationOutcome::Unsupported { .. }))
            .map(|o| o.name())
            .collect()
    }
}

/// Instrumentors that were activated, plus the full report
pub struct LoadedInstrumentations {
    pub instrumentors: Vec<Box<dyn Instrumentor>>,
    pub report: InstrumentationReport,
}

/// Walks the requested names and activates what it can
pub struct InstrumentationLoader<'a> {
    targets: &'a [InstrumentationTarget],
    locator: &'a dyn ModuleLocator,
}

impl Default for InstrumentationLoader<'static> {
    fn default() -> Self {
        Self {
            targets: SUPPORTED_INSTRUMENTATIONS,
            locator: &LinkedModules,
        }
    }
}

impl<'a> InstrumentationLoader<'a> {
    pub fn new(targets: &'a [InstrumentationTarget], locator: &'a dyn ModuleLocator) -> Self {
        Self { targets, locator }
    }

    /// Activate every requested instrumentation that can be activated.
    ///
    /// Never fails; see the report for what happened to each name.
    pub fn load(&self, config: &DistroConfig) -> LoadedInstrumentations {
        let mut loaded = LoadedInstrumentations {
            instrumentors: Vec::new(),
            report: InstrumentationReport::default(),
        };

        for name in &config.instrumentations {
            let Some(target) = self.targets.iter().find(|t| t.name == name.as_str()) else {
                debug!(library = %name, "Instrumentation not supported, skipping");
                loaded
                    .report
                    .outcomes
                    .push(InstrumentationOutcome::Unsupported { name: name.clone() });
                continue;
            };

            match self.load_one(target, config) {
                Ok(instrumentor) => {
                    info!(library = %name, "Instrumentation activated");
                    loaded.instrumentors.push(instrumentor);
                    loaded
                        .report
                        .outcomes
                        .push(InstrumentationOutcome::Activated { name: name.clone() });
                }
                Err((stage, error)) => {
                    warn!(
                        library = %name,
                        stage = %stage,
                        error = %error,
                        "Failed to load instrumentation"
                    );
                    loaded.report.outcomes.push(InstrumentationOutcome::Failed {
                        name: name.clone(),
                        stage,
                        error,
                    });
                }
            }
        }

        loaded
    }

    fn load_one(
        &self,
        target: &InstrumentationTarget,
        config: &DistroConfig,
    ) -> Result<Box<dyn Instrumentor>, (LoadStage, InstrumentationError)> {
        self.locator
            .locate(target.library)
            .map_err(|e| (LoadStage::Library, e))?;
        self.locator
            .locate(target.adapter)
            .map_err(|e| (LoadStage::Adapter, e))?;

        let mut instrumentor = (target.factory)().map_err(|e| (LoadStage::Instantiate, e))?;
        instrumentor
            .instrument(config)
            .map_err(|e| (LoadStage::Instrument, e))?;

        Ok(instrumentor)
    }
}
