//! Module lookup for instrumentation targets
//!
//! Rust links everything at build time, so "is this module available" is a
//! question about which cargo features were compiled in.

use super::{InstrumentationError, HYPER_ADAPTER, REQWEST_ADAPTER};

/// Answers whether a module can be used
pub trait ModuleLocator {
    fn locate(&self, module: &str) -> Result<(), InstrumentationError>;
}

/// Locator backed by the features this crate was built with
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkedModules;

impl LinkedModules {
    /// Every library and adapter module compiled into this build
    pub fn modules() -> Vec<&'static str> {
        let mut modules = Vec::new();
        if cfg!(feature = "hyper") {
            modules.push("hyper");
        }
        if cfg!(feature = "instrument-hyper") {
            modules.push(HYPER_ADAPTER);
        }
        if cfg!(feature = "reqwest") {
            modules.push("reqwest");
        }
        if cfg!(feature = "instrument-reqwest") {
            modules.push(REQWEST_ADAPTER);
        }
        modules
    }
}

impl ModuleLocator for LinkedModules {
    fn locate(&self, module: &str) -> Result<(), InstrumentationError> {
        if Self::modules().contains(&module) {
            Ok(())
        } else {
            Err(InstrumentationError::ModuleNotFound(module.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_module_not_found() {
        let err = LinkedModules.locate("flask").unwrap_err();
        assert_eq!(err, InstrumentationError::ModuleNotFound("flask".into()));
    }

    #[cfg(feature = "instrument-hyper")]
    #[test]
    fn test_hyper_library_and_adapter_linked() {
        assert!(LinkedModules.locate("hyper").is_ok());
        assert!(LinkedModules.locate(HYPER_ADAPTER).is_ok());
    }
}
