//! Registry of planar projection codes.
//!
//! Maps three letter FITS projection codes to factories producing the
//! corresponding [`Cartographic`] transform. The process-wide registry holds
//! the built-in codes and is built on first use; callers needing extra
//! codes build their own registry with [`ProjectionRegistry::with_defaults`]
//! and [`ProjectionRegistry::register`].

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use super::cartographic::{Ait, Arc as ArcProjection, Car, Cartographic, Sin, Stg, Tan};
use crate::error::SkyMapError;

/// Factory for a cartographic transform.
pub type CartographicFactory = fn() -> Arc<dyn Cartographic>;

static GLOBAL_REGISTRY: Lazy<ProjectionRegistry> = Lazy::new(ProjectionRegistry::with_defaults);

/// Code to factory lookup for planar projections.
#[derive(Debug, Clone, Default)]
pub struct ProjectionRegistry {
    factories: BTreeMap<String, CartographicFactory>,
}

impl ProjectionRegistry {
    /// Registry without any codes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding the built-in codes CAR, TAN, STG, ARC, SIN and AIT.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("CAR", || Arc::new(Car));
        registry.register("TAN", || Arc::new(Tan));
        registry.register("STG", || Arc::new(Stg));
        registry.register("ARC", || Arc::new(ArcProjection));
        registry.register("SIN", || Arc::new(Sin));
        registry.register("AIT", || Arc::new(Ait));
        registry
    }

    /// Process-wide registry of the built-in codes.
    pub fn global() -> &'static ProjectionRegistry {
        &GLOBAL_REGISTRY
    }

    /// Add or replace the factory for `code`.
    pub fn register(&mut self, code: &str, factory: CartographicFactory) {
        self.factories.insert(code.trim().to_uppercase(), factory);
    }

    pub fn contains(&self, code: &str) -> bool {
        self.factories.contains_key(&code.trim().to_uppercase())
    }

    /// Registered codes in alphabetical order.
    pub fn codes(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Instantiate the transform registered under `code`.
    ///
    /// # Returns
    /// * `Err(SkyMapError::InvalidValue)` listing the supported codes if `code` is unknown
    pub fn create(&self, code: &str) -> Result<Arc<dyn Cartographic>, SkyMapError> {
        let key = code.trim().to_uppercase();
        match self.factories.get(&key) {
            Some(factory) => Ok(factory()),
            None => Err(SkyMapError::InvalidValue(format!(
                "Projection code \"{code}\" is not supported, should be one of: {}",
                self.codes().join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Mercator;

    impl Cartographic for Mercator {
        fn code(&self) -> &'static str {
            "MER"
        }

        fn name(&self) -> &'static str {
            "Mercator"
        }

        fn theta0(&self) -> f64 {
            0.0
        }

        fn project(&self, phi: f64, theta: f64) -> Result<(f64, f64), SkyMapError> {
            let t = theta.to_radians();
            Ok((phi, ((std::f64::consts::FRAC_PI_4 + t / 2.0).tan().ln()).to_degrees()))
        }

        fn deproject(&self, x: f64, y: f64) -> Result<(f64, f64), SkyMapError> {
            Ok((x, (2.0 * y.to_radians().exp().atan()).to_degrees() - 90.0))
        }
    }

    #[test]
    fn test_global_registry_codes() {
        let registry = ProjectionRegistry::global();
        assert_eq!(registry.codes(), vec!["AIT", "ARC", "CAR", "SIN", "STG", "TAN"]);
        assert_eq!(registry.create("tan").unwrap().code(), "TAN");
    }

    #[test]
    fn test_unknown_code_lists_supported() {
        let err = ProjectionRegistry::global().create("XYZ").unwrap_err();
        match err {
            SkyMapError::InvalidValue(msg) => {
                assert!(msg.contains("XYZ"));
                assert!(msg.contains("CAR, SIN"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = ProjectionRegistry::with_defaults();
        assert!(!registry.contains("MER"));
        registry.register("MER", || Arc::new(Mercator));
        let proj = registry.create("MER").unwrap();
        assert_eq!(proj.name(), "Mercator");
        let (x, y) = proj.project(10.0, 0.0).unwrap();
        assert!((x - 10.0).abs() < 1e-12 && y.abs() < 1e-12);
        assert!(!ProjectionRegistry::global().contains("MER"));
    }
}
