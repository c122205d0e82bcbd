//! Launch geometry of a compute actor.

use crate::backend::NdRange;
use crate::error::{ComputeError, Result};

/// Global dimensions, offsets and work-group sizes used for every kernel
/// launch of one compute actor.
///
/// Offsets and local dimensions are optional; when given, they must have one
/// entry per global dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    dimensions: Vec<usize>,
    offsets: Vec<usize>,
    local_dimensions: Vec<usize>,
}

impl SpawnConfig {
    /// Configuration with global dimensions only.
    pub fn new(dimensions: impl Into<Vec<usize>>) -> Self {
        Self {
            dimensions: dimensions.into(),
            offsets: Vec::new(),
            local_dimensions: Vec::new(),
        }
    }

    /// Set global offsets.
    pub fn with_offsets(mut self, offsets: impl Into<Vec<usize>>) -> Self {
        self.offsets = offsets.into();
        self
    }

    /// Set work-group sizes.
    pub fn with_local_dimensions(mut self, local_dimensions: impl Into<Vec<usize>>) -> Self {
        self.local_dimensions = local_dimensions.into();
        self
    }

    /// Global dimensions.
    pub fn dimensions(&self) -> &[usize] {
        &self.dimensions
    }

    /// Global offsets; empty when unset.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Work-group sizes; empty when unset.
    pub fn local_dimensions(&self) -> &[usize] {
        &self.local_dimensions
    }

    /// Check the geometry.
    pub fn validate(&self) -> Result<()> {
        if self.dimensions.is_empty() {
            return Err(ComputeError::config(
                "kernel needs at least 1 global dimension",
            ));
        }
        Self::check_length("offsets", &self.offsets, self.dimensions.len())?;
        Self::check_length("local dimensions", &self.local_dimensions, self.dimensions.len())
    }

    fn check_length(name: &str, values: &[usize], expected: usize) -> Result<()> {
        if !values.is_empty() && values.len() != expected {
            return Err(ComputeError::config(format!(
                "{} vector is not empty, but its size ({}) differs from the number of global dimensions ({})",
                name,
                values.len(),
                expected
            )));
        }
        Ok(())
    }

    /// Element count of an output whose size was not given explicitly:
    /// the product of the global dimensions.
    pub fn default_output_size(&self) -> usize {
        self.dimensions.iter().product()
    }

    /// Geometry in the form backends consume.
    pub fn nd_range(&self) -> NdRange<'_> {
        NdRange {
            global: &self.dimensions,
            offsets: (!self.offsets.is_empty()).then_some(self.offsets.as_slice()),
            local: (!self.local_dimensions.is_empty()).then_some(self.local_dimensions.as_slice()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_configs() {
        assert!(SpawnConfig::new([1024]).validate().is_ok());
        assert!(SpawnConfig::new([4, 4])
            .with_offsets([0, 0])
            .with_local_dimensions([2, 2])
            .validate()
            .is_ok());
        assert!(SpawnConfig::new([8, 8, 8])
            .with_local_dimensions([4, 4, 4])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_empty_dimensions() {
        let err = SpawnConfig::new(Vec::<usize>::new()).validate().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("at least 1 global dimension"));
    }

    #[test]
    fn test_mismatched_lengths() {
        let offsets = SpawnConfig::new([4, 4]).with_offsets([0]).validate();
        assert!(offsets.unwrap_err().to_string().contains("offsets"));

        let local = SpawnConfig::new([4]).with_local_dimensions([2, 2]).validate();
        assert!(local.unwrap_err().to_string().contains("local dimensions"));
    }

    #[test]
    fn test_default_output_size() {
        assert_eq!(SpawnConfig::new([4, 4]).default_output_size(), 16);
        assert_eq!(SpawnConfig::new([1024]).default_output_size(), 1024);
        assert_eq!(SpawnConfig::new([2, 3, 4]).default_output_size(), 24);
    }

    #[test]
    fn test_nd_range() {
        let config = SpawnConfig::new([16]).with_local_dimensions([4]);
        let range = config.nd_range();
        assert_eq!(range.global, &[16]);
        assert_eq!(range.offsets, None);
        assert_eq!(range.local, Some(&[4][..]));
    }
}
