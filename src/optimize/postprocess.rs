//! Post-download optimization hooks.

use std::path::Path;
use std::sync::Arc;

use super::{ImageOptimizer, OptimizeBudget, OptimizeError, OptimizeOutcome};
use crate::downloader::PostProcess;
use crate::fills::PaintUsageRecord;
use crate::Dimensions;

/// Optimize to a fixed budget; used for node renders
pub struct BudgetPostProcess {
    optimizer: ImageOptimizer,
    budget: OptimizeBudget,
}

impl BudgetPostProcess {
    /// Optimize every file to `budget`
    pub fn new(optimizer: ImageOptimizer, budget: OptimizeBudget) -> Arc<Self> {
        Arc::new(Self { optimizer, budget })
    }
}

impl PostProcess for BudgetPostProcess {
    fn process(&self, path: &Path) -> Result<OptimizeOutcome, OptimizeError> {
        self.optimizer.optimize(path, &self.budget)
    }
}

/// Optimize an image fill to the largest size its usages need
pub struct FillPostProcess {
    optimizer: ImageOptimizer,
    record: PaintUsageRecord,
    density: f64,
    max_bytes: Option<u64>,
}

impl FillPostProcess {
    /// Size the fill from `record` at `density`
    pub fn new(
        optimizer: ImageOptimizer,
        record: PaintUsageRecord,
        density: f64,
        max_bytes: Option<u64>,
    ) -> Arc<Self> {
        Arc::new(Self {
            optimizer,
            record,
            density,
            max_bytes,
        })
    }
}

impl PostProcess for FillPostProcess {
    fn process(&self, path: &Path) -> Result<OptimizeOutcome, OptimizeError> {
        self.optimizer.optimize_with(path, |original| {
            let native = Dimensions::new(original.original_width, original.original_height);
            let needed = self
                .record
                .max_size(native, self.density)
                .map_err(|e| OptimizeError::BudgetError(e.to_string()))?;
            Ok(OptimizeBudget {
                max_bytes: self.max_bytes,
                max_width: Some(needed.width),
                max_height: Some(needed.height),
            })
        })
    }
}
