//! Parallel execution of independent aggregation requests.

use rayon::prelude::*;

use crate::aggregator::{AggregationConfig, PriorityAggregator};
use crate::error::AggregationError;
use crate::result::AggregationResult;
use crate::row::AggregationRow;

/// One request together with the rows it aggregates.
#[derive(Debug, Clone)]
pub struct AggregationJob {
    pub config: AggregationConfig,
    pub rows: Vec<AggregationRow>,
}

/// Runs each job on the rayon pool. Results come back in job order, and one
/// job failing does not affect the others.
pub fn compute_batch(jobs: Vec<AggregationJob>) -> Vec<Result<AggregationResult, AggregationError>> {
    jobs.into_par_iter()
        .map(|job| PriorityAggregator::new(&job.config).compute_rows(job.rows))
        .collect()
}
