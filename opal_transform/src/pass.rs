//! The transform scaffold and pipeline.

use opal_ir::{CompilationAborted, GraphError, MethodBody};

// =============================================================================
// Errors
// =============================================================================

/// Why a transform could not complete.
#[derive(Debug)]
pub enum TransformError {
    /// The transform met a prototype it has no lowering for. On validated
    /// IR this signals a missing capability, not bad input; it surfaces to
    /// the driver.
    NotSupported {
        transform: &'static str,
        operation: String,
    },
    /// A graph edit failed, indicating the input was not validated.
    Graph(GraphError),
    /// The error budget was exceeded while reporting; passes through
    /// unchanged.
    Aborted(CompilationAborted),
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformError::NotSupported { transform, operation } => {
                write!(f, "{}: unsupported operation '{}'", transform, operation)
            }
            TransformError::Graph(err) => write!(f, "graph edit failed: {}", err),
            TransformError::Aborted(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for TransformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransformError::Graph(err) => Some(err),
            TransformError::Aborted(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GraphError> for TransformError {
    fn from(err: GraphError) -> Self {
        TransformError::Graph(err)
    }
}

impl From<CompilationAborted> for TransformError {
    fn from(err: CompilationAborted) -> Self {
        TransformError::Aborted(err)
    }
}

/// Result type for transforms.
pub type TransformResult<T> = Result<T, TransformError>;

// =============================================================================
// Transform trait
// =============================================================================

/// A pure graph-in, graph-out rewrite.
pub trait Transform {
    /// Name for statistics and diagnostics.
    fn name(&self) -> &'static str;

    /// Rewrite a method body. Must be total on validated IR.
    fn apply(&self, body: MethodBody) -> TransformResult<MethodBody>;
}

// =============================================================================
// Pipeline
// =============================================================================

/// A registered pass with its statistics.
struct PassEntry {
    transform: Box<dyn Transform>,
    enabled: bool,
    runs: usize,
}

/// Statistics for one registered pass.
#[derive(Debug, Clone)]
pub struct PassStat {
    pub name: &'static str,
    pub runs: usize,
}

/// Statistics for a pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub passes_run: usize,
}

/// Runs registered transforms in order.
#[derive(Default)]
pub struct TransformPipeline {
    passes: Vec<PassEntry>,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pass at the end of the pipeline.
    pub fn register<T: Transform + 'static>(&mut self, transform: T) {
        self.passes.push(PassEntry {
            transform: Box::new(transform),
            enabled: true,
            runs: 0,
        });
    }

    /// Enable or disable a pass by name.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) {
        for entry in &mut self.passes {
            if entry.transform.name() == name {
                entry.enabled = enabled;
            }
        }
    }

    /// Run every enabled pass once, threading the body through.
    pub fn run(&mut self, mut body: MethodBody) -> TransformResult<(MethodBody, PipelineStats)> {
        let mut stats = PipelineStats::default();
        for entry in &mut self.passes {
            if !entry.enabled {
                continue;
            }
            body = entry.transform.apply(body)?;
            entry.runs += 1;
            stats.passes_run += 1;
        }
        Ok((body, stats))
    }

    /// Per-pass statistics.
    pub fn pass_stats(&self) -> Vec<PassStat> {
        self.passes
            .iter()
            .map(|entry| PassStat {
                name: entry.transform.name(),
                runs: entry.runs,
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use opal_ir::{FlowGraph, Type};

    struct CountBlocks;

    impl Transform for CountBlocks {
        fn name(&self) -> &'static str {
            "count-blocks"
        }
        fn apply(&self, body: MethodBody) -> TransformResult<MethodBody> {
            Ok(body)
        }
    }

    fn empty_body() -> MethodBody {
        MethodBody::new(FlowGraph::new(), Type::void(), None, vec![])
    }

    #[test]
    fn pipeline_runs_registered_passes() {
        let mut pipeline = TransformPipeline::new();
        pipeline.register(CountBlocks);
        let (_, stats) = pipeline.run(empty_body()).unwrap();
        assert_eq!(stats.passes_run, 1);
        assert_eq!(pipeline.pass_stats()[0].runs, 1);
    }

    #[test]
    fn disabled_passes_are_skipped() {
        let mut pipeline = TransformPipeline::new();
        pipeline.register(CountBlocks);
        pipeline.set_enabled("count-blocks", false);
        let (_, stats) = pipeline.run(empty_body()).unwrap();
        assert_eq!(stats.passes_run, 0);
    }
}
