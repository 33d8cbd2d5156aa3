//! Container modules and the model contract used by pruning.

use std::fmt;

use nalgebra::DMatrix;
use tracing::debug;

use super::module::Module;
use crate::autograd::Tensor;

/// An ordered layer sequence that pruning can inspect and mutate.
///
/// Layer order is the contract for matching masks to layers: the
/// low-rank subset is always enumerated in model order.
pub trait Model: Module {
    fn layers(&self) -> &[Box<dyn Module>];

    fn layers_mut(&mut self) -> &mut [Box<dyn Module>];

    /// Drop any cached state derived from layer shapes.
    ///
    /// Called after every structural change (e.g. a squeeze).
    fn invalidate(&mut self);

    /// Positions of the layers exposing the low-rank capability.
    fn low_rank_indices(&self) -> Vec<usize> {
        self.layers()
            .iter()
            .enumerate()
            .filter_map(|(i, layer)| layer.as_low_rank().map(|_| i))
            .collect()
    }
}

/// One step of a compiled [`ExecutionPlan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub index: usize,
    pub kind: &'static str,
    /// Live rank for low-rank layers.
    pub rank: Option<usize>,
    pub parameters: usize,
}

/// Shape summary of a [`Sequential`], computed once and reused until the
/// model is invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionPlan {
    steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    fn build(modules: &[Box<dyn Module>]) -> Self {
        let steps = modules
            .iter()
            .enumerate()
            .map(|(index, m)| PlanStep {
                index,
                kind: m.kind(),
                rank: m.as_low_rank().map(|l| l.working_rank()),
                parameters: m.num_parameters(),
            })
            .collect();
        Self { steps }
    }

    #[must_use]
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    #[must_use]
    pub fn total_parameters(&self) -> usize {
        self.steps.iter().map(|s| s.parameters).sum()
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            write!(f, "[{}] {}", step.index, step.kind)?;
            if let Some(rank) = step.rank {
                write!(f, " rank={rank}")?;
            }
            writeln!(f, " params={}", step.parameters)?;
        }
        write!(f, "total params={}", self.total_parameters())
    }
}

/// Sequential container for chaining modules.
///
/// Modules are executed in order, with each module's output
/// becoming the next module's input.
///
/// # Example
///
/// ```
/// use lowrank::autograd::Tensor;
/// use lowrank::nn::{LowRankLinear, Model, Module, ReLU, Sequential};
///
/// let model = Sequential::new()
///     .add(LowRankLinear::with_seed(8, 16, 4, Some(0)))
///     .add(ReLU::new())
///     .add(LowRankLinear::with_seed(16, 2, 2, Some(1)));
///
/// assert_eq!(model.low_rank_indices(), vec![0, 2]);
/// assert_eq!(model.forward(&Tensor::ones(&[3, 8])).shape(), &[3, 2]);
/// ```
pub struct Sequential {
    modules: Vec<Box<dyn Module>>,
    training: bool,
    plan: Option<ExecutionPlan>,
}

impl Sequential {
    /// Create an empty Sequential container.
    #[must_use]
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            training: true,
            plan: None,
        }
    }

    /// Add a module to the sequence.
    #[allow(clippy::should_implement_trait)]
    #[must_use]
    pub fn add<M: Module + 'static>(mut self, module: M) -> Self {
        self.modules.push(Box::new(module));
        self.plan = None;
        self
    }

    #[must_use]
    pub fn add_boxed(mut self, module: Box<dyn Module>) -> Self {
        self.modules.push(module);
        self.plan = None;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Build (or reuse) the cached execution plan.
    pub fn compile(&mut self) -> &ExecutionPlan {
        let modules = &self.modules;
        self.plan.get_or_insert_with(|| ExecutionPlan::build(modules))
    }

    /// The cached plan, if compiled and not invalidated since.
    #[must_use]
    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.plan.as_ref()
    }

    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.plan.is_some()
    }

    /// Replace every layer that can factorize itself with its rank-`rank`
    /// low-rank version. Other layers are left as they are.
    ///
    /// Returns the number of layers replaced.
    pub fn factorize_in_place(&mut self, rank: usize) -> usize {
        let mut replaced = 0;
        for slot in &mut self.modules {
            if let Some(low_rank) = slot.factorize(rank) {
                *slot = low_rank;
                replaced += 1;
            }
        }
        if replaced > 0 {
            self.invalidate();
        }
        replaced
    }
}

impl Default for Sequential {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Sequential {
    fn forward(&self, input: &Tensor) -> Tensor {
        self.modules
            .iter()
            .fold(input.clone(), |x, module| module.forward(&x))
    }

    fn forward_f64(&self, input: &DMatrix<f64>) -> DMatrix<f64> {
        self.modules
            .iter()
            .fold(input.clone(), |x, module| module.forward_f64(&x))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        self.modules.iter().flat_map(|m| m.parameters()).collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.modules
            .iter_mut()
            .flat_map(|m| m.parameters_mut())
            .collect()
    }

    fn train(&mut self) {
        self.training = true;
        for module in &mut self.modules {
            module.train();
        }
    }

    fn eval(&mut self) {
        self.training = false;
        for module in &mut self.modules {
            module.eval();
        }
    }

    fn training(&self) -> bool {
        self.training
    }

    fn kind(&self) -> &'static str {
        "Sequential"
    }
}

impl Model for Sequential {
    fn layers(&self) -> &[Box<dyn Module>] {
        &self.modules
    }

    fn layers_mut(&mut self) -> &mut [Box<dyn Module>] {
        &mut self.modules
    }

    fn invalidate(&mut self) {
        if self.plan.take().is_some() {
            debug!(layers = self.modules.len(), "invalidated execution plan");
        }
    }
}

impl fmt::Debug for Sequential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequential")
            .field("num_modules", &self.modules.len())
            .field("training", &self.training)
            .field("compiled", &self.plan.is_some())
            .finish()
    }
}
