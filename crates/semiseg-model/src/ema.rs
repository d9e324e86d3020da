//! Exponential-moving-average teacher.
//!
//! The teacher is the student network on the inner (non-differentiable)
//! backend. Every tensor of the teacher is matched to the student tensor with
//! the same [`ParamId`]; trainable parameters follow
//!
//! ```text
//! teacher = decay * teacher + (1 - decay) * student
//! decay   = min(1 - 1 / (step + 1), momentum)
//! ```
//!
//! while non-trainable state, such as normalization running statistics, is
//! copied from the student as is.

use std::collections::{HashMap, HashSet};

use burn::{
    module::{AutodiffModule, Module, ModuleMapper, ModuleVisitor, ParamId},
    tensor::{
        backend::{AutodiffBackend, Backend},
        Tensor,
    },
};
use tracing::{debug, warn};

/// Shadow copy of a student module updated by exponential moving average.
#[derive(Debug)]
pub struct EmaTeacher<B: AutodiffBackend, M: AutodiffModule<B>> {
    model: M::InnerModule,
    momentum: f64,
    step: usize,
}

impl<B: AutodiffBackend, M: AutodiffModule<B>> EmaTeacher<B, M> {
    /// Builds a teacher identical to `student`.
    pub fn new(student: &M, momentum: f64) -> Self {
        Self {
            model: student.valid(),
            momentum,
            step: 0,
        }
    }

    /// The teacher network.
    pub fn model(&self) -> &M::InnerModule {
        &self.model
    }

    /// Number of updates applied so far.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Upper bound of the decay.
    pub fn momentum(&self) -> f64 {
        self.momentum
    }

    /// Decay the next update will use.
    pub fn decay(&self) -> f64 {
        (1.0 - 1.0 / (self.step as f64 + 1.0)).min(self.momentum)
    }

    /// Moves the teacher towards `student` and advances the step counter.
    pub fn update(&mut self, student: &M) {
        let decay = self.decay();

        let mut trainable = TrainableIds::default();
        student.visit(&mut trainable);

        // `valid` folds pending running-state updates into the values it returns
        let mut snapshot = StudentSnapshot {
            tensors: HashMap::new(),
            trainable: trainable.ids,
        };
        student.valid().visit(&mut snapshot);

        let mut interpolate = Interpolate {
            student: snapshot.tensors,
            decay,
            unmatched: 0,
        };
        self.model = self.model.clone().map(&mut interpolate);

        if interpolate.unmatched > 0 || !interpolate.student.is_empty() {
            warn!(
                teacher_only = interpolate.unmatched,
                student_only = interpolate.student.len(),
                "teacher and student tensors do not match"
            );
        }
        debug!(step = self.step, decay, "updated EMA teacher");
        self.step += 1;
    }
}

/// Ids of the student tensors that take gradients.
#[derive(Default)]
struct TrainableIds {
    ids: HashSet<ParamId>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for TrainableIds {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        if tensor.is_require_grad() {
            self.ids.insert(id);
        }
    }
}

/// Student tensors on the inner backend, flattened, keyed by id.
struct StudentSnapshot<B: Backend> {
    tensors: HashMap<ParamId, StudentTensor<B>>,
    trainable: HashSet<ParamId>,
}

struct StudentTensor<B: Backend> {
    value: Tensor<B, 1>,
    trainable: bool,
}

impl<B: Backend> ModuleVisitor<B> for StudentSnapshot<B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        let num_elements = tensor.shape().num_elements();
        self.tensors.insert(
            id,
            StudentTensor {
                value: tensor.clone().reshape([num_elements]),
                trainable: self.trainable.contains(&id),
            },
        );
    }
}

struct Interpolate<B: Backend> {
    student: HashMap<ParamId, StudentTensor<B>>,
    decay: f64,
    unmatched: usize,
}

impl<B: Backend> ModuleMapper<B> for Interpolate<B> {
    fn map_float<const D: usize>(&mut self, id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        let Some(student) = self.student.remove(&id) else {
            self.unmatched += 1;
            return tensor;
        };
        let value = student.value.reshape(tensor.dims());
        if student.trainable {
            tensor.mul_scalar(self.decay) + value.mul_scalar(1.0 - self.decay)
        } else {
            value
        }
    }
}
