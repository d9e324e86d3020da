//! ReCo: mean-teacher semi-supervised segmentation with regional contrast.
//!
//! One training step combines three losses on a labeled and an unlabeled batch:
//!
//! - supervised cross-entropy of the student on the labeled batch
//! - pseudo-label cross-entropy of the student on the unlabeled batch, with
//!   targets from the EMA teacher
//! - regional contrast over the representations of both batches, using ground
//!   truth on the labeled half and confident pseudo-labels on the unlabeled half
//!
//! The student is owned by the caller (it is usually moved through an
//! optimizer every step); [`ReCo`] owns the teacher and the losses.

use burn::{
    module::AutodiffModule,
    tensor::{activation::softmax, backend::AutodiffBackend, ElementConversion, Int, Tensor},
};
use semiseg_loss::{PseudoLabelLoss, RegionalContrastLoss, SegmentationCrossEntropyLoss};
use semiseg_ops::{label_onehot, resize, resize_labels, ResizeMode};
use tracing::debug;

use crate::{
    config::ReCoConfig,
    ema::EmaTeacher,
    error::SemiSegResult,
    model::{LabeledBatch, SegmentationModel, SegmentationOutput, UnlabeledBatch},
};

/// Losses of one ReCo step.
#[derive(Debug, Clone)]
pub struct ReCoOutput<B: AutodiffBackend> {
    /// `sup_loss + unsupervised_weight * unsup_loss + contrast_weight * reco_loss`
    pub loss: Tensor<B, 1>,
    /// Supervised cross-entropy on the labeled batch.
    pub sup_loss: Tensor<B, 1>,
    /// Pseudo-label loss on the unlabeled batch.
    pub unsup_loss: Tensor<B, 1>,
    /// Regional contrastive loss on both batches.
    pub reco_loss: Tensor<B, 1>,
}

/// Teacher pseudo-labels for an unlabeled batch.
#[derive(Debug, Clone)]
pub struct PseudoLabels<B: AutodiffBackend> {
    /// Most probable class per pixel, `[batch_size, height, width]`.
    pub labels: Tensor<B, 3, Int>,
    /// Probability of that class, `[batch_size, height, width]`.
    pub confidence: Tensor<B, 3>,
}

/// Semi-supervised segmentor with an EMA teacher and regional contrast.
#[derive(Debug)]
pub struct ReCo<B: AutodiffBackend, M: AutodiffModule<B>> {
    config: ReCoConfig,
    teacher: EmaTeacher<B, M>,
    supervised: SegmentationCrossEntropyLoss,
    unsupervised: PseudoLabelLoss,
    contrast: RegionalContrastLoss,
}

impl<B, M> ReCo<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SegmentationModel<B>,
    M::InnerModule: SegmentationModel<B::InnerBackend>,
{
    /// Validates `config` and builds the teacher as a copy of `student`.
    ///
    /// # Errors
    ///
    /// Returns [`SemiSegError::InvalidConfiguration`](crate::SemiSegError::InvalidConfiguration)
    /// if `config` is out of range.
    pub fn new(config: ReCoConfig, student: &M) -> SemiSegResult<Self> {
        config.validate()?;
        Ok(Self {
            teacher: EmaTeacher::new(student, config.momentum),
            supervised: config.cross_entropy_config().init(),
            unsupervised: config.pseudo_label_config().init(),
            contrast: config.contrast_config().init(),
            config,
        })
    }

    /// The configuration this segmentor was built with.
    pub fn config(&self) -> &ReCoConfig {
        &self.config
    }

    /// The EMA teacher.
    pub fn teacher(&self) -> &EmaTeacher<B, M> {
        &self.teacher
    }

    /// Student logits and representations.
    pub fn main_forward(&self, student: &M, images: Tensor<B, 4>) -> SegmentationOutput<B> {
        student.forward(images)
    }

    /// Teacher logits, computed without gradient tracking.
    pub fn ema_forward(&self, images: Tensor<B, 4>) -> Tensor<B::InnerBackend, 4> {
        self.teacher.model().forward(images.inner()).logits
    }

    /// Pseudo-labels of the teacher at the resolution of `images`.
    pub fn pseudo_labels(&self, images: Tensor<B, 4>) -> PseudoLabels<B> {
        let [batch_size, _, height, width] = images.dims();
        let logits = resize(
            self.ema_forward(images),
            [height, width],
            ResizeMode::Bilinear,
            self.config.align_corners,
        );
        let (confidence, labels) = softmax(logits, 1).max_dim_with_indices(1);

        PseudoLabels {
            labels: Tensor::from_inner(labels.reshape([batch_size, height, width])),
            confidence: Tensor::from_inner(confidence.reshape([batch_size, height, width])),
        }
    }

    /// Runs one training step and returns its losses.
    ///
    /// The caller backpropagates `loss`, steps its optimizer and then calls
    /// [`update_teacher`](Self::update_teacher) with the updated student.
    pub fn forward_train(
        &self,
        student: &M,
        labeled: &LabeledBatch<B>,
        unlabeled: &UnlabeledBatch<B>,
    ) -> ReCoOutput<B> {
        let pseudo = self.pseudo_labels(unlabeled.images.clone());

        let labeled_out = self.main_forward(student, labeled.images.clone());
        let unlabeled_out = self.main_forward(student, unlabeled.images.clone());

        let sup_loss = self
            .supervised
            .forward(labeled_out.logits.clone(), labeled.labels.clone());
        let unsup_loss = self.unsupervised.forward(
            unlabeled_out.logits.clone(),
            pseudo.labels.clone(),
            pseudo.confidence.clone(),
        );
        let reco_loss = self.contrast_loss(&labeled_out, &labeled.labels, &unlabeled_out, &pseudo);

        debug!(
            sup = sup_loss.clone().into_scalar().elem::<f64>(),
            unsup = unsup_loss.clone().into_scalar().elem::<f64>(),
            reco = reco_loss.clone().into_scalar().elem::<f64>(),
            "ReCo step losses"
        );

        let loss = sup_loss.clone()
            + unsup_loss.clone().mul_scalar(self.config.unsupervised_weight)
            + reco_loss.clone().mul_scalar(self.config.contrast_weight);

        ReCoOutput {
            loss,
            sup_loss,
            unsup_loss,
            reco_loss,
        }
    }

    /// Moves the teacher towards `student` by one EMA step.
    pub fn update_teacher(&mut self, student: &M) {
        self.teacher.update(student);
    }

    fn contrast_loss(
        &self,
        labeled: &SegmentationOutput<B>,
        labels: &Tensor<B, 3, Int>,
        unlabeled: &SegmentationOutput<B>,
        pseudo: &PseudoLabels<B>,
    ) -> Tensor<B, 1> {
        let [_, _, height, width] = labeled.representations.dims();
        let size = [height, width];
        let num_classes = self.config.num_classes;
        let align_corners = self.config.align_corners;

        let labels_l = resize_labels(labels.clone(), size);
        let labels_u = resize_labels(pseudo.labels.clone(), size);

        let mask_l = labels_l
            .clone()
            .not_equal_elem(self.config.ignore_index)
            .float()
            .unsqueeze_dim::<4>(1);
        let mask_u = resize(
            pseudo.confidence.clone().unsqueeze_dim::<4>(1),
            size,
            ResizeMode::Nearest,
            align_corners,
        )
        .greater_equal_elem(self.config.weak_threshold)
        .float();

        let probabilities = Tensor::cat(
            vec![
                softmax(labeled.logits.clone().detach(), 1),
                softmax(unlabeled.logits.clone().detach(), 1),
            ],
            0,
        );

        self.contrast.forward(
            Tensor::cat(
                vec![
                    labeled.representations.clone(),
                    unlabeled.representations.clone(),
                ],
                0,
            ),
            Tensor::cat(
                vec![
                    label_onehot(labels_l, num_classes),
                    label_onehot(labels_u, num_classes),
                ],
                0,
            ),
            Tensor::cat(vec![mask_l, mask_u], 0),
            resize(probabilities, size, ResizeMode::Bilinear, align_corners),
        )
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{TensorData, Tolerance};

    use super::*;
    use crate::{
        probe::{LinearProbeSegmenter, LinearProbeSegmenterConfig},
        tests::TestAutodiffBackend,
        SemiSegError,
    };

    type Student = LinearProbeSegmenter<TestAutodiffBackend>;

    fn config() -> ReCoConfig {
        ReCoConfig::new(3)
            .with_num_queries(8)
            .with_num_negatives(4)
            .with_seed(Some(3))
    }

    fn images(offset: f32) -> Tensor<TestAutodiffBackend, 4> {
        let values: Vec<f32> = (0..2 * 3 * 4 * 4)
            .map(|i| (i as f32 * 0.37 + offset).sin())
            .collect();
        Tensor::from_data(TensorData::new(values, [2, 3, 4, 4]), &Default::default())
    }

    fn batches() -> (LabeledBatch<TestAutodiffBackend>, UnlabeledBatch<TestAutodiffBackend>) {
        let device = Default::default();
        let labels = Tensor::<TestAutodiffBackend, 3, Int>::from_ints(
            [
                [[0, 0, 1, 1], [0, 0, 1, 1], [2, 2, -1, -1], [2, 2, 1, 1]],
                [[1, 1, 2, 2], [1, 1, 2, 2], [0, 0, 0, 0], [-1, 0, 0, 0]],
            ],
            &device,
        );
        (
            LabeledBatch {
                images: images(0.0),
                labels,
            },
            UnlabeledBatch {
                images: images(1.3),
            },
        )
    }

    fn student() -> Student {
        LinearProbeSegmenterConfig::new(3, 6, 3).init(&Default::default())
    }

    #[test]
    fn reco_new_rejects_invalid_config() {
        let result = ReCo::new(ReCoConfig::new(3).with_temperature(-1.0), &student());

        assert!(matches!(
            result,
            Err(SemiSegError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn reco_forward_train_combines_weighted_losses() {
        let student = student();
        let reco = ReCo::new(
            config()
                .with_unsupervised_weight(0.5)
                .with_contrast_weight(2.0),
            &student,
        )
        .unwrap();
        let (labeled, unlabeled) = batches();

        let output = reco.forward_train(&student, &labeled, &unlabeled);

        let scalar = |t: Tensor<TestAutodiffBackend, 1>| t.into_scalar().elem::<f32>();
        let sup = scalar(output.sup_loss);
        let unsup = scalar(output.unsup_loss);
        let contrast = scalar(output.reco_loss);
        let total = scalar(output.loss);

        assert!(sup.is_finite() && sup > 0.0, "sup loss {sup}");
        assert!(unsup.is_finite() && unsup >= 0.0, "unsup loss {unsup}");
        assert!(contrast.is_finite() && contrast >= 0.0, "reco loss {contrast}");
        let expected = sup + 0.5 * unsup + 2.0 * contrast;
        assert!((total - expected).abs() < 1e-4, "{total} != {expected}");
    }

    #[test]
    fn reco_forward_train_backpropagates_into_student() {
        let student = student();
        let reco = ReCo::new(config(), &student).unwrap();
        let (labeled, unlabeled) = batches();

        let output = reco.forward_train(&student, &labeled, &unlabeled);
        let grads = output.loss.backward();

        assert!(student.embed.weight.val().grad(&grads).is_some());
        assert!(student.classifier.weight.val().grad(&grads).is_some());
    }

    #[test]
    fn reco_pseudo_labels_follow_teacher_argmax() {
        let student = student();
        let reco = ReCo::new(config(), &student).unwrap();
        let images = images(0.7);

        let pseudo = reco.pseudo_labels(images.clone());
        let logits = reco.ema_forward(images);
        let (confidence, labels) = softmax(logits, 1).max_dim_with_indices(1);

        assert_eq!(pseudo.labels.dims(), [2, 4, 4]);
        pseudo
            .labels
            .inner()
            .into_data()
            .assert_eq(&labels.reshape([2, 4, 4]).into_data(), true);
        pseudo.confidence.inner().into_data().assert_approx_eq::<f32>(
            &confidence.reshape([2, 4, 4]).into_data(),
            Tolerance::default(),
        );
    }

    #[test]
    fn reco_teacher_matches_student_until_updated() {
        let student = student();
        let mut reco = ReCo::new(config(), &student).unwrap();
        let images = images(0.2);

        let teacher_logits = reco.ema_forward(images.clone());
        let student_logits = reco.main_forward(&student, images).logits.inner();
        teacher_logits
            .into_data()
            .assert_approx_eq::<f32>(&student_logits.into_data(), Tolerance::default());

        reco.update_teacher(&student);
        assert_eq!(reco.teacher().step(), 1);
    }
}
