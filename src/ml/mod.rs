// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All network code lives here:
//
//   model.rs      — ConvTrunk shared by two networks:
//                   • AcqInvNet: per-scanner calibration and a
//                     2-D embedding head
//                   • PatchCnn: tissue logits from raw patches
//                   plus the contrastive pair loss
//
//   trainer.rs    — One repetition of contrastive pair training
//
//   network.rs    — The acquisition-invariant network as the
//                   experiment sees it: build, train, propagate
//
//   classifier.rs — CNN and logistic-regression classifiers,
//                   k-fold cross-validation, error rates
//
//   segmenter.rs  — Whole-image segmentation with any of the
//                   classifiers
//
// Training runs on Autodiff<Wgpu>; evaluation drops to the inner
// backend through `valid()`.

/// Network architectures and the contrastive loss
pub mod model;

/// Contrastive training loop over patch pairs
pub mod trainer;

/// Build / train / propagate the acquisition-invariant network
pub mod network;

/// Downstream tissue and scanner classifiers
pub mod classifier;

/// Sliding-patch image segmentation
pub mod segmenter;

pub type TrainBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

pub fn default_device() -> burn::backend::wgpu::WgpuDevice {
    burn::backend::wgpu::WgpuDevice::default()
}
