//! Cross-modal constraint converters.
//!
//! Each converter is a lightweight encoder-decoder mapping one predicted
//! geometric representation to another. During training their outputs are
//! compared against the directly predicted maps to penalize disagreement
//! between branches. Converters may be initialized from pretrained weight
//! records; a missing or malformed record is a construction-time error,
//! never a silently untrained module.

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;
use burn::record::{CompactRecorder, Recorder};
use burn::tensor::activation::tanh;

use crate::decoder::{Decoder, DecoderConfig};
use crate::encoder::{Encoder, EncoderConfig};
use crate::error::ModelError;
use crate::unwarp::ConsistencyMaps;

/// Configuration record for one ordered pair of representations.
#[derive(Config, Debug, PartialEq)]
pub struct ConstraintSpec {
    /// Whether this conversion participates in the consistency branch.
    #[config(default = "true")]
    pub enabled: bool,
    /// Whether to load pretrained weights at construction time.
    #[config(default = "false")]
    pub load_pretrained: bool,
    /// Weight record path (burn file-record convention, no extension).
    pub weights: Option<String>,
}

impl ConstraintSpec {
    /// The weight record path, if pretrained loading is requested.
    pub fn pretrained_path(&self) -> Option<&Path> {
        if self.load_pretrained {
            self.weights.as_deref().map(Path::new)
        } else {
            None
        }
    }

    fn validate(&self, name: &str) -> Result<(), ModelError> {
        if self.enabled && self.load_pretrained && self.weights.is_none() {
            return Err(ModelError::InvalidConfiguration(format!(
                "constraint {name} requests pretrained weights but no path is set"
            )));
        }
        Ok(())
    }
}

/// One record per supported ordered pair of representations.
///
/// The 3D-to-normal and 3D-to-depth conversions share a single submodule
/// ([`ThreeDToNormalDepth`]), so their records must agree on weight loading.
#[derive(Config, Debug, PartialEq)]
pub struct ConstraintTable {
    #[config(default = "ConstraintSpec::new()")]
    pub three_d_to_normal: ConstraintSpec,
    #[config(default = "ConstraintSpec::new()")]
    pub three_d_to_depth: ConstraintSpec,
    #[config(default = "ConstraintSpec::new()")]
    pub normal_to_depth: ConstraintSpec,
    #[config(default = "ConstraintSpec::new()")]
    pub depth_to_normal: ConstraintSpec,
}

impl ConstraintTable {
    /// Check the table for use by a consistency branch.
    ///
    /// The consistency outputs are all-or-nothing, so a table attached to a
    /// network must enable all four pairs; disabling consistency altogether
    /// is done by omitting the table. Pretrained entries must carry a path,
    /// and the two 3D conversions must agree since they share a submodule.
    pub fn validate(&self) -> Result<(), ModelError> {
        let entries = [
            ("threeD->normal", &self.three_d_to_normal),
            ("threeD->depth", &self.three_d_to_depth),
            ("normal->depth", &self.normal_to_depth),
            ("depth->normal", &self.depth_to_normal),
        ];

        for (name, spec) in &entries {
            spec.validate(name)?;
        }

        if let Some((name, _)) = entries.iter().find(|(_, spec)| !spec.enabled) {
            return Err(ModelError::InvalidConfiguration(format!(
                "constraint {name} is disabled; a consistency branch requires all four pairs \
                 (omit the table to disable consistency)"
            )));
        }

        if self.three_d_to_normal.load_pretrained != self.three_d_to_depth.load_pretrained
            || self.three_d_to_normal.weights != self.three_d_to_depth.weights
        {
            return Err(ModelError::InvalidConfiguration(
                "threeD->normal and threeD->depth share one submodule; their weight \
                 records must agree"
                    .into(),
            ));
        }

        Ok(())
    }
}

/// Load a module's weights from a burn file record, failing fast.
fn load_weights<B: Backend, M: Module<B>>(
    module: M,
    path: &Path,
    device: &B::Device,
) -> Result<M, ModelError> {
    tracing::info!("loading pretrained weights from {:?}", path);
    let record = CompactRecorder::new()
        .load(path.to_path_buf(), device)
        .map_err(|source| ModelError::WeightLoad {
            path: PathBuf::from(path),
            source,
        })?;
    Ok(module.load_record(record))
}

/// Converter from a 3D surface map to a normal map and a depth map.
///
/// One shared encoder feeds two full-skip decoders.
#[derive(Module, Debug)]
pub struct ThreeDToNormalDepth<B: Backend> {
    encoder: Encoder<B>,
    normal_decoder: Decoder<B>,
    depth_decoder: Decoder<B>,
}

#[derive(Config, Debug)]
pub struct ThreeDToNormalDepthConfig {
    #[config(default = "16")]
    pub base_channels: usize,
}

impl ThreeDToNormalDepthConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<ThreeDToNormalDepth<B>, ModelError> {
        let enc_config = EncoderConfig::simple(3).with_base_channels(self.base_channels);
        let combine = enc_config.num_stages;
        Ok(ThreeDToNormalDepth {
            encoder: enc_config.init(device),
            normal_decoder: DecoderConfig::new(3)
                .with_combine_num(combine)
                .init(&enc_config, device)?,
            depth_decoder: DecoderConfig::new(1)
                .with_combine_num(combine)
                .init(&enc_config, device)?,
        })
    }
}

impl<B: Backend> ThreeDToNormalDepth<B> {
    /// Returns raw (unbounded) normal and depth maps.
    pub fn forward(&self, three_d: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let (features, bottleneck) = self.encoder.forward(three_d);
        let (normal, _) = self.normal_decoder.forward(&features, bottleneck.clone());
        let (depth, _) = self.depth_decoder.forward(&features, bottleneck);
        (normal, depth)
    }

    /// Replace this converter's weights with a pretrained record.
    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> Result<Self, ModelError> {
        load_weights(self, path, device)
    }
}

/// Converter from a normal map to a depth map.
#[derive(Module, Debug)]
pub struct NormalToDepth<B: Backend> {
    encoder: Encoder<B>,
    decoder: Decoder<B>,
}

#[derive(Config, Debug)]
pub struct NormalToDepthConfig {
    #[config(default = "16")]
    pub base_channels: usize,
}

impl NormalToDepthConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<NormalToDepth<B>, ModelError> {
        let enc_config = EncoderConfig::simple(3).with_base_channels(self.base_channels);
        let combine = enc_config.num_stages;
        Ok(NormalToDepth {
            encoder: enc_config.init(device),
            decoder: DecoderConfig::new(1)
                .with_combine_num(combine)
                .init(&enc_config, device)?,
        })
    }
}

impl<B: Backend> NormalToDepth<B> {
    /// Returns a raw (unbounded) depth map.
    pub fn forward(&self, normal: Tensor<B, 4>) -> Tensor<B, 4> {
        let (features, bottleneck) = self.encoder.forward(normal);
        let (depth, _) = self.decoder.forward(&features, bottleneck);
        depth
    }

    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> Result<Self, ModelError> {
        load_weights(self, path, device)
    }
}

/// Converter from a depth map to a normal map.
#[derive(Module, Debug)]
pub struct DepthToNormal<B: Backend> {
    encoder: Encoder<B>,
    decoder: Decoder<B>,
}

#[derive(Config, Debug)]
pub struct DepthToNormalConfig {
    #[config(default = "16")]
    pub base_channels: usize,
}

impl DepthToNormalConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<DepthToNormal<B>, ModelError> {
        let enc_config = EncoderConfig::simple(1).with_base_channels(self.base_channels);
        let combine = enc_config.num_stages;
        Ok(DepthToNormal {
            encoder: enc_config.init(device),
            decoder: DecoderConfig::new(3)
                .with_combine_num(combine)
                .init(&enc_config, device)?,
        })
    }
}

impl<B: Backend> DepthToNormal<B> {
    /// Returns a raw (unbounded) normal map.
    pub fn forward(&self, depth: Tensor<B, 4>) -> Tensor<B, 4> {
        let (features, bottleneck) = self.encoder.forward(depth);
        let (normal, _) = self.decoder.forward(&features, bottleneck);
        normal
    }

    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> Result<Self, ModelError> {
        load_weights(self, path, device)
    }
}

/// The three converters of an enabled consistency branch.
#[derive(Module, Debug)]
pub struct ConstraintBranch<B: Backend> {
    pub three_d_to_normal_depth: ThreeDToNormalDepth<B>,
    pub normal_to_depth: NormalToDepth<B>,
    pub depth_to_normal: DepthToNormal<B>,
}

impl<B: Backend> ConstraintBranch<B> {
    /// Build the branch from a validated constraint table, loading pretrained
    /// weights eagerly where requested.
    pub fn from_table(table: &ConstraintTable, device: &B::Device) -> Result<Self, ModelError> {
        table.validate()?;

        let mut three_d = ThreeDToNormalDepthConfig::new().init(device)?;
        if let Some(path) = table.three_d_to_normal.pretrained_path() {
            three_d = three_d.load_pretrained(path, device)?;
        }

        let mut normal_to_depth = NormalToDepthConfig::new().init(device)?;
        if let Some(path) = table.normal_to_depth.pretrained_path() {
            normal_to_depth = normal_to_depth.load_pretrained(path, device)?;
        }

        let mut depth_to_normal = DepthToNormalConfig::new().init(device)?;
        if let Some(path) = table.depth_to_normal.pretrained_path() {
            depth_to_normal = depth_to_normal.load_pretrained(path, device)?;
        }

        Ok(Self {
            three_d_to_normal_depth: three_d,
            normal_to_depth,
            depth_to_normal,
        })
    }

    /// Run all conversions off the first-stage geometry predictions.
    ///
    /// Every reconstructed map is bounded by the same saturating
    /// nonlinearity as the direct predictions.
    pub fn forward(
        &self,
        three_d: Tensor<B, 4>,
        normal: Tensor<B, 4>,
        depth: Tensor<B, 4>,
    ) -> ConsistencyMaps<B> {
        let (normal_from_three_d, depth_from_three_d) =
            self.three_d_to_normal_depth.forward(three_d);
        let normal_from_depth = self.depth_to_normal.forward(depth);
        let depth_from_normal = self.normal_to_depth.forward(normal);

        ConsistencyMaps {
            normal_from_three_d: tanh(normal_from_three_d),
            depth_from_three_d: tanh(depth_from_three_d),
            normal_from_depth: tanh(normal_from_depth),
            depth_from_normal: tanh(depth_from_normal),
        }
    }
}
