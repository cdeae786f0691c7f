pub mod blocks;
pub mod cmap2final;
pub mod constraint;
pub mod decoder;
pub mod discriminator;
pub mod encoder;
pub mod error;
pub mod stn;
pub mod unwarp;
pub mod uvbw;

pub use error::{ModelError, Result};

pub use cmap2final::{Cmap2Final, Cmap2FinalConfig, Cmap2FinalOutput};
pub use constraint::{ConstraintSpec, ConstraintTable};
pub use decoder::{Decoder, DecoderConfig};
pub use discriminator::{
    ConfDiscriminator, ConfDiscriminatorConfig, ConfidenceActivation, DiscriminatorLosses,
};
pub use encoder::{Encoder, EncoderConfig, Variant};
pub use stn::{AffineLocalization, AffineLocalizationConfig};
pub use unwarp::{ConsistencyMaps, UnwarpNet, UnwarpNetConfig, UnwarpOutput};
pub use uvbw::{UvBwNet, UvBwNetConfig, UvBwOutput};
