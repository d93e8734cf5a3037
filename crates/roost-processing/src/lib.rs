//! Roost Processing Library
//!
//! Turns raw uploads into the stored variant set: upload validation, EXIF
//! orientation, decoding and the canonical WebP encoding of every variant.

pub mod compression;
pub mod error;
pub mod orientation;
pub mod transcoder;
pub mod validator;

pub use compression::WebpEncoder;
pub use error::TranscodeError;
pub use orientation::ImageOrientation;
pub use transcoder::{CanonicalImage, ImageTranscoder, TranscodedSet};
pub use validator::{sanitize_filename, MediaValidator, ValidationError};
