//! Token decoding: options, logit filters, the fallback ladder and results.

pub mod decoder;
pub mod filters;
pub mod options;
pub mod result;

pub use decoder::{DecodeRequest, Decoder, compression_ratio};
pub use filters::LogitFilter;
pub use options::{DecodingOptions, FallbackPolicy};
pub use result::{DecodingResult, Segment};
