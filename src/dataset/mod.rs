//! MNIST dataset retrieval.
//!
//! Fetches the four gzip-compressed IDX archives from a mirror (or a local
//! cache), decodes them and exposes the split as `ndarray` arrays.

pub mod idx;
pub mod mnist;

pub use mnist::{MnistSource, MnistSplit, NamedArray, ARRAY_NAMES, MNIST_FILES};
