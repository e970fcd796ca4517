pub mod common_io; // buffered text IO, gzip-aware
pub mod ematrix; // expression matrix loader
pub mod error; // typed failure kinds
pub mod pairwise; // shared-sample filtering for row pairs
pub mod similarity; // pairwise similarity kernels
