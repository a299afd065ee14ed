//! Claim-frequency model: Poisson GLM fitted by IRLS, plus deviance scoring.

pub mod deviance;
pub mod poisson;

pub use deviance::*;
pub use poisson::*;
