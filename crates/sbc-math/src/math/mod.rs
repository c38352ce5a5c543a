//! Core math modules.

pub mod binomial;
pub mod gamma;
pub mod linalg;
pub mod normal;
pub mod stable;
pub mod summary;
