// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod lifecycle;
pub mod strategies;
pub mod utils;

pub use utils::*;
