//! Neural network building blocks.
//!
//! Organized around the [`Module`] trait: a layer owns its parameters
//! and maps tensors to tensors. Only what kernel estimation needs is
//! here: a valid-padding [`Conv2d`], initialization schemes, and the
//! [`Adam`](optim::Adam) optimizer.

mod conv;
pub mod init;
mod module;
pub mod optim;

pub use conv::Conv2d;
pub use module::Module;
pub use optim::{Adam, Optimizer};
