//! The adversarial pair: downscaling generator and patch discriminator.

mod discriminator;
mod generator;

pub use discriminator::Discriminator;
pub use generator::Generator;
