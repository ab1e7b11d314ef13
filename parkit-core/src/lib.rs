pub mod encode;
pub mod error;
pub mod fs;
pub mod gf;
pub mod hash;
pub mod matrix;
pub mod packet;
pub mod par1;
pub mod par2;
pub mod path_safety;
pub mod progress;
pub mod repair;
pub mod set;
pub mod verify;
mod wire;

pub use encode::{Encoder, EncoderConfig, Format};
pub use error::{Error, Result};
pub use verify::Decoder;
