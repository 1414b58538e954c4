pub mod decoder;
pub mod error;

pub use decoder::{BcatDecoder, DecodedFile};
pub use error::{DecodeError, DecodeResult};
