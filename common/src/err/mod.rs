pub mod ult_error;

pub use ult_error::UltError;

pub type UltResult<T> = Result<T, UltError>;
