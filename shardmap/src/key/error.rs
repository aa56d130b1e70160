use thiserror::Error;

use super::kind::ShardKeyType;
use super::MAX_BINARY_LEN;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("key is the +inf sentinel and carries no value")]
    MaxHasNoValue,

    #[error("cannot mix keys of type \"{0}\" and \"{1}\"")]
    TypeMismatch(ShardKeyType, ShardKeyType),

    #[error("requested a \"{requested}\" value from a \"{actual}\" key")]
    WrongValueType {
        requested: ShardKeyType,
        actual: ShardKeyType,
    },

    #[error("binary keys are limited to {MAX_BINARY_LEN} bytes, got {0}")]
    BinaryTooLong(usize),

    #[error("raw value of {len} bytes isn't valid for \"{kind}\" keys")]
    InvalidRawLength { kind: ShardKeyType, len: usize },

    #[error("timestamp is outside the encodable range")]
    TimestampOutOfRange,

    #[error("range bounds are equal or out of order")]
    InvalidRange,
}
