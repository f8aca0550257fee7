pub mod stream;

pub use stream::{BodyReader, BodyWriter, MessageBody, DEFAULT_COPY_CHUNK, DEFAULT_MAX_BODY_BYTES};
