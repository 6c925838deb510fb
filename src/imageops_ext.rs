//! Small generic helpers over `image` buffers used by the encoder and compositing paths.

pub mod mask;
pub mod padding;
