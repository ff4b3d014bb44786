pub mod map;
pub(crate) mod rescale;

pub use map::{Tempo, TempoMap, TimeSignature};
