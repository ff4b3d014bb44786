pub(crate) mod materializer;
pub mod objects;

pub use objects::{
    Chord, CompositeObject, Note, NotePlaybackData, ObjectExpander, RegisteredParameter,
    RegisteredParameterKind, TimedObject,
};
