pub mod analysis;
pub mod markup;
pub mod note;
pub mod tag;
