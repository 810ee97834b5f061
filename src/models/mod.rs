pub mod enums;
pub mod filters;
pub mod form;
pub mod metadata;
pub mod visit;

pub use enums::*;
pub use filters::*;
pub use form::*;
pub use metadata::*;
pub use visit::*;
