pub mod column;
pub mod definition;
pub mod entity;
pub mod tenant;

pub use column::*;
pub use definition::*;
pub use entity::*;
pub use tenant::*;
