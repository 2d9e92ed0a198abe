mod data_source;
mod document;
mod fact;
mod status;

pub use data_source::*;
pub use document::*;
pub use fact::*;
pub use status::*;
