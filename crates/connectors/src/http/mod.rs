pub mod layout;
pub mod source;

pub use layout::ResponseLayout;
pub use source::HttpAdSource;
