pub mod category;
pub mod listing;
pub mod media;

pub use category::Category;
pub use listing::Listing;
pub use media::Media;
