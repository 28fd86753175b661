pub mod media;
pub mod overlay;
pub mod record;
