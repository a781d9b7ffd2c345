pub mod claim;
pub mod publish;
pub mod record_image;
