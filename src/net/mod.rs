pub mod multipart;
pub mod uploader;
