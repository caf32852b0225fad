pub mod echo;
pub mod summary;
