pub mod deploy;
pub mod migrate_proxy;
pub mod replace_image;
