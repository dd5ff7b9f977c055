pub mod crawl;
pub mod login;
pub mod status;
