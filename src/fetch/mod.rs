// src/fetch/mod.rs

pub mod download;
pub mod ftp;
pub mod listing;

pub use download::{download_files, FetchedFile, Downloads};
pub use listing::{fetch_listing, get_remote_filenames, ListingFilter};
