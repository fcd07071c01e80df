pub mod addoninfo;
pub mod cache;
pub mod classifier;
pub mod conflict;
pub mod direct_downloader;
pub mod events;
pub mod extract;
pub mod filename;
pub mod http_client;
pub mod library;
pub mod preview;
pub mod queue;
pub mod root_dir;
pub mod vpk;
pub mod workshop;

#[cfg(test)]
mod test_http;
