mod archive;
mod blob;
mod build_id;
mod bundle;
mod config;
mod crypto_hash;
mod environment;
mod fs;
mod measure;
mod pipeline;
mod timing;

pub use archive::*;
pub use blob::*;
pub use build_id::*;
pub use bundle::*;
pub use config::*;
pub use crypto_hash::*;
pub use environment::*;
pub use fs::*;
pub use measure::*;
pub use pipeline::*;
pub use timing::*;
