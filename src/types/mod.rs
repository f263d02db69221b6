//! Type definitions

pub mod contact;
pub mod import_job;
pub mod mapping;
pub mod matching;
pub mod messages;
pub mod progress;
pub mod tenant;

pub use contact::*;
pub use import_job::*;
pub use mapping::*;
pub use matching::*;
pub use messages::*;
pub use progress::*;
pub use tenant::*;
