//! Runtime environments for model servers.
//!
//! A [`VenvSpec`] captures what goes into an environment. Its
//! [`Fingerprint`] is stable under reordering of the requirements file, blank
//! lines and comments, and is the key of the [`EnvironmentCache`].

mod builder;
mod cache;
mod spec;

pub use builder::{EnvironmentBuilder, UvBuilder};
pub use cache::EnvironmentCache;
pub use spec::{resolve_venv_spec, EnvVars, Fingerprint, VenvSpec};
